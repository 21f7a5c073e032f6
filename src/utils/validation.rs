#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates one candidate file against the intake rules.
///
/// Rules apply in order: a usable file name must be present, the name must
/// carry the allowed extension (case-insensitive), and the content must not
/// exceed the size limit. The first violation wins.
pub fn validate_candidate(
    file_name: Option<&str>,
    size: usize,
    allowed_extension: &str,
    max_file_size: usize,
) -> Result<(), ValidationError> {
    let name = match file_name {
        Some(n) if !n.is_empty() => n,
        _ => {
            return Err(ValidationError {
                code: "MISSING_FILE",
                message: "Please select a file".to_string(),
            });
        }
    };

    if !name
        .to_lowercase()
        .ends_with(&allowed_extension.to_lowercase())
    {
        return Err(ValidationError {
            code: "INVALID_TYPE",
            message: format!("File must be of type {}", allowed_extension),
        });
    }

    if size > max_file_size {
        return Err(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File is too large. Maximum size: {}MB",
                max_size_mb(max_file_size)
            ),
        });
    }

    Ok(())
}

fn max_size_mb(max_file_size: usize) -> u64 {
    (max_file_size as f64 / 1024.0 / 1024.0).round() as u64
}
