use std::env;
use std::time::Duration;

/// Intake pipeline configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// File extension accepted for upload (default: ".pbit")
    pub allowed_extension: String,

    /// Maximum file size in bytes (default: 30 MB)
    pub max_file_size: usize,

    /// Maximum number of files per intake batch (default: 10)
    pub max_batch_files: usize,

    /// Enable VirusTotal scanning (default: false)
    pub enable_virus_scan: bool,

    /// VirusTotal API key; scanning stays off without it
    pub virustotal_api_key: Option<String>,

    /// VirusTotal API base URL (default: public v3 endpoint)
    pub virustotal_api_url: String,

    /// Delay between analysis polls (default: 2s)
    pub scan_poll_interval: Duration,

    /// Total time allowed for one analysis (default: 60s)
    pub scan_max_wait: Duration,

    /// Threshold and chunk size for block uploads (default: 4 MB)
    pub upload_block_size: usize,

    /// Concurrent uploads per batch (default: 1, i.e. sequential)
    pub upload_concurrency: usize,

    /// How long finished batches stay queryable (default: 300s)
    pub progress_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            allowed_extension: ".pbit".to_string(),
            max_file_size: 30 * 1024 * 1024, // 30 MB
            max_batch_files: 10,
            enable_virus_scan: false,
            virustotal_api_key: None,
            virustotal_api_url: "https://www.virustotal.com/api/v3".to_string(),
            scan_poll_interval: Duration::from_millis(2000),
            scan_max_wait: Duration::from_millis(60_000),
            upload_block_size: 4 * 1024 * 1024, // 4 MB
            upload_concurrency: 1,
            progress_ttl: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            allowed_extension: env::var("ALLOWED_EXTENSION").unwrap_or(default.allowed_extension),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            max_batch_files: env::var("MAX_BATCH_FILES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_batch_files),

            enable_virus_scan: env::var("ENABLE_VIRUS_SCAN")
                .map(|v| v == "true")
                .unwrap_or(default.enable_virus_scan),

            virustotal_api_key: env::var("VIRUSTOTAL_API_KEY")
                .ok()
                .filter(|v| !v.is_empty()),

            virustotal_api_url: env::var("VIRUSTOTAL_API_URL").unwrap_or(default.virustotal_api_url),

            scan_poll_interval: env::var("SCAN_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.scan_poll_interval),

            scan_max_wait: env::var("SCAN_MAX_WAIT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.scan_max_wait),

            upload_block_size: env::var("UPLOAD_BLOCK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.upload_block_size),

            upload_concurrency: env::var("UPLOAD_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&v| v > 0)
                .unwrap_or(default.upload_concurrency),

            progress_ttl: env::var("PROGRESS_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.progress_ttl),
        }
    }

    /// Create config for development and tests (no virus scanning, fast polls)
    pub fn development() -> Self {
        Self {
            enable_virus_scan: false,
            virustotal_api_key: None,
            scan_poll_interval: Duration::from_millis(10),
            scan_max_wait: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Scanning runs only when the flag is on AND a key is present
    pub fn virus_scan_active(&self) -> bool {
        self.enable_virus_scan
            && self
                .virustotal_api_key
                .as_deref()
                .is_some_and(|key| !key.is_empty())
    }
}
