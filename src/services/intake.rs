use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::services::progress::{FileState, ProgressRegistry};
use crate::services::scanner::{ScanStage, ScanVerdict, VirusScanner};
use crate::services::storage::StorageService;
use crate::utils::validation::validate_candidate;

const BLOCKED_BY_PEER: &str =
    "Upload blocked: another file in this batch failed the security scan";

/// One multipart part as received by the intake endpoint
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub file_name: Option<String>,
    pub content: Bytes,
}

/// Per-file outcome, in the same order the files were submitted
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntakeResult {
    pub file_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntakeResult {
    fn success(file_name: String, object_key: String) -> Self {
        Self {
            file_name,
            success: true,
            object_key: Some(object_key),
            error: None,
        }
    }

    fn failure(file_name: String, error: String) -> Self {
        Self {
            file_name,
            success: false,
            object_key: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntakeSummary {
    pub batch_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Whether any file in the batch was actually scanned
    pub scanned: bool,
    pub message: String,
    pub results: Vec<IntakeResult>,
}

struct CandidateFile {
    index: usize,
    token: Uuid,
    name: String,
    content: Bytes,
}

/// Orchestrates one batch end to end: validation, scanning, the batch gate,
/// and the uploads. Scans run sequentially; a single flagged or unscannable
/// file blocks every upload in the batch.
pub struct IntakeService {
    storage: Arc<dyn StorageService>,
    scanner: Arc<dyn VirusScanner>,
    progress: Arc<ProgressRegistry>,
    config: AppConfig,
}

impl IntakeService {
    pub fn new(
        storage: Arc<dyn StorageService>,
        scanner: Arc<dyn VirusScanner>,
        progress: Arc<ProgressRegistry>,
        config: AppConfig,
    ) -> Self {
        Self {
            storage,
            scanner,
            progress,
            config,
        }
    }

    pub async fn run_batch(&self, batch_id: Uuid, candidates: Vec<RawCandidate>) -> IntakeSummary {
        tracing::info!(
            "📥 Intake batch {} started with {} file(s)",
            batch_id,
            candidates.len()
        );

        let labeled: Vec<(Uuid, String, RawCandidate)> = candidates
            .into_iter()
            .map(|candidate| {
                let display = candidate
                    .file_name
                    .clone()
                    .unwrap_or_else(|| "unnamed".to_string());
                (Uuid::new_v4(), display, candidate)
            })
            .collect();

        let roster: Vec<(Uuid, String)> = labeled
            .iter()
            .map(|(token, name, _)| (*token, name.clone()))
            .collect();
        self.progress.begin_batch(batch_id, &roster);

        let mut outcomes: Vec<Option<IntakeResult>> = vec![None; labeled.len()];
        let mut admitted: Vec<CandidateFile> = Vec::new();

        for (index, (token, display_name, candidate)) in labeled.into_iter().enumerate() {
            match validate_candidate(
                candidate.file_name.as_deref(),
                candidate.content.len(),
                &self.config.allowed_extension,
                self.config.max_file_size,
            ) {
                Ok(()) => admitted.push(CandidateFile {
                    index,
                    token,
                    name: display_name,
                    content: candidate.content,
                }),
                Err(err) => {
                    tracing::warn!("🚫 Rejected {}: {}", display_name, err);
                    self.progress.set_state(
                        batch_id,
                        token,
                        FileState::Rejected {
                            message: err.message.clone(),
                        },
                    );
                    outcomes[index] = Some(IntakeResult::failure(display_name, err.message));
                }
            }
        }

        // Scan sequentially so one key stays within its rate budget
        let mut verdicts: Vec<ScanVerdict> = Vec::with_capacity(admitted.len());
        for file in &admitted {
            let token = file.token;
            let on_stage = |stage: ScanStage, message: &str| {
                self.progress.set_state(
                    batch_id,
                    token,
                    FileState::Scanning {
                        stage,
                        message: message.to_string(),
                    },
                );
            };

            let verdict = match self
                .scanner
                .scan(&file.name, file.content.clone(), &on_stage)
                .await
            {
                Ok(verdict) => verdict,
                Err(err) => ScanVerdict::Error {
                    reason: err.to_string(),
                },
            };
            verdicts.push(verdict);
        }

        let scanned = verdicts
            .iter()
            .any(|verdict| !matches!(verdict, ScanVerdict::Skipped));

        let mut flagged_names: Vec<String> = Vec::new();
        let mut error_names: Vec<String> = Vec::new();
        for (file, verdict) in admitted.iter().zip(&verdicts) {
            match verdict {
                ScanVerdict::Flagged(_) => flagged_names.push(file.name.clone()),
                ScanVerdict::Error { .. } => error_names.push(file.name.clone()),
                _ => {}
            }
        }

        if !flagged_names.is_empty() || !error_names.is_empty() {
            tracing::warn!(
                "🛑 Batch {} blocked after scanning ({} flagged, {} scan failures)",
                batch_id,
                flagged_names.len(),
                error_names.len()
            );

            for (file, verdict) in admitted.iter().zip(&verdicts) {
                let reason = if verdict.blocks_upload() {
                    verdict.message()
                } else {
                    BLOCKED_BY_PEER.to_string()
                };
                self.progress.set_state(
                    batch_id,
                    file.token,
                    FileState::Failed {
                        message: reason.clone(),
                    },
                );
                outcomes[file.index] = Some(IntakeResult::failure(file.name.clone(), reason));
            }

            let message = if !flagged_names.is_empty() {
                format!(
                    "⚠️ Threats detected in files: {}. Upload has been blocked for security.",
                    flagged_names.join(", ")
                )
            } else {
                format!(
                    "Error scanning files: {}. Upload has been blocked for security.",
                    error_names.join(", ")
                )
            };

            self.progress.finish_batch(batch_id);
            return self.summarize(batch_id, outcomes, scanned, Some(message));
        }

        let concurrency = self.config.upload_concurrency.max(1);
        let uploaded: Vec<(usize, IntakeResult)> = stream::iter(admitted)
            .map(|file| self.upload_one(batch_id, file))
            .buffered(concurrency)
            .collect()
            .await;

        for (index, result) in uploaded {
            outcomes[index] = Some(result);
        }

        self.progress.finish_batch(batch_id);
        self.summarize(batch_id, outcomes, scanned, None)
    }

    async fn upload_one(&self, batch_id: Uuid, file: CandidateFile) -> (usize, IntakeResult) {
        let object_key = build_object_key(file.token, &file.name);
        let total = file.content.len() as u64;
        let token = file.token;

        self.progress
            .set_state(batch_id, token, FileState::Uploading { percent: 0 });
        let on_progress = |transferred: u64| {
            self.progress.set_state(
                batch_id,
                token,
                FileState::Uploading {
                    percent: percent_complete(transferred, total),
                },
            );
        };

        match self
            .storage
            .put_object(&object_key, file.content, &on_progress)
            .await
        {
            Ok(()) => {
                tracing::info!("📤 Uploaded {} as {}", file.name, object_key);
                self.progress.set_state(
                    batch_id,
                    token,
                    FileState::Done {
                        object_key: object_key.clone(),
                    },
                );
                (file.index, IntakeResult::success(file.name, object_key))
            }
            Err(err) => {
                tracing::error!("⚠️  Upload of {} failed: {}", file.name, err);
                let message = format!("Error uploading file: {}", err);
                self.progress.set_state(
                    batch_id,
                    token,
                    FileState::Failed {
                        message: message.clone(),
                    },
                );
                (file.index, IntakeResult::failure(file.name, message))
            }
        }
    }

    fn summarize(
        &self,
        batch_id: Uuid,
        outcomes: Vec<Option<IntakeResult>>,
        scanned: bool,
        blocked_message: Option<String>,
    ) -> IntakeSummary {
        let expected = outcomes.len();
        let results: Vec<IntakeResult> = outcomes.into_iter().flatten().collect();
        debug_assert_eq!(results.len(), expected);

        let total = results.len();
        let succeeded = results.iter().filter(|result| result.success).count();
        let failed = total - succeeded;

        let message = if let Some(blocked) = blocked_message {
            blocked
        } else if failed == 0 {
            let suffix = if scanned { " (scanned and verified)" } else { "" };
            format!("✅ {} file(s) uploaded successfully{}", succeeded, suffix)
        } else {
            let names: Vec<&str> = results
                .iter()
                .filter(|result| !result.success)
                .map(|result| result.file_name.as_str())
                .collect();
            format!("Some files failed: {}", names.join(", "))
        };

        tracing::info!("📊 Batch {}: {}/{} uploaded", batch_id, succeeded, total);

        IntakeSummary {
            batch_id,
            total,
            succeeded,
            failed,
            scanned,
            message,
            results,
        }
    }
}

/// Object keys sort by upload time and stay unique even for identical
/// file names: `{timestamp}-{token fragment}-{original name}`.
pub fn build_object_key(token: Uuid, file_name: &str) -> String {
    let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let token = token.simple().to_string();
    format!("{}-{}-{}", stamp, &token[..8], file_name)
}

fn percent_complete(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (((transferred as f64 / total as f64) * 100.0).round() as u64).min(100) as u8
}
