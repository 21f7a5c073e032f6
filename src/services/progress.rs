use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::scanner::ScanStage;

/// Lifecycle of one file inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum FileState {
    Pending,
    Rejected { message: String },
    Scanning { stage: ScanStage, message: String },
    Uploading { percent: u8 },
    Done { object_key: String },
    Failed { message: String },
}

/// Flattened view of one file for the progress endpoint
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileProgressView {
    pub token: Uuid,
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<ScanStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
}

/// Point-in-time view of a whole batch, files in selection order
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    pub finished: bool,
    pub files: Vec<FileProgressView>,
}

struct FileSlot {
    token: Uuid,
    name: String,
    state: FileState,
}

struct BatchEntry {
    files: Vec<FileSlot>,
    finished_at: Option<Instant>,
}

/// In-memory progress store shared between the pipeline and the HTTP layer.
/// Finished batches linger until the sweeper evicts them.
pub struct ProgressRegistry {
    batches: DashMap<Uuid, BatchEntry>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self {
            batches: DashMap::new(),
        }
    }

    /// Register a batch with one slot per file, all pending
    pub fn begin_batch(&self, batch_id: Uuid, files: &[(Uuid, String)]) {
        let files = files
            .iter()
            .map(|(token, name)| FileSlot {
                token: *token,
                name: name.clone(),
                state: FileState::Pending,
            })
            .collect();

        self.batches.insert(
            batch_id,
            BatchEntry {
                files,
                finished_at: None,
            },
        );
    }

    /// Update one file's state; unknown batches and tokens are ignored.
    /// Upload percentages never move backwards.
    pub fn set_state(&self, batch_id: Uuid, token: Uuid, state: FileState) {
        let Some(mut entry) = self.batches.get_mut(&batch_id) else {
            return;
        };
        let Some(slot) = entry.files.iter_mut().find(|slot| slot.token == token) else {
            return;
        };

        if let (FileState::Uploading { percent: current }, FileState::Uploading { percent: next }) =
            (&slot.state, &state)
        {
            if next < current {
                return;
            }
        }

        slot.state = state;
    }

    /// Mark a batch finished; it stays queryable until evicted
    pub fn finish_batch(&self, batch_id: Uuid) {
        if let Some(mut entry) = self.batches.get_mut(&batch_id) {
            entry.finished_at = Some(Instant::now());
        }
    }

    pub fn snapshot(&self, batch_id: Uuid) -> Option<BatchSnapshot> {
        let entry = self.batches.get(&batch_id)?;
        Some(BatchSnapshot {
            batch_id,
            finished: entry.finished_at.is_some(),
            files: entry.files.iter().map(view).collect(),
        })
    }

    /// Drop finished batches older than `ttl`, returning how many went away
    pub fn evict_finished(&self, ttl: Duration) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, entry| match entry.finished_at {
            Some(finished_at) => finished_at.elapsed() < ttl,
            None => true,
        });
        before - self.batches.len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn view(slot: &FileSlot) -> FileProgressView {
    let (state, stage, percent, message, object_key) = match &slot.state {
        FileState::Pending => ("pending", None, None, None, None),
        FileState::Rejected { message } => ("rejected", None, None, Some(message.clone()), None),
        FileState::Scanning { stage, message } => {
            ("scanning", Some(*stage), None, Some(message.clone()), None)
        }
        FileState::Uploading { percent } => ("uploading", None, Some(*percent), None, None),
        FileState::Done { object_key } => ("done", None, Some(100), None, Some(object_key.clone())),
        FileState::Failed { message } => ("failed", None, None, Some(message.clone()), None),
    };

    FileProgressView {
        token: slot.token,
        name: slot.name.clone(),
        state: state.to_string(),
        stage,
        percent,
        message,
        object_key,
    }
}
