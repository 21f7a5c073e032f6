use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::services::storage::{RemoteObject, StorageService};
use crate::utils::format::format_bytes;

/// A stored report as shown in the catalog
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReportEntry {
    /// Full object key, used for download and delete
    pub id: String,
    pub name: String,
    /// Upload date (YYYY-MM-DD), "Unknown" when storage returned no timestamp
    pub date: String,
    pub size: String,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: String,
}

impl ReportEntry {
    fn from_object(object: RemoteObject) -> Self {
        let name = object
            .key
            .rsplit('/')
            .next()
            .unwrap_or(object.key.as_str())
            .to_string();
        let date = object
            .last_modified
            .map(|stamp| stamp.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        Self {
            name,
            date,
            size: format_bytes(object.size),
            size_bytes: object.size,
            last_modified: object.last_modified,
            content_type: object
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            id: object.key,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkDeleteRequest {
    /// Object keys to remove
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FailedDeletion {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkDeleteResponse {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedDeletion>,
}

/// Read side of the catalog: lists, serves and removes stored reports.
pub struct ReportService {
    storage: Arc<dyn StorageService>,
    config: AppConfig,
}

impl ReportService {
    pub fn new(storage: Arc<dyn StorageService>, config: AppConfig) -> Self {
        Self { storage, config }
    }

    /// Lists stored reports, newest first. Objects without the report
    /// extension are ignored.
    pub async fn list_reports(&self) -> Result<Vec<ReportEntry>> {
        let objects = self.storage.list_objects(None).await?;
        let extension = self.config.allowed_extension.to_lowercase();

        let mut entries: Vec<ReportEntry> = objects
            .into_iter()
            .filter(|object| object.key.to_lowercase().ends_with(&extension))
            .map(ReportEntry::from_object)
            .collect();
        entries.sort_by_key(|entry| Reverse(entry.last_modified));

        tracing::info!("📖 Listed {} report(s)", entries.len());
        Ok(entries)
    }

    /// Deletes each key independently; one failure does not stop the rest.
    pub async fn bulk_delete(&self, keys: &[String]) -> BulkDeleteResponse {
        let mut deleted = Vec::new();
        let mut failed = Vec::new();

        for key in keys {
            match self.storage.delete_object(key).await {
                Ok(()) => {
                    tracing::info!("🗑️  Deleted report {}", key);
                    deleted.push(key.clone());
                }
                Err(err) => {
                    tracing::warn!("⚠️  Failed to delete {}: {}", key, err);
                    failed.push(FailedDeletion {
                        name: key.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        BulkDeleteResponse { deleted, failed }
    }

    pub async fn download(&self, key: &str) -> Result<Option<Bytes>> {
        self.storage.get_object(key).await
    }
}
