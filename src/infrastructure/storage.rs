use crate::config::AppConfig;
use crate::services::storage::{AzureBlobStorage, StorageService};
use std::env;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &AppConfig) -> Arc<AzureBlobStorage> {
    let account = env::var("AZURE_STORAGE_ACCOUNT").expect("AZURE_STORAGE_ACCOUNT must be set");
    let sas_token =
        env::var("AZURE_STORAGE_SAS_TOKEN").expect("AZURE_STORAGE_SAS_TOKEN must be set");
    let container =
        env::var("AZURE_STORAGE_CONTAINER").expect("AZURE_STORAGE_CONTAINER must be set");
    let endpoint = env::var("AZURE_BLOB_ENDPOINT")
        .unwrap_or_else(|_| format!("https://{}.blob.core.windows.net", account));

    info!("☁️  Azure Blob Storage: {} (Container: {})", endpoint, container);

    let storage = Arc::new(AzureBlobStorage::new(
        endpoint,
        container.clone(),
        sas_token,
        config.upload_block_size,
    ));

    if storage.health_check().await {
        info!("✅ Container '{}' is reachable", container);
    } else {
        tracing::warn!(
            "⚠️  Container '{}' is unreachable, uploads will fail until it recovers",
            container
        );
    }

    storage
}
