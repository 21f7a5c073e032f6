use crate::config::AppConfig;
use crate::services::scanner::{DisabledScanner, VirusScanner, VirusTotalScanner};
use std::sync::Arc;
use tracing::info;

pub async fn setup_scanner(config: &AppConfig) -> Arc<dyn VirusScanner> {
    if !config.virus_scan_active() {
        info!("🦠 Virus scanning disabled, files are uploaded unscanned");
        return Arc::new(DisabledScanner);
    }

    let api_key = config.virustotal_api_key.clone().unwrap_or_default();
    let scanner: Arc<dyn VirusScanner> = Arc::new(VirusTotalScanner::new(
        api_key,
        config.virustotal_api_url.clone(),
        config.scan_poll_interval,
        config.scan_max_wait,
    ));

    // Warm up scanner connection
    if scanner.health_check().await {
        info!("🦠 VirusTotal scanner connected successfully");
    } else {
        tracing::warn!("⚠️  VirusTotal unreachable! Scans will fail closed and block uploads.");
    }

    scanner
}
