use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use utoipa::ToSchema;

const API_KEY_HEADER: &str = "x-apikey";

/// Detector counts reported by a completed analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorStats {
    pub malicious: u32,
    pub suspicious: u32,
    /// Engines that produced any verdict at all
    pub total_engines: u32,
}

/// Result of a virus scan
#[derive(Debug, Clone, PartialEq)]
pub enum ScanVerdict {
    /// No engine flagged the file
    Clean(DetectorStats),
    /// At least one engine reported it malicious or suspicious
    Flagged(DetectorStats),
    /// Scanning is disabled; the file was never inspected
    Skipped,
    /// Scan could not be completed
    Error { reason: String },
}

impl ScanVerdict {
    /// Clean requires zero malicious AND zero suspicious detections
    pub fn from_detectors(stats: DetectorStats) -> Self {
        if stats.malicious == 0 && stats.suspicious == 0 {
            Self::Clean(stats)
        } else {
            Self::Flagged(stats)
        }
    }

    /// Only clean and skipped files may proceed to upload
    pub fn blocks_upload(&self) -> bool {
        matches!(self, Self::Flagged(_) | Self::Error { .. })
    }

    pub fn message(&self) -> String {
        match self {
            Self::Clean(stats) => format!("File is clean ({} scan engines)", stats.total_engines),
            Self::Flagged(stats) => format!(
                "Threats detected: {} malicious, {} suspicious",
                stats.malicious, stats.suspicious
            ),
            Self::Skipped => "Virus scanning disabled".to_string(),
            Self::Error { reason } => reason.clone(),
        }
    }
}

/// Phase of an in-flight scan, reported through the progress callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScanStage {
    Uploading,
    Analyzing,
    Completed,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("VirusTotal rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("VirusTotal request failed: {0}")]
    Transport(String),
    #[error("Timed out waiting for the VirusTotal analysis result")]
    Timeout,
    #[error("Unexpected VirusTotal response: {0}")]
    BadResponse(String),
}

/// Trait for virus scanning implementations
#[async_trait::async_trait]
pub trait VirusScanner: Send + Sync {
    /// Scan file content and report stage changes through `on_progress`
    async fn scan(
        &self,
        file_name: &str,
        content: Bytes,
        on_progress: &(dyn Fn(ScanStage, &str) + Send + Sync),
    ) -> Result<ScanVerdict, ScanError>;

    /// Check if the scanner is available/healthy
    async fn health_check(&self) -> bool;
}

/// VirusTotal v3 scanner: submit the file, then poll the analysis until it
/// completes or the wait budget runs out.
pub struct VirusTotalScanner {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl VirusTotalScanner {
    pub fn new(
        api_key: String,
        base_url: String,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            max_wait,
        }
    }

    async fn submit(&self, file_name: &str, content: Bytes) -> Result<String, ScanError> {
        let part = reqwest::multipart::Part::bytes(content.to_vec()).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ScanError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ScanError::RateLimited);
        }
        if !status.is_success() {
            let detail = response
                .json::<VtErrorBody>()
                .await
                .ok()
                .map(|body| body.error.message)
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| status.to_string());
            return Err(ScanError::Transport(format!(
                "file submission failed: {detail}"
            )));
        }

        let submitted: VtSubmitResponse = response
            .json()
            .await
            .map_err(|e| ScanError::BadResponse(e.to_string()))?;
        Ok(submitted.data.id)
    }

    async fn wait_for_analysis(&self, analysis_id: &str) -> Result<DetectorStats, ScanError> {
        let started = Instant::now();

        loop {
            if started.elapsed() > self.max_wait {
                return Err(ScanError::Timeout);
            }

            let response = self
                .client
                .get(format!("{}/analyses/{}", self.base_url, analysis_id))
                .header(API_KEY_HEADER, &self.api_key)
                .send()
                .await
                .map_err(|e| ScanError::Transport(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ScanError::RateLimited);
            }
            if !status.is_success() {
                return Err(ScanError::Transport(format!(
                    "analysis lookup failed: {status}"
                )));
            }

            let body: VtAnalysisResponse = response
                .json()
                .await
                .map_err(|e| ScanError::BadResponse(e.to_string()))?;

            if body.data.attributes.status == "completed" {
                let stats = body.data.attributes.stats;
                return Ok(DetectorStats {
                    malicious: stats.malicious,
                    suspicious: stats.suspicious,
                    total_engines: stats.harmless
                        + stats.malicious
                        + stats.suspicious
                        + stats.undetected,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait::async_trait]
impl VirusScanner for VirusTotalScanner {
    async fn scan(
        &self,
        file_name: &str,
        content: Bytes,
        on_progress: &(dyn Fn(ScanStage, &str) + Send + Sync),
    ) -> Result<ScanVerdict, ScanError> {
        tracing::info!(
            "🦠 Scanning {} ({} bytes) via VirusTotal",
            file_name,
            content.len()
        );

        on_progress(ScanStage::Uploading, "Uploading file to VirusTotal...");
        let analysis_id = self.submit(file_name, content).await?;

        on_progress(ScanStage::Analyzing, "Analyzing file...");
        let stats = self.wait_for_analysis(&analysis_id).await?;

        let verdict = ScanVerdict::from_detectors(stats);
        match &verdict {
            ScanVerdict::Clean(_) => on_progress(ScanStage::Completed, "File is clean ✓"),
            _ => on_progress(ScanStage::Completed, "Threats detected ⚠️"),
        }
        Ok(verdict)
    }

    async fn health_check(&self) -> bool {
        // GET /files/upload_url is the cheapest authenticated endpoint
        self.client
            .get(format!("{}/files/upload_url", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

/// Scanner used when scanning is switched off; every file is skipped
pub struct DisabledScanner;

#[async_trait::async_trait]
impl VirusScanner for DisabledScanner {
    async fn scan(
        &self,
        file_name: &str,
        _content: Bytes,
        _on_progress: &(dyn Fn(ScanStage, &str) + Send + Sync),
    ) -> Result<ScanVerdict, ScanError> {
        tracing::debug!("DisabledScanner: skipping virus scan for {}", file_name);
        Ok(ScanVerdict::Skipped)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Scanner that flags every file (for testing)
#[cfg(test)]
pub struct AlwaysFlaggedScanner;

#[cfg(test)]
#[async_trait::async_trait]
impl VirusScanner for AlwaysFlaggedScanner {
    async fn scan(
        &self,
        _file_name: &str,
        _content: Bytes,
        on_progress: &(dyn Fn(ScanStage, &str) + Send + Sync),
    ) -> Result<ScanVerdict, ScanError> {
        on_progress(ScanStage::Completed, "Threats detected ⚠️");
        Ok(ScanVerdict::Flagged(DetectorStats {
            malicious: 3,
            suspicious: 1,
            total_engines: 70,
        }))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Scanner that clears every file (for testing)
#[cfg(test)]
pub struct AlwaysCleanScanner;

#[cfg(test)]
#[async_trait::async_trait]
impl VirusScanner for AlwaysCleanScanner {
    async fn scan(
        &self,
        _file_name: &str,
        _content: Bytes,
        on_progress: &(dyn Fn(ScanStage, &str) + Send + Sync),
    ) -> Result<ScanVerdict, ScanError> {
        on_progress(ScanStage::Completed, "File is clean ✓");
        Ok(ScanVerdict::Clean(DetectorStats {
            malicious: 0,
            suspicious: 0,
            total_engines: 70,
        }))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct VtSubmitResponse {
    data: VtSubmitData,
}

#[derive(Debug, Deserialize)]
struct VtSubmitData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VtAnalysisResponse {
    data: VtAnalysisData,
}

#[derive(Debug, Deserialize)]
struct VtAnalysisData {
    attributes: VtAnalysisAttributes,
}

#[derive(Debug, Deserialize)]
struct VtAnalysisAttributes {
    status: String,
    #[serde(default)]
    stats: VtAnalysisStats,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct VtAnalysisStats {
    #[serde(default)]
    harmless: u32,
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
    #[serde(default)]
    undetected: u32,
}

#[derive(Debug, Default, Deserialize)]
struct VtErrorBody {
    #[serde(default)]
    error: VtErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct VtErrorDetail {
    #[serde(default)]
    message: String,
}
