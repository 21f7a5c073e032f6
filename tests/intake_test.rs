use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use report_intake::config::AppConfig;
use report_intake::services::intake::IntakeService;
use report_intake::services::progress::ProgressRegistry;
use report_intake::services::reports::ReportService;
use report_intake::services::scanner::{
    DetectorStats, ScanError, ScanStage, ScanVerdict, VirusScanner,
};
use report_intake::services::storage::{RemoteObject, StorageService};
use report_intake::{AppState, create_app};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

struct MockBlobStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    fail_fragment: Option<String>,
}

impl MockBlobStorage {
    fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_fragment: None,
        }
    }

    fn failing_on(fragment: &str) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_fragment: Some(fragment.to_string()),
        }
    }

    fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl StorageService for MockBlobStorage {
    async fn put_object(
        &self,
        key: &str,
        content: Bytes,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<()> {
        if let Some(fragment) = &self.fail_fragment {
            if key.contains(fragment.as_str()) {
                anyhow::bail!("connection reset by peer");
            }
        }
        let total = content.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), content);
        on_progress(total);
        Ok(())
    }

    async fn list_objects(&self, _prefix: Option<&str>) -> Result<Vec<RemoteObject>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .map(|(key, content)| RemoteObject {
                key: key.clone(),
                size: content.len() as u64,
                last_modified: Some(chrono::Utc::now()),
                content_type: Some("application/octet-stream".to_string()),
            })
            .collect())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Never scans, like the disabled configuration
struct SkipScanner;

#[async_trait]
impl VirusScanner for SkipScanner {
    async fn scan(
        &self,
        _file_name: &str,
        _content: Bytes,
        _on_progress: &(dyn Fn(ScanStage, &str) + Send + Sync),
    ) -> Result<ScanVerdict, ScanError> {
        Ok(ScanVerdict::Skipped)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Flags any file whose name contains "eicar"
struct FlaggingScanner;

#[async_trait]
impl VirusScanner for FlaggingScanner {
    async fn scan(
        &self,
        file_name: &str,
        _content: Bytes,
        on_progress: &(dyn Fn(ScanStage, &str) + Send + Sync),
    ) -> Result<ScanVerdict, ScanError> {
        on_progress(ScanStage::Uploading, "Uploading file to VirusTotal...");
        on_progress(ScanStage::Analyzing, "Analyzing file...");
        if file_name.contains("eicar") {
            Ok(ScanVerdict::Flagged(DetectorStats {
                malicious: 58,
                suspicious: 4,
                total_engines: 72,
            }))
        } else {
            Ok(ScanVerdict::Clean(DetectorStats {
                malicious: 0,
                suspicious: 0,
                total_engines: 72,
            }))
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

fn test_state(
    storage: Arc<MockBlobStorage>,
    scanner: Arc<dyn VirusScanner>,
    config: AppConfig,
) -> AppState {
    let progress = Arc::new(ProgressRegistry::new());
    let intake = Arc::new(IntakeService::new(
        storage.clone(),
        scanner.clone(),
        progress.clone(),
        config.clone(),
    ));
    let reports = Arc::new(ReportService::new(storage.clone(), config.clone()));

    AppState {
        config,
        storage,
        scanner,
        intake,
        reports,
        progress,
    }
}

const BOUNDARY: &str = "---------------------------123456789012345678901234567";

fn multipart_body(files: &[(&str, &[u8])]) -> Body {
    let mut body = String::new();
    for (name, content) in files {
        body.push_str(&format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        ));
        body.push_str(&String::from_utf8_lossy(content));
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Body::from(body)
}

fn intake_request(uri: &str, files: &[(&str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart_body(files))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_intake_single_file_success() {
    let storage = Arc::new(MockBlobStorage::new());
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(SkipScanner),
        AppConfig::development(),
    ));

    let response = app
        .oneshot(intake_request("/intake", &[("report.pbit", b"pbit bytes")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;

    assert_eq!(json["total"], 1);
    assert_eq!(json["succeeded"], 1);
    assert_eq!(json["failed"], 0);
    assert_eq!(json["scanned"], false);
    assert_eq!(json["message"], "✅ 1 file(s) uploaded successfully");

    let key = json["results"][0]["object_key"].as_str().unwrap();
    assert!(key.ends_with("-report.pbit"));
    assert_eq!(storage.keys(), vec![key.to_string()]);
}

#[tokio::test]
async fn test_intake_empty_batch_rejected() {
    let app = create_app(test_state(
        Arc::new(MockBlobStorage::new()),
        Arc::new(SkipScanner),
        AppConfig::development(),
    ));

    let response = app.oneshot(intake_request("/intake", &[])).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Please select one or more files first");
}

#[tokio::test]
async fn test_intake_rejects_wrong_extension_per_file() {
    let storage = Arc::new(MockBlobStorage::new());
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(SkipScanner),
        AppConfig::development(),
    ));

    let response = app
        .oneshot(intake_request("/intake", &[("notes.txt", b"text")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["failed"], 1);
    assert_eq!(json["results"][0]["error"], "File must be of type .pbit");
    assert!(storage.keys().is_empty());
}

#[tokio::test]
async fn test_intake_rejects_oversized_file() {
    let storage = Arc::new(MockBlobStorage::new());
    let config = AppConfig {
        max_file_size: 1024 * 1024,
        ..AppConfig::development()
    };
    let app = create_app(test_state(storage.clone(), Arc::new(SkipScanner), config));

    let big = vec![b'x'; 1024 * 1024 + 1];
    let response = app
        .oneshot(intake_request("/intake", &[("big.pbit", big.as_slice())]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["failed"], 1);
    assert_eq!(
        json["results"][0]["error"],
        "File is too large. Maximum size: 1MB"
    );
    assert!(storage.keys().is_empty());
}

#[tokio::test]
async fn test_intake_rejects_too_many_files() {
    let config = AppConfig {
        max_batch_files: 2,
        ..AppConfig::development()
    };
    let app = create_app(test_state(
        Arc::new(MockBlobStorage::new()),
        Arc::new(SkipScanner),
        config,
    ));

    let response = app
        .oneshot(intake_request(
            "/intake",
            &[
                ("a.pbit", b"a" as &[u8]),
                ("b.pbit", b"b"),
                ("c.pbit", b"c"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(
        json["error"],
        "Too many files: a batch may contain at most 2 file(s)"
    );
}

#[tokio::test]
async fn test_intake_part_without_filename_is_reported() {
    let storage = Arc::new(MockBlobStorage::new());
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(SkipScanner),
        AppConfig::development(),
    ));

    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"\r\n\r\n\
         orphan bytes\r\n\
         --{BOUNDARY}--\r\n"
    );
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/intake")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["failed"], 1);
    assert_eq!(json["results"][0]["file_name"], "unnamed");
    assert_eq!(json["results"][0]["error"], "Please select a file");
    assert!(storage.keys().is_empty());
}

#[tokio::test]
async fn test_intake_duplicate_names_get_distinct_keys() {
    let storage = Arc::new(MockBlobStorage::new());
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(SkipScanner),
        AppConfig::development(),
    ));

    let response = app
        .oneshot(intake_request(
            "/intake",
            &[("model.pbit", b"first" as &[u8]), ("model.pbit", b"second")],
        ))
        .await
        .unwrap();

    let json = read_json(response).await;
    assert_eq!(json["succeeded"], 2);
    let first = json["results"][0]["object_key"].as_str().unwrap();
    let second = json["results"][1]["object_key"].as_str().unwrap();
    assert_ne!(first, second);
    assert_eq!(storage.keys().len(), 2);
}

#[tokio::test]
async fn test_intake_flagged_file_blocks_batch() {
    let storage = Arc::new(MockBlobStorage::new());
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(FlaggingScanner),
        AppConfig::development(),
    ));

    let response = app
        .oneshot(intake_request(
            "/intake",
            &[("good.pbit", b"fine" as &[u8]), ("eicar.pbit", b"test")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;

    assert_eq!(json["succeeded"], 0);
    assert_eq!(json["failed"], 2);
    assert_eq!(json["scanned"], true);
    assert_eq!(
        json["message"],
        "⚠️ Threats detected in files: eicar.pbit. Upload has been blocked for security."
    );
    assert_eq!(
        json["results"][0]["error"],
        "Upload blocked: another file in this batch failed the security scan"
    );
    assert_eq!(
        json["results"][1]["error"],
        "Threats detected: 58 malicious, 4 suspicious"
    );
    assert!(storage.keys().is_empty());
}

#[tokio::test]
async fn test_intake_clean_scan_is_reported_in_message() {
    let storage = Arc::new(MockBlobStorage::new());
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(FlaggingScanner),
        AppConfig::development(),
    ));

    let response = app
        .oneshot(intake_request("/intake", &[("clean.pbit", b"fine")]))
        .await
        .unwrap();

    let json = read_json(response).await;
    assert_eq!(json["succeeded"], 1);
    assert_eq!(json["scanned"], true);
    assert_eq!(
        json["message"],
        "✅ 1 file(s) uploaded successfully (scanned and verified)"
    );
}

#[tokio::test]
async fn test_intake_partial_upload_failure() {
    let storage = Arc::new(MockBlobStorage::failing_on("-flaky.pbit"));
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(FlaggingScanner),
        AppConfig::development(),
    ));

    let response = app
        .oneshot(intake_request(
            "/intake",
            &[("steady.pbit", b"ok" as &[u8]), ("flaky.pbit", b"boom")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;

    assert_eq!(json["succeeded"], 1);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["scanned"], true);
    assert_eq!(json["message"], "Some files failed: flaky.pbit");
    assert_eq!(json["results"][0]["success"], true);
    assert!(json["results"][0]["object_key"].is_string());
    assert_eq!(json["results"][1]["success"], false);
    assert!(
        json["results"][1]["error"]
            .as_str()
            .unwrap()
            .starts_with("Error uploading file: ")
    );
    assert_eq!(storage.keys().len(), 1);
}

#[tokio::test]
async fn test_progress_endpoint_reflects_finished_batch() {
    let storage = Arc::new(MockBlobStorage::new());
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(SkipScanner),
        AppConfig::development(),
    ));

    let batch_id = Uuid::new_v4();
    let response = app
        .clone()
        .oneshot(intake_request(
            &format!("/intake?batch_id={batch_id}"),
            &[("report.pbit", b"bytes")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/intake/{batch_id}/progress"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["batch_id"], batch_id.to_string());
    assert_eq!(json["finished"], true);
    assert_eq!(json["files"][0]["name"], "report.pbit");
    assert_eq!(json["files"][0]["state"], "done");
    assert_eq!(json["files"][0]["percent"], 100);
}

#[tokio::test]
async fn test_intake_zero_byte_file_uploads_with_full_progress() {
    let storage = Arc::new(MockBlobStorage::new());
    let app = create_app(test_state(
        storage.clone(),
        Arc::new(SkipScanner),
        AppConfig::development(),
    ));

    let batch_id = Uuid::new_v4();
    let response = app
        .clone()
        .oneshot(intake_request(
            &format!("/intake?batch_id={batch_id}"),
            &[("empty.pbit", b"")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["succeeded"], 1);
    assert_eq!(json["failed"], 0);
    let key = json["results"][0]["object_key"].as_str().unwrap();
    assert!(key.ends_with("-empty.pbit"));
    assert_eq!(storage.keys(), vec![key.to_string()]);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/intake/{batch_id}/progress"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["files"][0]["name"], "empty.pbit");
    assert_eq!(json["files"][0]["state"], "done");
    assert_eq!(json["files"][0]["percent"], 100);
}

#[tokio::test]
async fn test_progress_endpoint_unknown_batch_is_404() {
    let app = create_app(test_state(
        Arc::new(MockBlobStorage::new()),
        Arc::new(SkipScanner),
        AppConfig::development(),
    ));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/intake/{}/progress", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = read_json(response).await;
    assert_eq!(json["error"], "Batch not found");
}
