use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use bytes::Bytes;
use report_intake::services::scanner::{
    ScanError, ScanStage, ScanVerdict, VirusScanner, VirusTotalScanner,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct VtFixture {
    stats: Value,
    pending_polls: Arc<Mutex<u32>>,
    submit_status: StatusCode,
    seen_api_keys: Arc<Mutex<Vec<String>>>,
}

impl VtFixture {
    fn with_stats(stats: Value) -> Self {
        Self {
            stats,
            pending_polls: Arc::new(Mutex::new(0)),
            submit_status: StatusCode::OK,
            seen_api_keys: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn clean() -> Self {
        Self::with_stats(json!({"harmless": 60, "malicious": 0, "suspicious": 0, "undetected": 12}))
    }

    fn flagged() -> Self {
        Self::with_stats(json!({"harmless": 10, "malicious": 58, "suspicious": 4, "undetected": 0}))
    }
}

async fn submit(State(fx): State<VtFixture>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let key = headers
        .get("x-apikey")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    fx.seen_api_keys.lock().unwrap().push(key);

    if fx.submit_status != StatusCode::OK {
        return (
            fx.submit_status,
            Json(json!({"error": {"code": "ServerError", "message": "Transient VT failure"}})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"data": {"type": "analysis", "id": "NjY0MjRl"}})),
    )
}

async fn analysis(State(fx): State<VtFixture>, Path(_id): Path<String>) -> Json<Value> {
    let mut pending = fx.pending_polls.lock().unwrap();
    if *pending > 0 {
        *pending -= 1;
        return Json(json!({"data": {"attributes": {"status": "queued"}}}));
    }
    Json(json!({"data": {"attributes": {"status": "completed", "stats": fx.stats}}}))
}

async fn upload_url() -> Json<Value> {
    Json(json!({"data": "https://www.virustotal.com/_ah/upload/mock"}))
}

async fn spawn_vt(fixture: VtFixture) -> String {
    let app = Router::new()
        .route("/files", post(submit))
        .route("/analyses/:id", get(analysis))
        .route("/files/upload_url", get(upload_url))
        .with_state(fixture);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn scanner_for(base_url: String) -> VirusTotalScanner {
    VirusTotalScanner::new(
        "test-key".to_string(),
        base_url,
        Duration::from_millis(10),
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn test_clean_file_scan_reports_all_stages() {
    let fixture = VtFixture::clean();
    let scanner = scanner_for(spawn_vt(fixture).await);

    let stages: Arc<Mutex<Vec<(ScanStage, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let stages = stages.clone();
        move |stage: ScanStage, message: &str| {
            stages.lock().unwrap().push((stage, message.to_string()));
        }
    };

    let verdict = scanner
        .scan("report.pbit", Bytes::from_static(b"pbit content"), &recorder)
        .await
        .unwrap();

    match verdict {
        ScanVerdict::Clean(stats) => {
            assert_eq!(stats.malicious, 0);
            assert_eq!(stats.suspicious, 0);
            assert_eq!(stats.total_engines, 72);
        }
        other => panic!("expected clean verdict, got {:?}", other),
    }

    let recorded = stages.lock().unwrap();
    let order: Vec<ScanStage> = recorded.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(
        order,
        vec![
            ScanStage::Uploading,
            ScanStage::Analyzing,
            ScanStage::Completed
        ]
    );
    assert_eq!(recorded[0].1, "Uploading file to VirusTotal...");
    assert_eq!(recorded[2].1, "File is clean ✓");
}

#[tokio::test]
async fn test_flagged_file_scan_blocks_upload() {
    let fixture = VtFixture::flagged();
    let scanner = scanner_for(spawn_vt(fixture).await);

    let quiet = |_: ScanStage, _: &str| {};
    let verdict = scanner
        .scan("eicar.pbit", Bytes::from_static(b"test body"), &quiet)
        .await
        .unwrap();

    assert!(verdict.blocks_upload());
    match verdict {
        ScanVerdict::Flagged(stats) => {
            assert_eq!(stats.malicious, 58);
            assert_eq!(stats.suspicious, 4);
            assert_eq!(stats.total_engines, 72);
        }
        other => panic!("expected flagged verdict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limited_submission() {
    let mut fixture = VtFixture::clean();
    fixture.submit_status = StatusCode::TOO_MANY_REQUESTS;
    let scanner = scanner_for(spawn_vt(fixture).await);

    let quiet = |_: ScanStage, _: &str| {};
    let err = scanner
        .scan("report.pbit", Bytes::from_static(b"bytes"), &quiet)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::RateLimited));
    assert_eq!(
        err.to_string(),
        "VirusTotal rate limit exceeded. Please try again later."
    );
}

#[tokio::test]
async fn test_failed_submission_surfaces_upstream_message() {
    let mut fixture = VtFixture::clean();
    fixture.submit_status = StatusCode::INTERNAL_SERVER_ERROR;
    let scanner = scanner_for(spawn_vt(fixture).await);

    let quiet = |_: ScanStage, _: &str| {};
    let err = scanner
        .scan("report.pbit", Bytes::from_static(b"bytes"), &quiet)
        .await
        .unwrap_err();

    match err {
        ScanError::Transport(detail) => {
            assert!(detail.contains("file submission failed: Transient VT failure"));
        }
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_poll_loop_waits_for_completed_analysis() {
    let fixture = VtFixture::clean();
    *fixture.pending_polls.lock().unwrap() = 2;
    let pending = fixture.pending_polls.clone();
    let scanner = scanner_for(spawn_vt(fixture).await);

    let quiet = |_: ScanStage, _: &str| {};
    let verdict = scanner
        .scan("report.pbit", Bytes::from_static(b"bytes"), &quiet)
        .await
        .unwrap();

    assert!(matches!(verdict, ScanVerdict::Clean(_)));
    assert_eq!(*pending.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_analysis_timeout() {
    let fixture = VtFixture::clean();
    *fixture.pending_polls.lock().unwrap() = u32::MAX;
    let base = spawn_vt(fixture).await;
    let scanner = VirusTotalScanner::new(
        "test-key".to_string(),
        base,
        Duration::from_millis(10),
        Duration::from_millis(100),
    );

    let quiet = |_: ScanStage, _: &str| {};
    let err = scanner
        .scan("report.pbit", Bytes::from_static(b"bytes"), &quiet)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Timeout));
    assert_eq!(
        err.to_string(),
        "Timed out waiting for the VirusTotal analysis result"
    );
}

#[tokio::test]
async fn test_api_key_header_is_sent() {
    let fixture = VtFixture::clean();
    let seen = fixture.seen_api_keys.clone();
    let scanner = scanner_for(spawn_vt(fixture).await);

    let quiet = |_: ScanStage, _: &str| {};
    scanner
        .scan("report.pbit", Bytes::from_static(b"bytes"), &quiet)
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap().as_slice(), ["test-key"]);
}

#[tokio::test]
async fn test_health_check() {
    let scanner = scanner_for(spawn_vt(VtFixture::clean()).await);
    assert!(scanner.health_check().await);

    let unreachable = scanner_for("http://127.0.0.1:1".to_string());
    assert!(!unreachable.health_check().await);
}
