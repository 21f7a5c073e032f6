use clap::Parser;
use dotenvy::dotenv;
use report_intake::infrastructure::{scanner, storage};
use report_intake::services::intake::IntakeService;
use report_intake::services::progress::ProgressRegistry;
use report_intake::services::reports::ReportService;
use report_intake::services::sweeper::ProgressSweeper;
use report_intake::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the API server
    #[arg(short, long, default_value_t = 3000, env = "PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "report_intake=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Report Intake Service...");

    // 2. Configuration & Infrastructure
    let config = report_intake::config::AppConfig::from_env();
    info!(
        "🛡️  Intake Config: Max Size={}MB, Max Batch={}, Virus Scan={}",
        config.max_file_size / 1024 / 1024,
        config.max_batch_files,
        config.virus_scan_active()
    );

    let storage_service = storage::setup_storage(&config).await;
    let scanner_service = scanner::setup_scanner(&config).await;

    // 3. Services & Graceful Shutdown Channel
    let progress = Arc::new(ProgressRegistry::new());
    let intake = Arc::new(IntakeService::new(
        storage_service.clone(),
        scanner_service.clone(),
        progress.clone(),
        config.clone(),
    ));
    let reports = Arc::new(ReportService::new(storage_service.clone(), config.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweeper = ProgressSweeper::new(progress.clone(), config.progress_ttl, shutdown_rx);
    let sweeper_handle = tokio::spawn(sweeper.run());

    let state = AppState {
        config,
        storage: storage_service.clone(),
        scanner: scanner_service.clone(),
        intake,
        reports,
        progress,
    };

    // 4. HTTP Server
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
    info!(
        "📖 Swagger UI documentation: http://localhost:{}/swagger-ui",
        args.port
    );

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
            })
            .await
        {
            error!("❌ Server runtime error: {}", e);
        }
    });

    // 5. Wait for Shutdown Signal
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down intake service...");
    let _ = server_handle.await;
    let _ = sweeper_handle.await;

    info!("👋 Intake service exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
