pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::intake::IntakeService;
use crate::services::progress::ProgressRegistry;
use crate::services::reports::ReportService;
use crate::services::scanner::VirusScanner;
use crate::services::storage::StorageService;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::intake::intake_files,
        api::handlers::intake::batch_progress,
        api::handlers::reports::list_reports,
        api::handlers::reports::bulk_delete,
        api::handlers::reports::download_report,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            services::intake::IntakeSummary,
            services::intake::IntakeResult,
            services::progress::BatchSnapshot,
            services::progress::FileProgressView,
            services::scanner::ScanStage,
            services::reports::ReportEntry,
            services::reports::BulkDeleteRequest,
            services::reports::BulkDeleteResponse,
            services::reports::FailedDeletion,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "intake", description = "Report upload and scanning"),
        (name = "reports", description = "Stored report catalog"),
        (name = "system", description = "Health and diagnostics")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub storage: Arc<dyn StorageService>,
    pub scanner: Arc<dyn VirusScanner>,
    pub intake: Arc<IntakeService>,
    pub reports: Arc<ReportService>,
    pub progress: Arc<ProgressRegistry>,
}

pub fn create_app(state: AppState) -> Router {
    // Whole-batch body limit plus multipart overhead
    let intake_body_limit =
        state.config.max_file_size * state.config.max_batch_files + 10 * 1024 * 1024;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/intake",
            post(api::handlers::intake::intake_files)
                .layer(DefaultBodyLimit::max(intake_body_limit)),
        )
        .route(
            "/intake/:batch_id/progress",
            get(api::handlers::intake::batch_progress),
        )
        .route("/reports", get(api::handlers::reports::list_reports))
        .route(
            "/reports/bulk-delete",
            post(api::handlers::reports::bulk_delete),
        )
        .route(
            "/reports/*key",
            get(api::handlers::reports::download_report),
        )
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(from_fn(api::middleware::request_id::request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
