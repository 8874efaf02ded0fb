//! OCR Orchestrator
//!
//! Control-plane daemon: discovers unfinished OCR work, provisions the
//! ephemeral GPU instance on demand and dispatches batch jobs to it. The
//! loop is re-armed by a periodic timer and by upload-completed
//! notifications from the API layer.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ocr_web::compute::{InstanceManager, VultrProvider};
use ocr_web::config::Config;
use ocr_web::runner::{JobDispatcher, RunnerHandle, TaskRunner};
use ocr_web::storage::{ObjectStore, S3Client};
use ocr_web::tasks::TaskDiscovery;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct TriggerResponse {
    status: &'static str,
}

/// Upload-completed hook from the API layer: new images may mean new work.
async fn upload_complete(State(runner): State<RunnerHandle>) -> Json<TriggerResponse> {
    runner.check();
    Json(TriggerResponse { status: "success" })
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ocr_web=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting OCR Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("S3 bucket: {}", config.storage.bucket);
    tracing::info!(
        "Compute plan: {} in {}",
        config.compute.plan,
        config.compute.region
    );

    // Initialize S3 client
    let store: Arc<dyn ObjectStore> = Arc::new(
        S3Client::new(&config.storage)
            .await
            .expect("Failed to initialize S3 client"),
    );

    // Wire up the orchestration loop
    let provider = Arc::new(VultrProvider::new(config.compute.clone()));
    let manager = InstanceManager::new(provider, &config.compute);
    let discovery = TaskDiscovery::new(Arc::clone(&store));
    let dispatcher = Arc::new(JobDispatcher::new(store, config.compute.worker_port));

    let runner = TaskRunner::new(
        discovery,
        manager,
        dispatcher,
        config.orchestrator.retry_delay(),
    )
    .spawn();

    // Periodic re-arm, in case an upload notification was missed
    let timer_runner = runner.clone();
    let check_interval = config.orchestrator.check_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_interval);
        loop {
            interval.tick().await;
            timer_runner.check();
        }
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/internal/upload-complete", post(upload_complete))
        .layer(TraceLayer::new_for_http())
        .with_state(runner);

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("OCR Orchestrator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    tracing::info!("Orchestrator shutdown complete");
}

/// Graceful shutdown signal handler
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
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
