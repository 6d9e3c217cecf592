use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use folder_face_match::app_state::AppState;
use folder_face_match::config::AppConfig;
use folder_face_match::routes;
use folder_face_match::models::image::Provider;
use folder_face_match::services::{
    google_drive::GoogleDriveSource, onedrive::OneDriveSource, orchestrator::FaceMatchService,
    recognition::FaceServiceClient, source::CloudSources,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let settings = config.job_settings();
    settings.validate().expect("Invalid job settings");

    tracing::info!("Initializing folder-face-match server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("face_match_jobs_started_total", "Folder comparison jobs started");
    metrics::describe_counter!(
        "face_match_jobs_completed_total",
        "Folder comparison jobs that completed"
    );
    metrics::describe_counter!(
        "face_match_jobs_failed_total",
        "Folder comparison jobs that failed, by failure kind"
    );
    metrics::describe_counter!(
        "face_match_jobs_evicted_total",
        "Job records evicted after their time-to-live"
    );
    metrics::describe_gauge!("face_match_active_jobs", "Job records currently held in memory");
    metrics::describe_histogram!(
        "face_match_fetch_seconds",
        "Time to download and encode every image of a job"
    );
    metrics::describe_counter!(
        "face_match_sub_jobs_submitted_total",
        "Batches accepted by the face recognition service"
    );

    // Initialize face recognition client
    tracing::info!(url = %config.face_service_url, "Initializing face recognition client");
    let recognition = FaceServiceClient::new(
        &config.face_service_url,
        Duration::from_secs(config.recognition_timeout_secs),
        Duration::from_secs(config.status_timeout_secs),
    )
    .expect("Failed to initialize face recognition client");

    // Initialize cloud storage clients
    let storage_timeout = Duration::from_secs(config.storage_timeout_secs);
    let drive = GoogleDriveSource::new(storage_timeout).expect("Failed to initialize Google Drive client");
    let onedrive = OneDriveSource::new(storage_timeout).expect("Failed to initialize OneDrive client");
    let sources = Arc::new(
        CloudSources::new()
            .with(Provider::GoogleDrive, Arc::new(drive))
            .with(Provider::OneDrive, Arc::new(onedrive)),
    );

    let shutdown = CancellationToken::new();
    let face = FaceMatchService::new(
        sources.clone(),
        sources,
        Arc::new(recognition),
        settings,
        shutdown.clone(),
    );
    let sweeper = face.spawn_sweeper();

    // Create shared application state
    let state = AppState::new(face);
    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting folder-face-match on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received, cancelling running jobs");
            signal_token.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    let _ = sweeper.await;
    tracing::info!("Server stopped");
}
