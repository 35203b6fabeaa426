// =============================================================================
// WORKORDER SYNC - Main Entry Point
// =============================================================================
// Headless dashboard process around the synchronization engine.
//
// WHAT THIS PROCESS DOES:
// - Builds one engine Session against the configured backend
// - Polls work orders (30s) and comments (5 min) in the background
// - Serves the engine's state and operations as a JSON API
// - Exposes Prometheus metrics
// =============================================================================

mod config;
mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use workorder_sync::metrics::setup_metrics;
use workorder_sync::Session;

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
// Shared by every handler through State<Arc<AppState>>.
pub struct AppState {
    /// Engine session (store, parts workflow, polling)
    pub session: Session,

    /// Prometheus metrics handle
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Load environment variables
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok();

    // -------------------------------------------------------------------------
    // STEP 2: Initialize logging/tracing
    // -------------------------------------------------------------------------
    // RUST_LOG controls levels, e.g. RUST_LOG=info,workorder_sync=debug
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,workorder_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Workorder Sync...");

    // -------------------------------------------------------------------------
    // STEP 3: Load configuration
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        port = config.port,
        backend = %config.api_base_url,
        work_order_poll_secs = config.work_order_poll_secs,
        aggregate_poll_secs = config.aggregate_poll_secs,
        "Configuration loaded"
    );

    // -------------------------------------------------------------------------
    // STEP 4: Set up Prometheus metrics
    // -------------------------------------------------------------------------
    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 5: Build the engine session and start polling
    // -------------------------------------------------------------------------
    // The first poll of each target runs immediately
    let session = Session::connect(&config.engine())?;
    session.start_polling().await;
    info!("Background polling started");

    let state = Arc::new(AppState {
        session,
        metrics_handle,
    });

    // -------------------------------------------------------------------------
    // STEP 6: Define routes
    // -------------------------------------------------------------------------
    let app = Router::new()
        // ----- Health & Readiness Endpoints -----
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // ----- Metrics Endpoint -----
        .route("/metrics", get(handlers::metrics_handler))
        // ----- Work Orders -----
        .route(
            "/api/v1/workorders",
            get(handlers::list_work_orders).post(handlers::create_work_order),
        )
        .route("/api/v1/workorders/:id", get(handlers::get_work_order))
        .route(
            "/api/v1/workorders/:id/complete",
            post(handlers::complete_work_order),
        )
        // ----- Part Requests -----
        .route("/api/v1/parts/requests", post(handlers::submit_part_request))
        .route(
            "/api/v1/parts/requests/:id/dispatch",
            post(handlers::dispatch_part_request),
        )
        .route(
            "/api/v1/parts/requests/:id/acknowledge",
            post(handlers::acknowledge_part_request),
        )
        // ----- Reports & Comments -----
        .route(
            "/api/v1/reports/missing-parts",
            get(handlers::missing_parts_report),
        )
        .route(
            "/api/v1/comments",
            get(handlers::list_comments).post(handlers::add_comment),
        )
        // ----- Middleware Layers -----
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // -------------------------------------------------------------------------
    // STEP 7: Serve until Ctrl-C, then tear the session down
    // -------------------------------------------------------------------------
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Workorder Sync is listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.session.dispose().await;
    info!("Workorder Sync stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
