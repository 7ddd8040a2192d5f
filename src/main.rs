use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use escrow_oracle::app_state::AppState;
use escrow_oracle::config::OracleConfig;
use escrow_oracle::routes;
use escrow_oracle::services::{
    advisory::AdvisoryClient,
    ledger::{EvmConnector, SharedLedger},
    storage::IpfsStore,
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

    let config = OracleConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing escrow oracle API");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "oracle_feasibility_assessments_total",
        "Feasibility assessments served, by verdict"
    );
    metrics::describe_counter!(
        "oracle_undecodable_logs_total",
        "Contract logs skipped because they did not match the ABI"
    );

    tracing::info!(rpc_url = %config.rpc_url, "Preparing ledger connector");
    let connector = EvmConnector::from_config(&config).expect("Failed to prepare ledger connector");
    let ledger = SharedLedger::new(Arc::new(connector));

    tracing::info!(api_url = %config.ipfs_api_url, "Initializing IPFS client");
    let storage = IpfsStore::new(
        &config.ipfs_api_url,
        config.ipfs_timeout(),
        config.scratch_root(),
    )
    .expect("Failed to initialize IPFS client");

    let advisory = AdvisoryClient::new(
        &config.advisory_api_url,
        &config.advisory_api_key,
        &config.advisory_model,
    )
    .expect("Failed to initialize advisory client");

    let state = AppState::new(ledger, storage, advisory);

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MiB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
