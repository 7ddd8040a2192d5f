use escrow_oracle::{
    config::OracleConfig,
    services::{
        checker::CoverageChecker,
        ledger::EvmConnector,
        listener::{EventListener, ListenerConfig},
        pipeline::JobPipeline,
        storage::IpfsStore,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting escrow verification worker");

    let config = OracleConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("WORKER_METRICS_ADDR is not a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    describe_metrics();
    tracing::info!(addr = %metrics_addr, "Metrics exporter listening");

    tracing::info!("Initializing services");
    let store = IpfsStore::new(
        &config.ipfs_api_url,
        config.ipfs_timeout(),
        config.scratch_root(),
    )
    .expect("Failed to initialize IPFS client");

    let checker = CoverageChecker::new(
        config.check_command.clone(),
        config.minimum_coverage_percentage,
        config.check_timeout(),
    );

    let connector = EvmConnector::from_config(&config).expect("Failed to prepare ledger connector");
    tracing::info!(agent = ?connector.agent_address(), "Oracle signing identity loaded");

    let pipeline = JobPipeline::new(Arc::new(store), Arc::new(checker));
    let listener = EventListener::new(
        Arc::new(connector),
        pipeline,
        ListenerConfig::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(listener.run(shutdown_rx));

    tracing::info!(
        threshold = config.minimum_coverage_percentage,
        "Worker ready, listening for submitted work"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
    let _ = shutdown_tx.send(true);

    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Event listener task failed");
    }
    tracing::info!("Worker stopped");
}

fn describe_metrics() {
    metrics::describe_counter!("oracle_jobs_received_total", "WorkSubmitted events handled");
    metrics::describe_counter!(
        "oracle_jobs_skipped_total",
        "Events skipped because the job was already adjudicated"
    );
    metrics::describe_counter!("oracle_verdicts_total", "Confirmed verdicts, by verdict");
    metrics::describe_counter!("oracle_tx_reverted_total", "Verdict transactions that reverted");
    metrics::describe_counter!(
        "oracle_download_failures_total",
        "Artifacts that could not be fetched or were empty"
    );
    metrics::describe_counter!(
        "oracle_checker_faults_total",
        "Acceptance checks that faulted instead of producing a report"
    );
    metrics::describe_counter!(
        "oracle_undecodable_logs_total",
        "Contract logs skipped because they did not match the ABI"
    );
    metrics::describe_counter!(
        "oracle_listener_reinitializations_total",
        "Times the listener discarded its connection and started over"
    );
    metrics::describe_histogram!(
        "oracle_job_processing_seconds",
        "Time from event pickup to confirmed verdict"
    );
    metrics::describe_gauge!("oracle_watermark_block", "Last fully processed block");
    metrics::describe_gauge!("oracle_ledger_connected", "1 while a ledger session is live");
}
