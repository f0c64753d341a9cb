//! Lab analyzer - telemetry analytics service
//!
//! Subscribes to instrument telemetry on the lab MQTT broker, runs the
//! detectors and publishes alerts back to the bus and the daily alert log.

use analyzer_lib::{
    alerts::{alert_channel, AlertDispatcher},
    archive::TelemetryArchive,
    health::{components, HealthRegistry},
    observability::{AnalyzerMetrics, StructuredLogger},
    storage::DailyNdjson,
    Analyzer, IngestLoop,
};
use anyhow::{Context, Result};
use lab_analyzer::{api, config::AnalyzerConfig, mqtt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ANALYZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting lab-analyzer");

    let config = AnalyzerConfig::load()?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;
    info!(
        instance = %config.instance,
        broker = %config.broker.address(),
        data_dir = ?config.data_dir,
        "Analyzer configured"
    );

    let health_registry = HealthRegistry::new();
    for component in [
        components::INGEST,
        components::MODEL,
        components::PUBLISHER,
        components::ALERT_LOG,
        components::BUS,
    ] {
        health_registry.register(component).await;
    }

    let metrics = AnalyzerMetrics::new();
    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(ANALYZER_VERSION, &config.broker.address());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (publisher, listener) = mqtt::connect(&config.broker);
    let store = DailyNdjson::new(&config.data_dir);

    // Alert sinks run in their own task behind a bounded queue
    let (alert_tx, alert_rx) = alert_channel(config.dispatcher.channel_capacity);
    let dispatcher = AlertDispatcher::new(config.dispatcher.clone(), health_registry.clone())
        .with_publisher(Arc::new(publisher))
        .with_log(store.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run(alert_rx, shutdown_tx.subscribe()));

    let mut analyzer = Analyzer::new(config.engine.clone());
    for (device, ts) in &config.calibrations {
        analyzer.record_calibration(device, *ts);
    }

    let (mut ingest, ingest_handle) = IngestLoop::new(
        analyzer,
        alert_tx,
        health_registry.clone(),
        config.ingest_capacity,
    );

    let archive_handle = if config.archive_telemetry {
        health_registry.register(components::ARCHIVE).await;
        let (archive, sender, rx) = TelemetryArchive::channel(
            store.clone(),
            health_registry.clone(),
            config.ingest_capacity,
        );
        ingest = ingest.with_archive(sender);
        Some(tokio::spawn(archive.run(rx, shutdown_tx.subscribe())))
    } else {
        None
    };

    let ingest_task = tokio::spawn(ingest.run(shutdown_tx.subscribe()));
    let listener_handle = tokio::spawn(listener.run(
        ingest_handle,
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    if let Err(e) = listener_handle.await {
        warn!(error = %e, "MQTT listener task failed");
    }
    match ingest_task.await {
        Ok(analyzer) => info!(devices = analyzer.device_count(), "Ingest loop stopped"),
        Err(e) => {
            warn!(error = %e, "Ingest task failed");
            health_registry
                .set_unhealthy(components::INGEST, format!("Ingest task failed: {e}"))
                .await;
        }
    }
    if let Err(e) = dispatcher_handle.await {
        warn!(error = %e, "Alert dispatcher task failed");
    }
    if let Some(handle) = archive_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Telemetry archive task failed");
        }
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
