//! podwatch - HTTP service and pod health monitor
//!
//! Probes the service's endpoints, watches its pods and their resource
//! usage, and collects container logs when the service turns unhealthy.

use anyhow::{Context, Result};
use monitor_lib::{
    health::components, AlertSink, Alerter, Coordinator, FileLogStore, HealthRegistry,
    MonitorMetrics, StructuredLogger, TracingAlertSink,
};
use podwatch::{
    alert::WebhookAlertSink, api, config::MonitorConfig, k8s::KubeClusterClient,
    transport::ReqwestTransport,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration errors are fatal before any tick runs
    let config = MonitorConfig::load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(fmt::layer().json())
        .init();

    for warning in config.threshold_warnings()? {
        warn!(warning = %warning, "Threshold band ordering violated");
    }

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CLUSTER_API).await;
    health_registry.register(components::METRICS_SOURCE).await;
    health_registry.register(components::LOG_COLLECTOR).await;

    let metrics = MonitorMetrics::new();

    let service_name = config.service_name();
    let logger = StructuredLogger::new(service_name.clone());
    logger.log_startup(
        MONITOR_VERSION,
        config.monitoring.interval,
        config.api.endpoints.len(),
    );
    info!(
        base_url = %config.api.base_url,
        namespace = %config.kubernetes.namespace,
        selector = %config.label_selector(),
        logs_directory = %config.logs.directory.display(),
        "Monitor configured"
    );

    let cluster = Arc::new(
        KubeClusterClient::new()
            .await
            .context("failed to create Kubernetes client")?,
    );
    let transport = Arc::new(ReqwestTransport::new().context("failed to create HTTP client")?);
    let log_store = Arc::new(FileLogStore::new(&config.logs.directory));

    let alert_sink: Arc<dyn AlertSink> = match &config.alerting.webhook_url {
        Some(url) => {
            let mut alerter = Alerter::new(service_name.clone(), config.kubernetes.namespace.clone());
            if let Some(generator_url) = &config.alerting.generator_url {
                alerter = alerter.with_generator_url(generator_url.clone());
            }
            info!(url = %url, "Alert webhook enabled");
            Arc::new(WebhookAlertSink::new(url.clone(), alerter)?)
        }
        None => Arc::new(TracingAlertSink),
    };

    let mut builder = Coordinator::builder()
        .config(config.coordinator_config()?)
        .prober_config(config.prober_config()?)
        .transport(transport)
        .cluster(cluster)
        .log_store(log_store)
        .alert_sink(alert_sink)
        .health_registry(health_registry.clone());
    if let Some(generator_url) = &config.alerting.generator_url {
        builder = builder.generator_url(generator_url.clone());
    }
    let coordinator = builder.build()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let app_state = Arc::new(api::AppState::new(
        health_registry,
        metrics,
        coordinator.subscribe(),
    ));
    let api_handle = tokio::spawn(api::serve(
        config.server.port,
        app_state,
        shutdown_tx.subscribe(),
    ));
    let monitor_handle = tokio::spawn(coordinator.run(shutdown_tx.subscribe()));

    let reason = shutdown_signal().await;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = monitor_handle.await {
        error!(error = %e, "Monitoring loop panicked");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
