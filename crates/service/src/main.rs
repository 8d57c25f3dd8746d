//! Products service entry point.

use service::{Config, LogFormat, Service, ServiceError};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(format: LogFormat) {
    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // 1. Configuration, then tracing in the configured format
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    // 2. Prometheus scrape endpoint
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()?;
    service::describe_metrics();
    tracing::info!(addr = %config.metrics_addr, "metrics listener started");

    // 3. Backends and background tasks
    let service = Service::build(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = service.start(shutdown_rx).await?;
    tracing::info!(
        topic = %service.config().broker_topic,
        policy = %service.config().existence_policy,
        "products service running"
    );

    // 4. Run until signalled
    shutdown_signal().await;
    shutdown_tx.send_replace(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "background task panicked");
        }
    }
    service.close().await?;

    tracing::info!("service shut down gracefully");
    Ok(())
}
