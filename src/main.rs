//! OCPP gateway binary
//!
//! Single-node entry point: environment configuration, tracing and
//! Prometheus setup, in-memory KV/bus implementations. Clustered
//! deployments embed [`ocpp_gateway::GatewayHandle`] with their own store
//! and bus clients.

use tracing::{error, info};

use ocpp_gateway::{GatewayConfig, GatewayHandle, GatewayOptions, MemoryKvStore, MemoryMessageBus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Metrics recorder must be installed before any counters are touched.
    let _prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    info!("Prometheus metrics recorder installed");

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "Invalid configuration");
            return Err(err.into());
        }
    };

    info!(
        node_id = config.node_id.as_str(),
        "Starting OCPP gateway (in-memory KV store and bus; single-node mode)"
    );

    let handle = GatewayHandle::start(GatewayOptions {
        config,
        kv: MemoryKvStore::shared(),
        bus: MemoryMessageBus::shared(),
    })
    .await?;

    handle.listen_for_signals();
    handle.wait().await;

    info!("Gateway stopped");
    Ok(())
}
