use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use athena_discovery::config::{self, Config};
use athena_discovery::metrics::start_metrics_server;
use athena_discovery::{DiscoveryManager, TopologyEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_or_default_config();

    if let Some(addr) = config.metrics.listen_addr.clone() {
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&addr).await {
                error!(error = %e, "Metrics server stopped");
            }
        });
    }

    let manager = DiscoveryManager::from_config(&config).await?;
    info!(
        groups = manager.group_ids().len(),
        instance = %manager.bridge().instance_id(),
        namespace = %config.coordination.namespace,
        "Athena discovery started"
    );

    for group_id in manager.group_ids() {
        let mut events = manager.subscribe(&group_id)?;
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TopologyEvent::PrimaryChanged { group_id, new_primary, sequence, .. }) => {
                        info!(group = %group_id, primary = %new_primary, sequence, "Routing writes to new primary");
                    }
                    Ok(TopologyEvent::PrimaryWithdrawn { group_id, old_primary, sequence }) => {
                        warn!(group = %group_id, old_primary = %old_primary, sequence, "No eligible primary, writes unroutable");
                    }
                    Ok(TopologyEvent::AvailabilityChanged { .. }) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(group = %group_id, missed, "Topology listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    for group_id in manager.group_ids() {
        if let Err(e) = manager.deregister_group(&group_id).await {
            warn!(group = %group_id, error = %e, "Failed to deregister group");
        }
    }
    Ok(())
}

fn load_or_default_config() -> Config {
    // Try to load from config file
    let config_paths = ["config/athena-discovery.toml", "athena-discovery.toml"];

    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}
