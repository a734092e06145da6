//! Machine Controller
//!
//! Bootstraps Kubernetes machines over SSH:
//! - binds each Machine to a free ProvisionedMachine
//! - masters: runs `etcdadm` then `nodeadm init` with a generated configuration
//! - nodes: runs `nodeadm join` against the recorded API endpoints
//!
//! Progress is recorded in the Machine and Cluster statuses so that any
//! reconciliation can resume where the previous one stopped.

mod backoff;
mod config;
mod controller;
mod credentials;
mod error;
mod orchestrator;
mod reconciler;
mod retry;
mod status;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    // kube is built against rustls without a default provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| ControllerError::InvalidConfig("failed to install rustls crypto provider".to_string()))?;

    info!("Starting Machine Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  SSH binary: {}", config.ssh.binary.display());
    info!(
        "  SSH timeouts: connect {}s, command {}s",
        config.ssh.connect_timeout.as_secs(),
        config.ssh.command_timeout.as_secs()
    );
    if config.insecure_ignore_host_key {
        info!("  Host key verification: DISABLED");
    }

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
