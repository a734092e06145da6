//! Main controller implementation.
//!
//! Wires the Kubernetes client, the SSH client builder, the orchestrator and
//! the Machine watcher together, then runs until the watcher exits.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::orchestrator::Orchestrator;
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::Watcher;
use crds::Machine;
use kube::{Api, Client};
use machine_client::SshMachineClientBuilder;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for Machine bootstrap.
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watcher.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Machine Controller");

        let kube_client = Client::try_default().await?;

        let machine_api: Api<Machine> = match config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        let store = Arc::new(KubeStore::new(kube_client));
        let clients = Arc::new(SshMachineClientBuilder::new(config.ssh.clone()));
        let orchestrator = Orchestrator::new(store, clients, config.insecure_ignore_host_key);
        let reconciler = Arc::new(Reconciler::new(orchestrator));

        let watcher = Watcher::new(reconciler, machine_api);
        let machine_watcher = tokio::spawn(async move { watcher.watch_machines().await });

        Ok(Self { machine_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Machine Controller running");

        self.machine_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("Machine watcher panicked: {}", e)))?
            .map_err(|e| ControllerError::Watch(format!("Machine watcher error: {}", e)))?;

        Ok(())
    }
}
