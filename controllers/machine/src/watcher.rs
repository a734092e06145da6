//! Kubernetes resource watchers.
//!
//! Machines are watched through `kube_runtime::Controller`, which handles
//! reconnection and per-object queuing. The reconcile result carries the
//! requeue decision; the error policy only covers failures that never reached
//! the orchestrator.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::Machine;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Run a `kube_runtime::Controller` for `api` until its stream ends
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, error: &ControllerError, _ctx: Arc<Reconciler>| {
        error!(
            "Reconciliation error for {} {:?}: {}",
            resource_name,
            obj.meta().name,
            error
        );
        Action::requeue(Duration::from_secs(60))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        let resource_name = resource_name.to_string();
        async move {
            debug!("Reconciling {} {:?}", resource_name, obj.meta().name);
            reconcile_fn(ctx, obj).await
        }
    };

    // Status writes bump the object too; debounce so a burst of them
    // becomes one reconciliation. Each pass may hold an SSH session open for
    // minutes, hence the concurrency cap.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches Machine resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    machine_api: Api<Machine>,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, machine_api: Api<Machine>) -> Self {
        Self {
            reconciler,
            machine_api,
        }
    }

    /// Starts watching Machine resources.
    pub async fn watch_machines(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.machine_api.clone(),
            self.reconciler.clone(),
            |reconciler, machine| Box::pin(async move { reconciler.reconcile_machine(&machine).await }),
            "Machine",
        )
        .await
    }
}
