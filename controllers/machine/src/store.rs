//! Object store seam
//!
//! The orchestrator reads and writes Cluster, Machine and ProvisionedMachine
//! records and reads Secrets only through [`ResourceStore`]. Status writes to
//! shared records (Cluster, ProvisionedMachine) are compare-and-set against
//! the `resourceVersion` of the object the caller read; a stale write fails
//! with [`StoreError::Conflict`] and the caller re-reads and retries.

use crds::{Cluster, ClusterStatus, Machine, MachineStatus, ProvisionedMachine, ProvisionedMachineStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Bound on read-compute-write attempts against one shared record
pub const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// The record changed since it was read
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: String, name: String },

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Access to the resources the controller consumes and produces
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, StoreError>;

    /// Compare-and-set the status of `cluster` as read
    async fn update_cluster_status(&self, cluster: &Cluster, status: &ClusterStatus) -> Result<Cluster, StoreError>;

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, StoreError>;

    /// Replace the status of `machine`
    async fn update_machine_status(&self, machine: &Machine, status: &MachineStatus) -> Result<Machine, StoreError>;

    /// All ProvisionedMachines in `namespace`, ordered by name
    async fn list_provisioned_machines(&self, namespace: &str) -> Result<Vec<ProvisionedMachine>, StoreError>;

    async fn get_provisioned_machine(&self, namespace: &str, name: &str) -> Result<ProvisionedMachine, StoreError>;

    /// Compare-and-set the status of `provisioned_machine` as read
    async fn update_provisioned_machine_status(
        &self,
        provisioned_machine: &ProvisionedMachine,
        status: &ProvisionedMachineStatus,
    ) -> Result<ProvisionedMachine, StoreError>;

    /// Decoded data of a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, StoreError>;
}

/// [`ResourceStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error(kind: &str, namespace: &str, name: &str, error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind: kind.to_string(),
            name: format!("{}/{}", namespace, name),
        },
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
            kind: kind.to_string(),
            name: format!("{}/{}", namespace, name),
        },
        other => StoreError::Kube(other),
    }
}

/// Merge patch replacing `status`, guarded by the read resourceVersion when known
fn status_patch<S: Serialize>(resource_version: Option<String>, status: &S) -> Result<serde_json::Value, StoreError> {
    let status = serde_json::to_value(status).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let patch = match resource_version {
        Some(rv) => serde_json::json!({
            "metadata": { "resourceVersion": rv },
            "status": status,
        }),
        None => serde_json::json!({ "status": status }),
    };
    Ok(patch)
}

async fn patch_status<K, S>(api: &Api<K>, kind: &str, obj: &K, status: &S, guarded: bool) -> Result<K, StoreError>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    S: Serialize,
{
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let rv = if guarded { obj.resource_version() } else { None };
    let patch = status_patch(rv, status)?;

    debug!("Patching {} {}/{} status", kind, namespace, name);
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| map_kube_error(kind, &namespace, &name, e))
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, StoreError> {
        self.api::<Cluster>(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error("Cluster", namespace, name, e))
    }

    async fn update_cluster_status(&self, cluster: &Cluster, status: &ClusterStatus) -> Result<Cluster, StoreError> {
        let namespace = cluster.namespace().unwrap_or_default();
        patch_status(&self.api::<Cluster>(&namespace), "Cluster", cluster, status, true).await
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, StoreError> {
        self.api::<Machine>(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error("Machine", namespace, name, e))
    }

    async fn update_machine_status(&self, machine: &Machine, status: &MachineStatus) -> Result<Machine, StoreError> {
        let namespace = machine.namespace().unwrap_or_default();
        patch_status(&self.api::<Machine>(&namespace), "Machine", machine, status, false).await
    }

    async fn list_provisioned_machines(&self, namespace: &str) -> Result<Vec<ProvisionedMachine>, StoreError> {
        let list = self
            .api::<ProvisionedMachine>(namespace)
            .list(&ListParams::default())
            .await?;
        let mut items = list.items;
        items.sort_by_key(|pm| pm.name_any());
        Ok(items)
    }

    async fn get_provisioned_machine(&self, namespace: &str, name: &str) -> Result<ProvisionedMachine, StoreError> {
        self.api::<ProvisionedMachine>(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error("ProvisionedMachine", namespace, name, e))
    }

    async fn update_provisioned_machine_status(
        &self,
        provisioned_machine: &ProvisionedMachine,
        status: &ProvisionedMachineStatus,
    ) -> Result<ProvisionedMachine, StoreError> {
        let namespace = provisioned_machine.namespace().unwrap_or_default();
        patch_status(
            &self.api::<ProvisionedMachine>(&namespace),
            "ProvisionedMachine",
            provisioned_machine,
            status,
            true,
        )
        .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let secret: Secret = self
            .api::<Secret>(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error("Secret", namespace, name, e))?;

        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }
}
