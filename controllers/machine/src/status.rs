//! Status reconciliation
//!
//! Persists what a successfully completed bootstrap step established. Machine
//! status belongs to the one reconciliation handling that machine and is
//! replaced as a whole. Cluster status is shared by every machine of the
//! cluster, so each change is a read-modify-write retried on conflict.

use crate::error::{BootstrapError, ErrorKind, Phase};
use crate::store::{MAX_CAS_ATTEMPTS, ResourceStore};
use chrono::Utc;
use crds::{
    APIEndpoint, Cluster, ClusterStatus, EtcdMember, Machine, MachinePhase, MachineStatus, MachineVIPConfiguration,
    ProvisionedMachine,
};
use kube::ResourceExt;
use nodeadm::{ApiEndpointSet, generate_bootstrap_token};
use std::sync::Arc;
use tracing::{debug, info};

pub struct StatusReconciler {
    store: Arc<dyn ResourceStore>,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Move `machine` to `phase`, clearing any recorded error
    async fn advance<F>(&self, machine: &Machine, phase: MachinePhase, update: F) -> Result<Machine, BootstrapError>
    where
        F: FnOnce(&mut MachineStatus),
    {
        let mut status = machine.status.clone().unwrap_or_default();
        update(&mut status);
        status.phase = phase;
        status.error = None;
        status.last_transition_time = Some(Utc::now());

        let updated = self
            .store
            .update_machine_status(machine, &status)
            .await
            .map_err(|e| BootstrapError::from_store(Phase::StatusUpdate, e))?;

        info!(
            "Machine {}/{} is {}",
            machine.namespace().unwrap_or_default(),
            machine.name_any(),
            phase
        );
        Ok(updated)
    }

    pub async fn record_binding(&self, machine: &Machine, pm: &ProvisionedMachine) -> Result<Machine, BootstrapError> {
        self.advance(machine, MachinePhase::Bound, |status| {
            status.provisioned_machine_name = Some(pm.name_any());
            status.ssh_config = Some(pm.spec.ssh_config.clone());
        })
        .await
    }

    /// Record the member `etcdadm info` reported, replacing any previous record
    pub async fn record_etcd_member(&self, machine: &Machine, member: EtcdMember) -> Result<Machine, BootstrapError> {
        self.advance(machine, MachinePhase::EtcdBootstrapped, |status| {
            status.etcd_member = Some(member);
        })
        .await
    }

    pub async fn record_control_plane_ready(
        &self,
        machine: &Machine,
        vip: Option<MachineVIPConfiguration>,
    ) -> Result<Machine, BootstrapError> {
        self.advance(machine, MachinePhase::ControlPlaneReady, |status| {
            status.vip_configuration = vip;
        })
        .await
    }

    pub async fn record_joined(&self, machine: &Machine) -> Result<Machine, BootstrapError> {
        self.advance(machine, MachinePhase::Joined, |_| {}).await
    }

    pub async fn record_ready(&self, machine: &Machine) -> Result<Machine, BootstrapError> {
        self.advance(machine, MachinePhase::Ready, |_| {}).await
    }

    /// Set `status.error` on the latest copy of the machine, leaving the rest
    pub async fn record_error(&self, namespace: &str, name: &str, error: &BootstrapError) -> Result<(), BootstrapError> {
        let machine = self
            .store
            .get_machine(namespace, name)
            .await
            .map_err(|e| BootstrapError::from_store(Phase::StatusUpdate, e))?;

        let mut status = machine.status.clone().unwrap_or_default();
        let message = error.to_string();
        if status.error.as_deref() == Some(message.as_str()) {
            debug!("Machine {}/{} already has this error in status, skipping update", namespace, name);
            return Ok(());
        }
        status.error = Some(message);

        self.store
            .update_machine_status(&machine, &status)
            .await
            .map_err(|e| BootstrapError::from_store(Phase::StatusUpdate, e))?;
        Ok(())
    }

    /// Read-modify-write of a cluster's status
    ///
    /// `mutate` returns false when the status already holds the change, in
    /// which case nothing is written.
    async fn update_cluster<F>(&self, namespace: &str, name: &str, mut mutate: F) -> Result<Cluster, BootstrapError>
    where
        F: FnMut(&mut ClusterStatus) -> bool,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let cluster = self
                .store
                .get_cluster(namespace, name)
                .await
                .map_err(|e| BootstrapError::from_store(Phase::StatusUpdate, e))?;

            let mut status = cluster.status.clone().unwrap_or_default();
            if !mutate(&mut status) {
                return Ok(cluster);
            }

            match self.store.update_cluster_status(&cluster, &status).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() => {
                    debug!(
                        "Cluster {}/{} status changed concurrently (attempt {}), retrying",
                        namespace, name, attempt
                    );
                }
                Err(e) => return Err(BootstrapError::from_store(Phase::StatusUpdate, e)),
            }
        }

        Err(BootstrapError::new(
            Phase::StatusUpdate,
            ErrorKind::Store,
            format!(
                "gave up updating Cluster {}/{} status after {} conflicts",
                namespace, name, MAX_CAS_ATTEMPTS
            ),
        ))
    }

    /// Insert or replace (by name) an etcd member in cluster status
    pub async fn upsert_etcd_member(
        &self,
        namespace: &str,
        cluster: &str,
        member: &EtcdMember,
    ) -> Result<Cluster, BootstrapError> {
        self.update_cluster(namespace, cluster, |status| {
            match status.etcd_members.iter_mut().find(|m| m.name == member.name) {
                Some(existing) if *existing == *member => false,
                Some(existing) => {
                    *existing = member.clone();
                    true
                }
                None => {
                    status.etcd_members.push(member.clone());
                    true
                }
            }
        })
        .await
    }

    pub async fn add_api_endpoint(
        &self,
        namespace: &str,
        cluster: &str,
        endpoint: &APIEndpoint,
    ) -> Result<Cluster, BootstrapError> {
        self.update_cluster(namespace, cluster, |status| {
            let mut endpoints: ApiEndpointSet = status.api_endpoints.iter().collect();
            if !endpoints.insert(endpoint.clone()) {
                return false;
            }
            status.api_endpoints = endpoints.into_vec();
            true
        })
        .await
    }

    /// The cluster's bootstrap token, generated on first use
    ///
    /// When two masters race, the loser's write conflicts and its retry
    /// reads the winner's token.
    pub async fn ensure_bootstrap_token(&self, namespace: &str, cluster: &str) -> Result<(Cluster, String), BootstrapError> {
        let updated = self
            .update_cluster(namespace, cluster, |status| {
                if status.bootstrap_token.as_deref().is_some_and(|t| !t.is_empty()) {
                    return false;
                }
                status.bootstrap_token = Some(generate_bootstrap_token());
                true
            })
            .await?;

        let token = updated
            .status
            .as_ref()
            .and_then(|s| s.bootstrap_token.clone())
            .ok_or_else(|| {
                BootstrapError::new(
                    Phase::StatusUpdate,
                    ErrorKind::Store,
                    format!("Cluster {}/{} has no bootstrap token after update", namespace, cluster),
                )
            })?;
        Ok((updated, token))
    }
}
