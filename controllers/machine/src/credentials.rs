//! Credential & endpoint resolution
//!
//! Picks the ProvisionedMachine a Machine runs on, claims it, and turns its
//! SSH configuration and credential Secret into an open [`MachineClient`].

use crate::error::{BootstrapError, ErrorKind, Phase};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::store::{MAX_CAS_ATTEMPTS, ResourceStore};
use crds::{Machine, ProvisionedMachine, ProvisionedMachineStatus};
use kube::ResourceExt;
use machine_client::{
    HostKeyPolicy, MachineClient, MachineClientBuilder, MachineClientError, SshTarget, validate_private_key,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Secret key holding the SSH login name
pub const USERNAME_KEY: &str = "username";
/// Secret key holding the PEM or OpenSSH private key
pub const PRIVATE_KEY_KEY: &str = "privateKey";

pub struct CredentialResolver {
    store: Arc<dyn ResourceStore>,
    insecure_ignore_host_key: bool,
    session_retry: RetryConfig,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn ResourceStore>, insecure_ignore_host_key: bool) -> Self {
        Self {
            store,
            insecure_ignore_host_key,
            session_retry: RetryConfig::with_max_attempts(3),
        }
    }

    #[cfg(test)]
    pub fn with_session_retry(mut self, retry: RetryConfig) -> Self {
        self.session_retry = retry;
        self
    }

    /// ProvisionedMachine the machine runs on, claiming one if needed
    ///
    /// Returns `None` when no host is free; the caller waits and tries again.
    pub async fn provisioned_machine_for(&self, machine: &Machine) -> Result<Option<ProvisionedMachine>, BootstrapError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();

        let recorded = machine
            .status
            .as_ref()
            .and_then(|s| s.provisioned_machine_name.as_deref());

        let Some(pm_name) = recorded else {
            return self.bind(machine).await;
        };

        let pm = self
            .store
            .get_provisioned_machine(&namespace, pm_name)
            .await
            .map_err(|e| BootstrapError::from_store(Phase::Bind, e))?;

        if pm.bound_machine() != Some(name.as_str()) {
            return Err(BootstrapError::configuration(
                Phase::Bind,
                format!(
                    "ProvisionedMachine {}/{} is recorded for Machine {} but bound to {:?}",
                    namespace,
                    pm_name,
                    name,
                    pm.bound_machine()
                ),
            ));
        }
        Ok(Some(pm))
    }

    /// Claim a ProvisionedMachine for `machine`
    ///
    /// A host already bound to this machine is reused. Otherwise the first
    /// unbound host by name is claimed with a compare-and-set write of its
    /// `status.machineRef`; when another machine wins the race the list is
    /// re-read and the next candidate tried.
    pub async fn bind(&self, machine: &Machine) -> Result<Option<ProvisionedMachine>, BootstrapError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let candidates = self
                .store
                .list_provisioned_machines(&namespace)
                .await
                .map_err(|e| BootstrapError::from_store(Phase::Bind, e))?;

            if let Some(pm) = candidates.iter().find(|pm| pm.bound_machine() == Some(name.as_str())) {
                debug!("Machine {}/{} already bound to {}", namespace, name, pm.name_any());
                return Ok(Some(pm.clone()));
            }

            let Some(candidate) = candidates.into_iter().find(|pm| pm.available_for(&name)) else {
                return Ok(None);
            };

            let status = ProvisionedMachineStatus {
                machine_ref: Some(name.clone()),
            };
            match self.store.update_provisioned_machine_status(&candidate, &status).await {
                Ok(claimed) => {
                    info!(
                        "Bound Machine {}/{} to ProvisionedMachine {}",
                        namespace,
                        name,
                        claimed.name_any()
                    );
                    return Ok(Some(claimed));
                }
                Err(e) if e.is_conflict() => {
                    debug!(
                        "ProvisionedMachine {}/{} claimed concurrently (attempt {}), retrying",
                        namespace,
                        candidate.name_any(),
                        attempt
                    );
                }
                Err(e) => return Err(BootstrapError::from_store(Phase::Bind, e)),
            }
        }

        Err(BootstrapError::new(
            Phase::Bind,
            ErrorKind::Store,
            format!(
                "gave up claiming a ProvisionedMachine for {}/{} after {} conflicts",
                namespace, name, MAX_CAS_ATTEMPTS
            ),
        ))
    }

    /// Connection target for a bound ProvisionedMachine
    pub async fn resolve_target(&self, provisioned_machine: &ProvisionedMachine) -> Result<SshTarget, BootstrapError> {
        let namespace = provisioned_machine.namespace().unwrap_or_default();
        let ssh = &provisioned_machine.spec.ssh_config;

        let secret = self
            .store
            .get_secret(&namespace, &ssh.credential_secret)
            .await
            .map_err(|e| BootstrapError::from_store(Phase::Session, e))?;
        let secret_name = format!("{}/{}", namespace, ssh.credential_secret);

        let username = String::from_utf8(required(&secret, &secret_name, USERNAME_KEY)?.to_vec())
            .map_err(|_| {
                BootstrapError::configuration(
                    Phase::Session,
                    format!("Secret {} key {:?} is not valid UTF-8", secret_name, USERNAME_KEY),
                )
            })?
            .trim()
            .to_string();

        let private_key = required(&secret, &secret_name, PRIVATE_KEY_KEY)?.to_vec();
        validate_private_key(&private_key).map_err(|e| BootstrapError::from_client(Phase::Session, e))?;

        let host_keys = if self.insecure_ignore_host_key {
            warn!(
                "Host key verification disabled for ProvisionedMachine {}/{}",
                namespace,
                provisioned_machine.name_any()
            );
            HostKeyPolicy::InsecureIgnore
        } else {
            HostKeyPolicy::from_authorized_keys(&ssh.public_keys).map_err(|e| {
                BootstrapError::configuration(
                    Phase::Session,
                    format!(
                        "ProvisionedMachine {}/{} host keys: {}",
                        namespace,
                        provisioned_machine.name_any(),
                        e
                    ),
                )
            })?
        };

        Ok(SshTarget {
            host: ssh.host.clone(),
            port: ssh.port,
            username,
            private_key,
            host_keys,
        })
    }

    /// Open a session, retrying transport failures with backoff
    pub async fn open_session(
        &self,
        clients: &dyn MachineClientBuilder,
        target: &SshTarget,
    ) -> Result<Box<dyn MachineClient>, BootstrapError> {
        let operation = format!("ssh {}@{}:{}", target.username, target.host, target.port);
        retry_with_backoff(
            &self.session_retry,
            &operation,
            MachineClientError::is_transport,
            || clients.connect(target),
        )
        .await
        .map_err(|e| BootstrapError::from_client(Phase::Session, e))
    }
}

fn required<'a>(secret: &'a BTreeMap<String, Vec<u8>>, secret_name: &str, key: &str) -> Result<&'a [u8], BootstrapError> {
    secret
        .get(key)
        .map(Vec::as_slice)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            BootstrapError::configuration(Phase::Session, format!("Secret {} has no {:?} key", secret_name, key))
        })
}
