//! Bootstrap Orchestrator
//!
//! Drives one Machine through its bootstrap steps over SSH:
//!
//! - masters: bind, `etcdadm init|join`, `etcdadm info`, `nodeadm init`, ready
//! - nodes: bind, `nodeadm join`, ready
//!
//! Each call to [`Orchestrator::create`] starts from the phase recorded in
//! the Machine's status and performs only the steps still missing, so an
//! interrupted bootstrap resumes on the next reconciliation. Nothing applied
//! remotely is rolled back; every remote command is expected to tolerate
//! being run again.

pub mod role;

pub use role::{BootstrapRole, Step};

use crate::credentials::CredentialResolver;
use crate::error::{BootstrapError, Phase};
use crate::status::StatusReconciler;
use crate::store::ResourceStore;
use crds::{APIEndpoint, Cluster, EtcdMember, Machine, MachinePhase, ProvisionedMachine};
use kube::ResourceExt;
use machine_client::{MachineClient, MachineClientBuilder};
use nodeadm::{
    ApiEndpointSet, ETCDADM_PATH, NODEADM_CONFIG_MODE, NODEADM_CONFIG_PATH, NODEADM_PATH, ca_cert_hash,
    init::api_server_port, init_configuration_for_machine, join_configuration_for_machine, render_yaml,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Secret key holding the API server CA certificate
pub const CA_CERT_KEY: &str = "tls.crt";

/// Outcome of an orchestration pass that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// No steps left for the machine's role
    Complete(MachinePhase),
    /// Blocked on something outside this machine; try again later
    Waiting(String),
}

pub struct Orchestrator {
    store: Arc<dyn ResourceStore>,
    clients: Arc<dyn MachineClientBuilder>,
    resolver: CredentialResolver,
    status: StatusReconciler,
}

/// SSH session opened on first use and closed once the pass ends
struct LazySession<'a> {
    resolver: &'a CredentialResolver,
    clients: &'a dyn MachineClientBuilder,
    provisioned_machine: &'a ProvisionedMachine,
    client: Option<Box<dyn MachineClient>>,
}

impl<'a> LazySession<'a> {
    async fn client(&mut self) -> Result<&dyn MachineClient, BootstrapError> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                let target = self.resolver.resolve_target(self.provisioned_machine).await?;
                debug!("Opening SSH session to {}:{}", target.host, target.port);
                self.resolver.open_session(self.clients, &target).await?
            }
        };
        Ok(&**self.client.insert(client))
    }

    async fn close(mut self) {
        if let Some(mut client) = self.client.take() {
            client.close().await;
        }
    }
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ResourceStore>, clients: Arc<dyn MachineClientBuilder>, insecure_ignore_host_key: bool) -> Self {
        Self {
            resolver: CredentialResolver::new(store.clone(), insecure_ignore_host_key),
            status: StatusReconciler::new(store.clone()),
            store,
            clients,
        }
    }

    #[cfg(test)]
    pub fn with_resolver(mut self, resolver: CredentialResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Whether the machine has been bound to a ProvisionedMachine
    pub fn exists(&self, machine: &Machine) -> bool {
        machine
            .status
            .as_ref()
            .is_some_and(|s| s.provisioned_machine_name.is_some())
    }

    /// Bring the machine as far through its bootstrap as currently possible
    ///
    /// A failure is recorded in the machine's `status.error` before it is
    /// returned.
    pub async fn create(&self, machine: &Machine) -> Result<Progress, BootstrapError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();

        match self.bootstrap(machine).await {
            Ok(progress) => Ok(progress),
            Err(err) => {
                warn!("Bootstrap of Machine {}/{} failed: {}", namespace, name, err);
                if let Err(status_err) = self.status.record_error(&namespace, &name, &err).await {
                    warn!(
                        "Failed to record error on Machine {}/{}: {}",
                        namespace, name, status_err
                    );
                }
                Err(err)
            }
        }
    }

    /// In-place upgrades are not performed
    pub async fn update(&self, machine: &Machine) -> Result<(), BootstrapError> {
        info!(
            "Update of Machine {}/{} requested; no remote changes are made",
            machine.namespace().unwrap_or_default(),
            machine.name_any()
        );
        Ok(())
    }

    /// Teardown is not performed; the ProvisionedMachine stays bound
    pub async fn delete(&self, machine: &Machine) -> Result<(), BootstrapError> {
        info!(
            "Delete of Machine {}/{} requested; no remote changes are made",
            machine.namespace().unwrap_or_default(),
            machine.name_any()
        );
        Ok(())
    }

    async fn bootstrap(&self, machine: &Machine) -> Result<Progress, BootstrapError> {
        if machine.phase() == MachinePhase::Ready {
            return Ok(Progress::Complete(MachinePhase::Ready));
        }

        let namespace = machine.namespace().unwrap_or_default();
        let cluster = self
            .store
            .get_cluster(&namespace, &machine.spec.cluster_ref)
            .await
            .map_err(|e| BootstrapError::from_store(Phase::Bind, e))?;

        let mut machine = machine.clone();
        let Some(pm) = self.resolver.provisioned_machine_for(&machine).await? else {
            return Ok(Progress::Waiting("no ProvisionedMachine available".to_string()));
        };
        if machine.phase() == MachinePhase::Unbound {
            machine = self.status.record_binding(&machine, &pm).await?;
        }

        let role = BootstrapRole::resolve(&machine, &cluster, &pm);
        info!(
            "Bootstrapping Machine {}/{} as {} on {} (phase {})",
            namespace,
            machine.name_any(),
            role,
            pm.spec.ssh_config.host,
            machine.phase()
        );

        let mut session = LazySession {
            resolver: &self.resolver,
            clients: self.clients.as_ref(),
            provisioned_machine: &pm,
            client: None,
        };
        let result = self.run_steps(&mut machine, cluster, &pm, &role, &mut session).await;
        session.close().await;
        result
    }

    async fn run_steps(
        &self,
        machine: &mut Machine,
        mut cluster: Cluster,
        pm: &ProvisionedMachine,
        role: &BootstrapRole,
        session: &mut LazySession<'_>,
    ) -> Result<Progress, BootstrapError> {
        while let Some(step) = role.next_step(machine.phase()) {
            debug!("Machine {}/{} step {:?}", machine.namespace().unwrap_or_default(), machine.name_any(), step);
            match step {
                Step::EtcdBootstrap => {
                    let (updated_machine, updated_cluster) = self.bootstrap_etcd(machine, role, session).await?;
                    *machine = updated_machine;
                    cluster = updated_cluster;
                }
                Step::ControlPlaneInit => {
                    let (updated_machine, updated_cluster) =
                        self.init_control_plane(machine, &cluster, pm, session).await?;
                    *machine = updated_machine;
                    cluster = updated_cluster;
                }
                Step::NodeJoin => match self.join_node(machine, &cluster, session).await? {
                    Ok(updated) => *machine = updated,
                    Err(reason) => return Ok(Progress::Waiting(reason)),
                },
                Step::MarkReady => {
                    *machine = self.status.record_ready(machine).await?;
                }
            }
        }
        Ok(Progress::Complete(machine.phase()))
    }

    /// `etcdadm init|join` then `etcdadm info`, recording the reported member
    async fn bootstrap_etcd(
        &self,
        machine: &Machine,
        role: &BootstrapRole,
        session: &mut LazySession<'_>,
    ) -> Result<(Machine, Cluster), BootstrapError> {
        let namespace = machine.namespace().unwrap_or_default();
        let etcd = role.etcd().ok_or_else(|| {
            BootstrapError::configuration(Phase::EtcdBootstrap, format!("{} machines do not run etcd", role))
        })?;
        debug!(
            "etcd environment for Machine {}/{}:\n{}",
            namespace,
            machine.name_any(),
            etcd.to_env_file()
        );

        let client = session.client().await?;
        client
            .run_command(&etcd.etcdadm_command())
            .await
            .map_err(|e| BootstrapError::from_client(Phase::EtcdBootstrap, e))?;

        let info = client
            .run_command(&format!("{} info", ETCDADM_PATH))
            .await
            .map_err(|e| BootstrapError::from_client(Phase::EtcdBootstrap, e))?;
        let member: EtcdMember = serde_json::from_slice(&info.stdout).map_err(|e| {
            BootstrapError::remote_command(
                Phase::EtcdBootstrap,
                format!("unable to parse `etcdadm info` output: {}", e),
            )
        })?;
        info!(
            "Machine {}/{} runs etcd member {} ({:x})",
            namespace,
            machine.name_any(),
            member.name,
            member.id
        );

        let cluster = self
            .status
            .upsert_etcd_member(&namespace, &machine.spec.cluster_ref, &member)
            .await?;
        let machine = self.status.record_etcd_member(machine, member).await?;
        Ok((machine, cluster))
    }

    /// Render and apply the `nodeadm init` configuration
    async fn init_control_plane(
        &self,
        machine: &Machine,
        cluster: &Cluster,
        pm: &ProvisionedMachine,
        session: &mut LazySession<'_>,
    ) -> Result<(Machine, Cluster), BootstrapError> {
        let namespace = machine.namespace().unwrap_or_default();
        let port = api_server_port(cluster).map_err(BootstrapError::from_config)?;

        let (cluster, token) = self
            .status
            .ensure_bootstrap_token(&namespace, &machine.spec.cluster_ref)
            .await?;
        let config = init_configuration_for_machine(&cluster, machine, pm, Some(&token))
            .map_err(BootstrapError::from_config)?;
        let rendered = render_yaml(&config).map_err(BootstrapError::from_config)?;

        let client = session.client().await?;
        client
            .write_file(NODEADM_CONFIG_PATH, NODEADM_CONFIG_MODE, rendered.as_bytes())
            .await
            .map_err(|e| BootstrapError::from_client(Phase::RemoteWrite, e))?;
        client
            .run_command(&format!("{} init --cfg {}", NODEADM_PATH, NODEADM_CONFIG_PATH))
            .await
            .map_err(|e| BootstrapError::from_client(Phase::RemoteExec, e))?;

        let host = match &config.vip_configuration {
            Some(vip) => vip.ip.clone(),
            None => pm.spec.ssh_config.host.clone(),
        };
        let cluster = self
            .status
            .add_api_endpoint(&namespace, &machine.spec.cluster_ref, &APIEndpoint { host, port })
            .await?;
        let machine = self
            .status
            .record_control_plane_ready(machine, config.vip_configuration)
            .await?;
        Ok((machine, cluster))
    }

    /// Render and apply the `nodeadm join` configuration
    ///
    /// The inner `Err` carries the reason the node has to wait for the
    /// control plane.
    async fn join_node(
        &self,
        machine: &Machine,
        cluster: &Cluster,
        session: &mut LazySession<'_>,
    ) -> Result<Result<Machine, String>, BootstrapError> {
        let namespace = machine.namespace().unwrap_or_default();
        let cluster_status = cluster.status.clone().unwrap_or_default();

        let endpoints: ApiEndpointSet = cluster_status.api_endpoints.iter().collect();
        if endpoints.is_empty() {
            return Ok(Err(format!("Cluster {} has no API endpoint yet", cluster.name_any())));
        }
        let Some(token) = cluster_status.bootstrap_token.filter(|t| !t.is_empty()) else {
            return Ok(Err(format!("Cluster {} has no bootstrap token yet", cluster.name_any())));
        };

        let ca_secret = cluster.spec.api_server_ca_secret.as_deref().ok_or_else(|| {
            BootstrapError::configuration(
                Phase::ConfigGeneration,
                format!("Cluster {} has no apiServerCaSecret", cluster.name_any()),
            )
        })?;
        let ca_data = self
            .store
            .get_secret(&namespace, ca_secret)
            .await
            .map_err(|e| BootstrapError::from_store(Phase::ConfigGeneration, e))?;
        let ca_cert = ca_data.get(CA_CERT_KEY).ok_or_else(|| {
            BootstrapError::configuration(
                Phase::ConfigGeneration,
                format!("Secret {}/{} has no {:?} key", namespace, ca_secret, CA_CERT_KEY),
            )
        })?;
        let ca_hash = ca_cert_hash(ca_cert).map_err(BootstrapError::from_config)?;

        let config = join_configuration_for_machine(cluster, machine, &endpoints.addresses(), &[ca_hash], &token)
            .map_err(BootstrapError::from_config)?;
        let rendered = render_yaml(&config).map_err(BootstrapError::from_config)?;

        let client = session.client().await?;
        client
            .write_file(NODEADM_CONFIG_PATH, NODEADM_CONFIG_MODE, rendered.as_bytes())
            .await
            .map_err(|e| BootstrapError::from_client(Phase::RemoteWrite, e))?;
        client
            .run_command(&format!("{} join --cfg {}", NODEADM_PATH, NODEADM_CONFIG_PATH))
            .await
            .map_err(|e| BootstrapError::from_client(Phase::RemoteExec, e))?;

        Ok(Ok(self.status.record_joined(machine).await?))
    }
}
