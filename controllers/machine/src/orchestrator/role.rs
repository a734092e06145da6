//! Bootstrap roles and step selection

use crds::{Cluster, Machine, MachinePhase, ProvisionedMachine};
use nodeadm::{EtcdBootstrapConfig, InitialClusterState, etcd_config_for_machine};
use std::fmt;

/// What a machine becomes, decided once per orchestration pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapRole {
    /// First master; founds the etcd cluster
    FoundingMaster { etcd: EtcdBootstrapConfig },
    /// Master joining the live etcd cluster through `peers`
    JoiningMaster {
        peers: Vec<String>,
        etcd: EtcdBootstrapConfig,
    },
    Node,
}

impl BootstrapRole {
    /// Resolve the role from the machine spec and the cluster's known etcd members
    pub fn resolve(machine: &Machine, cluster: &Cluster, provisioned_machine: &ProvisionedMachine) -> Self {
        if !machine.is_master() {
            return BootstrapRole::Node;
        }

        let members = cluster
            .status
            .as_ref()
            .map(|s| s.etcd_members.as_slice())
            .unwrap_or_default();
        let etcd = etcd_config_for_machine(provisioned_machine, members);

        match etcd.initial_cluster_state {
            InitialClusterState::New => BootstrapRole::FoundingMaster { etcd },
            InitialClusterState::Existing => BootstrapRole::JoiningMaster {
                peers: etcd.existing_peer_urls.clone(),
                etcd,
            },
        }
    }

    pub fn etcd(&self) -> Option<&EtcdBootstrapConfig> {
        match self {
            BootstrapRole::FoundingMaster { etcd } | BootstrapRole::JoiningMaster { etcd, .. } => Some(etcd),
            BootstrapRole::Node => None,
        }
    }

    pub fn is_master(&self) -> bool {
        !matches!(self, BootstrapRole::Node)
    }

    /// Next step for a bound machine in `phase`, `None` once nothing is left
    pub fn next_step(&self, phase: MachinePhase) -> Option<Step> {
        match (self.is_master(), phase) {
            (_, MachinePhase::Unbound) => None,
            (true, MachinePhase::Bound) => Some(Step::EtcdBootstrap),
            (true, MachinePhase::EtcdBootstrapped) => Some(Step::ControlPlaneInit),
            (true, MachinePhase::ControlPlaneReady) => Some(Step::MarkReady),
            (false, MachinePhase::Bound) => Some(Step::NodeJoin),
            (false, MachinePhase::Joined) => Some(Step::MarkReady),
            (_, MachinePhase::Ready) => None,
            // Phases belonging to the other role
            (true, MachinePhase::Joined) | (false, MachinePhase::EtcdBootstrapped | MachinePhase::ControlPlaneReady) => {
                None
            }
        }
    }
}

impl fmt::Display for BootstrapRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapRole::FoundingMaster { .. } => f.write_str("founding master"),
            BootstrapRole::JoiningMaster { peers, .. } => write!(f, "joining master ({} peers)", peers.len()),
            BootstrapRole::Node => f.write_str("node"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    EtcdBootstrap,
    ControlPlaneInit,
    NodeJoin,
    MarkReady,
}
