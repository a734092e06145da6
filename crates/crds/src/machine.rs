//! Machine CRD
//!
//! A Machine is the desired membership of one host in the cluster: either a
//! control-plane master or a worker node. It is bound to a
//! ProvisionedMachine on its first reconciliation, and its status is extended
//! as each bootstrap phase completes.

use crate::cluster::EtcdMember;
use crate::provisioned_machine::SSHConfig;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "bootstrap.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".spec.role"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".status.sshConfig.host"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the Cluster (same namespace) this machine belongs to
    pub cluster_ref: String,

    /// Role of the machine in the cluster
    #[serde(default)]
    pub role: MachineRole,

    /// Desired component versions
    #[serde(default)]
    pub versions: MachineVersionInfo,

    /// Taints registered on the node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    /// Fallback component versions (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_versions: Option<ComponentVersions>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum MachineRole {
    #[serde(alias = "master")]
    Master,
    #[default]
    #[serde(alias = "node")]
    Node,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineVersionInfo {
    /// Kubelet version
    #[serde(default)]
    pub kubelet: String,

    /// Control plane version; only meaningful for masters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentVersions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalived_version: Option<String>,
}

/// Node taint, mirroring the core/v1 Taint shape
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// NoSchedule, PreferNoSchedule or NoExecute
    pub effect: String,
}

/// Bootstrap progress of a machine
///
/// Masters: Unbound -> Bound -> EtcdBootstrapped -> ControlPlaneReady -> Ready
/// Nodes:   Unbound -> Bound -> Joined -> Ready
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "PascalCase")]
pub enum MachinePhase {
    #[default]
    #[serde(alias = "unbound")]
    Unbound,
    #[serde(alias = "bound")]
    Bound,
    #[serde(alias = "etcdBootstrapped")]
    EtcdBootstrapped,
    #[serde(alias = "controlPlaneReady")]
    ControlPlaneReady,
    #[serde(alias = "joined")]
    Joined,
    #[serde(alias = "ready")]
    Ready,
}

impl std::fmt::Display for MachinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MachinePhase::Unbound => "Unbound",
            MachinePhase::Bound => "Bound",
            MachinePhase::EtcdBootstrapped => "EtcdBootstrapped",
            MachinePhase::ControlPlaneReady => "ControlPlaneReady",
            MachinePhase::Joined => "Joined",
            MachinePhase::Ready => "Ready",
        };
        f.write_str(s)
    }
}

/// Virtual IP state applied to a master
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineVIPConfiguration {
    pub ip: String,

    #[serde(rename = "routerID")]
    #[schemars(rename = "routerID")]
    pub router_id: u8,

    /// Interface keepalived binds the VIP to
    /// When empty, nodeadm picks the interface of the default gateway.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_interface: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default)]
    pub phase: MachinePhase,

    /// ProvisionedMachine this machine is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_machine_name: Option<String>,

    /// SSH endpoint copied from the bound ProvisionedMachine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_config: Option<SSHConfig>,

    /// Local etcd member, as last reported by `etcdadm info`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_member: Option<EtcdMember>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_configuration: Option<MachineVIPConfiguration>,

    /// Last bootstrap failure; serialized as null when cleared so a merge
    /// patch removes it
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Machine {
    pub fn is_master(&self) -> bool {
        self.spec.role == MachineRole::Master
    }

    /// Current phase, `Unbound` when no status has been written
    pub fn phase(&self) -> MachinePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Kubernetes version for the control plane
    ///
    /// Prefers `versions.controlPlane`, falling back to
    /// `componentVersions.kubernetesVersion`.
    pub fn control_plane_version(&self) -> Option<&str> {
        self.spec
            .versions
            .control_plane
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| {
                self.spec
                    .component_versions
                    .as_ref()
                    .and_then(|c| c.kubernetes_version.as_deref())
            })
    }
}
