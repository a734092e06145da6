//! ProvisionedMachine CRD
//!
//! An existing host reachable over SSH. ProvisionedMachines are created
//! externally; the controller only claims them by writing `status.machineRef`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "bootstrap.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "ProvisionedMachine",
    namespaced,
    status = "ProvisionedMachineStatus",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.sshConfig.host"}"#,
    printcolumn = r#"{"name":"Machine","type":"string","jsonPath":".status.machineRef"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedMachineSpec {
    /// How to reach the host
    pub ssh_config: SSHConfig,

    /// Interface carrying the cluster VIP when this host is a master
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_network_interface: Option<String>,
}

/// SSH endpoint and credentials reference
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SSHConfig {
    /// Hostname or IP
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Expected host public keys in authorized-key format
    /// An empty list is only accepted when host key checking is disabled.
    #[serde(default)]
    pub public_keys: Vec<String>,

    /// Secret with `username` and `privateKey`
    pub credential_secret: String,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedMachineStatus {
    /// Machine (same namespace) this host is bound to
    /// Serialized as null when unset so a merge patch can release the claim.
    #[serde(default)]
    pub machine_ref: Option<String>,
}

impl ProvisionedMachine {
    /// Machine this host is bound to, if any
    pub fn bound_machine(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.machine_ref.as_deref())
    }

    /// Whether the host is free for `machine` (unbound, or already bound to it)
    pub fn available_for(&self, machine: &str) -> bool {
        match self.bound_machine() {
            None => true,
            Some(bound) => bound == machine,
        }
    }
}
