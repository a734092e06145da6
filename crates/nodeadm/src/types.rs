//! nodeadm configuration file types
//!
//! These mirror the kubeadm `v1alpha2` documents nodeadm consumes, wrapped in
//! nodeadm's own envelope (VIP, network backend and keepalived settings).

use crds::{KubeProxyConfiguration, KubeletConfiguration, MachineVIPConfiguration, Taint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KUBEADM_API_VERSION: &str = "kubeadm.k8s.io/v1alpha2";
pub const MASTER_CONFIGURATION_KIND: &str = "MasterConfiguration";
pub const NODE_CONFIGURATION_KIND: &str = "NodeConfiguration";

/// VIP settings as written to the nodeadm configuration
pub type VIPConfiguration = MachineVIPConfiguration;

/// Input to `nodeadm init`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitConfiguration {
    pub master_configuration: MasterConfiguration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_configuration: Option<VIPConfiguration>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub network_backend: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keep_alived: BTreeMap<String, String>,
}

/// Input to `nodeadm join`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfiguration {
    pub node_configuration: NodeConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MasterConfiguration {
    pub api_version: String,
    pub kind: String,

    pub api: Api,

    #[serde(rename = "apiServerCertSANs", default, skip_serializing_if = "Vec::is_empty")]
    pub api_server_cert_sans: Vec<String>,

    pub etcd: Etcd,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes_version: String,

    pub networking: Networking,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet_configuration: Option<KubeletConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_proxy: Option<KubeProxyConfiguration>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub api_server_extra_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub controller_manager_extra_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scheduler_extra_args: BTreeMap<String, String>,

    /// Tokens joiners use to discover and authenticate to the control plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bootstrap_tokens: Vec<BootstrapToken>,

    pub node_registration: NodeRegistrationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfiguration {
    pub api_version: String,
    pub kind: String,

    pub token: String,

    #[serde(rename = "discoveryTokenAPIServers")]
    pub discovery_token_api_servers: Vec<String>,

    #[serde(rename = "discoveryTokenCACertHashes")]
    pub discovery_token_ca_cert_hashes: Vec<String>,

    pub node_registration: NodeRegistrationOptions,
}

/// Fields used when registering the Node object during init or join
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistrationOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kubelet_extra_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Api {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_port: Option<i32>,

    #[serde(default)]
    pub control_plane_endpoint: String,
}

/// External etcd the API server talks to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Etcd {
    pub endpoints: Vec<String>,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    pub service_subnet: String,
    pub pod_subnet: String,
    pub dns_domain: String,
}

/// kubeadm bootstrap token entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapToken {
    pub token: String,

    /// "0s" keeps the token valid indefinitely
    pub ttl: String,

    pub usages: Vec<String>,
    pub groups: Vec<String>,
}

impl BootstrapToken {
    /// A non-expiring token usable for node discovery and TLS bootstrap
    pub fn for_joiners(token: &str) -> Self {
        Self {
            token: token.to_string(),
            ttl: "0s".to_string(),
            usages: vec!["signing".to_string(), "authentication".to_string()],
            groups: vec!["system:bootstrappers:kubeadm:default-node-token".to_string()],
        }
    }
}
