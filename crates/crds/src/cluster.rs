//! Cluster CRD
//!
//! Cluster-wide settings consumed when generating control-plane and node
//! configuration, plus the shared status that masters and nodes read and
//! write concurrently (etcd membership, API endpoints, bootstrap token).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "bootstrap.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Pod/service networks and DNS domain
    pub cluster_network: ClusterNetworkingConfig,

    /// Virtual IP fronting the API servers (optional)
    /// When not set, no VIP is configured and API endpoints are the master hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_configuration: Option<VIPConfiguration>,

    /// Secret holding the etcd CA certificate and key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_ca_secret: Option<String>,

    /// Secret holding the API server CA certificate (`tls.crt`) and key
    /// Required before any worker node can join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_ca_secret: Option<String>,

    /// Secret holding the front proxy CA certificate and key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_proxy_ca_secret: Option<String>,

    /// Secret holding the service account signing key pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_key_secret: Option<String>,

    /// Per-component configuration overrides (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_config: Option<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkingConfig {
    /// Service network ranges
    #[serde(default)]
    pub services: NetworkRanges,

    /// Pod network ranges
    #[serde(default)]
    pub pods: NetworkRanges,

    /// DNS domain used by services (e.g., "cluster.local")
    #[serde(default)]
    pub service_domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRanges {
    /// CIDR blocks; exactly one is supported
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

/// Virtual IP which API servers advertise and accept requests on
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VIPConfiguration {
    /// The virtual IP
    pub ip: String,

    /// Virtual router ID, in the range [0, 254]
    /// Must be unique within a single L2 network domain.
    #[serde(rename = "routerID")]
    #[schemars(rename = "routerID", range(min = 0, max = 254))]
    pub router_id: u8,
}

/// Component overrides applied on top of the generated kubeadm configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// kube-apiserver extra args
    /// The `secure-port` key is lifted into the API bind port.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kube_api_server: BTreeMap<String, String>,

    /// kube-controller-manager extra args
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kube_controller_manager: BTreeMap<String, String>,

    /// kube-scheduler extra args
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kube_scheduler: BTreeMap<String, String>,

    /// Kubelet command line extra args, applied through node registration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kubelet_extra_args: BTreeMap<String, String>,

    /// Base kubelet configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletConfiguration>,

    /// kube-proxy configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_proxy: Option<KubeProxyConfiguration>,

    /// Network backend settings, passed through to nodeadm
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub network_backend: BTreeMap<String, String>,

    /// keepalived settings, passed through to nodeadm
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keep_alived: BTreeMap<String, String>,
}

/// Subset of the kubelet configuration exposed for overrides
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_api_burst: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_api_qps: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_dns: Vec<String>,

    /// Feature gate name to enabled flag
    #[serde(
        default,
        deserialize_with = "crate::feature_gates::deserialize",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    #[schemars(schema_with = "crate::feature_gates::schema")]
    pub feature_gates: BTreeMap<String, bool>,
}

/// Subset of the kube-proxy configuration exposed for overrides
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeProxyConfiguration {
    /// Proxy mode ("iptables", "ipvs")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_cidr: Option<String>,

    /// Feature gate name to enabled flag
    #[serde(
        default,
        deserialize_with = "crate::feature_gates::deserialize",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    #[schemars(schema_with = "crate::feature_gates::schema")]
    pub feature_gates: BTreeMap<String, bool>,
}

/// Observed cluster-wide bootstrap state
///
/// Written by several machines' reconciliations; every write is a
/// compare-and-set against the object's `resourceVersion`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Known etcd members, one per master
    #[serde(default)]
    pub etcd_members: Vec<EtcdMember>,

    /// API server endpoints usable for node discovery
    #[serde(default)]
    pub api_endpoints: Vec<APIEndpoint>,

    /// Bootstrap token shared by all joiners (`[a-z0-9]{6}.[a-z0-9]{16}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_token: Option<String>,
}

/// A reachable Kubernetes API endpoint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub struct APIEndpoint {
    /// Hostname or IP the API server is serving on
    pub host: String,

    /// Port the API server is serving on
    pub port: i32,
}

impl std::fmt::Display for APIEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One voting member of the etcd cluster
///
/// Decoded from `etcdadm info`, which emits either the Go field names
/// (`ID`, `Name`, `PeerURLs`, `ClientURLs`) or their JSON-tagged forms.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct EtcdMember {
    /// Member ID
    #[serde(rename = "ID", alias = "id")]
    #[schemars(rename = "ID")]
    pub id: u64,

    /// Human-readable member name
    #[serde(rename = "name", alias = "Name")]
    pub name: String,

    /// URLs the member exposes to the cluster
    #[serde(rename = "peerURLs", alias = "PeerURLs", default)]
    #[schemars(rename = "peerURLs")]
    pub peer_urls: Vec<String>,

    /// URLs the member exposes to clients
    #[serde(rename = "clientURLs", alias = "ClientURLs", default)]
    #[schemars(rename = "clientURLs")]
    pub client_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etcd_member_accepts_go_field_names() {
        let raw = r#"{"ID":42,"Name":"10.0.0.1","PeerURLs":["https://10.0.0.1:2380"],"ClientURLs":["https://10.0.0.1:2379"]}"#;
        let member: EtcdMember = serde_json::from_str(raw).unwrap();
        assert_eq!(member.id, 42);
        assert_eq!(member.name, "10.0.0.1");
        assert_eq!(member.peer_urls, vec!["https://10.0.0.1:2380"]);
        assert_eq!(member.client_urls, vec!["https://10.0.0.1:2379"]);
    }

    #[test]
    fn test_etcd_member_serializes_every_field() {
        // Status merge patches rely on every field being present so the
        // member is replaced as a whole.
        let member = EtcdMember {
            id: 7,
            name: "m".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&member).unwrap();
        assert_eq!(value["ID"], 7);
        assert_eq!(value["peerURLs"], serde_json::json!([]));
        assert_eq!(value["clientURLs"], serde_json::json!([]));
    }

    #[test]
    fn test_vip_configuration_router_id_key() {
        let vip: VIPConfiguration =
            serde_json::from_str(r#"{"ip":"192.168.1.1","routerID":100}"#).unwrap();
        assert_eq!(vip.router_id, 100);
    }

    fn collect_properties<'a>(value: &'a serde_json::Value, key: &str, out: &mut Vec<&'a serde_json::Value>) {
        match value {
            serde_json::Value::Object(map) => {
                if let Some(found) = map.get("properties").and_then(|p| p.get(key)) {
                    out.push(found);
                }
                for child in map.values() {
                    collect_properties(child, key, out);
                }
            }
            serde_json::Value::Array(items) => {
                for child in items {
                    collect_properties(child, key, out);
                }
            }
            _ => {}
        }
    }

    #[test]
    fn test_crd_schema_admits_string_feature_gates() {
        use kube::CustomResourceExt;

        let crd = serde_json::to_value(Cluster::crd()).unwrap();
        let mut gates = Vec::new();
        collect_properties(&crd, "featureGates", &mut gates);

        // kubelet and kube-proxy
        assert!(gates.len() >= 2);
        for schema in gates {
            assert_eq!(schema["x-kubernetes-preserve-unknown-fields"], true);
            assert!(schema.get("type").is_none(), "featureGates must not pin a type: {}", schema);
        }
    }
}
