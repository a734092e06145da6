//! etcd member bootstrap configuration
//!
//! Describes the local etcd member a master runs, and decides whether
//! `etcdadm` must found a new cluster or join the existing one.

use crate::{ETCD_CA_FILE, ETCD_CLIENT_PORT, ETCD_PEER_PORT, ETCD_PKI_DIR, ETCDADM_PATH};
use crds::{EtcdMember, ProvisionedMachine};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InitialClusterState {
    New,
    Existing,
}

impl std::fmt::Display for InitialClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitialClusterState::New => f.write_str("new"),
            InitialClusterState::Existing => f.write_str("existing"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdBootstrapConfig {
    pub name: String,
    pub initial_cluster_state: InitialClusterState,
    /// Comma-joined `name=peerURL` pairs, the new member last
    pub initial_cluster: String,
    pub initial_advertise_peer_urls: String,
    pub listen_peer_urls: String,
    pub advertise_client_urls: String,
    pub listen_client_urls: String,
    pub data_dir: String,
    pub cert_file: String,
    pub key_file: String,
    pub trusted_ca_file: String,
    pub peer_cert_file: String,
    pub peer_key_file: String,
    pub peer_trusted_ca_file: String,
    pub client_cert_auth: bool,
    pub strict_reconfig_check: bool,

    /// Peer URLs of the members that already exist, excluding this one
    #[serde(skip)]
    pub existing_peer_urls: Vec<String>,
}

/// Build the etcd configuration for the master bound to `provisioned_machine`
///
/// `members` is the cluster's currently known etcd membership. A record with
/// the same name as the new member is ignored, so a retried join still sees
/// only its real peers.
pub fn etcd_config_for_machine(provisioned_machine: &ProvisionedMachine, members: &[EtcdMember]) -> EtcdBootstrapConfig {
    let host = &provisioned_machine.spec.ssh_config.host;
    let peer_url = format!("https://{}:{}", host, ETCD_PEER_PORT);
    let client_url = format!("https://{}:{}", host, ETCD_CLIENT_PORT);

    let peers: Vec<&EtcdMember> = members.iter().filter(|m| m.name != *host).collect();

    let mut initial_cluster: Vec<String> = peers
        .iter()
        .filter_map(|m| m.peer_urls.first().map(|url| format!("{}={}", m.name, url)))
        .collect();
    initial_cluster.push(format!("{}={}", host, peer_url));

    let state = if peers.is_empty() {
        InitialClusterState::New
    } else {
        InitialClusterState::Existing
    };

    EtcdBootstrapConfig {
        name: host.clone(),
        initial_cluster_state: state,
        initial_cluster: initial_cluster.join(","),
        initial_advertise_peer_urls: peer_url.clone(),
        listen_peer_urls: peer_url,
        advertise_client_urls: client_url,
        listen_client_urls: format!("https://0.0.0.0:{}", ETCD_CLIENT_PORT),
        data_dir: "/var/lib/etcd".to_string(),
        cert_file: format!("{}/server.crt", ETCD_PKI_DIR),
        key_file: format!("{}/server.key", ETCD_PKI_DIR),
        trusted_ca_file: ETCD_CA_FILE.to_string(),
        peer_cert_file: format!("{}/peer.crt", ETCD_PKI_DIR),
        peer_key_file: format!("{}/peer.key", ETCD_PKI_DIR),
        peer_trusted_ca_file: ETCD_CA_FILE.to_string(),
        client_cert_auth: true,
        strict_reconfig_check: true,
        existing_peer_urls: peers.iter().flat_map(|m| m.peer_urls.iter().cloned()).collect(),
    }
}

impl EtcdBootstrapConfig {
    /// `etcdadm init` for the founding member, `etcdadm join <peers>` otherwise
    pub fn etcdadm_command(&self) -> String {
        match self.initial_cluster_state {
            InitialClusterState::New => format!("{} init", ETCDADM_PATH),
            InitialClusterState::Existing => {
                format!("{} join {}", ETCDADM_PATH, self.existing_peer_urls.join(","))
            }
        }
    }

    /// Render as the systemd environment file etcd is started with
    pub fn to_env_file(&self) -> String {
        let entries = [
            ("ETCD_NAME", self.name.clone()),
            ("ETCD_STRICT_RECONFIG_CHECK", self.strict_reconfig_check.to_string()),
            ("ETCD_INITIAL_CLUSTER_STATE", self.initial_cluster_state.to_string()),
            ("ETCD_INITIAL_CLUSTER", self.initial_cluster.clone()),
            ("ETCD_INITIAL_ADVERTISE_PEER_URLS", self.initial_advertise_peer_urls.clone()),
            ("ETCD_LISTEN_PEER_URLS", self.listen_peer_urls.clone()),
            ("ETCD_ADVERTISE_CLIENT_URLS", self.advertise_client_urls.clone()),
            ("ETCD_LISTEN_CLIENT_URLS", self.listen_client_urls.clone()),
            ("ETCD_DATA_DIR", self.data_dir.clone()),
            ("ETCD_CERT_FILE", self.cert_file.clone()),
            ("ETCD_KEY_FILE", self.key_file.clone()),
            ("ETCD_TRUSTED_CA_FILE", self.trusted_ca_file.clone()),
            ("ETCD_PEER_CERT_FILE", self.peer_cert_file.clone()),
            ("ETCD_PEER_KEY_FILE", self.peer_key_file.clone()),
            ("ETCD_PEER_TRUSTED_CA_FILE", self.peer_trusted_ca_file.clone()),
            ("ETCD_CLIENT_CERT_AUTH", self.client_cert_auth.to_string()),
        ];

        let mut out = String::new();
        for (key, value) in entries {
            let _ = writeln!(out, "{}={}", key, value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::create_test_provisioned_machine;

    fn member(name: &str) -> EtcdMember {
        EtcdMember {
            id: 1,
            name: name.to_string(),
            peer_urls: vec![format!("https://{}:2380", name)],
            client_urls: vec![format!("https://{}:2379", name)],
        }
    }

    #[test]
    fn test_founding_member() {
        let pm = create_test_provisioned_machine();
        let cfg = etcd_config_for_machine(&pm, &[]);

        assert_eq!(cfg.name, "10.0.0.10");
        assert_eq!(cfg.initial_cluster_state, InitialClusterState::New);
        assert_eq!(cfg.initial_cluster, "10.0.0.10=https://10.0.0.10:2380");
        assert_eq!(cfg.advertise_client_urls, "https://10.0.0.10:2379");
        assert_eq!(cfg.etcdadm_command(), "/opt/bin/etcdadm init");
    }

    #[test]
    fn test_joining_member_lists_every_peer() {
        let pm = create_test_provisioned_machine();
        let cfg = etcd_config_for_machine(&pm, &[member("10.0.0.1"), member("10.0.0.2")]);

        assert_eq!(cfg.initial_cluster_state, InitialClusterState::Existing);
        assert_eq!(
            cfg.initial_cluster,
            "10.0.0.1=https://10.0.0.1:2380,10.0.0.2=https://10.0.0.2:2380,10.0.0.10=https://10.0.0.10:2380"
        );
        assert_eq!(
            cfg.etcdadm_command(),
            "/opt/bin/etcdadm join https://10.0.0.1:2380,https://10.0.0.2:2380"
        );
    }

    #[test]
    fn test_own_record_is_not_a_peer() {
        let pm = create_test_provisioned_machine();
        let cfg = etcd_config_for_machine(&pm, &[member("10.0.0.10")]);
        assert_eq!(cfg.initial_cluster_state, InitialClusterState::New);
        assert!(cfg.existing_peer_urls.is_empty());
    }

    #[test]
    fn test_env_file() {
        let pm = create_test_provisioned_machine();
        let env = etcd_config_for_machine(&pm, &[member("10.0.0.1")]).to_env_file();

        assert!(env.starts_with("ETCD_NAME=10.0.0.10\n"));
        assert!(env.contains("ETCD_INITIAL_CLUSTER_STATE=existing\n"));
        assert!(env.contains("ETCD_TRUSTED_CA_FILE=/etc/etcd/pki/ca.crt\n"));
    }
}
