//! Shared resource builders for configuration tests

use crds::{
    Cluster, ClusterConfig, ClusterNetworkingConfig, ClusterSpec, KubeProxyConfiguration,
    KubeletConfiguration, Machine, MachineRole, MachineSpec, MachineVersionInfo, NetworkRanges,
    ProvisionedMachine, ProvisionedMachineSpec, SSHConfig, VIPConfiguration,
};
use std::collections::BTreeMap;

pub const TEST_NAMESPACE: &str = "test-namespace";
pub const TEST_CLUSTER_NAME: &str = "test-cluster";
pub const TEST_MACHINE_NAME: &str = "test-machine";
pub const TEST_PM_NAME: &str = "test-pm";

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn create_test_cluster() -> Cluster {
    let mut cluster = Cluster::new(
        TEST_CLUSTER_NAME,
        ClusterSpec {
            cluster_network: ClusterNetworkingConfig {
                services: NetworkRanges {
                    cidr_blocks: vec!["172.0.0.0/24".to_string()],
                },
                pods: NetworkRanges {
                    cidr_blocks: vec!["10.0.0.0/16".to_string()],
                },
                service_domain: "cluster.local".to_string(),
            },
            vip_configuration: Some(VIPConfiguration {
                ip: "192.168.1.1".to_string(),
                router_id: 100,
            }),
            cluster_config: Some(ClusterConfig {
                kube_api_server: string_map(&[
                    ("service-node-port-range", "8000-32767"),
                    ("secure-port", "6445"),
                ]),
                kube_controller_manager: string_map(&[("pod-eviction-timeout", "42s")]),
                kube_scheduler: string_map(&[("log-dir", "/var/log/scheduler")]),
                kube_proxy: Some(KubeProxyConfiguration {
                    mode: Some("iptables".to_string()),
                    ..Default::default()
                }),
                kubelet: Some(KubeletConfiguration {
                    kube_api_burst: Some(84),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    cluster
}

pub fn create_test_machine(role: MachineRole) -> Machine {
    let mut machine = Machine::new(
        TEST_MACHINE_NAME,
        MachineSpec {
            cluster_ref: TEST_CLUSTER_NAME.to_string(),
            role,
            versions: MachineVersionInfo {
                kubelet: "v1.11.7".to_string(),
                control_plane: Some("v1.11.7".to_string()),
            },
            ..Default::default()
        },
    );
    machine.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    machine
}

pub fn create_test_provisioned_machine() -> ProvisionedMachine {
    let mut pm = ProvisionedMachine::new(
        TEST_PM_NAME,
        ProvisionedMachineSpec {
            ssh_config: SSHConfig {
                host: "10.0.0.10".to_string(),
                port: 22,
                public_keys: vec![],
                credential_secret: "test-credentials".to_string(),
            },
            vip_network_interface: Some("eth0".to_string()),
        },
    );
    pm.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    pm
}
