//! `nodeadm join` configuration for worker nodes

use crate::error::ConfigError;
use crate::types::{JoinConfiguration, KUBEADM_API_VERSION, NODE_CONFIGURATION_KIND, NodeConfiguration, NodeRegistrationOptions};
use crds::{Cluster, Machine};

/// Build the `nodeadm join` configuration for a node
///
/// `api_servers` are `host:port` discovery endpoints and `ca_cert_hashes`
/// the `sha256:<hex>` pins of the cluster CA; both come from the already
/// initialized control plane.
pub fn join_configuration_for_machine(
    cluster: &Cluster,
    machine: &Machine,
    api_servers: &[String],
    ca_cert_hashes: &[String],
    token: &str,
) -> Result<JoinConfiguration, ConfigError> {
    if token.is_empty() {
        return Err(ConfigError::Missing("discovery token".to_string()));
    }
    if api_servers.is_empty() {
        return Err(ConfigError::Missing("discovery API server endpoints".to_string()));
    }
    if ca_cert_hashes.is_empty() {
        return Err(ConfigError::Missing("discovery CA certificate hashes".to_string()));
    }

    let kubelet_extra_args = cluster
        .spec
        .cluster_config
        .as_ref()
        .map(|c| c.kubelet_extra_args.clone())
        .unwrap_or_default();

    Ok(JoinConfiguration {
        node_configuration: NodeConfiguration {
            api_version: KUBEADM_API_VERSION.to_string(),
            kind: NODE_CONFIGURATION_KIND.to_string(),
            token: token.to_string(),
            discovery_token_api_servers: api_servers.to_vec(),
            discovery_token_ca_cert_hashes: ca_cert_hashes.to_vec(),
            node_registration: NodeRegistrationOptions {
                name: machine.metadata.name.clone().unwrap_or_default(),
                taints: machine.spec.taints.clone(),
                kubelet_extra_args,
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_yaml;
    use crate::test_fixtures::*;
    use crds::MachineRole;

    #[test]
    fn test_join_configuration_for_machine() {
        let cluster = create_test_cluster();
        let machine = create_test_machine(MachineRole::Node);
        let api_servers = vec!["example.com:1234".to_string()];
        let hashes = vec!["bar".to_string()];

        let expected = JoinConfiguration {
            node_configuration: NodeConfiguration {
                api_version: "kubeadm.k8s.io/v1alpha2".to_string(),
                kind: "NodeConfiguration".to_string(),
                token: "foo".to_string(),
                discovery_token_api_servers: api_servers.clone(),
                discovery_token_ca_cert_hashes: hashes.clone(),
                node_registration: NodeRegistrationOptions {
                    name: TEST_MACHINE_NAME.to_string(),
                    taints: vec![],
                    kubelet_extra_args: Default::default(),
                },
            },
        };

        let actual = join_configuration_for_machine(&cluster, &machine, &api_servers, &hashes, "foo").unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_join_requires_discovery_inputs() {
        let cluster = create_test_cluster();
        let machine = create_test_machine(MachineRole::Node);
        let servers = vec!["example.com:1234".to_string()];
        let hashes = vec!["bar".to_string()];

        assert!(join_configuration_for_machine(&cluster, &machine, &servers, &hashes, "").is_err());
        assert!(join_configuration_for_machine(&cluster, &machine, &[], &hashes, "foo").is_err());
        assert!(join_configuration_for_machine(&cluster, &machine, &servers, &[], "foo").is_err());
    }

    #[test]
    fn test_join_yaml_keys() {
        let cluster = create_test_cluster();
        let machine = create_test_machine(MachineRole::Node);
        let cfg = join_configuration_for_machine(
            &cluster,
            &machine,
            &["10.0.0.1:6443".to_string()],
            &["sha256:abc".to_string()],
            "abcdef.0123456789abcdef",
        )
        .unwrap();

        let yaml = render_yaml(&cfg).unwrap();
        assert!(yaml.starts_with("nodeConfiguration:\n"));
        assert!(yaml.contains("kind: NodeConfiguration"));
        assert!(yaml.contains("discoveryTokenAPIServers:"));
        assert!(yaml.contains("discoveryTokenCACertHashes:"));
    }
}
