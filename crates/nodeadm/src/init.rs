//! `nodeadm init` configuration for control-plane machines

use crate::error::ConfigError;
use crate::types::{
    Api, BootstrapToken, Etcd, InitConfiguration, KUBEADM_API_VERSION, MASTER_CONFIGURATION_KIND,
    MasterConfiguration, Networking, NodeRegistrationOptions, VIPConfiguration,
};
use crate::{ETCD_CA_FILE, ETCD_CLIENT_CERT_FILE, ETCD_CLIENT_KEY_FILE, ETCD_CLIENT_PORT};
use crds::{Cluster, ClusterConfig, Machine, ProvisionedMachine};
use std::net::IpAddr;

/// API server extra-arg lifted into `api.bindPort`
pub const SECURE_PORT_KEY: &str = "secure-port";

/// Build the `nodeadm init` configuration for a master
///
/// `bootstrap_token`, when known, is registered so that later joiners can
/// discover this control plane. Fails without producing any configuration
/// when the cluster networking is invalid or the `secure-port` override is
/// not a port.
pub fn init_configuration_for_machine(
    cluster: &Cluster,
    machine: &Machine,
    provisioned_machine: &ProvisionedMachine,
    bootstrap_token: Option<&str>,
) -> Result<InitConfiguration, ConfigError> {
    let networking = validated_networking(cluster)?;

    let mut master = MasterConfiguration {
        api_version: KUBEADM_API_VERSION.to_string(),
        kind: MASTER_CONFIGURATION_KIND.to_string(),
        kubernetes_version: machine.control_plane_version().unwrap_or_default().to_string(),
        etcd: Etcd {
            endpoints: vec![format!("https://127.0.0.1:{}", ETCD_CLIENT_PORT)],
            ca_file: ETCD_CA_FILE.to_string(),
            cert_file: ETCD_CLIENT_CERT_FILE.to_string(),
            key_file: ETCD_CLIENT_KEY_FILE.to_string(),
        },
        networking,
        node_registration: NodeRegistrationOptions {
            name: machine.metadata.name.clone().unwrap_or_default(),
            taints: machine.spec.taints.clone(),
            ..Default::default()
        },
        ..Default::default()
    };

    if let Some(token) = bootstrap_token {
        master.bootstrap_tokens.push(BootstrapToken::for_joiners(token));
    }

    let mut cfg = InitConfiguration::default();

    if let Some(vip) = &cluster.spec.vip_configuration {
        cfg.vip_configuration = Some(VIPConfiguration {
            ip: vip.ip.clone(),
            router_id: vip.router_id,
            network_interface: provisioned_machine.spec.vip_network_interface.clone().unwrap_or_default(),
        });
        master.api = Api {
            control_plane_endpoint: vip.ip.clone(),
            ..Default::default()
        };
        master.api_server_cert_sans = vec![vip.ip.clone()];
    }

    if let Some(cluster_config) = &cluster.spec.cluster_config {
        apply_cluster_config(&mut cfg, &mut master, cluster_config)?;
    }

    cfg.master_configuration = master;
    Ok(cfg)
}

fn apply_cluster_config(
    cfg: &mut InitConfiguration,
    master: &mut MasterConfiguration,
    cluster_config: &ClusterConfig,
) -> Result<(), ConfigError> {
    let mut api_server_args = cluster_config.kube_api_server.clone();
    if let Some(port) = api_server_args.remove(SECURE_PORT_KEY) {
        master.api.bind_port = Some(parse_port(&port)?);
    }
    master.api_server_extra_args = api_server_args;

    master.controller_manager_extra_args = cluster_config.kube_controller_manager.clone();
    master.scheduler_extra_args = cluster_config.kube_scheduler.clone();
    master.kubelet_configuration = cluster_config.kubelet.clone();
    master.kube_proxy = cluster_config.kube_proxy.clone();
    master.node_registration.kubelet_extra_args = cluster_config.kubelet_extra_args.clone();

    cfg.network_backend = cluster_config.network_backend.clone();
    cfg.keep_alived = cluster_config.keep_alived.clone();
    Ok(())
}

fn parse_port(raw: &str) -> Result<i32, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(i32::from(port)),
        _ => Err(ConfigError::InvalidSecurePort(raw.to_string())),
    }
}

/// Port the API server listens on for this cluster
///
/// The `secure-port` override when present, otherwise 6443.
pub fn api_server_port(cluster: &Cluster) -> Result<i32, ConfigError> {
    match cluster
        .spec
        .cluster_config
        .as_ref()
        .and_then(|c| c.kube_api_server.get(SECURE_PORT_KEY))
    {
        Some(port) => parse_port(port),
        None => Ok(crate::DEFAULT_API_SERVER_PORT),
    }
}

/// Check that pods and services each have exactly one well-formed CIDR block
pub fn validated_networking(cluster: &Cluster) -> Result<Networking, ConfigError> {
    let network = &cluster.spec.cluster_network;
    let pod_subnet = single_block(cluster, "pods", &network.pods.cidr_blocks)?;
    let service_subnet = single_block(cluster, "services", &network.services.cidr_blocks)?;

    Ok(Networking {
        service_subnet,
        pod_subnet,
        dns_domain: network.service_domain.clone(),
    })
}

fn single_block(cluster: &Cluster, field: &str, blocks: &[String]) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidNetworking {
        cluster: cluster.metadata.name.clone().unwrap_or_default(),
        reason,
    };

    match blocks {
        [] => Err(invalid(format!(
            "spec.clusterNetwork.{}.cidrBlocks must contain at least one block",
            field
        ))),
        [block] => {
            if !is_cidr(block) {
                return Err(invalid(format!(
                    "spec.clusterNetwork.{}.cidrBlocks entry {:?} is not a CIDR block",
                    field, block
                )));
            }
            Ok(block.clone())
        }
        _ => Err(invalid(format!(
            "spec.clusterNetwork.{}.cidrBlocks must contain at most one block",
            field
        ))),
    }
}

fn is_cidr(block: &str) -> bool {
    let Some((addr, prefix)) = block.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    prefix.parse::<u8>().is_ok_and(|p| p <= max)
}
