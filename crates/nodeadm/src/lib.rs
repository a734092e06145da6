//! nodeadm configuration generation
//!
//! Pure transforms from Cluster, Machine and ProvisionedMachine resources to
//! the files and arguments consumed by `etcdadm` and `nodeadm` on the remote
//! host. Nothing here performs I/O. All maps are ordered, so identical inputs
//! render byte-identical YAML.

pub mod ca_hash;
pub mod endpoints;
pub mod error;
pub mod etcd;
pub mod init;
pub mod join;
pub mod token;
pub mod types;
#[cfg(test)]
mod test_fixtures;

pub use ca_hash::ca_cert_hash;
pub use endpoints::ApiEndpointSet;
pub use error::ConfigError;
pub use etcd::{EtcdBootstrapConfig, InitialClusterState, etcd_config_for_machine};
pub use init::init_configuration_for_machine;
pub use join::join_configuration_for_machine;
pub use token::{generate_bootstrap_token, is_valid_bootstrap_token};
pub use types::*;

/// Remote path of the etcdadm binary
pub const ETCDADM_PATH: &str = "/opt/bin/etcdadm";

/// Remote path of the nodeadm binary
pub const NODEADM_PATH: &str = "/opt/bin/nodeadm";

/// Remote path the rendered nodeadm configuration is written to
pub const NODEADM_CONFIG_PATH: &str = "/tmp/nodeadm.yaml";

/// Permission bits for the rendered nodeadm configuration
pub const NODEADM_CONFIG_MODE: u32 = 0o600;

pub const ETCD_CLIENT_PORT: u16 = 2379;
pub const ETCD_PEER_PORT: u16 = 2380;

/// API server port when `secure-port` is not overridden
pub const DEFAULT_API_SERVER_PORT: i32 = 6443;

/// Etcd TLS material laid down on every master
pub const ETCD_PKI_DIR: &str = "/etc/etcd/pki";
pub const ETCD_CA_FILE: &str = "/etc/etcd/pki/ca.crt";
pub const ETCD_CLIENT_CERT_FILE: &str = "/etc/etcd/pki/apiserver-etcd-client.crt";
pub const ETCD_CLIENT_KEY_FILE: &str = "/etc/etcd/pki/apiserver-etcd-client.key";

/// Serialize any generated configuration as YAML
pub fn render_yaml<T: serde::Serialize>(config: &T) -> Result<String, ConfigError> {
    serde_yaml::to_string(config).map_err(|e| ConfigError::Render(e.to_string()))
}
