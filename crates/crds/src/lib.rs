//! DCops Bootstrap CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the machine bootstrap controller:
//! - `Cluster`: cluster-wide networking, VIP and component configuration
//! - `Machine`: a desired control-plane or worker member
//! - `ProvisionedMachine`: a pre-existing SSH-reachable host

pub mod cluster;
pub mod feature_gates;
pub mod machine;
pub mod provisioned_machine;

pub use cluster::*;
pub use machine::*;
pub use provisioned_machine::*;
