//! Print the bootstrap CRD manifests as a multi-document YAML stream
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/bootstrap.yaml`

use anyhow::Context;
use crds::{Cluster, Machine, ProvisionedMachine};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [Cluster::crd(), Machine::crd(), ProvisionedMachine::crd()];

    for crd in crds {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let yaml = serde_yaml::to_string(&crd).with_context(|| format!("failed to render CRD {}", name))?;
        println!("---");
        print!("{}", yaml);
    }

    Ok(())
}
