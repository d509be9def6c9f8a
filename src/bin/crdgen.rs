//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for all custom resources
//! defined by the sentry-operator.
//!
//! Usage: cargo run --bin crdgen > config/crd/all.yaml

use sentry_operator::crd::Registry;

fn main() -> anyhow::Result<()> {
    for crd in Registry::with_sentry_kinds().to_yaml()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
