//! # CRD Generator
//!
//! Generates Kubernetes CustomResourceDefinition (CRD) YAML from Rust type definitions.
//!
//! This binary uses the `kube` crate's `CustomResourceExt` trait to generate
//! the CRD YAML for the `Dummy` resource.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/dummy.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```
//!
//! The generated CRD includes:
//! - OpenAPI schema validation
//! - Required fields
//! - Printer columns
//! - Status subresource

use dummy_operator::crd::Dummy;
use kube::core::CustomResourceExt;

fn main() {
    // Generate CRD YAML
    let crd = Dummy::crd();

    // Serialize to YAML
    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            // Print header comments warning that this file should not be edited manually
            println!("# This file is auto-generated by crdgen");
            println!("# DO NOT EDIT THIS FILE MANUALLY");
            println!("# If there are malformed YAML issues, fix them in the Rust code (src/crd.rs)");
            println!("# This file will be overwritten on every code update");
            println!("#");
            println!("---");
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
