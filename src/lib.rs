//! Dummy Operator Library
//!
//! This library provides the core functionality for the Dummy operator: the
//! `Dummy` custom resource definition, the reconcile engine that keeps one
//! nginx child pod per `Dummy`, and the watch plumbing that feeds it.
//! Tests are included in the module files (e.g., reconciler.rs).

pub mod backoff;
pub mod crd;
pub mod error;
pub mod observability;
pub mod queue;
pub mod reconciler;
pub mod server;
pub mod state;
pub mod trigger;
