//! Sentry Kubernetes Operator
//!
//! This operator keeps Sentry teams and projects in line with `Team` and
//! `Project` custom resources, and cleans them up when the resources are deleted.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod leader;
pub mod metrics;
pub mod reconcilers;
pub mod secrets;
pub mod sentry;
pub mod store;

pub use error::{Error, Result};
