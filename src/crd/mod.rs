//! Custom Resource Definitions for the Sentry Operator

mod project;
mod registry;
mod status;
mod team;

pub use project::*;
pub use registry::*;
pub use status::*;
pub use team::*;

/// API group of every resource managed by this operator
pub const API_GROUP: &str = "sentry.kubernetes.jaceys.me";
