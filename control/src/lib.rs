//! Provisioning, teardown and benchmarking of a two-role cloud fleet.
//!
//! The fleet spec is reconciled by name against live provider inventory;
//! per-node work (create, destroy, remote commands) runs on a bounded worker
//! pool that reports one result per node.

pub mod config;
pub mod error;
pub mod provider;
pub mod remote;
pub mod services;
pub mod template;
pub mod types;

pub use config::{BenchmarkSettings, BootSettings, FleetConfig};
pub use error::{ErrorKind, FleetError, Result};
pub use types::{AddressPolicy, FleetSpec, NodeSpec, OsFamily, ProviderNode, Role, RoleSpec};
