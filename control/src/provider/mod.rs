//! Cloud provider capability.
//!
//! The core only depends on [`CloudProvider`]; [`openstack`] holds the
//! production client for OpenStack-compatible compute APIs.

pub mod openstack;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CreateNodeRequest, ProviderNode};

pub use openstack::{OpenStackCredentials, OpenStackFactory, OpenStackProvider};

/// One session against a provider region.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<ProviderNode>>;

    async fn create_node(&self, req: &CreateNodeRequest) -> Result<ProviderNode>;

    /// Returns whether the provider accepted the destroy request.
    async fn destroy_node(&self, node: &ProviderNode) -> Result<bool>;
}

/// Opens provider sessions. The bounded executor asks for one per worker.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn CloudProvider>>;
}
