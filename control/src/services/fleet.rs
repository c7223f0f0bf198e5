//! Fleet-level commands: each one reads inventory fresh, then dispatches
//! per-node work through the bounded executor.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::provider::{CloudProvider, ProviderFactory};
use crate::remote::RemoteExecutor;
use crate::services::benchmark::{ssh_host, BenchmarkOrchestrator, BenchmarkReport};
use crate::services::boot_config::ConfigGenerator;
use crate::services::executor::{BoundedExecutor, OperationResult};
use crate::services::reconciler::{self, Diff};
use crate::services::results;
use crate::types::{CreateNodeRequest, NodeSpec, ProviderNode, Role};

pub const SSH_TEST_COMMAND: &str = "uptime";

pub struct Fleet {
    config: Arc<FleetConfig>,
    provider: Arc<dyn ProviderFactory>,
}

impl Fleet {
    pub fn new(config: FleetConfig, provider: Arc<dyn ProviderFactory>) -> Self {
        Self {
            config: Arc::new(config),
            provider,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    fn executor(&self) -> BoundedExecutor {
        BoundedExecutor::new(self.config.concurrency)
    }

    /// List live inventory and diff it against the fleet spec.
    pub async fn status(&self) -> Result<Diff> {
        let session = self
            .provider
            .connect()
            .await
            .map_err(|e| FleetError::InventoryList(e.to_string()))?;
        reconciler::reconcile(session.as_ref(), &self.config.spec).await
    }

    /// Create every missing node. Boot configuration is generated inside each
    /// node's operation so template failures stay per-node.
    pub async fn create(
        &self,
        generator: Arc<ConfigGenerator>,
    ) -> Result<Vec<OperationResult<NodeSpec, ProviderNode>>> {
        let diff = self.status().await?;
        info!("Creating {} missing node(s)", diff.missing.len());

        let config = self.config.clone();
        let factory = self.provider.clone();

        let results = self
            .executor()
            .run_with(
                diff.missing,
                move || {
                    let factory = factory.clone();
                    async move { factory.connect().await }
                },
                move |session: Arc<Box<dyn CloudProvider>>, node: NodeSpec| {
                    let config = config.clone();
                    let generator = generator.clone();
                    async move {
                        info!("Booting node: {} flavor={}", node.name, node.flavor);
                        let user_data = generator.generate(&config, &node).await?.render()?;
                        let req = CreateNodeRequest {
                            name: node.name.clone(),
                            flavor: node.flavor.clone(),
                            image: node.image.clone(),
                            keypair: config.keypair.clone(),
                            user_data,
                        };
                        session.create_node(&req).await
                    }
                },
            )
            .await;

        log_failures(&results, |n| n.name.as_str(), "create");
        Ok(results)
    }

    /// Destroy every live node matching the fleet spec. Nodes outside the
    /// naming convention, and unexpected indices, are left untouched.
    pub async fn destroy(&self) -> Result<Vec<OperationResult<ProviderNode, bool>>> {
        let diff = self.status().await?;
        let targets: Vec<ProviderNode> = diff.matched_nodes().cloned().collect();
        info!("Destroying {} node(s)", targets.len());

        let factory = self.provider.clone();
        let results = self
            .executor()
            .run_with(
                targets,
                move || {
                    let factory = factory.clone();
                    async move { factory.connect().await }
                },
                |session: Arc<Box<dyn CloudProvider>>, node: ProviderNode| async move {
                    info!("Deleting node: {}", node.name);
                    session.destroy_node(&node).await
                },
            )
            .await;

        log_failures(&results, |n| n.name.as_str(), "destroy");
        Ok(results)
    }

    /// Run a trivial command on every matched node.
    pub async fn ssh_test(
        &self,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Result<Vec<OperationResult<ProviderNode, String>>> {
        let diff = self.status().await?;
        let nodes: Vec<ProviderNode> = diff.matched_nodes().cloned().collect();
        let settings = Arc::new(self.config.bench.clone());

        let results = self
            .executor()
            .run(nodes, move |node: ProviderNode| {
                let remote = remote.clone();
                let settings = settings.clone();
                async move {
                    let host = ssh_host(&settings, &node)?;
                    remote.run(&host, &settings.ssh_user, SSH_TEST_COMMAND).await
                }
            })
            .await;

        log_failures(&results, |n| n.name.as_str(), "ssh test");
        Ok(results)
    }

    pub async fn benchmark(&self, remote: Arc<dyn RemoteExecutor>) -> Result<BenchmarkReport> {
        let diff = self.status().await?;
        let data_nodes = diff.matched_by_role(Role::DataNode);
        let loaders = diff.matched_by_role(Role::Loader);

        BenchmarkOrchestrator::new(remote, self.config.bench.clone())
            .run(&data_nodes, &loaders)
            .await
    }

    pub async fn collect_results(
        &self,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Result<Vec<OperationResult<ProviderNode, PathBuf>>> {
        let diff = self.status().await?;
        let loaders = diff.matched_by_role(Role::Loader);

        let results = results::collect_results(
            remote,
            Arc::new(self.config.bench.clone()),
            loaders,
            self.config.concurrency,
        )
        .await?;

        log_failures(&results, |n| n.name.as_str(), "result collection");
        Ok(results)
    }
}

fn log_failures<T, R>(results: &[OperationResult<T, R>], name: impl Fn(&T) -> &str, what: &str)
where
    R: std::fmt::Debug,
{
    for r in results.iter().filter(|r| !r.is_success()) {
        error!("{} failed for {}: {:?}", what, name(&r.item), r.outcome);
    }
}
