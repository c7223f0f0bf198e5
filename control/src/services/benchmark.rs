//! Two-phase distributed benchmark: prime on one loader, settle, then fan out
//! the full workload to every loader.

use std::sync::Arc;
use tracing::{error, info};

use crate::config::BenchmarkSettings;
use crate::error::{ErrorKind, FleetError, Result};
use crate::remote::RemoteExecutor;
use crate::services::executor::{BoundedExecutor, OperationResult};
use crate::types::ProviderNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Priming,
    Settling,
    FanOut,
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone)]
pub enum BenchmarkReport {
    /// Priming failed; no fan-out command was issued.
    PrimingFailed {
        loader: String,
        kind: ErrorKind,
        detail: String,
    },
    Completed {
        primed_on: String,
        results: Vec<OperationResult<ProviderNode, String>>,
    },
}

/// Remote path of a loader's result artifact.
pub fn result_path(settings: &BenchmarkSettings, loader_name: &str) -> String {
    format!(
        "{}/{}.log",
        settings.remote_results_dir.trim_end_matches('/'),
        loader_name
    )
}

pub fn priming_command(settings: &BenchmarkSettings, targets: &[String]) -> String {
    format!(
        "{} write n={} cl={} -schema \"replication(factor={})\" -rate threads=1 -errors retries={} -node {}",
        settings.stress_command,
        settings.priming_key_count,
        settings.consistency_level,
        settings.replication_factor,
        settings.retries,
        targets.join(",")
    )
}

pub fn workload_command(
    settings: &BenchmarkSettings,
    targets: &[String],
    result_file: &str,
) -> String {
    format!(
        "mkdir -p {} && {} write n={} cl={} -rate threads={} -errors retries={} -node {} -log file={}",
        settings.remote_results_dir,
        settings.stress_command,
        settings.key_count,
        settings.consistency_level,
        settings.threads,
        settings.retries,
        targets.join(","),
        result_file
    )
}

/// Private address of every data node, chosen by the address policy.
pub fn data_targets(
    settings: &BenchmarkSettings,
    data_nodes: &[ProviderNode],
) -> Result<Vec<String>> {
    data_nodes
        .iter()
        .map(|node| {
            settings
                .address_policy
                .select(&node.private_addresses)
                .map(str::to_string)
                .ok_or_else(|| {
                    FleetError::Config(format!("Data node {} has no private address", node.name))
                })
        })
        .collect()
}

/// Public address used to reach a node over ssh.
pub fn ssh_host(settings: &BenchmarkSettings, node: &ProviderNode) -> Result<String> {
    settings
        .address_policy
        .select(&node.public_addresses)
        .map(str::to_string)
        .ok_or_else(|| FleetError::remote(&node.name, "no public address"))
}

pub struct BenchmarkOrchestrator {
    remote: Arc<dyn RemoteExecutor>,
    settings: Arc<BenchmarkSettings>,
}

impl BenchmarkOrchestrator {
    pub fn new(remote: Arc<dyn RemoteExecutor>, settings: BenchmarkSettings) -> Self {
        Self {
            remote,
            settings: Arc::new(settings),
        }
    }

    pub async fn run(
        &self,
        data_nodes: &[ProviderNode],
        loaders: &[ProviderNode],
    ) -> Result<BenchmarkReport> {
        if data_nodes.is_empty() {
            return Err(FleetError::Config("No data nodes to benchmark".to_string()));
        }
        let mut loaders = loaders.to_vec();
        loaders.sort_by(|a, b| a.name.cmp(&b.name));
        let Some(primer) = loaders.first().cloned() else {
            return Err(FleetError::Config("No loader nodes available".to_string()));
        };

        let targets = Arc::new(data_targets(&self.settings, data_nodes)?);

        info!("Benchmark phase {:?} on {}", Phase::Priming, primer.name);
        if let Err(e) = self.prime(&primer, &targets).await {
            error!("Priming on {} failed, skipping fan-out: {:?}", primer.name, e);
            return Ok(BenchmarkReport::PrimingFailed {
                loader: primer.name,
                kind: e.kind(),
                detail: e.to_string(),
            });
        }

        info!(
            "Benchmark phase {:?} for {}s",
            Phase::Settling,
            self.settings.settle.as_secs()
        );
        tokio::time::sleep(self.settings.settle).await;

        info!("Benchmark phase {:?} across {} loader(s)", Phase::FanOut, loaders.len());
        let executor = BoundedExecutor::new(loaders.len());
        let remote = self.remote.clone();
        let settings = self.settings.clone();

        let results = executor
            .run(loaders, move |loader: ProviderNode| {
                let remote = remote.clone();
                let settings = settings.clone();
                let targets = targets.clone();
                async move {
                    let host = ssh_host(&settings, &loader)?;
                    let result_file = result_path(&settings, &loader.name);
                    let command = workload_command(&settings, &targets, &result_file);
                    info!("Running workload on {} ({})", loader.name, host);
                    remote.run(&host, &settings.ssh_user, &command).await
                }
            })
            .await;

        for failed in results.iter().filter(|r| !r.is_success()) {
            error!("Workload on {} failed: {:?}", failed.item.name, failed.outcome);
        }

        Ok(BenchmarkReport::Completed {
            primed_on: primer.name,
            results,
        })
    }

    async fn prime(&self, loader: &ProviderNode, targets: &[String]) -> Result<String> {
        let host = ssh_host(&self.settings, loader)?;
        let command = priming_command(&self.settings, targets);
        self.remote
            .run(&host, &self.settings.ssh_user, &command)
            .await
    }
}
