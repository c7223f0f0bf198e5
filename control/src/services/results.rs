use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::BenchmarkSettings;
use crate::error::{FleetError, Result};
use crate::remote::RemoteExecutor;
use crate::services::benchmark::{result_path, ssh_host};
use crate::services::executor::{BoundedExecutor, OperationResult};
use crate::types::ProviderNode;

/// Local file a loader's artifact is saved to.
pub fn local_result_path(settings: &BenchmarkSettings, loader_name: &str) -> PathBuf {
    settings.local_results_dir.join(format!("{}.log", loader_name))
}

/// Fetch every loader's result artifact into the local results directory.
///
/// Fails as a whole only if the results directory cannot be created.
pub async fn collect_results(
    remote: Arc<dyn RemoteExecutor>,
    settings: Arc<BenchmarkSettings>,
    loaders: Vec<ProviderNode>,
    worker_limit: usize,
) -> Result<Vec<OperationResult<ProviderNode, PathBuf>>> {
    tokio::fs::create_dir_all(&settings.local_results_dir)
        .await
        .map_err(|e| FleetError::io(settings.local_results_dir.display(), e))?;

    let executor = BoundedExecutor::new(worker_limit);
    let results = executor
        .run(loaders, move |loader: ProviderNode| {
            let remote = remote.clone();
            let settings = settings.clone();
            async move {
                let host = ssh_host(&settings, &loader)?;
                let remote_file = result_path(&settings, &loader.name);
                let contents = remote
                    .run(&host, &settings.ssh_user, &format!("cat {}", remote_file))
                    .await?;

                let local = local_result_path(&settings, &loader.name);
                tokio::fs::write(&local, contents)
                    .await
                    .map_err(|e| FleetError::io(local.display(), e))?;

                info!("Saved results of {} to {}", loader.name, local.display());
                Ok(local)
            }
        })
        .await;

    Ok(results)
}
