mod config;
mod report;

use anyhow::{Context, Result};
use benchfleet_control::provider::OpenStackFactory;
use benchfleet_control::remote::SshExecutor;
use benchfleet_control::services::{ConfigGenerator, Fleet, HttpDiscovery};
use benchfleet_control::template::FsTemplate;
use benchfleet_control::{FleetConfig, FleetSpec, Role, RoleSpec};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{default_config_path, Config};

const DEFAULT_PREFIX: &str = "pq";
const DEFAULT_KEYPAIR: &str = "benchfleet";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Status,
    Create,
    Destroy,
    Benchmark,
    Sshtest,
    Results,
}

#[derive(Parser, Debug)]
#[command(name = "benchfleet")]
#[command(about = "Cassandra cluster benchmark manager", long_about = None)]
struct Args {
    /// Mode to operate in
    #[arg(value_enum)]
    mode: Mode,

    /// Base image for every node
    #[arg(long, default_value = "53047266-698a-4a34-8076-bfc9915593d2")]
    image: String,

    /// Number of data nodes
    #[arg(long, default_value_t = 1)]
    data_node_count: u32,

    /// Flavor for data nodes
    #[arg(long, default_value = "onmetal-io1")]
    data_node_flavor: String,

    /// Number of loader nodes
    #[arg(long, default_value_t = 1)]
    loader_count: u32,

    /// Flavor for loader nodes
    #[arg(long, default_value = "onmetal-compute1")]
    loader_flavor: String,

    /// Region to run in
    #[arg(long, default_value = "iad")]
    region: String,

    /// Discovery endpoint issuing cluster tokens
    #[arg(long, env = "BENCHFLEET_DISCOVERY_URL")]
    discovery_url: Option<String>,

    /// Maximum concurrent provider/remote operations
    #[arg(long, default_value_t = benchfleet_control::config::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Seconds to wait between priming and the full workload
    #[arg(long)]
    settle_secs: Option<u64>,

    /// Local directory for collected benchmark results
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Directory holding base.yml, injected-scripts/ and injected-units/
    #[arg(long)]
    template_dir: Option<PathBuf>,

    /// Settings file with region credentials
    #[arg(long, env = "BENCHFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging on stderr; stdout carries the report
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let settings = Config::load(&config_path)?;
    let creds = settings.credentials(&args.region)?;

    let fleet_config = build_fleet_config(&args, &settings);
    info!(
        "Fleet '{}' in {}: {} data node(s), {} loader(s)",
        fleet_config.spec.name_prefix, creds.region, args.data_node_count, args.loader_count
    );

    let fleet = Fleet::new(fleet_config, Arc::new(OpenStackFactory::new(creds)));
    let remote = Arc::new(SshExecutor::new(
        Duration::from_secs(10),
        settings.ssh_identity.clone(),
    ));

    let table = match args.mode {
        Mode::Status => report::status_table(&fleet.status().await?),
        Mode::Create => {
            let boot = &fleet.config().boot;
            let template_dir = args
                .template_dir
                .clone()
                .or_else(|| settings.template_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            let template = FsTemplate::new(template_dir, boot.base_template.clone());
            let discovery = HttpDiscovery::new(boot.discovery_url.clone())
                .context("Failed to create discovery client")?;
            let generator = Arc::new(ConfigGenerator::new(
                Arc::new(template),
                Arc::new(discovery),
            ));
            report::create_table(&fleet.create(generator).await?)
        }
        Mode::Destroy => report::destroy_table(&fleet.destroy().await?),
        Mode::Benchmark => report::benchmark_table(&fleet.benchmark(remote).await?),
        Mode::Sshtest => report::ssh_test_table(&fleet.ssh_test(remote).await?),
        Mode::Results => report::results_table(&fleet.collect_results(remote).await?),
    };

    println!("{}", table);
    Ok(())
}

fn build_fleet_config(args: &Args, settings: &Config) -> FleetConfig {
    let prefix = settings
        .name_prefix
        .clone()
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

    let spec = FleetSpec::new(prefix)
        .with_role(
            Role::DataNode,
            RoleSpec {
                count: args.data_node_count,
                flavor: args.data_node_flavor.clone(),
                image: args.image.clone(),
            },
        )
        .with_role(
            Role::Loader,
            RoleSpec {
                count: args.loader_count,
                flavor: args.loader_flavor.clone(),
                image: args.image.clone(),
            },
        );

    let keypair = settings
        .keypair
        .clone()
        .unwrap_or_else(|| DEFAULT_KEYPAIR.to_string());

    let mut cfg = FleetConfig::new(spec, keypair);
    cfg.concurrency = args.concurrency.max(1);
    cfg.boot
        .image_families
        .extend(settings.image_families.iter().map(|(k, v)| (k.clone(), *v)));
    if let Some(url) = &args.discovery_url {
        cfg.boot.discovery_url = url.clone();
    }
    if let Some(user) = &settings.ssh_user {
        cfg.bench.ssh_user = user.clone();
    }
    if let Some(secs) = args.settle_secs {
        cfg.bench.settle = Duration::from_secs(secs);
    }
    if let Some(dir) = &args.results_dir {
        cfg.bench.local_results_dir = dir.clone();
    }
    cfg
}
