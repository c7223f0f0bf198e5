use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{AddressPolicy, FleetSpec, OsFamily};

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_DISCOVERY_URL: &str = "https://discovery.etcd.io/new";

/// Immutable configuration for one invocation, passed by reference into
/// every component entry point.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub spec: FleetSpec,
    pub keypair: String,
    pub concurrency: usize,
    pub boot: BootSettings,
    pub bench: BenchmarkSettings,
}

impl FleetConfig {
    pub fn new(spec: FleetSpec, keypair: impl Into<String>) -> Self {
        Self {
            spec,
            keypair: keypair.into(),
            concurrency: DEFAULT_CONCURRENCY,
            boot: BootSettings::default(),
            bench: BenchmarkSettings::default(),
        }
    }
}

/// Inputs for boot configuration generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootSettings {
    pub base_template: PathBuf,
    pub scripts_dir: PathBuf,
    pub units_dir: PathBuf,
    /// Target directory for injected scripts on the node.
    pub install_root: String,
    pub file_permissions: String,
    pub image_families: BTreeMap<String, OsFamily>,
    /// Flavors that get the disk-array setup units/commands.
    pub storage_flavors: Vec<String>,
    pub discovery_url: String,
    pub package_repo: PackageRepo,
    pub packages: Vec<String>,
    pub data_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRepo {
    pub source: String,
    pub keyserver: String,
    pub keyid: String,
}

impl BootSettings {
    pub fn is_storage_flavor(&self, flavor: &str) -> bool {
        self.storage_flavors.iter().any(|f| f == flavor)
    }
}

impl Default for BootSettings {
    fn default() -> Self {
        let mut image_families = BTreeMap::new();
        // CoreOS virtual machine image
        image_families.insert(
            "0372e576-873d-4a21-8466-d60232fa341c".to_string(),
            OsFamily::UnitBased,
        );
        // CoreOS bare-metal image
        image_families.insert(
            "53047266-698a-4a34-8076-bfc9915593d2".to_string(),
            OsFamily::UnitBased,
        );

        Self {
            base_template: PathBuf::from("base.yml"),
            scripts_dir: PathBuf::from("injected-scripts"),
            units_dir: PathBuf::from("injected-units"),
            install_root: "/opt/bin".to_string(),
            file_permissions: "0755".to_string(),
            image_families,
            storage_flavors: vec!["onmetal-io1".to_string()],
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            package_repo: PackageRepo {
                source: "deb https://apt.dockerproject.org/repo ubuntu-trusty main".to_string(),
                keyserver: "hkp://p80.pool.sks-keyservers.net:80".to_string(),
                keyid: "58118E89F3A912897C070ADBF76221572C52609D".to_string(),
            },
            packages: vec![
                "docker-engine".to_string(),
                "ntpdate".to_string(),
                "mdadm".to_string(),
                "xfsprogs".to_string(),
            ],
            data_url: "https://example.invalid/cassandra-image.tar".to_string(),
        }
    }
}

/// Fixed workload parameters for a benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSettings {
    pub ssh_user: String,
    pub stress_command: String,
    pub replication_factor: u32,
    pub consistency_level: String,
    pub key_count: u64,
    pub priming_key_count: u64,
    pub threads: u32,
    pub retries: u32,
    #[serde(with = "duration_secs")]
    pub settle: Duration,
    pub remote_results_dir: String,
    pub local_results_dir: PathBuf,
    pub address_policy: AddressPolicy,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            ssh_user: "core".to_string(),
            stress_command: "cassandra-stress".to_string(),
            replication_factor: 3,
            consistency_level: "QUORUM".to_string(),
            key_count: 10_000_000,
            priming_key_count: 1,
            threads: 300,
            retries: 10,
            settle: Duration::from_secs(60),
            remote_results_dir: "/var/tmp/benchfleet".to_string(),
            local_results_dir: PathBuf::from("results"),
            address_policy: AddressPolicy::Last,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
