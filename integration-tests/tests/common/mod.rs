use async_trait::async_trait;
use benchfleet_control::config::FleetConfig;
use benchfleet_control::provider::{CloudProvider, ProviderFactory};
use benchfleet_control::remote::RemoteExecutor;
use benchfleet_control::services::DiscoveryService;
use benchfleet_control::template::ConfigTemplate;
use benchfleet_control::types::CreateNodeRequest;
use benchfleet_control::{FleetError, FleetSpec, OsFamily, ProviderNode, Result, Role, RoleSpec};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const COREOS_IMAGE: &str = "coreos-test-image";
pub const UBUNTU_IMAGE: &str = "ubuntu-test-image";

/// Fleet config with `data_nodes` data nodes and `loaders` loaders, no settle delay.
pub fn fleet_config(data_nodes: u32, loaders: u32) -> FleetConfig {
    let spec = FleetSpec::new("pq")
        .with_role(
            Role::DataNode,
            RoleSpec {
                count: data_nodes,
                flavor: "onmetal-io1".to_string(),
                image: COREOS_IMAGE.to_string(),
            },
        )
        .with_role(
            Role::Loader,
            RoleSpec {
                count: loaders,
                flavor: "onmetal-compute1".to_string(),
                image: COREOS_IMAGE.to_string(),
            },
        );

    let mut cfg = FleetConfig::new(spec, "test-key");
    cfg.concurrency = 4;
    cfg.boot.image_families = BTreeMap::from([
        (COREOS_IMAGE.to_string(), OsFamily::UnitBased),
        (UBUNTU_IMAGE.to_string(), OsFamily::PackageBased),
    ]);
    cfg.bench.settle = Duration::ZERO;
    cfg
}

pub fn live_node(name: &str, index: u8) -> ProviderNode {
    ProviderNode {
        id: format!("id-{}", name),
        name: name.to_string(),
        state: "ACTIVE".to_string(),
        public_addresses: vec![format!("2001:db8::{}", index), format!("203.0.113.{}", index)],
        private_addresses: vec![format!("10.0.0.{}", index)],
    }
}

// ============================================================================
// Cloud provider
// ============================================================================

#[derive(Default)]
pub struct CloudState {
    pub nodes: Mutex<Vec<ProviderNode>>,
    pub connects: AtomicUsize,
    pub lists: AtomicUsize,
    pub creates: AtomicUsize,
    pub destroys: AtomicUsize,
    pub fail_list: AtomicBool,
    pub fail_create: Mutex<HashSet<String>>,
    pub user_data: Mutex<BTreeMap<String, String>>,
}

#[derive(Clone, Default)]
pub struct FakeCloud {
    pub state: Arc<CloudState>,
}

impl FakeCloud {
    pub fn with_nodes(nodes: Vec<ProviderNode>) -> Self {
        let cloud = Self::default();
        *cloud.state.nodes.lock().unwrap() = nodes;
        cloud
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .nodes
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn creates(&self) -> usize {
        self.state.creates.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.state.destroys.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    state: Arc<CloudState>,
}

#[async_trait]
impl CloudProvider for FakeSession {
    async fn list_nodes(&self) -> Result<Vec<ProviderNode>> {
        self.state.lists.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_list.load(Ordering::SeqCst) {
            return Err(FleetError::Provider("503 service unavailable".to_string()));
        }
        Ok(self.state.nodes.lock().unwrap().clone())
    }

    async fn create_node(&self, req: &CreateNodeRequest) -> Result<ProviderNode> {
        self.state.creates.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_create.lock().unwrap().contains(&req.name) {
            return Err(FleetError::Provider(format!("over quota creating {}", req.name)));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let mut nodes = self.state.nodes.lock().unwrap();
        let node = live_node(&req.name, nodes.len() as u8 + 1);
        nodes.push(node.clone());
        self.state
            .user_data
            .lock()
            .unwrap()
            .insert(req.name.clone(), req.user_data.clone());
        Ok(node)
    }

    async fn destroy_node(&self, node: &ProviderNode) -> Result<bool> {
        self.state.destroys.fetch_add(1, Ordering::SeqCst);
        self.state.nodes.lock().unwrap().retain(|n| n.id != node.id);
        Ok(true)
    }
}

#[async_trait]
impl ProviderFactory for FakeCloud {
    async fn connect(&self) -> Result<Box<dyn CloudProvider>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

// ============================================================================
// Remote execution
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub host: String,
    pub user: String,
    pub command: String,
}

#[derive(Default)]
pub struct FakeRemote {
    pub calls: Mutex<Vec<RemoteCall>>,
    pub fail_hosts: Mutex<HashSet<String>>,
    pub fail_priming: AtomicBool,
}

impl FakeRemote {
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_host(&self, host: &str) {
        self.fail_hosts.lock().unwrap().insert(host.to_string());
    }
}

pub fn is_priming(command: &str) -> bool {
    command.contains("-schema")
}

pub fn is_workload(command: &str) -> bool {
    command.contains("-log file=")
}

#[async_trait]
impl RemoteExecutor for FakeRemote {
    async fn run(&self, host: &str, user: &str, command: &str) -> Result<String> {
        self.calls.lock().unwrap().push(RemoteCall {
            host: host.to_string(),
            user: user.to_string(),
            command: command.to_string(),
        });

        if is_priming(command) && self.fail_priming.load(Ordering::SeqCst) {
            return Err(FleetError::remote(host, "exit 1: unable to connect to cluster"));
        }
        if self.fail_hosts.lock().unwrap().contains(host) {
            return Err(FleetError::remote(host, "exit 255: connection refused"));
        }

        if let Some(path) = command.strip_prefix("cat ") {
            return Ok(format!("results from {} at {}\n", host, path));
        }
        Ok(format!("ok on {}\n", host))
    }
}

// ============================================================================
// Template and discovery
// ============================================================================

pub struct MemTemplate {
    pub base: String,
    pub files: BTreeMap<PathBuf, String>,
}

impl MemTemplate {
    pub fn standard() -> Self {
        let mut files = BTreeMap::new();
        files.insert(
            PathBuf::from("injected-scripts/setup-raid0"),
            "#!/bin/sh\nmdadm --create /dev/md0\n".to_string(),
        );
        for unit in [
            "apply-lsi-settings.service",
            "setup-lsi-cards-in-raid0.service",
            "media-data.mount",
            "cassandra-container-creation.service",
            "cassandra-server.service",
            "cassandra-stressd.service",
        ] {
            files.insert(
                PathBuf::from("injected-units").join(unit),
                format!("[Unit]\nDescription={}\n", unit),
            );
        }

        Self {
            base: "ssh_authorized_keys: []\ncoreos:\n  units: []\n".to_string(),
            files,
        }
    }
}

impl ConfigTemplate for MemTemplate {
    fn load_base(&self) -> Result<serde_yaml::Value> {
        serde_yaml::from_str(&self.base).map_err(|e| FleetError::Template(e.to_string()))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| FleetError::Template(format!("No such file {:?}", path)))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self
            .files
            .keys()
            .filter(|p| p.parent() == Some(path))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect())
    }
}

#[derive(Default)]
pub struct StaticDiscovery {
    pub calls: AtomicUsize,
    pub unavailable: AtomicBool,
}

#[async_trait]
impl DiscoveryService for StaticDiscovery {
    async fn new_token(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FleetError::Discovery("503 service unavailable".to_string()));
        }
        Ok("https://discovery.test/abc123".to_string())
    }
}
