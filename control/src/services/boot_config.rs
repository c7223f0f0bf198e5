//! Per-node boot configuration (cloud-config) generation.
//!
//! Unit and command lists are ordered: boot tooling runs them in listed order
//! and relies on that order for dependencies.

use serde_yaml::{Mapping, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::config::{BootSettings, FleetConfig};
use crate::error::{FleetError, Result};
use crate::services::discovery::DiscoveryService;
use crate::template::ConfigTemplate;
use crate::types::{NodeSpec, OsFamily, Role};

pub const HEADER: &str = "#cloud-config";

/// Image path used by the package-based data download and container import.
const IMAGE_ARCHIVE: &str = "/var/tmp/cassandra-image.tar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Always,
    StorageFlavor,
    Role(Role),
}

impl Condition {
    fn holds(self, settings: &BootSettings, node: &NodeSpec) -> bool {
        match self {
            Condition::Always => true,
            Condition::StorageFlavor => settings.is_storage_flavor(&node.flavor),
            Condition::Role(role) => node.role == role,
        }
    }
}

// ============================================================================
// Rule tables
// ============================================================================

struct UnitRule {
    when: Condition,
    units: &'static [&'static str],
}

const UNIT_RULES: &[UnitRule] = &[
    UnitRule {
        when: Condition::StorageFlavor,
        units: &[
            "apply-lsi-settings.service",
            "setup-lsi-cards-in-raid0.service",
            "media-data.mount",
        ],
    },
    UnitRule {
        when: Condition::Always,
        units: &["cassandra-container-creation.service"],
    },
    UnitRule {
        when: Condition::Role(Role::DataNode),
        units: &["cassandra-server.service"],
    },
    UnitRule {
        when: Condition::Role(Role::Loader),
        units: &["cassandra-stressd.service"],
    },
];

#[derive(Debug, Clone, Copy)]
enum BootStep {
    TimeSync,
    ResourceLimits,
    DataDownload,
    RuntimeInstall,
    DiskSetup,
    ContainerImport,
    ServiceRestart,
    StartDataNode,
    StartLoader,
}

const PACKAGE_STEPS: &[(Condition, BootStep)] = &[
    (Condition::Always, BootStep::TimeSync),
    (Condition::Always, BootStep::ResourceLimits),
    (Condition::Always, BootStep::DataDownload),
    (Condition::Always, BootStep::RuntimeInstall),
    (Condition::StorageFlavor, BootStep::DiskSetup),
    (Condition::Always, BootStep::ContainerImport),
    (Condition::Always, BootStep::ServiceRestart),
    (Condition::Role(Role::DataNode), BootStep::StartDataNode),
    (Condition::Role(Role::Loader), BootStep::StartLoader),
];

impl BootStep {
    fn command(self, settings: &BootSettings) -> String {
        let root = settings.install_root.trim_end_matches('/');
        match self {
            BootStep::TimeSync => "ntpdate -u pool.ntp.org".to_string(),
            BootStep::ResourceLimits => {
                "echo '* - nofile 100000' >> /etc/security/limits.conf && sysctl -w vm.max_map_count=1048575"
                    .to_string()
            }
            BootStep::DataDownload => {
                format!("curl -fsSL -o {} {}", IMAGE_ARCHIVE, settings.data_url)
            }
            BootStep::RuntimeInstall => {
                "apt-get install -y --no-install-recommends docker-engine".to_string()
            }
            BootStep::DiskSetup => format!("{}/setup-raid0", root),
            BootStep::ContainerImport => format!("docker load -i {}", IMAGE_ARCHIVE),
            BootStep::ServiceRestart => "service docker restart".to_string(),
            BootStep::StartDataNode => format!("{}/start-cassandra-server", root),
            BootStep::StartLoader => format!("{}/start-cassandra-stressd", root),
        }
    }
}

/// Unit names for a unit-based node, in boot order.
pub fn units_for(settings: &BootSettings, node: &NodeSpec) -> Vec<&'static str> {
    UNIT_RULES
        .iter()
        .filter(|rule| rule.when.holds(settings, node))
        .flat_map(|rule| rule.units.iter().copied())
        .collect()
}

/// Boot commands for a package-based node, in boot order.
pub fn commands_for(settings: &BootSettings, node: &NodeSpec) -> Vec<String> {
    PACKAGE_STEPS
        .iter()
        .filter(|(when, _)| when.holds(settings, node))
        .map(|(_, step)| step.command(settings))
        .collect()
}

pub fn os_family(settings: &BootSettings, image: &str) -> Result<OsFamily> {
    settings
        .image_families
        .get(image)
        .copied()
        .ok_or_else(|| FleetError::UnknownImage(image.to_string()))
}

// ============================================================================
// Generator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFile {
    pub path: String,
    pub permissions: String,
    pub content: String,
}

/// Generated boot configuration for one node.
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub family: OsFamily,
    pub files: Vec<InjectedFile>,
    /// Unit names (unit-based) or boot commands (package-based), in order.
    pub steps: Vec<String>,
    pub document: Value,
}

impl BootConfig {
    /// Serialize with the fixed leading marker line.
    pub fn render(&self) -> Result<String> {
        let body = serde_yaml::to_string(&self.document)
            .map_err(|e| FleetError::Template(format!("Failed to serialize boot config: {}", e)))?;
        Ok(format!("{}\n{}", HEADER, body))
    }
}

/// Builds boot configurations from the base template and rule tables.
///
/// The discovery service is called at most once per generator. Its outcome,
/// token or failure, is shared by every node it generates.
pub struct ConfigGenerator {
    template: Arc<dyn ConfigTemplate>,
    discovery: Arc<dyn DiscoveryService>,
    token: OnceCell<std::result::Result<String, String>>,
}

impl ConfigGenerator {
    pub fn new(template: Arc<dyn ConfigTemplate>, discovery: Arc<dyn DiscoveryService>) -> Self {
        Self {
            template,
            discovery,
            token: OnceCell::new(),
        }
    }

    pub async fn discovery_token(&self) -> Result<String> {
        self.token
            .get_or_init(|| async {
                match self.discovery.new_token().await {
                    Ok(token) => {
                        info!("Using discovery endpoint {}", token);
                        Ok(token)
                    }
                    Err(FleetError::Discovery(detail)) => {
                        error!("Discovery token request failed: {}", detail);
                        Err(detail)
                    }
                    Err(e) => {
                        error!("Discovery token request failed: {}", e);
                        Err(e.to_string())
                    }
                }
            })
            .await
            .clone()
            .map_err(FleetError::Discovery)
    }

    pub async fn generate(&self, config: &FleetConfig, node: &NodeSpec) -> Result<BootConfig> {
        let settings = &config.boot;
        let mut doc = self.template.load_base()?;
        let root = doc
            .as_mapping_mut()
            .ok_or_else(|| FleetError::Template("Base template is not a mapping".to_string()))?;

        let files = self.injected_files(settings)?;
        let write_files = sequence(root, "write_files")?;
        for file in &files {
            let mut entry = Mapping::new();
            entry.insert("path".into(), file.path.clone().into());
            entry.insert("permissions".into(), file.permissions.clone().into());
            entry.insert("content".into(), file.content.clone().into());
            write_files.push(Value::Mapping(entry));
        }

        let family = os_family(settings, &node.image)?;
        debug!("Node {} uses {:?} boot configuration", node.name, family);

        let steps = match family {
            OsFamily::UnitBased => self.apply_units(settings, node, root).await?,
            OsFamily::PackageBased => apply_packages(settings, node, root)?,
        };

        Ok(BootConfig {
            family,
            files,
            steps,
            document: doc,
        })
    }

    fn injected_files(&self, settings: &BootSettings) -> Result<Vec<InjectedFile>> {
        let root = settings.install_root.trim_end_matches('/');
        self.template
            .list_dir(&settings.scripts_dir)?
            .into_iter()
            .map(|name| {
                let content = self.read_text(&settings.scripts_dir.join(&name))?;
                Ok(InjectedFile {
                    path: format!("{}/{}", root, name),
                    permissions: settings.file_permissions.clone(),
                    content,
                })
            })
            .collect()
    }

    async fn apply_units(
        &self,
        settings: &BootSettings,
        node: &NodeSpec,
        root: &mut Mapping,
    ) -> Result<Vec<String>> {
        let units = units_for(settings, node);

        let mut entries = Vec::with_capacity(units.len());
        for unit in &units {
            let content = self.read_text(&settings.units_dir.join(unit))?;
            let mut entry = Mapping::new();
            entry.insert("name".into(), (*unit).into());
            entry.insert("command".into(), "start".into());
            entry.insert("content".into(), content.into());
            entries.push(Value::Mapping(entry));
        }

        let token = self.discovery_token().await?;

        let coreos = mapping(root, "coreos")?;
        sequence(coreos, "units")?.extend(entries);
        mapping(coreos, "etcd")?.insert("discovery".into(), token.into());

        Ok(units.into_iter().map(String::from).collect())
    }

    fn read_text(&self, path: &Path) -> Result<String> {
        let bytes = self.template.read_file(path)?;
        String::from_utf8(bytes)
            .map_err(|_| FleetError::Template(format!("{:?} is not valid UTF-8", path)))
    }
}

fn apply_packages(
    settings: &BootSettings,
    node: &NodeSpec,
    root: &mut Mapping,
) -> Result<Vec<String>> {
    root.insert("package_upgrade".into(), true.into());

    let mut source = Mapping::new();
    source.insert("source".into(), settings.package_repo.source.clone().into());
    source.insert("keyserver".into(), settings.package_repo.keyserver.clone().into());
    source.insert("keyid".into(), settings.package_repo.keyid.clone().into());
    sequence(root, "apt_sources")?.push(Value::Mapping(source));

    sequence(root, "packages")?.extend(settings.packages.iter().map(|p| Value::from(p.as_str())));

    let commands = commands_for(settings, node);
    sequence(root, "runcmd")?.extend(commands.iter().map(|c| Value::from(c.as_str())));
    Ok(commands)
}

fn sequence<'a>(map: &'a mut Mapping, key: &str) -> Result<&'a mut Vec<Value>> {
    let value = map.entry(key.into()).or_insert(Value::Null);
    if value.is_null() {
        *value = Value::Sequence(Vec::new());
    }
    value
        .as_sequence_mut()
        .ok_or_else(|| FleetError::Template(format!("'{}' in base template is not a list", key)))
}

fn mapping<'a>(map: &'a mut Mapping, key: &str) -> Result<&'a mut Mapping> {
    let value = map.entry(key.into()).or_insert(Value::Null);
    if value.is_null() {
        *value = Value::Mapping(Mapping::new());
    }
    value
        .as_mapping_mut()
        .ok_or_else(|| FleetError::Template(format!("'{}' in base template is not a mapping", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::types::FleetSpec;

    const UNIT_IMAGE: &str = "coreos-image";
    const PKG_IMAGE: &str = "ubuntu-image";

    struct MemTemplate {
        base: &'static str,
        files: BTreeMap<PathBuf, String>,
    }

    impl MemTemplate {
        fn new(base: &'static str) -> Self {
            let mut files = BTreeMap::new();
            files.insert(PathBuf::from("injected-scripts/b.sh"), "echo b".to_string());
            files.insert(PathBuf::from("injected-scripts/a.sh"), "echo a".to_string());
            for unit in UNIT_RULES.iter().flat_map(|r| r.units.iter()) {
                files.insert(
                    PathBuf::from("injected-units").join(unit),
                    format!("[Unit]\nDescription={}\n", unit),
                );
            }
            Self { base, files }
        }
    }

    impl ConfigTemplate for MemTemplate {
        fn load_base(&self) -> Result<Value> {
            serde_yaml::from_str(self.base).map_err(|e| FleetError::Template(e.to_string()))
        }

        fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
            self.files
                .get(path)
                .map(|s| s.as_bytes().to_vec())
                .ok_or_else(|| FleetError::Template(format!("missing {:?}", path)))
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

    struct CountingDiscovery {
        calls: AtomicUsize,
        unavailable: bool,
    }

    #[async_trait]
    impl DiscoveryService for CountingDiscovery {
        async fn new_token(&self) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(FleetError::Discovery("503 service unavailable".to_string()));
            }
            Ok(format!("https://discovery.test/token-{}", n))
        }
    }

    fn config() -> FleetConfig {
        let mut cfg = FleetConfig::new(FleetSpec::new("pq"), "key");
        cfg.boot.image_families = BTreeMap::from([
            (UNIT_IMAGE.to_string(), OsFamily::UnitBased),
            (PKG_IMAGE.to_string(), OsFamily::PackageBased),
        ]);
        cfg
    }

    fn node(role: Role, flavor: &str, image: &str) -> NodeSpec {
        NodeSpec {
            role,
            name: format!("pq-{}-0", role.short_name()),
            flavor: flavor.to_string(),
            image: image.to_string(),
        }
    }

    fn generator(base: &'static str) -> (ConfigGenerator, Arc<CountingDiscovery>) {
        generator_with(base, false)
    }

    fn generator_with(
        base: &'static str,
        unavailable: bool,
    ) -> (ConfigGenerator, Arc<CountingDiscovery>) {
        let discovery = Arc::new(CountingDiscovery {
            calls: AtomicUsize::new(0),
            unavailable,
        });
        let gen = ConfigGenerator::new(Arc::new(MemTemplate::new(base)), discovery.clone());
        (gen, discovery)
    }

    #[test]
    fn test_storage_data_node_unit_order() {
        let cfg = config();
        let units = units_for(&cfg.boot, &node(Role::DataNode, "onmetal-io1", UNIT_IMAGE));
        assert_eq!(
            units,
            vec![
                "apply-lsi-settings.service",
                "setup-lsi-cards-in-raid0.service",
                "media-data.mount",
                "cassandra-container-creation.service",
                "cassandra-server.service",
            ]
        );
    }

    #[test]
    fn test_compute_loader_units() {
        let cfg = config();
        let units = units_for(&cfg.boot, &node(Role::Loader, "onmetal-compute1", UNIT_IMAGE));
        assert_eq!(
            units,
            vec![
                "cassandra-container-creation.service",
                "cassandra-stressd.service"
            ]
        );
    }

    #[test]
    fn test_package_commands_order() {
        let cfg = config();
        let cmds = commands_for(&cfg.boot, &node(Role::DataNode, "onmetal-io1", PKG_IMAGE));
        assert_eq!(cmds.len(), 8);
        assert!(cmds[0].starts_with("ntpdate"));
        assert_eq!(cmds[4], "/opt/bin/setup-raid0");
        assert_eq!(cmds[7], "/opt/bin/start-cassandra-server");

        let cmds = commands_for(&cfg.boot, &node(Role::Loader, "onmetal-compute1", PKG_IMAGE));
        assert_eq!(cmds.len(), 7);
        assert!(!cmds.iter().any(|c| c.contains("setup-raid0")));
        assert_eq!(cmds[6], "/opt/bin/start-cassandra-stressd");
    }

    #[tokio::test]
    async fn test_unit_based_document() {
        let (gen, _) = generator("ssh_authorized_keys: []\ncoreos:\n  units: []\n");
        let cfg = config();
        let boot = gen
            .generate(&cfg, &node(Role::DataNode, "onmetal-io1", UNIT_IMAGE))
            .await
            .unwrap();

        assert_eq!(boot.family, OsFamily::UnitBased);
        let paths: Vec<&str> = boot.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/opt/bin/a.sh", "/opt/bin/b.sh"]);

        let rendered = boot.render().unwrap();
        assert!(rendered.starts_with("#cloud-config\n"));

        let doc = &boot.document;
        assert_eq!(doc["coreos"]["units"][0]["name"], "apply-lsi-settings.service");
        assert_eq!(doc["coreos"]["units"][0]["command"], "start");
        assert_eq!(doc["coreos"]["etcd"]["discovery"], "https://discovery.test/token-0");
        assert_eq!(doc["write_files"][0]["permissions"], "0755");
        assert!(doc.get("runcmd").is_none());
    }

    #[tokio::test]
    async fn test_package_based_document() {
        let (gen, discovery) = generator("runcmd:\n  - echo base\n");
        let cfg = config();
        let boot = gen
            .generate(&cfg, &node(Role::Loader, "onmetal-compute1", PKG_IMAGE))
            .await
            .unwrap();

        let doc = &boot.document;
        assert_eq!(doc["package_upgrade"], true);
        assert_eq!(doc["packages"][0], "docker-engine");
        assert_eq!(doc["runcmd"][0], "echo base");
        assert_eq!(doc["runcmd"][1], "ntpdate -u pool.ntp.org");
        assert!(doc.get("coreos").is_none());
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_discovery_token_memoized() {
        let (gen, discovery) = generator("{}");
        let cfg = config();

        let a = gen
            .generate(&cfg, &node(Role::DataNode, "onmetal-io1", UNIT_IMAGE))
            .await
            .unwrap();
        let b = gen
            .generate(&cfg, &node(Role::Loader, "onmetal-compute1", UNIT_IMAGE))
            .await
            .unwrap();

        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            a.document["coreos"]["etcd"]["discovery"],
            b.document["coreos"]["etcd"]["discovery"]
        );
    }

    #[tokio::test]
    async fn test_discovery_failure_memoized() {
        let (gen, discovery) = generator_with("{}", true);
        let cfg = config();

        for n in [
            node(Role::DataNode, "onmetal-io1", UNIT_IMAGE),
            node(Role::Loader, "onmetal-compute1", UNIT_IMAGE),
            node(Role::Loader, "onmetal-compute1", UNIT_IMAGE),
        ] {
            let err = gen.generate(&cfg, &n).await.unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Discovery);
            assert_eq!(
                err.to_string(),
                "discovery service error: 503 service unavailable"
            );
        }

        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generation_is_deterministic() {
        let (gen, _) = generator("coreos: {}\n");
        let cfg = config();
        let n = node(Role::DataNode, "onmetal-io1", UNIT_IMAGE);

        let first = gen.generate(&cfg, &n).await.unwrap().render().unwrap();
        let second = gen.generate(&cfg, &n).await.unwrap().render().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_image() {
        let (gen, _) = generator("{}");
        let cfg = config();
        let err = gen
            .generate(&cfg, &node(Role::DataNode, "onmetal-io1", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownImage);
    }

    #[tokio::test]
    async fn test_base_with_wrong_shape() {
        let (gen, _) = generator("write_files: nope\n");
        let cfg = config();
        let err = gen
            .generate(&cfg, &node(Role::Loader, "onmetal-compute1", UNIT_IMAGE))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Template);
    }
}
