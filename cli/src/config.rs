use anyhow::{Context, Result};
use benchfleet_control::provider::OpenStackCredentials;
use benchfleet_control::OsFamily;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_IDENTITY_URL: &str = "https://identity.api.rackspacecloud.com/v2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionCredentials {
    pub username: String,
    pub api_key: String,
}

/// Local settings file. Read once at startup, never written by this tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub identity_url: Option<String>,
    // Key: lowercase region name
    #[serde(default)]
    pub regions: BTreeMap<String, RegionCredentials>,
    pub keypair: Option<String>,
    pub name_prefix: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_identity: Option<String>,
    pub template_dir: Option<PathBuf>,
    #[serde(default)]
    pub image_families: BTreeMap<String, OsFamily>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).with_context(|| format!("Failed to read config {:?}", path))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(cfg)
    }

    pub fn credentials(&self, region: &str) -> Result<OpenStackCredentials> {
        let region = region.to_lowercase();
        let creds = self
            .regions
            .get(&region)
            .with_context(|| format!("No credentials configured for region '{}'", region))?;

        Ok(OpenStackCredentials {
            identity_url: self
                .identity_url
                .clone()
                .unwrap_or_else(|| DEFAULT_IDENTITY_URL.to_string()),
            username: creds.username.clone(),
            api_key: creds.api_key.clone(),
            region,
        })
    }
}

pub fn default_config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("benchfleet");
    dir.push("config.json");
    dir
}
