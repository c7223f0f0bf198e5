//! Access to the boot configuration template and its injected files.

use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FleetError, Result};

pub trait ConfigTemplate: Send + Sync {
    /// Parse the base template document.
    fn load_base(&self) -> Result<Value>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Names of the regular files in `path`, sorted.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;
}

/// Filesystem-backed template rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsTemplate {
    root: PathBuf,
    base: PathBuf,
}

impl FsTemplate {
    pub fn new(root: impl Into<PathBuf>, base: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base: base.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl ConfigTemplate for FsTemplate {
    fn load_base(&self) -> Result<Value> {
        let bytes = self.read_file(&self.base)?;
        let doc: Value = serde_yaml::from_slice(&bytes).map_err(|e| {
            FleetError::Template(format!("Failed to parse {:?}: {}", self.base, e))
        })?;

        if doc.is_null() {
            return Ok(Value::Mapping(Default::default()));
        }
        if !doc.is_mapping() {
            return Err(FleetError::Template(format!(
                "Base template {:?} is not a mapping",
                self.base
            )));
        }
        Ok(doc)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        fs::read(&full)
            .map_err(|e| FleetError::Template(format!("Failed to read {:?}: {}", full, e)))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let full = self.resolve(path);
        let entries = fs::read_dir(&full)
            .map_err(|e| FleetError::Template(format!("Failed to list {:?}: {}", full, e)))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| FleetError::Template(format!("Failed to list {:?}: {}", full, e)))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
