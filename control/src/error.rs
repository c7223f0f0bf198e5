use std::fmt;
use thiserror::Error;

/// Errors raised by fleet operations.
///
/// Item-level variants (`Provider`, `RemoteExec`, `Template`, `UnknownImage`)
/// are converted into per-item failures by the bounded executor. `InventoryList`
/// is the batch-level failure that aborts a whole command.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("failed to list provider inventory: {0}")]
    InventoryList(String),

    #[error("remote command on {host} failed: {detail}")]
    RemoteExec { host: String, detail: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("image {0} has no known OS family")]
    UnknownImage(String),

    #[error("discovery service error: {0}")]
    Discovery(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation panicked: {0}")]
    Panicked(String),
}

/// Copyable tag for a [`FleetError`], recorded in failed operation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Provider,
    InventoryList,
    RemoteExec,
    Template,
    UnknownImage,
    Discovery,
    Config,
    Io,
    Panicked,
}

impl FleetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::Provider(_) => ErrorKind::Provider,
            FleetError::InventoryList(_) => ErrorKind::InventoryList,
            FleetError::RemoteExec { .. } => ErrorKind::RemoteExec,
            FleetError::Template(_) => ErrorKind::Template,
            FleetError::UnknownImage(_) => ErrorKind::UnknownImage,
            FleetError::Discovery(_) => ErrorKind::Discovery,
            FleetError::Config(_) => ErrorKind::Config,
            FleetError::Io { .. } => ErrorKind::Io,
            FleetError::Panicked(_) => ErrorKind::Panicked,
        }
    }

    pub fn remote(host: impl Into<String>, detail: impl Into<String>) -> Self {
        FleetError::RemoteExec {
            host: host.into(),
            detail: detail.into(),
        }
    }

    pub fn io(path: impl fmt::Display, source: std::io::Error) -> Self {
        FleetError::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Provider => "ProviderError",
            ErrorKind::InventoryList => "InventoryListError",
            ErrorKind::RemoteExec => "RemoteExecError",
            ErrorKind::Template => "TemplateError",
            ErrorKind::UnknownImage => "UnknownImageError",
            ErrorKind::Discovery => "DiscoveryError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Io => "IoError",
            ErrorKind::Panicked => "Panicked",
        };
        f.write_str(s)
    }
}

pub type Result<T, E = FleetError> = std::result::Result<T, E>;
