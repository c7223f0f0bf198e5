//! Remote command execution over ssh.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{FleetError, Result};

/// Runs a shell command on a remote host and returns its stdout.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, host: &str, user: &str, command: &str) -> Result<String>;
}

/// Shells out to the system `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: Duration,
    identity_file: Option<String>,
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration, identity_file: Option<String>) -> Self {
        Self {
            connect_timeout,
            identity_file,
        }
    }

    fn options(&self) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        if let Some(key) = &self.identity_file {
            opts.push("-i".to_string());
            opts.push(key.clone());
        }
        opts
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), None)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, user: &str, command: &str) -> Result<String> {
        debug!("ssh {}@{}: {}", user, host, command);

        let output = Command::new("ssh")
            .args(self.options())
            .arg(format!("{}@{}", user, host))
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| FleetError::remote(host, format!("failed to spawn ssh: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::remote(
                host,
                format!("exit {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
