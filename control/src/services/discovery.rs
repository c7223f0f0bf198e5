use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::error::{FleetError, Result};

/// Issues a fresh cluster discovery token.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    async fn new_token(&self) -> Result<String>;
}

/// Fetches a token URL from an etcd-style discovery endpoint.
pub struct HttpDiscovery {
    url: String,
    client: reqwest::Client,
}

impl HttpDiscovery {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FleetError::Discovery(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl DiscoveryService for HttpDiscovery {
    async fn new_token(&self) -> Result<String> {
        info!("Requesting discovery token from {}", self.url);

        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FleetError::Discovery(format!("Request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FleetError::Discovery(format!(
                "Discovery endpoint returned {}: {}",
                status, body
            )));
        }

        let token = resp
            .text()
            .await
            .map_err(|e| FleetError::Discovery(format!("Failed to read body: {}", e)))?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(FleetError::Discovery("Empty discovery token".to_string()));
        }
        Ok(token)
    }
}
