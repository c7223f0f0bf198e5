use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CloudProvider, ProviderFactory};
use crate::error::{FleetError, Result};
use crate::types::{CreateNodeRequest, ProviderNode};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRIES: u32 = 3;

/// Credentials for one provider region. Loaded once at startup, read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenStackCredentials {
    pub identity_url: String,
    pub username: String,
    pub api_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    message: Option<String>,
    code: Option<u16>,
}

// ============================================================================
// Identity / compute wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: Token,
    #[serde(rename = "serviceCatalog")]
    service_catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct Token {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    kind: String,
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct Endpoint {
    region: Option<String>,
    #[serde(rename = "publicURL")]
    public_url: String,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    servers: Vec<Server>,
    #[serde(default)]
    servers_links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
}

impl ServerList {
    /// Marker for the following page when the listing was truncated.
    fn next_marker(&self) -> Option<&str> {
        if !self.servers_links.iter().any(|link| link.rel == "next") {
            return None;
        }
        self.servers.last().map(|s| s.id.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Debug, Deserialize)]
struct Server {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<ServerAddress>>,
}

#[derive(Debug, Deserialize)]
struct ServerAddress {
    addr: String,
}

impl Server {
    fn into_node(self, fallback_name: &str) -> ProviderNode {
        let mut public_addresses = Vec::new();
        let mut private_addresses = Vec::new();
        for (network, addrs) in self.addresses {
            let target = if network == "public" {
                &mut public_addresses
            } else {
                &mut private_addresses
            };
            target.extend(addrs.into_iter().map(|a| a.addr));
        }

        ProviderNode {
            id: self.id,
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            state: self.status.unwrap_or_else(|| "BUILD".to_string()),
            public_addresses,
            private_addresses,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// An authenticated session against one region's compute endpoint.
pub struct OpenStackProvider {
    http: reqwest::Client,
    compute_url: String,
    token: String,
    user_agent: String,
    retries: u32,
}

impl OpenStackProvider {
    /// Authenticate and resolve the compute endpoint for the region.
    pub async fn connect(creds: &OpenStackCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FleetError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        let url = format!("{}/tokens", creds.identity_url.trim_end_matches('/'));
        info!("Authenticating {} against {}", creds.username, url);

        let body = json!({
            "auth": {
                "RAX-KSKEY:apiKeyCredentials": {
                    "username": creds.username,
                    "apiKey": creds.api_key,
                }
            }
        });

        let resp = http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FleetError::Provider(format!("Authentication request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FleetError::Provider(format!(
                "Authentication failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| FleetError::Provider(format!("Failed to parse token response: {}", e)))?;

        let compute_url = compute_endpoint(&token.access.service_catalog, &creds.region)?;
        debug!("Compute endpoint for {}: {}", creds.region, compute_url);

        Ok(Self {
            http,
            compute_url,
            token: token.access.token.id,
            user_agent: format!("benchfleet/{}", env!("CARGO_PKG_VERSION")),
            retries: DEFAULT_RETRIES,
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.compute_url.trim_end_matches('/'), path);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("user-agent", &self.user_agent)
                .header("x-request-id", Uuid::new_v4().to_string())
                .header("x-auth-token", &self.token);

            if let Some(b) = &body {
                req = req.json(b);
            }

            debug!("HTTP {} {} (attempt {})", method, url, attempt);
            let resp = req
                .send()
                .await
                .map_err(|e| FleetError::Provider(format!("{} {} failed: {}", method, url, e)))?;
            let status = resp.status();

            if status.is_success() {
                return Ok(resp.bytes().await.unwrap_or_default().to_vec());
            }

            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let bytes = resp.bytes().await.unwrap_or_default();

            if attempt <= self.retries && should_retry(&method, status) {
                tokio::time::sleep(retry_sleep(status, retry_after)).await;
                continue;
            }

            return Err(FleetError::Provider(render_error(&method, &url, status, &bytes)));
        }
    }
}

#[async_trait]
impl CloudProvider for OpenStackProvider {
    async fn list_nodes(&self) -> Result<Vec<ProviderNode>> {
        let mut nodes = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let path = match &marker {
                Some(m) => format!("/servers/detail?marker={}", m),
                None => "/servers/detail".to_string(),
            };
            let bytes = self.send(Method::GET, &path, None).await?;
            let page: ServerList = serde_json::from_slice(&bytes)
                .map_err(|e| FleetError::Provider(format!("Failed to parse server list: {}", e)))?;

            let next = page.next_marker().map(str::to_string);
            if next.is_some() && next == marker {
                return Err(FleetError::Provider(format!(
                    "Server listing did not advance past marker {:?}",
                    marker
                )));
            }
            nodes.extend(page.servers.into_iter().map(|s| s.into_node("")));

            match next {
                Some(m) => {
                    debug!("Server listing truncated, continuing after {}", m);
                    marker = Some(m);
                }
                None => return Ok(nodes),
            }
        }
    }

    async fn create_node(&self, req: &CreateNodeRequest) -> Result<ProviderNode> {
        let user_data = base64::engine::general_purpose::STANDARD.encode(&req.user_data);
        let body = json!({
            "server": {
                "name": req.name,
                "imageRef": req.image,
                "flavorRef": req.flavor,
                "key_name": req.keypair,
                "user_data": user_data,
                "config_drive": true,
            }
        });

        let bytes = self.send(Method::POST, "/servers", Some(body)).await?;
        let created: ServerEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| FleetError::Provider(format!("Failed to parse create response: {}", e)))?;

        Ok(created.server.into_node(&req.name))
    }

    async fn destroy_node(&self, node: &ProviderNode) -> Result<bool> {
        self.send(Method::DELETE, &format!("/servers/{}", node.id), None).await?;
        Ok(true)
    }
}

/// Opens a fresh authenticated session per call.
#[derive(Debug, Clone)]
pub struct OpenStackFactory {
    creds: OpenStackCredentials,
}

impl OpenStackFactory {
    pub fn new(creds: OpenStackCredentials) -> Self {
        Self { creds }
    }
}

#[async_trait]
impl ProviderFactory for OpenStackFactory {
    async fn connect(&self) -> Result<Box<dyn CloudProvider>> {
        let session = OpenStackProvider::connect(&self.creds).await?;
        Ok(Box::new(session))
    }
}

fn compute_endpoint(catalog: &[CatalogEntry], region: &str) -> Result<String> {
    catalog
        .iter()
        .filter(|entry| entry.kind == "compute")
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| {
            ep.region
                .as_deref()
                .is_some_and(|r| r.eq_ignore_ascii_case(region))
        })
        .map(|ep| ep.public_url.clone())
        .ok_or_else(|| FleetError::Provider(format!("No compute endpoint for region {}", region)))
}

fn should_retry(method: &Method, status: StatusCode) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    if status.is_server_error() {
        return matches!(*method, Method::GET | Method::DELETE);
    }
    false
}

fn retry_sleep(status: StatusCode, retry_after: Option<u64>) -> Duration {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Duration::from_secs(retry_after.unwrap_or(1));
    }
    Duration::from_millis(300)
}

/// Error bodies are `{"<kind>": {"message": ..., "code": ...}}`.
fn render_error(method: &Method, url: &str, status: StatusCode, bytes: &[u8]) -> String {
    let structured = serde_json::from_slice::<BTreeMap<String, ErrorResponse>>(bytes)
        .ok()
        .and_then(|m| m.into_iter().next());

    match structured {
        Some((kind, e)) => format!(
            "HTTP {} {} failed: status={} kind={} code={:?} message={:?}",
            method,
            url,
            status.as_u16(),
            kind,
            e.code,
            e.message
        ),
        None => format!(
            "HTTP {} {} failed: status={} body={}",
            method,
            url,
            status.as_u16(),
            String::from_utf8_lossy(bytes)
        ),
    }
}
