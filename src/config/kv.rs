//! HTTP long-poll KV client (§6 "KV wire"), grounded on
//! `pkg/config/consul/consul.go`'s `fetch` and the teacher's
//! `reqwest::Client` builder in `main.rs`.

use super::{KvClient, Spec};
use crate::error::{MeshError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct HttpKvConfig {
    pub address: String,
    pub token: Option<String>,
    pub namespace_id: Option<String>,
    pub app_id: Option<String>,
    /// Long-poll horizon requested from the server (§5: "≈55s").
    pub wait: Duration,
}

impl Default for HttpKvConfig {
    fn default() -> Self {
        HttpKvConfig {
            address: "127.0.0.1:8500".to_string(),
            token: None,
            namespace_id: None,
            app_id: None,
            wait: Duration::from_secs(55),
        }
    }
}

#[derive(serde::Deserialize)]
struct KvItem {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

pub struct HttpKvClient {
    client: Client,
    cfg: HttpKvConfig,
}

impl HttpKvClient {
    pub fn new(cfg: HttpKvConfig) -> Result<Self> {
        // Add a slack margin over the server's long-poll horizon so the
        // local timeout doesn't race the server's own `wait` bound.
        let client = Client::builder()
            .timeout(cfg.wait + Duration::from_secs(35))
            .build()
            .map_err(|e| MeshError::Transport(e.into()))?;
        Ok(HttpKvClient { client, cfg })
    }

    fn build_url(&self, path: &str, index: u64) -> String {
        let mut url = format!(
            "http://{}/v1/kv/{}?index={}&wait={}s",
            self.cfg.address,
            path,
            index,
            self.cfg.wait.as_secs()
        );
        if let Some(token) = &self.cfg.token {
            url.push_str("&token=");
            url.push_str(token);
        }
        if path.ends_with('/') {
            url.push_str("&recurse");
        }
        if let Some(nid) = &self.cfg.namespace_id {
            url.push_str("&nid=");
            url.push_str(nid);
        }
        if let Some(uid) = &self.cfg.app_id {
            url.push_str("&uid=");
            url.push_str(uid);
        }
        url
    }
}

#[async_trait]
impl KvClient for HttpKvClient {
    async fn fetch(&self, path: &str, index: u64) -> Result<(Vec<Spec>, u64)> {
        let url = self.build_url(path, index);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MeshError::Transport(e.into()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            // §4.4 step 1: a 404 is mapped to empty spec_list, not an error.
            // There is no index header on a 404, so the caller keeps polling
            // from the same index.
            return Ok((Vec::new(), index));
        }

        let next_index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| MeshError::KvInvalidIndex("missing X-Consul-Index header".into()))?
            .parse::<u64>()
            .map_err(|e| MeshError::KvInvalidIndex(e.to_string()))?;

        let resp = resp
            .error_for_status()
            .map_err(|e| MeshError::Transport(e.into()))?;
        let items: Vec<KvItem> = resp
            .json()
            .await
            .map_err(|e| MeshError::Transport(e.into()))?;

        let mut specs = Vec::with_capacity(items.len());
        for item in items {
            let data = match item.value {
                Some(v) => match BASE64.decode(&v) {
                    Ok(bytes) => bytes,
                    Err(_) => continue,
                },
                None => Vec::new(),
            };
            specs.push(Spec {
                key: item.key,
                data,
            });
        }
        Ok((specs, next_index))
    }
}
