//! Dynamic configuration subscriber (C4, §4.4): long-poll KV subscription
//! fanned out to coalescing watchers. Grounded on
//! `pkg/config/consul/consul.go` in the original source.

mod kv;
mod topic;

pub use kv::{HttpKvClient, HttpKvConfig};
pub use topic::KvConfigSource;

use crate::error::{MeshError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// A single configuration item as returned by the KV store (§3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spec {
    pub key: String,
    pub data: Vec<u8>,
}

impl Spec {
    /// Decodes the opaque payload as YAML (a structural superset of JSON,
    /// so this also accepts JSON bodies per §3/§6).
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_yaml::from_slice(&self.data)
            .map_err(|e| MeshError::KvDecodeFailed(format!("key={}: {e}", self.key)))
    }
}

/// What a KV backend must provide: a long-poll fetch keyed by the last
/// known index (§4.4 step 1, §6 "KV wire"). Implemented by `HttpKvClient`;
/// any other backend can implement this trait and reuse the topic/watcher
/// fan-out machinery in this module.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn fetch(&self, path: &str, index: u64) -> Result<(Vec<Spec>, u64)>;
}

/// Fans a single path out to local subscribers (§4.4).
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Blocks until a new snapshot has arrived since the caller's last
    /// return, the token is canceled (`WatchTimeout`), or the watcher is
    /// closed (`WatchClosed`).
    async fn watch(&self, ctx: &CancellationToken) -> Result<Vec<Spec>>;

    /// Detaches this watcher; tears down the topic if it was the last one.
    fn close(&self);
}

/// A source of configuration topics (§4.4).
pub trait ConfigSource: Send + Sync {
    fn subscribe(&self, path: &str) -> std::sync::Arc<dyn Watcher>;

    /// Returns the last broadcast snapshot without blocking; may be empty
    /// before the first fetch completes.
    fn get(&self, path: &str) -> Vec<Spec>;
}
