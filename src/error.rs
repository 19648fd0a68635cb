//! Crate-wide error kinds (§7 ERROR HANDLING DESIGN).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    /// Local refusal by the circuit breaker (§4.2, §6 "Breaker error").
    #[error("circuit_breaker_open")]
    CircuitBreakerOpen,

    /// Empty post-filter instance set (§4.5/§4.6/§7).
    #[error("no_instance_available")]
    NoInstanceAvailable,

    /// Watcher's owning context was canceled (§4.4 Watcher contract).
    #[error("watch_timeout")]
    WatchTimeout,

    /// Watcher was closed by its owner (§4.4 Watcher contract).
    #[error("watch_closed")]
    WatchClosed,

    /// KV response carried a missing or non-numeric index header (§6 "KV wire").
    #[error("kv_invalid_index: {0}")]
    KvInvalidIndex(String),

    /// A spec in a KV batch failed to decode (§7: the bad spec is skipped,
    /// not fatal, unless it would collapse the batch to empty).
    #[error("kv_decode_failed: {0}")]
    KvDecodeFailed(String),

    /// Whatever the downstream call returned, annotated by middleware.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

impl MeshError {
    /// Classification used by the client breaker middleware's default
    /// policy (§4.3): deadline/cancel/>=500 is a failure.
    pub fn is_breaker_failure(&self, status_code: Option<u16>) -> bool {
        match self {
            MeshError::WatchTimeout => true,
            MeshError::Transport(_) => status_code.map(|c| c >= 500).unwrap_or(true),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
