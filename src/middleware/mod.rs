//! Client/server middleware chains (C9, §4.9).
//!
//! There is no concrete transport in this core (§1 Non-goals), so these
//! are not tower `Layer`s or axum middleware — they are ordered async
//! wrappers a host application calls around its own request/response
//! types, the way the teacher's `relay.rs` composes its own handler
//! around `reqwest` calls and the breaker check by hand.

mod client;
mod server;

pub use client::{ClientMiddleware, ClientMiddlewareConfig};
pub use server::{AuthCheck, PanicRecovered, ServerMiddleware};

use std::sync::atomic::{AtomicU64, Ordering};

/// Call counters shared by both chains' "metrics" stage (§4.9). Kept
/// deliberately small, a count pair rather than a histogram registry,
/// since a real metrics exporter is an external collaborator (§1 Non-goals).
#[derive(Default)]
pub struct CallMetrics {
    calls: AtomicU64,
    failures: AtomicU64,
}

impl CallMetrics {
    pub fn new() -> Self {
        CallMetrics::default()
    }

    fn record(&self, failed: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
