//! Context-carried system metadata (§6, §9 "Context-carried metadata").
//!
//! The original propagates this through a Go `context.Context`. This core
//! has no transport of its own (§1 Non-goals), so the header-bag is a
//! plain value type that a host application's middleware threads through
//! its own call context (e.g. stashed in a tower `Extensions`, a tonic
//! request, or an axum extension) — callers pass a `&RequestContext`
//! explicitly to `Select`/`Pick` rather than relying on implicit
//! thread-local state, since that is the only context-propagation
//! mechanism this crate can make a promise about.

use std::collections::HashMap;

/// Well-known system metadata keys (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SystemKey {
    SourceServiceName,
    SourceServiceNamespace,
    SourceInterface,
    DestServiceName,
    DestServiceNamespace,
    DestInterface,
    LaneId,
    GroupId,
    ApplicationId,
    ApplicationVersion,
}

/// The per-call context a tag rule is evaluated against: well-known
/// system keys plus arbitrary caller-supplied user metadata.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    system: HashMap<SystemKey, String>,
    user: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext::default()
    }

    pub fn with_system(mut self, key: SystemKey, value: impl Into<String>) -> Self {
        self.system.insert(key, value.into());
        self
    }

    pub fn with_user(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user.insert(key.into(), value.into());
        self
    }

    pub fn system(&self, key: SystemKey) -> Option<&str> {
        self.system.get(&key).map(|s| s.as_str())
    }

    pub fn set_system(&mut self, key: SystemKey, value: impl Into<String>) {
        self.system.insert(key, value.into());
    }

    pub fn user(&self, key: &str) -> Option<&str> {
        self.user.get(key).map(|s| s.as_str())
    }

    /// Looks up a predicate field: system keys by their well-known name
    /// first, falling back to user metadata. Used by tag-rule evaluation
    /// (§3/§4.5.b/§4.6.b), which mixes both without the caller needing to
    /// know which bucket a given field lives in.
    pub fn field(&self, name: &str) -> Option<&str> {
        let sys_key = match name {
            "source_service_name" => Some(SystemKey::SourceServiceName),
            "source_service_namespace" => Some(SystemKey::SourceServiceNamespace),
            "source_interface" => Some(SystemKey::SourceInterface),
            "dest_service_name" => Some(SystemKey::DestServiceName),
            "dest_service_namespace" => Some(SystemKey::DestServiceNamespace),
            "dest_interface" => Some(SystemKey::DestInterface),
            "lane_id" => Some(SystemKey::LaneId),
            "group_id" => Some(SystemKey::GroupId),
            "application_id" => Some(SystemKey::ApplicationId),
            "application_version" => Some(SystemKey::ApplicationVersion),
            _ => None,
        };
        if let Some(key) = sys_key {
            if let Some(v) = self.system(key) {
                return Some(v);
            }
        }
        self.user(name)
    }

    /// Reads the lane ID stamped by a prior `Lane::get_lane_id` call
    /// (§4.6.c "Read laneID from context-carried system metadata").
    pub fn lane_id(&self) -> Option<&str> {
        self.system(SystemKey::LaneId)
    }

    /// The caller-provided key the consistent-hash balancer routes on
    /// (§4.7), propagated via user metadata since it has no well-known
    /// system slot.
    pub fn hash_key(&self) -> Option<&str> {
        self.user(HASH_KEY)
    }

    pub fn with_hash_key(self, key: impl Into<String>) -> Self {
        self.with_user(HASH_KEY, key)
    }
}

const HASH_KEY: &str = "hash_key";

/// Destination keys stamped by the client middleware before picking
/// (§6, §4.9).
pub fn stamp_destination(ctx: &mut RequestContext, namespace: &str, name: &str, lane_id: Option<&str>) {
    ctx.set_system(SystemKey::DestServiceNamespace, namespace);
    ctx.set_system(SystemKey::DestServiceName, name);
    if let Some(lane_id) = lane_id {
        ctx.set_system(SystemKey::LaneId, lane_id);
    }
}

/// Source keys stamped by the server middleware on entry (§6, §4.9).
pub fn stamp_source(ctx: &mut RequestContext, namespace: &str, name: &str, interface: &str) {
    ctx.set_system(SystemKey::SourceServiceNamespace, namespace);
    ctx.set_system(SystemKey::SourceServiceName, name);
    ctx.set_system(SystemKey::SourceInterface, interface);
}
