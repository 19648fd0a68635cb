//! Service/instance data model (§3 DATA MODEL).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const KEY_APPLICATION_ID: &str = "application_id";
pub const KEY_GROUP_ID: &str = "group_id";
pub const KEY_INSTANCE_ID: &str = "instance_id";
pub const KEY_PROG_VERSION: &str = "prog_version";
pub const KEY_ZONE: &str = "zone";
pub const KEY_REGION: &str = "region";
pub const KEY_NAMESPACE_ID: &str = "namespace_id";
pub const KEY_PROTOCOL: &str = "protocol";
pub const KEY_SDK_VERSION: &str = "sdk_version";
pub const KEY_TSF_STATUS: &str = "tsf_status";
pub const KEY_TSF_TAGS: &str = "tsf_tags";
pub const KEY_TSF_API_METAS: &str = "tsf_api_metas";

pub const NS_LOCAL: &str = "local";
pub const NS_GLOBAL: &str = "global";

/// Supplies the process's own namespace for canonicalization (§3 invariant:
/// empty or "local" namespace resolves to this). A trait rather than a
/// global so tests can instantiate fresh copies (DESIGN NOTES, §9).
pub trait LocalEnv: Send + Sync {
    fn namespace_id(&self) -> String;
    fn group_id(&self) -> String {
        String::new()
    }
}

/// A fixed local environment, for tests and simple embedders.
#[derive(Clone, Debug)]
pub struct StaticLocalEnv {
    pub namespace_id: String,
    pub group_id: String,
}

impl LocalEnv for StaticLocalEnv {
    fn namespace_id(&self) -> String {
        self.namespace_id.clone()
    }
    fn group_id(&self) -> String {
        self.group_id.clone()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub namespace: String,
    pub name: String,
}

impl Service {
    /// Canonicalizes `namespace` against `env` per §3: empty or "local"
    /// becomes the process's own namespace.
    pub fn new(namespace: &str, name: &str, env: &dyn LocalEnv) -> Self {
        let namespace = if namespace.is_empty() || namespace == NS_LOCAL {
            env.namespace_id()
        } else {
            namespace.to_string()
        };
        Service {
            namespace,
            name: name.to_string(),
        }
    }

    /// Builds the sentinel "global" variant used for cross-namespace
    /// registration (pkg/route/router's dual registration, §3 GLOSSARY).
    pub fn global(name: &str) -> Self {
        Service {
            namespace: NS_GLOBAL.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Up,
    Down,
}

impl Status {
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            Status::Up
        } else {
            Status::Down
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance {
    pub service: Service,
    pub id: String,
    pub region: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub status: Status,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Instance {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn metadata_get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn is_up(&self) -> bool {
        matches!(self.status, Status::Up)
    }
}
