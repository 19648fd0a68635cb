//! Holds the transport's current ready instance set for the picker
//! adapter to read (§4.8, §5). The registry client that produces this
//! set is an external collaborator (§1 Non-goals); this is just the
//! snapshot slot it publishes into, grounded on the teacher's
//! `ProviderRegistry`/`AppState::registry`.

use crate::naming::Instance;
use arc_swap::ArcSwap;
use std::sync::Arc;

#[derive(Default)]
pub struct ReadyInstances {
    nodes: ArcSwap<Vec<Instance>>,
}

impl ReadyInstances {
    pub fn new() -> Self {
        ReadyInstances {
            nodes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Replaces the ready set. Owned by the transport; the picker adapter
    /// only ever reads it (§3 Lifecycles).
    pub fn replace(&self, nodes: Vec<Instance>) {
        self.nodes.store(Arc::new(nodes));
    }

    pub fn snapshot(&self) -> Arc<Vec<Instance>> {
        self.nodes.load_full()
    }
}
