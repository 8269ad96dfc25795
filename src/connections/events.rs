//! Resource cache notifications
//!
//! A plain observer list owned by the cache. Observers run on the thread
//! that produced the event; keep them short.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;
use uuid::Uuid;

use crate::dependencies::{AssemblyImage, Reference, SourceCodeCollection};
use crate::scripts::FrameworkVersion;

use super::types::ResourceKind;

/// A freshly generated resource value
#[derive(Debug, Clone)]
pub enum ResourceValue {
    SourceCode(Arc<SourceCodeCollection>),
    Assembly(Arc<Option<AssemblyImage>>),
    RequiredReferences(Arc<Vec<Reference>>),
}

impl ResourceValue {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::SourceCode(_) => ResourceKind::SourceCode,
            Self::Assembly(_) => ResourceKind::Assembly,
            Self::RequiredReferences(_) => ResourceKind::RequiredReferences,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResourceEvent {
    Generating {
        connection_id: Uuid,
        framework: FrameworkVersion,
        kind: ResourceKind,
    },
    Updated {
        connection_id: Uuid,
        framework: FrameworkVersion,
        value: ResourceValue,
    },
    GenerationFailed {
        connection_id: Uuid,
        framework: FrameworkVersion,
        kind: ResourceKind,
        error: String,
    },
}

pub type ObserverId = u64;

type Observer = Arc<dyn Fn(&ResourceEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    list: RwLock<Vec<(ObserverId, Observer)>>,
}

impl Observers {
    pub fn subscribe(&self, observer: Observer) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.list.write().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    /// Deliver to a snapshot of the list so observers may (un)subscribe
    pub fn publish(&self, event: &ResourceEvent) {
        let snapshot: Vec<Observer> = self.list.read().iter().map(|(_, o)| o.clone()).collect();
        for observer in snapshot {
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(event)));
            if result.is_err() {
                error!("Resource cache observer panicked");
            }
        }
    }
}
