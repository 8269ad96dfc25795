//! Typed message handlers keyed by type tag

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::error::Result;
use crate::protocol::{Envelope, IpcMessage};

pub type HandlerId = u64;

/// Deserializes the payload and runs the typed handler.
/// Outer error: payload did not deserialize. Inner: the handler failed.
type ErasedHandler =
    Arc<dyn Fn(&str) -> std::result::Result<Result<()>, serde_json::Error> + Send + Sync>;

/// What `dispatch` did with an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled { handlers: usize },
    UnknownType,
    InvalidPayload(String),
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<&'static str, Vec<(HandlerId, ErasedHandler)>>>,
}

/// Cheap-to-clone handle; clones share one set of handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `M`. Several handlers per type are allowed.
    pub fn on<M, F>(&self, handler: F) -> HandlerId
    where
        M: IpcMessage,
        F: Fn(M) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let erased: ErasedHandler = Arc::new(move |data: &str| {
            let message = serde_json::from_str::<M>(data)?;
            Ok(handler(message))
        });
        self.inner
            .handlers
            .write()
            .entry(M::TYPE)
            .or_default()
            .push((id, erased));
        id
    }

    pub fn off(&self, id: HandlerId) -> bool {
        remove_handler(&self.inner, id)
    }

    /// Like `on`, but the handler is removed when the guard is dropped
    #[must_use = "dropping the subscription unregisters the handler"]
    pub fn subscribe<M, F>(&self, handler: F) -> Subscription
    where
        M: IpcMessage,
        F: Fn(M) -> Result<()> + Send + Sync + 'static,
    {
        Subscription {
            registry: Arc::downgrade(&self.inner),
            id: self.on::<M, F>(handler),
        }
    }

    pub fn clear(&self) {
        self.inner.handlers.write().clear();
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().values().map(Vec::len).sum()
    }

    /// Run every handler registered for the envelope's type.
    ///
    /// Handler errors and panics are logged and do not stop the other
    /// handlers.
    pub fn dispatch(&self, envelope: &Envelope) -> Dispatch {
        // Snapshot so handlers may (un)register without deadlocking
        let handlers: Vec<ErasedHandler> = match self
            .inner
            .handlers
            .read()
            .get(envelope.message_type.as_str())
        {
            Some(list) if !list.is_empty() => list.iter().map(|(_, h)| h.clone()).collect(),
            _ => return Dispatch::UnknownType,
        };

        let mut handled = 0;
        for handler in &handlers {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&envelope.data)
            }));
            match outcome {
                Ok(Ok(Ok(()))) => handled += 1,
                Ok(Ok(Err(e))) => {
                    handled += 1;
                    warn!(
                        seq = envelope.seq,
                        message_type = %envelope.message_type,
                        error = %e,
                        "IPC handler failed"
                    );
                }
                Ok(Err(e)) => return Dispatch::InvalidPayload(e.to_string()),
                Err(_) => {
                    handled += 1;
                    error!(
                        seq = envelope.seq,
                        message_type = %envelope.message_type,
                        "IPC handler panicked"
                    );
                }
            }
        }
        Dispatch::Handled { handlers: handled }
    }
}

fn remove_handler(inner: &RegistryInner, id: HandlerId) -> bool {
    let mut handlers = inner.handlers.write();
    for list in handlers.values_mut() {
        if let Some(pos) = list.iter().position(|(existing, _)| *existing == id) {
            list.remove(pos);
            return true;
        }
    }
    false
}

/// Unregisters its handler on drop
pub struct Subscription {
    registry: Weak<RegistryInner>,
    id: HandlerId,
}

impl Subscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            remove_handler(&inner, self.id);
        }
    }
}
