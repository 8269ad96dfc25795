//! A shared, blocking one-shot result for an in-flight resource generation.
//!
//! All callers that ask for the same (key, kind) while it is being
//! generated receive clones of the same `Generation` and observe the same
//! outcome.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, ScriptpadError};

use super::types::ResourceKind;

/// How often a waiter re-checks its cancellation token
const WAIT_POLL: Duration = Duration::from_millis(50);

enum Outcome<T> {
    Pending,
    Done(Arc<T>),
    Failed(String),
}

struct Shared<T> {
    connection_id: Uuid,
    kind: ResourceKind,
    outcome: Mutex<Outcome<T>>,
    condvar: Condvar,
}

pub struct Generation<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Generation<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Generation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("connection_id", &self.shared.connection_id)
            .field("kind", &self.shared.kind)
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl<T> Generation<T> {
    pub(crate) fn pending(connection_id: Uuid, kind: ResourceKind) -> Self {
        Self {
            shared: Arc::new(Shared {
                connection_id,
                kind,
                outcome: Mutex::new(Outcome::Pending),
                condvar: Condvar::new(),
            }),
        }
    }

    pub(crate) fn ready(connection_id: Uuid, kind: ResourceKind, value: Arc<T>) -> Self {
        let generation = Self::pending(connection_id, kind);
        *generation.shared.outcome.lock() = Outcome::Done(value);
        generation
    }

    /// Store the outcome and wake every waiter. Later calls are ignored.
    pub(crate) fn complete(&self, result: std::result::Result<Arc<T>, String>) {
        let mut outcome = self.shared.outcome.lock();
        if !matches!(*outcome, Outcome::Pending) {
            return;
        }
        *outcome = match result {
            Ok(value) => Outcome::Done(value),
            Err(message) => Outcome::Failed(message),
        };
        drop(outcome);
        self.shared.condvar.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        !matches!(*self.shared.outcome.lock(), Outcome::Pending)
    }

    pub(crate) fn same_as(&self, other: &Generation<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Block until the generation finishes or `cancel` fires.
    pub fn wait(&self, cancel: &CancellationToken) -> Result<Arc<T>> {
        let mut outcome = self.shared.outcome.lock();
        loop {
            match &*outcome {
                Outcome::Done(value) => return Ok(Arc::clone(value)),
                Outcome::Failed(message) => {
                    return Err(ScriptpadError::CacheGeneration {
                        connection_id: self.shared.connection_id.to_string(),
                        kind: self.shared.kind.to_string(),
                        message: message.clone(),
                    })
                }
                Outcome::Pending => {}
            }
            if cancel.is_cancelled() {
                return Err(ScriptpadError::Cancelled);
            }
            self.shared.condvar.wait_for(&mut outcome, WAIT_POLL);
        }
    }
}
