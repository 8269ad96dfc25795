//! Per-connection resource cache
//!
//! Generated resources are cached per (connection id, framework) key. Each
//! key holds three independent slots (source code, assembly, required
//! references). A slot is generated at most once at a time: concurrent
//! callers share the in-flight `Generation`. A failed generation leaves the
//! slot empty so the next caller retries.
//!
//! Each resource kind has its own lock, so source code and references for
//! the same key can be generated concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dependencies::{AssemblyImage, Reference, SourceCodeCollection};
use crate::error::{Result, ScriptpadError};
use crate::scripts::FrameworkVersion;

use super::events::{ObserverId, Observers, ResourceEvent, ResourceValue};
use super::generation::Generation;
use super::generator::ConnectionResourcesGenerator;
use super::types::{ConnectionResources, DataConnection, ResourceKind};

pub type CacheKey = (Uuid, FrameworkVersion);

enum Slot<T> {
    Empty,
    InFlight(Generation<T>),
    Ready(Arc<T>),
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Empty
    }
}

/// The three resource slots of one cache key
#[derive(Default)]
pub struct ResourceCacheEntry {
    source_code: Mutex<Slot<SourceCodeCollection>>,
    assembly: Mutex<Slot<Option<AssemblyImage>>>,
    required_references: Mutex<Slot<Vec<Reference>>>,
}

struct Inner {
    entries: DashMap<CacheKey, Arc<ResourceCacheEntry>>,
    generator: Arc<dyn ConnectionResourcesGenerator>,
    observers: Observers,
    source_code_lock: Mutex<()>,
    assembly_lock: Mutex<()>,
    required_references_lock: Mutex<()>,
    shutdown: CancellationToken,
}

/// Cheap-to-clone handle; clones share one cache.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<Inner>,
}

/// Ties a resource type to its slot, its lock and how it is generated
trait CachedResource: Sized + Send + Sync + 'static {
    const KIND: ResourceKind;
    fn slot(entry: &ResourceCacheEntry) -> &Mutex<Slot<Self>>;
    fn kind_lock(cache: &ResourceCache) -> &Mutex<()>;
    fn generate(
        cache: &ResourceCache,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Result<Self>;
    fn into_value(value: Arc<Self>) -> ResourceValue;
}

impl CachedResource for SourceCodeCollection {
    const KIND: ResourceKind = ResourceKind::SourceCode;

    fn slot(entry: &ResourceCacheEntry) -> &Mutex<Slot<Self>> {
        &entry.source_code
    }

    fn kind_lock(cache: &ResourceCache) -> &Mutex<()> {
        &cache.inner.source_code_lock
    }

    fn generate(
        cache: &ResourceCache,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Result<Self> {
        cache.inner.generator.generate_source_code(connection, framework)
    }

    fn into_value(value: Arc<Self>) -> ResourceValue {
        ResourceValue::SourceCode(value)
    }
}

impl CachedResource for Option<AssemblyImage> {
    const KIND: ResourceKind = ResourceKind::Assembly;

    fn slot(entry: &ResourceCacheEntry) -> &Mutex<Slot<Self>> {
        &entry.assembly
    }

    fn kind_lock(cache: &ResourceCache) -> &Mutex<()> {
        &cache.inner.assembly_lock
    }

    /// The assembly is compiled from the generated source code
    fn generate(
        cache: &ResourceCache,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Result<Self> {
        let code = cache
            .get_source_code(connection, framework)
            .wait(&cache.inner.shutdown)?;
        cache
            .inner
            .generator
            .generate_assembly(connection, framework, &code)
    }

    fn into_value(value: Arc<Self>) -> ResourceValue {
        ResourceValue::Assembly(value)
    }
}

impl CachedResource for Vec<Reference> {
    const KIND: ResourceKind = ResourceKind::RequiredReferences;

    fn slot(entry: &ResourceCacheEntry) -> &Mutex<Slot<Self>> {
        &entry.required_references
    }

    fn kind_lock(cache: &ResourceCache) -> &Mutex<()> {
        &cache.inner.required_references_lock
    }

    fn generate(
        cache: &ResourceCache,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Result<Self> {
        cache
            .inner
            .generator
            .required_references(connection, framework)
    }

    fn into_value(value: Arc<Self>) -> ResourceValue {
        ResourceValue::RequiredReferences(value)
    }
}

impl ResourceCache {
    pub fn new(generator: Arc<dyn ConnectionResourcesGenerator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                generator,
                observers: Observers::default(),
                source_code_lock: Mutex::new(()),
                assembly_lock: Mutex::new(()),
                required_references_lock: Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn get_source_code(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Generation<SourceCodeCollection> {
        self.get_or_generate(connection, framework)
    }

    pub fn get_assembly(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Generation<Option<AssemblyImage>> {
        self.get_or_generate(connection, framework)
    }

    pub fn get_required_references(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Generation<Vec<Reference>> {
        self.get_or_generate(connection, framework)
    }

    /// Start all three generations, then wait for each of them
    pub fn get_resources(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
        cancel: &CancellationToken,
    ) -> Result<ConnectionResources> {
        let source_code = self.get_source_code(connection, framework);
        let required_references = self.get_required_references(connection, framework);
        let assembly = self.get_assembly(connection, framework);

        Ok(ConnectionResources {
            source_code: source_code.wait(cancel)?,
            required_references: required_references.wait(cancel)?,
            assembly: assembly.wait(cancel)?,
        })
    }

    /// Remove one (connection, framework) entry. In-flight generations for
    /// it keep running; their results are dropped.
    pub fn remove(&self, connection_id: Uuid, framework: FrameworkVersion) -> bool {
        let removed = self.inner.entries.remove(&(connection_id, framework)).is_some();
        if removed {
            debug!(%connection_id, %framework, "Evicted connection resources");
        }
        removed
    }

    /// Remove every framework entry of a connection
    pub fn remove_connection(&self, connection_id: Uuid) -> usize {
        let before = self.inner.entries.len();
        self.inner.entries.retain(|(id, _), _| *id != connection_id);
        let removed = before.saturating_sub(self.inner.entries.len());
        debug!(%connection_id, removed, "Evicted all connection resources");
        removed
    }

    pub fn has_cached_resources(&self, connection_id: Uuid) -> bool {
        self.inner
            .entries
            .iter()
            .any(|entry| entry.key().0 == connection_id)
    }

    pub fn cached_keys(&self) -> Vec<CacheKey> {
        self.inner.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ResourceEvent) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Release anyone blocked waiting inside a generation
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn existing<T: CachedResource>(entry: &ResourceCacheEntry, connection_id: Uuid) -> Option<Generation<T>> {
        match &*T::slot(entry).lock() {
            Slot::Ready(value) => Some(Generation::ready(connection_id, T::KIND, Arc::clone(value))),
            Slot::InFlight(generation) => Some(generation.clone()),
            Slot::Empty => None,
        }
    }

    fn get_or_generate<T: CachedResource>(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Generation<T> {
        let key = (connection.id, framework);

        // Fast path, no kind lock
        let cached = self.inner.entries.get(&key).map(|e| Arc::clone(e.value()));
        if let Some(entry) = cached {
            if let Some(generation) = Self::existing::<T>(&entry, connection.id) {
                return generation;
            }
        }

        let kind_guard = T::kind_lock(self).lock();

        let entry = Arc::clone(self.inner.entries.entry(key).or_default().value());
        if let Some(generation) = Self::existing::<T>(&entry, connection.id) {
            return generation;
        }

        let generation = Generation::pending(connection.id, T::KIND);
        *T::slot(&entry).lock() = Slot::InFlight(generation.clone());
        // Observers may call back into the cache; the slot already shows InFlight
        drop(kind_guard);

        self.inner.observers.publish(&ResourceEvent::Generating {
            connection_id: connection.id,
            framework,
            kind: T::KIND,
        });
        debug!(connection_id = %connection.id, %framework, kind = %T::KIND, "Generating connection resource");

        let cache = self.clone();
        let connection = connection.clone();
        let in_flight = generation.clone();
        std::thread::spawn(move || {
            cache.run_generation(&entry, &connection, framework, &in_flight);
        });

        generation
    }

    fn run_generation<T: CachedResource>(
        &self,
        entry: &ResourceCacheEntry,
        connection: &DataConnection,
        framework: FrameworkVersion,
        generation: &Generation<T>,
    ) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            T::generate(self, connection, framework)
        }))
        .unwrap_or_else(|_| {
            Err(ScriptpadError::CacheGeneration {
                connection_id: connection.id.to_string(),
                kind: T::KIND.to_string(),
                message: "generator panicked".to_string(),
            })
        });

        // Slot first, then observers, then waiters
        let mut slot = T::slot(entry).lock();
        let still_ours = matches!(&*slot, Slot::InFlight(g) if g.same_as(generation));

        match result {
            Ok(value) => {
                let value = Arc::new(value);
                if still_ours {
                    *slot = Slot::Ready(Arc::clone(&value));
                }
                drop(slot);

                info!(connection_id = %connection.id, %framework, kind = %T::KIND, "Connection resource generated");
                self.inner.observers.publish(&ResourceEvent::Updated {
                    connection_id: connection.id,
                    framework,
                    value: T::into_value(Arc::clone(&value)),
                });
                generation.complete(Ok(value));
            }
            Err(e) => {
                if still_ours {
                    *slot = Slot::Empty;
                }
                drop(slot);
                let message = e.to_string();

                warn!(connection_id = %connection.id, %framework, kind = %T::KIND, error = %message, "Connection resource generation failed");
                self.inner.observers.publish(&ResourceEvent::GenerationFailed {
                    connection_id: connection.id,
                    framework,
                    kind: T::KIND,
                    error: message.clone(),
                });
                generation.complete(Err(message));
            }
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
