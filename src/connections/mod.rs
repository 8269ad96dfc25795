//! Connections module - generated per-connection resources
//!
//! # Module Structure
//!
//! - `types` - DataConnection, ResourceKind, ConnectionResources
//! - `generation` - Shared blocking result of an in-flight generation
//! - `events` - Observer list for cache notifications
//! - `generator` - The generation boundary and its directory-backed implementation
//! - `cache` - The resource cache itself

mod cache;
mod events;
mod generation;
mod generator;
mod types;

pub use cache::{CacheKey, ResourceCache, ResourceCacheEntry};
pub use events::{ObserverId, ResourceEvent, ResourceValue};
pub use generation::Generation;
pub use generator::{ConnectionResourcesGenerator, DirectoryResourcesGenerator};
pub use types::{ConnectionResources, DataConnection, ResourceKind};
