//! IPC module - framed message transport with a script process
//!
//! # Module Structure
//!
//! - `writer` - Synchronous, seq-numbered line writer
//! - `registry` - Typed handlers keyed by message type
//! - `listener` - Reader thread, bounded queue and worker pool

mod listener;
mod registry;
mod writer;

pub use listener::{IpcListener, ListenerOptions, RawLineHandler};
pub use registry::{Dispatch, HandlerId, HandlerRegistry, Subscription};
pub use writer::IpcWriter;
