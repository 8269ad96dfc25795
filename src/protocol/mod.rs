//! Protocol module - the framed line format spoken with script processes
//!
//! # Module Structure
//!
//! - `envelope` - The `{seq, type, data}` envelope
//! - `message` - Typed payloads and their type tags
//! - `io` - Line classification and line reading

mod envelope;
mod io;
mod message;

pub use envelope::Envelope;
pub use io::{parse_line, LineReader, ParseResult};
pub use message::{
    IpcMessage, OutputMessage, RequestInput, RunComplete, ScriptOutputKind, UserInput,
};
