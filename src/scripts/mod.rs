//! Scripts module - the user-authored unit of work
//!
//! # Module Structure
//!
//! - `types` - Script, ScriptConfig and the small enums they carry
//! - `loader` - Reading script files and their comment headers

mod loader;
mod types;

pub use types::{
    FrameworkVersion, OptimizationLevel, Script, ScriptConfig, ScriptKind, DEFAULT_NAMESPACES,
};

pub use loader::{load_script, script_from_source};

#[cfg(test)]
pub(crate) use loader::{parse_header_line, split_headers};

#[cfg(test)]
#[path = "../scripts_tests.rs"]
mod tests;
