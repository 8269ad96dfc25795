//! Scriptpad - execution core of an interactive scripting workbench
//!
//! Turns user-typed C# snippets into running programs: code is wrapped
//! into a runnable program (trying a few shapes until one compiles),
//! dependencies and per-connection generated resources are resolved,
//! and the compiled assembly runs out of process, talking back over a
//! line-oriented JSON protocol on its stdio.

pub mod cli;
pub mod compilation;
pub mod config;
pub mod connections;
pub mod dependencies;
pub mod error;
pub mod executor;
pub mod ipc;
pub mod logging;
pub mod process_manager;
pub mod protocol;
pub mod scripts;
pub mod workbench;

pub use error::{Result, ScriptpadError};
pub use workbench::Workbench;
