//! Configuration module - execution core settings
//!
//! This module provides functionality for:
//! - Loading configuration from ~/.scriptpad/config.json
//! - Default values for all settings
//! - Type definitions for config structures
//!
//! # Module Structure
//!
//! - `defaults` - All default constant values
//! - `types` - Configuration struct definitions (Config, IpcConfig, etc.)
//! - `loader` - File system loading and parsing

mod defaults;
mod loader;
mod types;

pub use defaults::{DEFAULT_FRAMEWORK, DEFAULT_IPC_QUEUE_CAPACITY, DEFAULT_IPC_WORKER_COUNT};

pub use types::{CompilerConfig, Config, HostConfig, IpcConfig, ProcessLimits};

pub use loader::{config_path, load_config, load_config_from};

#[cfg(test)]
pub use defaults::{DEFAULT_IPC_JOIN_TIMEOUT_MS, DEFAULT_STOP_GRACE_PERIOD_MS};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
