//! Default configuration values
//!
//! All constants used throughout the config module are defined here.

/// Default external compiler command and arguments
pub const DEFAULT_COMPILER_COMMAND: &str = "csc";
pub const DEFAULT_COMPILER_ARGS: &[&str] = &["-nologo", "-nullable:enable"];

/// Default command used to run a compiled assembly (assembly path is appended)
pub const DEFAULT_HOST_COMMAND: &str = "dotnet";
pub const DEFAULT_HOST_ARGS: &[&str] = &["exec"];

/// Default IPC ingestion settings
pub const DEFAULT_IPC_QUEUE_CAPACITY: usize = 1024;
/// One worker keeps script output in wire order
pub const DEFAULT_IPC_WORKER_COUNT: usize = 1;
pub const DEFAULT_IPC_JOIN_TIMEOUT_MS: u64 = 2000;

/// Grace period between SIGTERM and SIGKILL when stopping a script
pub const DEFAULT_STOP_GRACE_PERIOD_MS: u64 = 1000;

/// Default target framework for scripts that don't specify one
pub const DEFAULT_FRAMEWORK: &str = "net8.0";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "~/.scriptpad/config.json";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "SCRIPTPAD_CONFIG";

/// Default data directories
pub const DEFAULT_WORKING_DIR: &str = "~/.scriptpad/runs";
pub const DEFAULT_PACKAGES_DIR: &str = "~/.scriptpad/packages";
pub const DEFAULT_LOG_DIR: &str = "~/.scriptpad/logs";
