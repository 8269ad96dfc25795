//! Executor module - running compiled scripts
//!
//! # Module Structure
//!
//! - `process` - Host spawning and process group teardown
//! - `stderr_buffer` - Bounded stderr capture
//! - `output` - Script outputs, input/output subscribers, stack trace fixups
//! - `deploy` - Per-run deployment directories
//! - `run_result` - Run options and outcomes
//! - `script_runner` - The runner state machine tying it all together

mod deploy;
mod output;
mod process;
mod run_result;
mod script_runner;
mod stderr_buffer;

#[cfg(unix)]
pub(crate) use process::unix_process;

pub use deploy::RunDirectory;
pub use output::{
    correct_stack_trace_lines, InputReader, OutputWriter, ScriptOutput, Subscribers,
};
pub use process::{spawn_host, ProcessHandle, SpawnedHost};
pub use run_result::{Extensions, RunOptions, RunResult};
pub use script_runner::{RunnerSettings, RunnerState, ScriptRunner};
pub use stderr_buffer::{
    spawn_stderr_reader, StderrBuffer, StderrCapture, StderrLineHandler, DEFAULT_MAX_BYTES,
    DEFAULT_MAX_LINES,
};
