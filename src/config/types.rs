//! Configuration type definitions
//!
//! This module contains all the struct and enum definitions for configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

// ============================================
// COMPILER
// ============================================

/// External compiler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Compiler executable (looked up on PATH when not absolute)
    #[serde(default = "default_compiler_command")]
    pub command: String,
    /// Extra arguments placed before the generated ones
    #[serde(default = "default_compiler_args")]
    pub args: Vec<String>,
}

fn default_compiler_command() -> String {
    DEFAULT_COMPILER_COMMAND.to_string()
}
fn default_compiler_args() -> Vec<String> {
    DEFAULT_COMPILER_ARGS.iter().map(|s| s.to_string()).collect()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            command: default_compiler_command(),
            args: default_compiler_args(),
        }
    }
}

// ============================================
// HOST
// ============================================

/// Command that executes a compiled script assembly.
/// The assembly path is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default = "default_host_command")]
    pub command: String,
    #[serde(default = "default_host_args")]
    pub args: Vec<String>,
}

fn default_host_command() -> String {
    DEFAULT_HOST_COMMAND.to_string()
}
fn default_host_args() -> Vec<String> {
    DEFAULT_HOST_ARGS.iter().map(|s| s.to_string()).collect()
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            command: default_host_command(),
            args: default_host_args(),
        }
    }
}

// ============================================
// IPC
// ============================================

/// Settings for the line ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpcConfig {
    /// Bounded queue capacity between the reader and the workers (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of worker threads dispatching lines (default: 1).
    /// More than one gives up wire order of outputs.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// How long shutdown waits for workers (default: 2000)
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    DEFAULT_IPC_QUEUE_CAPACITY
}
fn default_worker_count() -> usize {
    DEFAULT_IPC_WORKER_COUNT
}
fn default_join_timeout_ms() -> u64 {
    DEFAULT_IPC_JOIN_TIMEOUT_MS
}

impl Default for IpcConfig {
    fn default() -> Self {
        IpcConfig {
            queue_capacity: DEFAULT_IPC_QUEUE_CAPACITY,
            worker_count: DEFAULT_IPC_WORKER_COUNT,
            join_timeout_ms: DEFAULT_IPC_JOIN_TIMEOUT_MS,
        }
    }
}

impl IpcConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// ============================================
// PROCESS LIMITS
// ============================================

/// Configuration for script process lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessLimits {
    /// Maximum runtime in seconds (None = no limit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime_seconds: Option<u64>,
    /// Wait after SIGTERM before SIGKILL in milliseconds (default: 1000)
    #[serde(default = "default_stop_grace_period_ms")]
    pub stop_grace_period_ms: u64,
}

fn default_stop_grace_period_ms() -> u64 {
    DEFAULT_STOP_GRACE_PERIOD_MS
}

impl Default for ProcessLimits {
    fn default() -> Self {
        ProcessLimits {
            max_runtime_seconds: None,
            stop_grace_period_ms: DEFAULT_STOP_GRACE_PERIOD_MS,
        }
    }
}

impl ProcessLimits {
    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_seconds.map(Duration::from_secs)
    }
}

// ============================================
// MAIN CONFIG
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub process_limits: ProcessLimits,
    /// Root of per-script run directories (default: ~/.scriptpad/runs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Local package store (default: ~/.scriptpad/packages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    /// Host-provided assemblies every script may reference
    #[serde(default)]
    pub builtin_assemblies: Vec<String>,
    #[serde(default = "default_framework")]
    pub default_framework: String,
}

fn default_framework() -> String {
    DEFAULT_FRAMEWORK.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            compiler: CompilerConfig::default(),
            host: HostConfig::default(),
            ipc: IpcConfig::default(),
            process_limits: ProcessLimits::default(),
            working_dir: None,
            packages_dir: None,
            log_dir: None,
            builtin_assemblies: Vec::new(),
            default_framework: default_framework(),
        }
    }
}

impl Config {
    pub fn working_dir(&self) -> PathBuf {
        expand(self.working_dir.as_deref().unwrap_or(DEFAULT_WORKING_DIR))
    }

    pub fn packages_dir(&self) -> PathBuf {
        expand(self.packages_dir.as_deref().unwrap_or(DEFAULT_PACKAGES_DIR))
    }

    pub fn log_dir(&self) -> PathBuf {
        expand(self.log_dir.as_deref().unwrap_or(DEFAULT_LOG_DIR))
    }

    pub fn builtin_assembly_paths(&self) -> Vec<PathBuf> {
        self.builtin_assemblies.iter().map(|p| expand(p)).collect()
    }
}
