//! Structured JSONL logging plus human-readable stderr output.
//!
//! This module provides dual-output logging:
//! - **JSONL to file** (`<log_dir>/scriptpad.jsonl`) - structured for tooling
//! - **Compact to stderr** - human-readable for developers
//!
//! # Usage
//!
//! ```rust,ignore
//! use scriptpad::logging;
//!
//! // Initialize logging - MUST keep guard alive for duration of program
//! let _guard = logging::init(&config.log_dir());
//!
//! tracing::info!(event_type = "run", script_id = %id, "Script started");
//! ```

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Maximum length of a protocol payload preview in logs
const MAX_PAYLOAD_PREVIEW: usize = 200;

const LOG_FILE_NAME: &str = "scriptpad.jsonl";

/// Guard that must be kept alive for the duration of the program.
/// Dropping this guard will flush and close the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the dual-output logging system.
///
/// Returns a guard that MUST be kept alive for the duration of the program.
/// If the log file cannot be opened, only the stderr layer is installed.
pub fn init(log_dir: &Path) -> LoggingGuard {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("[LOGGING] Failed to create log directory: {}", e);
    }

    let log_path = log_dir.join(LOG_FILE_NAME);

    // Environment filter - default to info, allow override via RUST_LOG
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (json_layer, file_guard) =
        match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => {
                let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file);
                let layer = fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_target(true)
                    .with_level(true)
                    .with_thread_names(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_span_events(FmtSpan::NONE);
                (Some(layer), Some(file_guard))
            }
            Err(e) => {
                eprintln!("[LOGGING] Failed to open log file {}: {}", log_path.display(), e);
                (None, None)
            }
        };

    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .compact();

    // try_init: tests and embedders may already have a subscriber installed
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init();

    if file_guard.is_some() {
        tracing::info!(
            event_type = "app_lifecycle",
            action = "started",
            log_path = %log_path.display(),
            "Logging initialized"
        );
    }

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Default log directory (`~/.scriptpad/logs`)
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".scriptpad").join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("scriptpad-logs"))
}

/// Truncated preview of a raw protocol line, plus its full length
pub fn payload_preview(raw: &str) -> (&str, usize) {
    let len = raw.len();
    if len > MAX_PAYLOAD_PREVIEW {
        let mut end = MAX_PAYLOAD_PREVIEW;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        (&raw[..end], len)
    } else {
        (raw, len)
    }
}

/// Log an outgoing protocol line without dumping large payloads
pub fn log_protocol_send(seq: u64, message_type: &str, json: &str) {
    let (preview, len) = payload_preview(json);
    tracing::debug!(
        event_type = "protocol_send",
        seq,
        message_type,
        bytes = len,
        preview,
        "IPC send"
    );
}

/// Log an incoming protocol line without dumping large payloads
pub fn log_protocol_recv(seq: u64, message_type: &str, bytes: usize) {
    tracing::debug!(
        event_type = "protocol_recv",
        seq,
        message_type,
        bytes,
        "IPC receive"
    );
}
