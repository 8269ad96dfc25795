use thiserror::Error;
use tracing::{error, warn};

/// Error severity for reporting to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,     // informational
    Warning,  // recoverable, pipeline continues
    Error,    // operation failed
    Critical, // requires user action
}

/// Domain-specific errors for the execution core
#[derive(Error, Debug)]
pub enum ScriptpadError {
    /// Bad script kind, missing path, invalid namespaces. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Diagnostics were produced. Recovered by the permutation strategy.
    #[error("Compilation failed: {0}")]
    Compilation(String),

    #[error("Could not resolve dependency '{reference}': {message}")]
    DependencyResolution { reference: String, message: String },

    #[error("Generating {kind} for connection {connection_id} failed: {message}")]
    CacheGeneration {
        connection_id: String,
        kind: String,
        message: String,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScriptpadError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration(_) => ErrorSeverity::Critical,
            Self::Compilation(_) => ErrorSeverity::Error,
            Self::DependencyResolution { .. } => ErrorSeverity::Warning,
            Self::CacheGeneration { .. } => ErrorSeverity::Warning,
            Self::Process(_) => ErrorSeverity::Error,
            Self::Ipc(_) => ErrorSeverity::Warning,
            Self::Cancelled => ErrorSeverity::Info,
            Self::Io { .. } => ErrorSeverity::Error,
            Self::Json(_) => ErrorSeverity::Warning,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => format!("Configuration issue: {}", msg),
            Self::Compilation(msg) => format!("Compilation failed:\n{}", msg),
            Self::DependencyResolution { reference, .. } => {
                format!("Could not resolve reference {}", reference)
            }
            Self::CacheGeneration { kind, .. } => {
                format!("Could not generate {} for data connection", kind)
            }
            Self::Process(msg) => format!("Script process failed: {}", msg),
            Self::Ipc(msg) => format!("Invalid message from script process: {}", msg),
            Self::Cancelled => "Stopped".to_string(),
            Self::Io { path, .. } => format!("Could not access {}", path),
            Self::Json(e) => format!("Invalid JSON: {}", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScriptpadError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and the user doesn't need to know.
pub trait ResultExt<T> {
    /// Log error with caller location and return None.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_is_critical() {
        let err = ScriptpadError::Configuration("unknown script kind 'foo'".into());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.user_message().contains("unknown script kind"));
    }

    #[test]
    fn test_resolution_errors_are_warnings() {
        let err = ScriptpadError::DependencyResolution {
            reference: "Foo.dll".into(),
            message: "not found".into(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert_eq!(err.to_string(), "Could not resolve dependency 'Foo.dll': not found");
    }

    #[test]
    fn test_log_err_returns_none_on_error() {
        let result: std::result::Result<u32, &str> = Err("boom");
        assert_eq!(result.log_err(), None);
        let ok: std::result::Result<u32, &str> = Ok(3);
        assert_eq!(ok.warn_on_err(), Some(3));
    }
}
