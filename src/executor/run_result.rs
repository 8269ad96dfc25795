//! Run options and outcomes

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Open-ended per-run options keyed by type. Lets callers hand extra
/// settings to a run without widening `RunOptions`.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one of the same type
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

#[derive(Debug, Default)]
pub struct RunOptions {
    /// Run this instead of the script's saved code (e.g. a selection)
    pub specific_code: Option<String>,
    pub extensions: Extensions,
}

impl RunOptions {
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            specific_code: Some(code.into()),
            ..Self::default()
        }
    }
}

/// How a run ended.
///
/// `attempt_succeeded` says whether the script got as far as starting;
/// `completed_successfully` whether it then finished cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub attempt_succeeded: bool,
    pub completed_successfully: bool,
    pub cancelled: bool,
    pub duration_ms: Option<u64>,
}

impl RunResult {
    /// Never got to start: resolve, compile, deploy or spawn failed
    pub fn attempt_failure() -> Self {
        Self {
            attempt_succeeded: false,
            completed_successfully: false,
            cancelled: false,
            duration_ms: None,
        }
    }

    /// Started but exited non-zero or reported an error
    pub fn completion_failure(duration_ms: u64) -> Self {
        Self {
            attempt_succeeded: true,
            completed_successfully: false,
            cancelled: false,
            duration_ms: Some(duration_ms),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            attempt_succeeded: true,
            completed_successfully: false,
            cancelled: true,
            duration_ms: None,
        }
    }

    pub fn success(duration_ms: u64) -> Self {
        Self {
            attempt_succeeded: true,
            completed_successfully: true,
            cancelled: false,
            duration_ms: Some(duration_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Verbose(bool);

    #[test]
    fn test_extensions_are_keyed_by_type() {
        let mut extensions = Extensions::new();
        assert!(extensions.insert(Verbose(true)).is_none());
        assert!(extensions.insert(42u32).is_none());
        assert_eq!(extensions.get::<Verbose>(), Some(&Verbose(true)));
        assert_eq!(extensions.get::<u32>(), Some(&42));
        assert_eq!(extensions.get::<String>(), None);

        assert_eq!(extensions.insert(Verbose(false)), Some(Verbose(true)));
        assert_eq!(extensions.len(), 2);
        assert_eq!(extensions.remove::<u32>(), Some(42));
        assert_eq!(extensions.len(), 1);
    }

    #[test]
    fn test_result_constructors() {
        let failed = RunResult::attempt_failure();
        assert!(!failed.attempt_succeeded && !failed.completed_successfully);

        let crashed = RunResult::completion_failure(12);
        assert!(crashed.attempt_succeeded && !crashed.completed_successfully);
        assert_eq!(crashed.duration_ms, Some(12));

        assert!(RunResult::cancelled().cancelled);
        assert!(RunResult::success(5).completed_successfully);
        assert_eq!(
            RunOptions::with_code("1 + 1").specific_code.as_deref(),
            Some("1 + 1")
        );
    }
}
