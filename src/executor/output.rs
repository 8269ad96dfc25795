//! What a running script produces and consumes
//!
//! Outputs and inputs are fanned out to any number of subscribers.
//! Subscribers are identified by `Arc` pointer, so the same `Arc` that was
//! added is what removes it.

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;

use crate::error::Result;
use crate::protocol::{OutputMessage, ScriptOutputKind};

/// One unit of script output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub kind: ScriptOutputKind,
    pub title: Option<String>,
    pub body: String,
}

impl ScriptOutput {
    pub fn new(kind: ScriptOutputKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: None,
            body: body.into(),
        }
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self::new(ScriptOutputKind::Error, body)
    }

    /// A stdout line that was not a protocol message
    pub fn raw(body: impl Into<String>) -> Self {
        Self::new(ScriptOutputKind::Raw, body)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == ScriptOutputKind::Error
    }
}

impl From<OutputMessage> for ScriptOutput {
    fn from(message: OutputMessage) -> Self {
        Self {
            kind: message.kind,
            title: message.title,
            body: message.body,
        }
    }
}

/// Receives script outputs. Errors are logged by the caller and never stop
/// the run.
pub trait OutputWriter: Send + Sync {
    fn write(&self, output: &ScriptOutput) -> Result<()>;
}

impl<F> OutputWriter for F
where
    F: Fn(&ScriptOutput) -> Result<()> + Send + Sync,
{
    fn write(&self, output: &ScriptOutput) -> Result<()> {
        self(output)
    }
}

/// Answers a script's request for a line of input. `None` means this
/// reader has nothing to offer.
pub trait InputReader: Send + Sync {
    fn read_line(&self) -> Option<String>;
}

impl<F> InputReader for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn read_line(&self) -> Option<String> {
        self()
    }
}

/// Ordered subscriber list with pointer identity
pub struct Subscribers<T: ?Sized> {
    list: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Subscribers<T> {
    /// Adding the same `Arc` twice is a no-op
    pub fn add(&self, subscriber: Arc<T>) {
        let mut list = self.list.write();
        if !list.iter().any(|existing| same(existing, &subscriber)) {
            list.push(subscriber);
        }
    }

    pub fn remove(&self, subscriber: &Arc<T>) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|existing| !same(existing, subscriber));
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Copy of the current list, so callbacks run without the lock held
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.list.read().clone()
    }
}

// Compare data pointers only; vtable pointers may differ across codegen units
fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl Subscribers<dyn OutputWriter> {
    pub fn write_all(&self, output: &ScriptOutput) {
        for writer in self.snapshot() {
            if let Err(e) = writer.write(output) {
                warn!(error = %e, kind = ?output.kind, "Output writer failed");
            }
        }
    }
}

impl Subscribers<dyn InputReader> {
    /// First reader with an answer wins
    pub fn read_line(&self) -> Option<String> {
        self.snapshot().iter().find_map(|reader| reader.read_line())
    }
}

static STACK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":line (\d+)").expect("Invalid regex"));

/// Shift ` :line N` markers in a stack trace so they count from the start
/// of the user's code. Lines before the user program are left alone.
pub fn correct_stack_trace_lines(text: &str, user_program_start_line: usize) -> String {
    if user_program_start_line <= 1 {
        return text.to_string();
    }
    STACK_LINE
        .replace_all(text, |caps: &regex::Captures| {
            let line: usize = caps[1].parse().unwrap_or(0);
            if line >= user_program_start_line {
                format!(":line {}", line - user_program_start_line + 1)
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptpadError;
    use parking_lot::Mutex;

    #[test]
    fn test_output_from_message() {
        let output = ScriptOutput::from(OutputMessage {
            kind: ScriptOutputKind::Result,
            title: Some("Sum".into()),
            body: "11".into(),
        });
        assert_eq!(output, ScriptOutput::new(ScriptOutputKind::Result, "11").with_title("Sum"));
        assert!(!output.is_error());
        assert!(ScriptOutput::error("x").is_error());
    }

    #[test]
    fn test_subscribers_identity_by_arc() {
        let subscribers: Subscribers<dyn OutputWriter> = Subscribers::default();
        let writer: Arc<dyn OutputWriter> = Arc::new(|_: &ScriptOutput| -> Result<()> { Ok(()) });
        let other: Arc<dyn OutputWriter> = Arc::new(|_: &ScriptOutput| -> Result<()> { Ok(()) });

        subscribers.add(writer.clone());
        subscribers.add(writer.clone());
        subscribers.add(other.clone());
        assert_eq!(subscribers.len(), 2);

        assert!(subscribers.remove(&writer));
        assert!(!subscribers.remove(&writer));
        assert_eq!(subscribers.len(), 1);
        assert!(subscribers.remove(&other));
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_failing_writer_does_not_block_others() {
        let subscribers: Subscribers<dyn OutputWriter> = Subscribers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        subscribers.add(Arc::new(|_: &ScriptOutput| -> Result<()> {
            Err(ScriptpadError::Ipc("closed".into()))
        }));
        subscribers.add(Arc::new(move |output: &ScriptOutput| -> Result<()> {
            sink.lock().push(output.body.clone());
            Ok(())
        }));

        subscribers.write_all(&ScriptOutput::raw("hello"));
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_first_input_reader_with_answer_wins() {
        let readers: Subscribers<dyn InputReader> = Subscribers::default();
        assert_eq!(readers.read_line(), None);

        readers.add(Arc::new(|| -> Option<String> { None }));
        readers.add(Arc::new(|| -> Option<String> { Some("second".into()) }));
        readers.add(Arc::new(|| -> Option<String> { Some("third".into()) }));
        assert_eq!(readers.read_line(), Some("second".into()));
    }

    #[test]
    fn test_stack_trace_lines_are_shifted() {
        let trace = "System.Exception: boom\n   at UserScript.RunAsync() in program.cs:line 42\n   at ScriptRuntime.Send() in program.cs:line 7";
        let corrected = correct_stack_trace_lines(trace, 40);
        assert!(corrected.contains("program.cs:line 3\n"));
        assert!(corrected.ends_with("program.cs:line 7"));
    }

    #[test]
    fn test_stack_trace_without_offset_is_unchanged() {
        let trace = "at X() in a.cs:line 5";
        assert_eq!(correct_stack_trace_lines(trace, 0), trace);
        assert_eq!(correct_stack_trace_lines(trace, 1), trace);
    }
}
