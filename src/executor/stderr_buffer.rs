//! Bounded stderr capture for script processes
//!
//! Keeps the tail of a process's stderr so a failed run can report what
//! the host printed last, without letting a chatty process grow memory
//! without bound.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Default number of lines retained
pub const DEFAULT_MAX_LINES: usize = 500;

/// Default byte budget (4 KB)
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024;

/// Called for every stderr line as it arrives
pub type StderrLineHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Default)]
struct BufferState {
    lines: VecDeque<String>,
    bytes: usize,
}

/// Ring buffer of the most recent stderr lines, bounded by line count and
/// total bytes. Clones share the same storage.
#[derive(Debug, Clone)]
pub struct StderrBuffer {
    state: Arc<Mutex<BufferState>>,
    max_lines: usize,
    max_bytes: usize,
}

impl Default for StderrBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES, DEFAULT_MAX_BYTES)
    }
}

impl StderrBuffer {
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState::default())),
            max_lines: max_lines.max(1),
            max_bytes,
        }
    }

    /// Append a line, evicting the oldest lines to stay within both limits
    pub fn push_line(&self, line: String) {
        let mut state = self.state.lock();
        state.bytes += line.len();
        state.lines.push_back(line);

        while state.lines.len() > self.max_lines
            || (state.bytes > self.max_bytes && state.lines.len() > 1)
        {
            if let Some(evicted) = state.lines.pop_front() {
                state.bytes -= evicted.len();
            }
        }
    }

    pub fn contents(&self) -> String {
        let state = self.state.lock();
        state.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    pub fn last_lines(&self, n: usize) -> Vec<String> {
        let state = self.state.lock();
        let skip = state.lines.len().saturating_sub(n);
        state.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().lines.is_empty()
    }

    pub fn byte_count(&self) -> usize {
        self.state.lock().bytes
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.lines.clear();
        state.bytes = 0;
    }
}

/// A running stderr reader thread and the buffer it fills
pub struct StderrCapture {
    pub buffer: StderrBuffer,
    handle: Option<JoinHandle<()>>,
}

impl StderrCapture {
    /// Wait for the reader to reach end of stream. Returns false on timeout;
    /// the thread is then left to finish on its own.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let start = Instant::now();
        while !handle.is_finished() {
            if start.elapsed() >= timeout {
                debug!("Stderr reader still running, detaching");
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.join().is_err() {
            warn!("Stderr reader thread panicked");
        }
        true
    }

    pub fn contents_with_timeout(&mut self, timeout: Duration) -> String {
        self.wait_with_timeout(timeout);
        self.buffer.contents()
    }
}

/// Read `stderr` line by line on a background thread, teeing each line to
/// the buffer and to `on_line`.
pub fn spawn_stderr_reader<R: Read + Send + 'static>(
    stderr: R,
    label: String,
    on_line: Option<StderrLineHandler>,
) -> StderrCapture {
    let buffer = StderrBuffer::default();
    let sink = buffer.clone();

    let handle = std::thread::Builder::new()
        .name("script-stderr".into())
        .spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        debug!(target: "script_stderr", script = %label, "{}", line);
                        if let Some(handler) = &on_line {
                            handler(&line);
                        }
                        sink.push_line(line);
                    }
                    Err(e) => {
                        debug!(script = %label, error = %e, "Stderr read ended");
                        break;
                    }
                }
            }
        })
        .map_err(|e| warn!(error = %e, "Failed to spawn stderr reader"))
        .ok();

    StderrCapture { buffer, handle }
}
