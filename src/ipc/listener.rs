//! Backpressure-aware line listener
//!
//! One reader thread does blocking line reads and pushes each line into a
//! bounded queue with `send_blocking`: when the queue is full the reader
//! stalls, it never drops. A fixed pool of workers drains the queue and
//! dispatches. Lines that are not envelopes, or that no handler accepts,
//! go to the raw-line handler.
//!
//! With more than one worker, delivery order is not wire order. Use
//! `worker_count = 1` (or the envelope `seq`) when order matters.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{IpcConfig, DEFAULT_IPC_QUEUE_CAPACITY, DEFAULT_IPC_WORKER_COUNT};
use crate::logging::{log_protocol_recv, payload_preview};
use crate::protocol::{parse_line, LineReader, ParseResult};

use super::registry::{Dispatch, HandlerRegistry};

/// Receives lines that are not handled as typed messages
pub type RawLineHandler = Arc<dyn Fn(&str) + Send + Sync>;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOptions {
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub join_timeout: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self::from(&IpcConfig::default())
    }
}

impl From<&IpcConfig> for ListenerOptions {
    fn from(config: &IpcConfig) -> Self {
        Self {
            queue_capacity: if config.queue_capacity == 0 {
                DEFAULT_IPC_QUEUE_CAPACITY
            } else {
                config.queue_capacity
            },
            worker_count: if config.worker_count == 0 {
                DEFAULT_IPC_WORKER_COUNT
            } else {
                config.worker_count
            },
            join_timeout: config.join_timeout(),
        }
    }
}

#[derive(Debug, Default)]
struct ListenerStats {
    lines_enqueued: AtomicU64,
    lines_processed: AtomicU64,
    raw_lines: AtomicU64,
}

pub struct IpcListener {
    cancel: CancellationToken,
    receiver: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<ListenerStats>,
    join_timeout: Duration,
}

impl IpcListener {
    /// Start the reader thread and the worker pool
    pub fn listen<R: Read + Send + 'static>(
        reader: R,
        registry: HandlerRegistry,
        raw_handler: RawLineHandler,
        options: ListenerOptions,
    ) -> Self {
        let capacity = options.queue_capacity.max(1);
        let worker_count = options.worker_count.max(1);
        let (sender, receiver) = async_channel::bounded::<String>(capacity);
        let cancel = CancellationToken::new();
        let stats = Arc::new(ListenerStats::default());

        let reader = {
            let cancel = cancel.clone();
            let stats = stats.clone();
            std::thread::Builder::new()
                .name("ipc-reader".into())
                .spawn(move || read_loop(reader, sender, cancel, stats))
                .map_err(|e| error!(error = %e, "Failed to spawn IPC reader thread"))
                .ok()
        };

        let workers = (0..worker_count)
            .filter_map(|index| {
                let receiver = receiver.clone();
                let registry = registry.clone();
                let raw_handler = raw_handler.clone();
                let cancel = cancel.clone();
                let stats = stats.clone();
                std::thread::Builder::new()
                    .name(format!("ipc-worker-{}", index))
                    .spawn(move || worker_loop(receiver, registry, raw_handler, cancel, stats))
                    .map_err(|e| error!(error = %e, "Failed to spawn IPC worker thread"))
                    .ok()
            })
            .collect();

        debug!(capacity, worker_count, "IPC listener started");
        Self {
            cancel,
            receiver,
            reader,
            workers,
            stats,
            join_timeout: options.join_timeout,
        }
    }

    pub fn lines_enqueued(&self) -> u64 {
        self.stats.lines_enqueued.load(Ordering::SeqCst)
    }

    pub fn lines_processed(&self) -> u64 {
        self.stats.lines_processed.load(Ordering::SeqCst)
    }

    pub fn raw_lines(&self) -> u64 {
        self.stats.raw_lines.load(Ordering::SeqCst)
    }

    pub fn is_reader_finished(&self) -> bool {
        self.reader.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for end of stream and an empty queue. Returns false on timeout.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let done = self.is_reader_finished() && self.workers.iter().all(JoinHandle::is_finished);
            if done {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
    }

    /// Stop reading, close the queue and join the workers within the join
    /// timeout. Lines still queued are dropped. Returns false if a worker
    /// was still busy when the timeout ran out.
    ///
    /// A reader blocked in a read cannot be interrupted; it is detached and
    /// exits when the stream closes.
    pub fn shutdown(&mut self) -> bool {
        self.cancel.cancel();
        self.receiver.close();

        let deadline = Instant::now() + self.join_timeout;
        let mut all_joined = true;
        for handle in self.workers.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(JOIN_POLL_INTERVAL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("IPC worker thread panicked");
                }
            } else {
                all_joined = false;
            }
        }

        if let Some(reader) = self.reader.take() {
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                debug!("IPC reader still blocked in read, detaching");
            }
        }

        if !all_joined {
            warn!(timeout_ms = self.join_timeout.as_millis() as u64, "IPC workers did not stop in time");
        }
        info!(
            lines_enqueued = self.lines_enqueued(),
            lines_processed = self.lines_processed(),
            raw_lines = self.raw_lines(),
            "IPC listener stopped"
        );
        all_joined
    }
}

impl Drop for IpcListener {
    fn drop(&mut self) {
        if !self.workers.is_empty() || self.reader.is_some() {
            self.shutdown();
        }
    }
}

fn read_loop<R: Read>(
    reader: R,
    sender: Sender<String>,
    cancel: CancellationToken,
    stats: Arc<ListenerStats>,
) {
    let mut lines = LineReader::new(reader);
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match lines.next_line() {
            Ok(Some(line)) => {
                // Blocks while the queue is full
                if sender.send_blocking(line).is_err() {
                    debug!("IPC queue closed, reader stopping");
                    break;
                }
                stats.lines_enqueued.fetch_add(1, Ordering::SeqCst);
            }
            Ok(None) => {
                debug!("IPC stream reached end");
                break;
            }
            Err(e) => {
                warn!(error = %e, "IPC read failed");
                break;
            }
        }
    }
    // Workers drain what is left, then see the closed queue
    sender.close();
}

fn worker_loop(
    receiver: Receiver<String>,
    registry: HandlerRegistry,
    raw_handler: RawLineHandler,
    cancel: CancellationToken,
    stats: Arc<ListenerStats>,
) {
    while let Ok(line) = receiver.recv_blocking() {
        if cancel.is_cancelled() {
            break;
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            process_line(&line, &registry, &raw_handler, &stats)
        }));
        if result.is_err() {
            let (preview, len) = payload_preview(&line);
            error!(preview, bytes = len, "IPC line processing panicked");
        }
        stats.lines_processed.fetch_add(1, Ordering::SeqCst);
    }
}

fn process_line(
    line: &str,
    registry: &HandlerRegistry,
    raw_handler: &RawLineHandler,
    stats: &ListenerStats,
) {
    let (preview, len) = payload_preview(line);
    let route_raw = || {
        stats.raw_lines.fetch_add(1, Ordering::SeqCst);
        raw_handler(line);
    };

    match parse_line(line) {
        ParseResult::Ok(envelope) => {
            log_protocol_recv(envelope.seq, &envelope.message_type, len);
            match registry.dispatch(&envelope) {
                Dispatch::Handled { .. } => {}
                Dispatch::UnknownType => {
                    debug!(
                        seq = envelope.seq,
                        message_type = %envelope.message_type,
                        "No handler for message type"
                    );
                    route_raw();
                }
                Dispatch::InvalidPayload(error) => {
                    warn!(
                        seq = envelope.seq,
                        message_type = %envelope.message_type,
                        error = %error,
                        raw_preview = %preview,
                        raw_len = len,
                        "Message payload did not deserialize"
                    );
                    route_raw();
                }
            }
        }
        ParseResult::NotEnvelope { .. } | ParseResult::ParseError(_) => route_raw(),
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
