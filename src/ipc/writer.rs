//! Synchronous framed writer
//!
//! One line per call, flushed immediately. There is no queue: callers
//! that cannot afford to block on the pipe should queue upstream.

use std::io::Write;

use parking_lot::Mutex;

use crate::error::{Result, ScriptpadError};
use crate::logging::log_protocol_send;
use crate::protocol::{Envelope, IpcMessage};

struct WriterState {
    writer: Box<dyn Write + Send>,
    next_seq: u64,
}

pub struct IpcWriter {
    state: Mutex<WriterState>,
}

impl IpcWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            state: Mutex::new(WriterState {
                writer: Box::new(writer),
                next_seq: 1,
            }),
        }
    }

    /// Frame and write `message`; returns the sequence number used
    pub fn send<M: IpcMessage>(&self, message: &M) -> Result<u64> {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        let line = Envelope::new(seq, message)?.to_line()?;

        log_protocol_send(seq, M::TYPE, &line);
        write_line(state.writer.as_mut(), &line)
            .map_err(|e| ScriptpadError::Ipc(format!("write failed: {}", e)))?;

        // Only advance once the line is out
        state.next_seq += 1;
        Ok(seq)
    }
}

fn write_line(writer: &mut dyn Write, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}
