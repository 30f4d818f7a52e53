//! Thread-safe capture of process output
//!
//! [`CapturedOutput`] is the buffer both output pumps append to while test
//! code reads and asserts on it. Every append is atomic with respect to
//! readers: a snapshot never contains half a chunk.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{trace, warn};

/// External writer that receives a copy of every captured chunk
///
/// Writes are best effort: failures are logged and otherwise ignored.
pub type OutputSink = Arc<Mutex<dyn Write + Send>>;

/// Cloneable in-memory writer, handy as a sink in tests
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Buffer {
    text: String,
    lines: Vec<String>,
}

/// Append-only log of process output
pub struct CapturedOutput {
    buffer: Mutex<Buffer>,
    sink: Option<OutputSink>,
    appended: Notify,
}

impl CapturedOutput {
    /// Create an empty capture, optionally mirroring every chunk to `sink`
    pub fn new(sink: Option<OutputSink>) -> Self {
        Self {
            buffer: Mutex::new(Buffer::default()),
            sink,
            appended: Notify::new(),
        }
    }

    /// Append a chunk to the full text and as one element of [`lines`](Self::lines)
    ///
    /// Empty chunks are ignored.
    pub fn append(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        {
            let mut buffer = self.buffer.lock();
            buffer.text.push_str(chunk);
            buffer.lines.push(chunk.to_string());
        }
        self.appended.notify_waiters();
        trace!(bytes = chunk.len(), "Captured output chunk");

        // Outside the buffer lock: a stalled sink must not hold up readers.
        if let Some(sink) = &self.sink {
            write_sink(&mut *sink.lock(), chunk);
        }
    }

    /// Write a diagnostic note to the sink without capturing it
    pub fn annotate(&self, note: &str) {
        if let Some(sink) = &self.sink {
            write_sink(&mut *sink.lock(), note);
        }
    }

    /// Full accumulated text since creation or the last reset
    pub fn snapshot(&self) -> String {
        self.buffer.lock().text.clone()
    }

    /// Chunks in append order (a copy)
    pub fn lines(&self) -> Vec<String> {
        self.buffer.lock().lines.clone()
    }

    /// Whether `needle` occurs in the accumulated text
    pub fn contains(&self, needle: &str) -> bool {
        self.buffer.lock().text.contains(needle)
    }

    /// Wait until `needle` appears or `timeout` elapses
    ///
    /// Wakes on every append rather than polling. Returns `true` as soon as
    /// the text contains `needle`, `false` if the deadline passes first.
    pub async fn wait_for(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let appended = self.appended.notified();
            tokio::pin!(appended);
            // Register before checking so an append between the check and the
            // await still wakes us.
            appended.as_mut().enable();

            if self.contains(needle) {
                return true;
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return self.contains(needle);
            }
        }
    }

    /// Clear the captured text and chunks; the sink is untouched
    pub fn reset(&self) {
        let mut buffer = self.buffer.lock();
        buffer.text.clear();
        buffer.lines.clear();
    }
}

fn write_sink(sink: &mut (dyn Write + Send), chunk: &str) {
    if let Err(e) = sink.write_all(chunk.as_bytes()).and_then(|_| sink.flush()) {
        warn!(error = %e, "Failed to write to output sink");
    }
}

impl Default for CapturedOutput {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for CapturedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.buffer.lock();
        f.debug_struct("CapturedOutput")
            .field("bytes", &buffer.text.len())
            .field("chunks", &buffer.lines.len())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
