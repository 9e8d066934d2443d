//! Bounded output collection and truncation
use crate::config::types::OutputIntegrity;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::io::{BufReader, Read};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Appended to stdout that exceeded its ceiling
pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

/// Smallest output ceiling that can hold a quarter-prefix plus the marker
pub fn min_output_limit() -> u64 {
    TRUNCATION_MARKER.len() as u64 * 2
}

/// Bytes kept from one stream
#[derive(Debug, Clone)]
pub struct CollectedStream {
    pub data: Vec<u8>,
    pub integrity: OutputIntegrity,
    /// Bytes the stream produced, including discarded ones
    pub total_bytes: u64,
}

impl CollectedStream {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            integrity: OutputIntegrity::Complete,
            total_bytes: 0,
        }
    }

    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Lossy text with an explicit marker when bytes were dropped
    pub fn lossy_marked(&self) -> String {
        let mut text = self.lossy();
        if self.integrity == OutputIntegrity::TruncatedByLimit {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Background reader for one child pipe
pub struct StreamCollector {
    rx: Receiver<CollectedStream>,
    handle: Option<JoinHandle<()>>,
}

impl StreamCollector {
    /// Start draining `stream`, keeping at most `limit` bytes. Reading
    /// continues past the limit so the writer never blocks on a full pipe.
    pub fn spawn<R: Read + Send + 'static>(stream: R, limit: usize) -> Self {
        let (tx, rx) = bounded(1);
        let handle = thread::spawn(move || collect_stream(stream, limit, tx));
        Self {
            rx,
            handle: Some(handle),
        }
    }

    /// Wait up to `drain_timeout` for the reader to hit EOF. A reader still
    /// blocked after that (a grandchild holding the pipe open) is detached.
    pub fn finish(mut self, drain_timeout: Duration) -> CollectedStream {
        match self.rx.recv_timeout(drain_timeout) {
            Ok(collected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                collected
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Output reader did not finish within {:?}", drain_timeout);
                CollectedStream {
                    integrity: OutputIntegrity::ReadError,
                    ..CollectedStream::empty()
                }
            }
            Err(RecvTimeoutError::Disconnected) => CollectedStream {
                integrity: OutputIntegrity::ReadError,
                ..CollectedStream::empty()
            },
        }
    }
}

fn collect_stream<R: Read>(stream: R, limit: usize, tx: Sender<CollectedStream>) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut integrity = OutputIntegrity::Complete;
    let mut total_bytes = 0u64;

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                total_bytes += n as u64;
                let room = limit.saturating_sub(buffer.len());
                if n > room {
                    buffer.extend_from_slice(&chunk[..room]);
                    integrity = OutputIntegrity::TruncatedByLimit;
                } else {
                    buffer.extend_from_slice(&chunk[..n]);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => {
                if integrity == OutputIntegrity::Complete {
                    integrity = OutputIntegrity::ReadError;
                }
                break;
            }
        }
    }

    let _ = tx.send(CollectedStream {
        data: buffer,
        integrity,
        total_bytes,
    });
}

/// Decode program stdout under its ceiling.
///
/// Output within the ceiling is returned as is. Anything larger keeps the
/// first `ceiling / 4` bytes and gains [`TRUNCATION_MARKER`], so the result
/// never exceeds `ceiling` bytes once `ceiling >= min_output_limit()`.
pub fn truncate_output(raw: &[u8], ceiling: u64) -> (String, bool) {
    let ceiling = usize::try_from(ceiling).unwrap_or(usize::MAX);
    if raw.len() <= ceiling {
        let text = String::from_utf8_lossy(raw);
        if text.len() <= ceiling {
            return (text.into_owned(), false);
        }
    }

    let keep = (ceiling / 4).min(raw.len());
    let mut text = String::from_utf8_lossy(&raw[..keep]).into_owned();
    // Replacement characters can widen invalid bytes
    while text.len() > keep {
        text.pop();
    }
    text.push_str(TRUNCATION_MARKER);
    (text, true)
}
