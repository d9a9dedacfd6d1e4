//! Per-run execution state: id, output streams, timings, outcome.

use crate::error::Error;
use crate::random_id;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum bytes of stdout/stderr kept in memory per execution. Older bytes
/// are discarded once the cap is reached.
pub const MAX_STREAM_SIZE: usize = 10 * 1024 * 1024;

/// Fixed-capacity byte sink that keeps only the most recent bytes written.
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    data: VecDeque<u8>,
    total_written: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            data: VecDeque::new(),
            total_written: 0,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.total_written += bytes.len() as u64;
        if bytes.len() >= self.capacity {
            self.data.clear();
            self.data.extend(&bytes[bytes.len() - self.capacity..]);
            return;
        }

        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.data.drain(..overflow);
        }
        self.data.extend(bytes);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total bytes ever written, including bytes already discarded.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }
}

#[derive(Debug, Default)]
struct Outcome {
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<Error>,
    stopped: bool,
}

/// A single invocation of a job.
///
/// Created when a cron tick or a container event fires, mutated only by its
/// owning middleware chain, and discarded after the chain returns.
#[derive(Debug)]
pub struct Execution {
    pub id: String,
    pub date: DateTime<Utc>,
    stdout: Mutex<RingBuffer>,
    stderr: Mutex<RingBuffer>,
    outcome: Mutex<Outcome>,
}

impl Execution {
    pub fn new() -> Self {
        Self {
            id: random_id(),
            date: Utc::now(),
            stdout: Mutex::new(RingBuffer::new(MAX_STREAM_SIZE)),
            stderr: Mutex::new(RingBuffer::new(MAX_STREAM_SIZE)),
            outcome: Mutex::new(Outcome::default()),
        }
    }

    /// Stamp the start timestamp. Called once by the middleware chain on
    /// first entry.
    pub fn start(&self) {
        let mut outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        outcome.started_at = Some(Utc::now());
    }

    /// Stamp the end timestamp and record the outcome. Idempotent: only the
    /// first call takes effect. Returns whether this call sealed the
    /// execution.
    pub fn stop(&self, error: Option<Error>) -> bool {
        let mut outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        if outcome.stopped {
            return false;
        }
        outcome.stopped = true;
        outcome.ended_at = Some(Utc::now());
        outcome.error = error;
        true
    }

    pub fn has_error(&self) -> bool {
        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        outcome.error.is_some()
    }

    /// True when the execution carries an error other than the skip sentinel.
    pub fn is_failed(&self) -> bool {
        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        matches!(&outcome.error, Some(err) if !err.is_skipped())
    }

    /// True when the execution was gated by the overlap middleware.
    pub fn is_skipped(&self) -> bool {
        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        matches!(&outcome.error, Some(err) if err.is_skipped())
    }

    pub fn is_running(&self) -> bool {
        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        outcome.started_at.is_some() && !outcome.stopped
    }

    pub fn error_message(&self) -> Option<String> {
        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        outcome.error.as_ref().map(|e| e.to_string())
    }

    /// Elapsed time between start and stop, or start and now while running.
    pub fn duration(&self) -> chrono::Duration {
        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        let Some(start) = outcome.started_at else {
            return chrono::Duration::zero();
        };
        outcome.ended_at.unwrap_or_else(Utc::now) - start
    }

    pub fn write_stdout(&self, bytes: &[u8]) {
        let mut buf = self.stdout.lock().unwrap_or_else(|e| e.into_inner());
        buf.write(bytes);
    }

    pub fn write_stderr(&self, bytes: &[u8]) {
        let mut buf = self.stderr.lock().unwrap_or_else(|e| e.into_inner());
        buf.write(bytes);
    }

    pub fn stdout(&self) -> Vec<u8> {
        let buf = self.stdout.lock().unwrap_or_else(|e| e.into_inner());
        buf.to_vec()
    }

    pub fn stderr(&self) -> Vec<u8> {
        let buf = self.stderr.lock().unwrap_or_else(|e| e.into_inner());
        buf.to_vec()
    }
}

impl Default for Execution {
    fn default() -> Self {
        Self::new()
    }
}
