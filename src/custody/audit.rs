//! Append-only access log for secret operations.
//!
//! Every unlock/get/store/rotate/evict attempt is buffered and flushed to
//! a JSON-lines file in batches. Entries are never mutated; the file is
//! only ever appended to.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

use crate::custody::types::{AccessLogEntry, CustodyResult, SecretAction, SecretKind};

/// Buffered, batch-flushed writer for [`AccessLogEntry`] records.
pub struct AccessLog {
    path: PathBuf,
    buffer: Mutex<Vec<AccessLogEntry>>,
    batch_size: usize,
}

impl AccessLog {
    pub fn new(path: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            path: path.into(),
            buffer: Mutex::new(Vec::new()),
            batch_size: batch_size.max(1),
        }
    }

    /// Record one access attempt; flushes when the batch is full.
    pub fn record(&self, action: SecretAction, kind: Option<SecretKind>, success: bool) {
        let entry = AccessLogEntry {
            action,
            kind,
            success,
            timestamp: Utc::now(),
        };

        let should_flush = {
            let mut buffer = match self.buffer.lock() {
                Ok(b) => b,
                Err(poisoned) => poisoned.into_inner(),
            };
            buffer.push(entry);
            buffer.len() >= self.batch_size
        };

        if should_flush {
            if let Err(e) = self.flush() {
                tracing::error!(error = %e, path = %self.path.display(), "failed to flush access log");
            }
        }
    }

    /// Write every buffered entry to disk.
    pub fn flush(&self) -> CustodyResult<()> {
        let drained: Vec<AccessLogEntry> = {
            let mut buffer = match self.buffer.lock() {
                Ok(b) => b,
                Err(poisoned) => poisoned.into_inner(),
            };
            buffer.drain(..).collect()
        };

        if drained.is_empty() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for entry in &drained {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Entries currently waiting in the buffer.
    pub fn pending(&self) -> usize {
        match self.buffer.lock() {
            Ok(b) => b.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Drop for AccessLog {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
