//! Audit sinks: where records are written.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::record::AuditRecord;

/// Trait for audit log sinks.
///
/// Recording never fails from the caller's point of view; sinks log their
/// own I/O problems.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Appends each record as one JSON line to the thread's file under `dir`.
pub struct JsonlFileSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log file for a thread: `<sanitized>-<hash8>.jsonl`. Characters outside
    /// `[A-Za-z0-9_-]` become `_`; the hash of the raw id keeps ids that
    /// sanitize alike in separate files.
    pub fn path_for(&self, thread_id: &str) -> PathBuf {
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let digest = Sha256::digest(thread_id.as_bytes());
        let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{safe}-{suffix}.jsonl"))
    }

    fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&record.thread_id))?;
        file.write_all(line.as_bytes())
    }
}

impl AuditSink for JsonlFileSink {
    /// Writes happen inline so records stay in emission order. On a
    /// multi-threaded runtime the worker is handed off with `block_in_place`
    /// first so other tasks keep running during the file I/O.
    fn record(&self, record: &AuditRecord) {
        let on_worker = Handle::try_current().is_ok_and(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread);
        let result = if on_worker {
            tokio::task::block_in_place(|| self.append(record))
        } else {
            self.append(record)
        };
        if let Err(e) = result {
            tracing::warn!(
                dir = %self.dir.display(),
                thread_id = %record.thread_id,
                error = %e,
                "Failed to write audit record"
            );
        }
    }
}

/// Keeps records in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record kinds in order, e.g. `["REQUEST_START", "EVENT", ...]`.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.entry.kind())
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, record: &AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}
