use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::info;

use crate::entry::{AuditEntry, HmacKey};
use crate::error::AuditError;

/// Where signed audit lines go. Injected into every workflow; a failed
/// append must fail the operation that produced the entry.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Appends signed lines to a log file and mirrors each entry into
/// `tracing` for operators watching the process logs.
pub struct FileAuditLogger {
    path: PathBuf,
    key: HmacKey,
    // Serializes appends so concurrent decisions never interleave lines.
    lock: Mutex<()>,
}

impl FileAuditLogger {
    pub fn new(path: impl Into<PathBuf>, key: HmacKey) -> Self {
        Self {
            path: path.into(),
            key,
            lock: Mutex::new(()),
        }
    }
}

impl AuditSink for FileAuditLogger {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = entry.signed_line(&self.key)?;

        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        drop(_guard);

        info!(
            audit.event = %entry.event,
            audit.request_id = %entry.request_id,
            audit.profile = %entry.profile,
            audit.status = %entry.status,
            audit.actor = %entry.actor,
            "audit entry"
        );
        Ok(())
    }
}

/// Collects signed lines in memory. Test double and local-mode sink.
pub struct MemoryAuditLog {
    key: HmacKey,
    lines: Mutex<Vec<String>>,
}

impl MemoryAuditLog {
    pub fn new(key: HmacKey) -> Self {
        Self {
            key,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = entry.signed_line(&self.key)?;
        self.lines.lock().unwrap().push(line);
        Ok(())
    }
}
