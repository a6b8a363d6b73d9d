//! Append-only NDJSON audit sink.
//!
//! Each appended record becomes one JSON line. The writer flushes after
//! every append so records survive a crash of the process; the core is
//! write-only here, so there is no reader half.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use valet_types::ValetError;

use crate::entry::AuditRecord;

/// Append-only audit log backed by an NDJSON file.
pub struct AuditLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl AuditLog {
    /// Open or create the log file for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ValetError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ValetError::Ledger(format!("failed to create log dir: {e}")))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ValetError::Ledger(format!("failed to open audit log: {e}")))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    /// Append one record as a JSON line and flush.
    pub fn append(&mut self, record: &AuditRecord) -> Result<(), ValetError> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| ValetError::Ledger(format!("failed to serialize audit record: {e}")))?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| ValetError::Ledger(format!("failed to write audit record: {e}")))
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
