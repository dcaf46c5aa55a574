use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::types::{Lsn, TxnId};

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Log record encoding error: {0}")]
    EncodingError(#[from] bincode::Error),
}

/// Result type for log manager operations
pub type Result<T> = std::result::Result<T, LogManagerError>;

/// Kinds of records the log accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordType {
    Begin,
    Commit,
    Abort,
}

/// A single write-ahead-log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
}

/// Write-ahead-log sink. Records are buffered in memory and pushed to the
/// log file on `flush`; the buffer pool flushes the log up to a page's LSN
/// before that page is written back, so the log never lags the data file.
pub struct LogManager {
    log_file: Mutex<File>,
    buffer: Mutex<Vec<u8>>,
    /// Next LSN to assign. LSN 0 is reserved for "no record".
    next_lsn: AtomicU64,
    /// Highest LSN whose record has reached the log file
    flushed_lsn: AtomicU64,
    /// Highest LSN sitting in the in-memory buffer
    buffered_lsn: AtomicU64,
}

impl LogManager {
    pub fn new(log_path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            log_file: Mutex::new(file),
            buffer: Mutex::new(Vec::new()),
            next_lsn: AtomicU64::new(1),
            flushed_lsn: AtomicU64::new(0),
            buffered_lsn: AtomicU64::new(0),
        })
    }

    /// Append a record to the in-memory buffer and return its LSN
    pub fn append_record(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
    ) -> Result<Lsn> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let record = LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            record_type,
        };

        let payload = bincode::serialize(&record)?;

        let mut buffer = self.buffer.lock();
        buffer.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&payload);
        self.buffered_lsn.store(lsn, Ordering::SeqCst);

        Ok(lsn)
    }

    /// Push the buffered records to the log file and sync it
    pub fn flush(&self) -> Result<Lsn> {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return Ok(self.flushed_lsn.load(Ordering::SeqCst));
        }

        let up_to = self.buffered_lsn.load(Ordering::SeqCst);
        {
            let mut file = self.log_file.lock();
            file.write_all(&buffer)?;
            file.sync_data()?;
        }
        buffer.clear();
        self.flushed_lsn.store(up_to, Ordering::SeqCst);

        Ok(up_to)
    }

    /// Make sure every record up to `lsn` is durable
    pub fn flush_to_lsn(&self, lsn: Lsn) -> Result<()> {
        if lsn > self.flushed_lsn.load(Ordering::SeqCst) {
            self.flush()?;
        }
        Ok(())
    }

    /// Highest LSN known to be on disk
    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn.load(Ordering::SeqCst)
    }

    /// LSN the next appended record will receive
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_lsns_are_sequential() {
        let file = NamedTempFile::new().unwrap();
        let log_manager = LogManager::new(file.path()).unwrap();

        let lsn1 = log_manager.append_record(1, 0, LogRecordType::Begin).unwrap();
        let lsn2 = log_manager.append_record(1, lsn1, LogRecordType::Commit).unwrap();
        assert_eq!(lsn2, lsn1 + 1);
    }

    #[test]
    fn test_flush_advances_flushed_lsn() {
        let file = NamedTempFile::new().unwrap();
        let log_manager = LogManager::new(file.path()).unwrap();
        assert_eq!(log_manager.flushed_lsn(), 0);

        let lsn = log_manager.append_record(7, 0, LogRecordType::Begin).unwrap();
        assert_eq!(log_manager.flushed_lsn(), 0);

        log_manager.flush().unwrap();
        assert_eq!(log_manager.flushed_lsn(), lsn);

        // an already durable LSN does not trigger another write
        log_manager.flush_to_lsn(lsn).unwrap();
        assert_eq!(log_manager.flushed_lsn(), lsn);
    }

    #[test]
    fn test_records_reach_the_file() {
        let file = NamedTempFile::new().unwrap();
        let log_manager = LogManager::new(file.path()).unwrap();

        log_manager.append_record(1, 0, LogRecordType::Begin).unwrap();
        log_manager.append_record(1, 1, LogRecordType::Abort).unwrap();
        log_manager.flush().unwrap();

        let size = std::fs::metadata(file.path()).unwrap().len();
        assert!(size > 0);
    }
}
