//! Append-only message log.
//!
//! The log is the single source of truth for produced messages. Offsets are
//! assigned by the log itself: 0-based, strictly increasing, no gaps.
//!
//! Implementations:
//! - `MemoryLog`: in-process only, lost on restart
//! - `FileLog`: one append-only file in wire format, recovered on open
//!
//! Both serialize appends behind an exclusive lock and publish an entry only
//! after its bytes are fully stored, so readers never see a partial entry.
pub mod memory;
pub mod mmap;
pub mod recovery;
pub mod segment;

use crate::config::BrokerConfiguration;
use crate::error::LogError;
use crate::protocol::Message;
use std::sync::Arc;

pub use memory::MemoryLog;
pub use segment::{FileLog, FileLogOptions};

/// Offset-addressed, append-only message store.
pub trait MessageLog: Send + Sync {
    /// Append a message and return its offset.
    ///
    /// The entry is readable by any thread once this returns.
    fn append(&self, message: &Message) -> Result<u64, LogError>;

    /// Read the message stored at `offset`.
    ///
    /// # Errors
    /// - `OffsetOutOfRange` for negative offsets
    /// - `OffsetNotFound` for offsets never written
    fn read(&self, offset: i64) -> Result<Message, LogError>;

    /// Number of entries, which is also the next offset to be assigned.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validate a requested offset against the current entry count.
pub(crate) fn check_offset(offset: i64, len: u64) -> Result<usize, LogError> {
    if offset < 0 {
        return Err(LogError::OffsetOutOfRange(offset));
    }
    if offset as u64 >= len {
        return Err(LogError::OffsetNotFound(offset));
    }
    Ok(offset as usize)
}

/// Open the log selected by the configuration: file-backed when a log
/// directory is set, memory-only otherwise.
pub fn open_log(config: &BrokerConfiguration) -> Result<Arc<dyn MessageLog>, LogError> {
    match config.log_dir() {
        Some(dir) => {
            let options = FileLogOptions {
                sync_on_append: config.sync_on_append(),
            };
            Ok(Arc::new(FileLog::open(dir, options)?))
        }
        None => {
            tracing::info!("using in-memory log; produced messages are lost on restart");
            Ok(Arc::new(MemoryLog::new()))
        }
    }
}
