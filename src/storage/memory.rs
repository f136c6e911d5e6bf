use crate::error::LogError;
use crate::protocol::Message;
use crate::storage::{check_offset, MessageLog};
use std::sync::RwLock;

/// Memory-only log.
///
/// Entries live in a `Vec` behind an `RwLock`: appends take the write lock
/// (offset assignment and push happen together), reads share the read lock.
/// Stored payloads are detached copies, so a retained entry never keeps a
/// connection's read buffer alive. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: RwLock<Vec<Message>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageLog for MemoryLog {
    fn append(&self, message: &Message) -> Result<u64, LogError> {
        let mut entries = self.entries.write().map_err(|_| LogError::LockPoisoned)?;
        let offset = entries.len() as u64;
        entries.push(message.detached());
        Ok(offset)
    }

    fn read(&self, offset: i64) -> Result<Message, LogError> {
        let entries = self.entries.read().map_err(|_| LogError::LockPoisoned)?;
        let idx = check_offset(offset, entries.len() as u64)?;
        Ok(entries[idx].clone())
    }

    fn len(&self) -> u64 {
        self.entries.read().map(|e| e.len() as u64).unwrap_or(0)
    }
}
