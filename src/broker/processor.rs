use crate::protocol::{Message, MessageType};
use crate::storage::MessageLog;
use std::sync::Arc;
use tracing::{debug, warn};

/// Size of a FETCH request payload: one big-endian u64 offset.
const FETCH_REQUEST_SIZE: usize = 8;

/// Maps one request to one response.
///
/// `handle` never fails: storage errors and malformed requests come back as
/// ERROR messages, so every request gets exactly one response.
///
/// | request  | outcome                                   |
/// |----------|-------------------------------------------|
/// | PRODUCE  | append → ACK, or ERROR with the failure   |
/// | FETCH    | read → FETCH with stored payload, or ERROR|
/// | ACK/ERROR| ACK (no-op acknowledgment)                |
pub struct MessageProcessor {
    log: Arc<dyn MessageLog>,
}

impl MessageProcessor {
    pub fn new(log: Arc<dyn MessageLog>) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &Arc<dyn MessageLog> {
        &self.log
    }

    pub fn handle(&self, request: Message) -> Message {
        match request.message_type() {
            MessageType::Produce => self.handle_produce(&request),
            MessageType::Fetch => self.handle_fetch(&request),
            // Inbound ACK/ERROR carry no work; acknowledge them.
            MessageType::Ack | MessageType::Error => Message::ack(),
        }
    }

    fn handle_produce(&self, request: &Message) -> Message {
        match self.log.append(request) {
            Ok(offset) => {
                debug!(offset, bytes = request.payload().len(), "appended");
                Message::ack()
            }
            Err(e) => {
                warn!(error = %e, "append failed");
                Message::error(format!("produce failed: {}", e))
            }
        }
    }

    fn handle_fetch(&self, request: &Message) -> Message {
        let payload = request.payload();
        if payload.len() != FETCH_REQUEST_SIZE {
            return Message::error(format!(
                "invalid fetch request: expected {}-byte offset, got {} bytes",
                FETCH_REQUEST_SIZE,
                payload.len()
            ));
        }

        let mut raw = [0u8; FETCH_REQUEST_SIZE];
        raw.copy_from_slice(payload);
        // Offsets at or above 2^63 wrap negative and read as out of range.
        let offset = u64::from_be_bytes(raw) as i64;

        match self.log.read(offset) {
            Ok(stored) => Message::fetched(stored.payload().clone()),
            Err(e) => Message::error(format!("fetch failed: {}", e)),
        }
    }
}
