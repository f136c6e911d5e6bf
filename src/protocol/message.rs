use crate::clock::monotonic_nanos;
use crate::error::FrameError;
use bytes::Bytes;

/// Size of the `total_length` prefix.
pub const LENGTH_FIELD_SIZE: usize = 4;
/// Size of the timestamp field.
pub const TIMESTAMP_FIELD_SIZE: usize = 8;
/// Size of the message type field.
pub const TYPE_FIELD_SIZE: usize = 1;
/// Bytes counted by `total_length` before the payload starts.
pub const HEADER_SIZE: usize = TIMESTAMP_FIELD_SIZE + TYPE_FIELD_SIZE;
/// Largest payload accepted on the wire or in the log: 1 MiB.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Message type codes.
///
/// ```text
/// 0x01 PRODUCE
/// 0x02 FETCH
/// 0x03 ACK
/// 0xFF ERROR
/// ```
///
/// Any other byte decodes as `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Produce,
    Fetch,
    Ack,
    Error,
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            MessageType::Produce => 0x01,
            MessageType::Fetch => 0x02,
            MessageType::Ack => 0x03,
            MessageType::Error => 0xFF,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => MessageType::Produce,
            0x02 => MessageType::Fetch,
            0x03 => MessageType::Ack,
            _ => MessageType::Error,
        }
    }
}

/// One protocol message.
///
/// Immutable once built: fields are private and the timestamp is taken at
/// construction. `payload.len() <= MAX_MESSAGE_SIZE` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    timestamp: i64,
    message_type: MessageType,
    payload: Bytes,
}

impl Message {
    /// Build a message with an explicit timestamp.
    ///
    /// # Errors
    /// - `Oversized` if the payload exceeds `MAX_MESSAGE_SIZE`
    pub fn new(
        timestamp: i64,
        message_type: MessageType,
        payload: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(FrameError::Oversized(payload.len(), MAX_MESSAGE_SIZE));
        }
        Ok(Self::new_unchecked(timestamp, message_type, payload))
    }

    /// Caller guarantees the size bound (decoder, log reads).
    pub(crate) fn new_unchecked(timestamp: i64, message_type: MessageType, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_MESSAGE_SIZE);
        Self {
            timestamp,
            message_type,
            payload,
        }
    }

    /// A PRODUCE request stamped now.
    pub fn produce(payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(monotonic_nanos(), MessageType::Produce, payload)
    }

    /// A FETCH request for `offset` (8-byte big-endian payload).
    pub fn fetch(offset: u64) -> Self {
        Self::new_unchecked(
            monotonic_nanos(),
            MessageType::Fetch,
            Bytes::copy_from_slice(&offset.to_be_bytes()),
        )
    }

    /// A FETCH response carrying previously produced bytes.
    pub(crate) fn fetched(payload: Bytes) -> Self {
        Self::new_unchecked(monotonic_nanos(), MessageType::Fetch, payload)
    }

    /// An empty ACK stamped now.
    pub fn ack() -> Self {
        Self::new_unchecked(monotonic_nanos(), MessageType::Ack, Bytes::new())
    }

    /// An ERROR carrying a UTF-8 description.
    pub fn error(description: impl AsRef<str>) -> Self {
        let text = description.as_ref();
        let mut end = text.len().min(MAX_MESSAGE_SIZE);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self::new_unchecked(
            monotonic_nanos(),
            MessageType::Error,
            Bytes::copy_from_slice(text[..end].as_bytes()),
        )
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Value of the `total_length` field for this message.
    pub fn total_length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Full encoded size including the length prefix.
    pub fn encoded_len(&self) -> usize {
        LENGTH_FIELD_SIZE + self.total_length()
    }

    /// Copy of this message whose payload owns its own allocation.
    ///
    /// Decoded payloads share the connection's read buffer; anything kept
    /// past the request must be detached or it pins the whole buffer.
    pub fn detached(&self) -> Message {
        Self::new_unchecked(
            self.timestamp,
            self.message_type,
            Bytes::copy_from_slice(&self.payload),
        )
    }

    /// Payload as text, replacing invalid UTF-8. Handy for ERROR messages.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
