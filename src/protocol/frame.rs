use crate::error::FrameError;
use crate::protocol::message::{
    Message, MessageType, HEADER_SIZE, LENGTH_FIELD_SIZE, MAX_MESSAGE_SIZE,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame format (all integers big-endian):
///
/// ```text
/// +----------------+-------------+---------+-----------------+
/// | total_length   | timestamp   | type    | payload         |
/// | u32, 4 bytes   | i64, 8 bytes| u8      | N bytes         |
/// +----------------+-------------+---------+-----------------+
/// total_length = 8 + 1 + N   (excludes its own 4 bytes)
/// ```
///
/// The same layout is used on disk by the file-backed log.
const PAYLOAD_START: usize = LENGTH_FIELD_SIZE + HEADER_SIZE;

/// Outcome of a successful decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// One complete frame was found at the front of the buffer.
    Frame { message: Message, consumed: usize },
    /// More bytes are needed. Nothing was consumed.
    Incomplete,
}

/// Inspect the length prefix and return the full frame length (prefix
/// included) once it is known.
///
/// The size check runs as soon as the prefix is readable, so an oversized
/// frame is rejected before any of its body is buffered.
fn frame_len(buf: &[u8]) -> Result<Option<usize>, FrameError> {
    if buf.len() < LENGTH_FIELD_SIZE {
        return Ok(None);
    }

    let total_length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let total = total_length as usize;

    if total < HEADER_SIZE {
        return Err(FrameError::Malformed(total_length));
    }

    let payload_len = total - HEADER_SIZE;
    if payload_len > MAX_MESSAGE_SIZE {
        return Err(FrameError::Oversized(payload_len, MAX_MESSAGE_SIZE));
    }

    Ok(Some(LENGTH_FIELD_SIZE + total))
}

fn read_header(buf: &[u8]) -> (i64, MessageType) {
    let timestamp = i64::from_be_bytes([
        buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
    ]);
    (timestamp, MessageType::from_code(buf[12]))
}

/// Decode the leading frame of `buf`.
///
/// Consumes at most one frame. Callers holding several pipelined frames call
/// this in a loop, advancing by `consumed` each time.
///
/// # Errors
/// - `Oversized` if the declared payload exceeds `MAX_MESSAGE_SIZE`
/// - `Malformed` if `total_length` is shorter than the header
pub fn decode(buf: &[u8]) -> Result<Decoded, FrameError> {
    let len = match frame_len(buf)? {
        Some(len) if buf.len() >= len => len,
        _ => return Ok(Decoded::Incomplete),
    };

    let (timestamp, message_type) = read_header(buf);
    let payload = Bytes::copy_from_slice(&buf[PAYLOAD_START..len]);

    Ok(Decoded::Frame {
        message: Message::new_unchecked(timestamp, message_type, payload),
        consumed: len,
    })
}

/// Encode a message into a fresh buffer.
pub fn encode(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.encoded_len());
    encode_into(message, &mut buf);
    buf.freeze()
}

/// Append the encoded message to `buf`.
pub fn encode_into(message: &Message, buf: &mut BytesMut) {
    buf.reserve(message.encoded_len());
    buf.put_u32(message.total_length() as u32);
    buf.put_i64(message.timestamp());
    buf.put_u8(message.message_type().code());
    buf.put_slice(message.payload());
}

/// Per-connection decode buffer.
///
/// Bytes are appended as they arrive from the socket; complete frames are
/// split off the front without copying the payload. A partial frame stays
/// buffered until the rest shows up, or is dropped with the decoder when the
/// connection closes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append raw bytes read from the wire.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Direct access for `read_buf`-style socket reads.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Pop the next complete message, if any.
    ///
    /// After an error the buffer contents are unspecified; the connection is
    /// expected to close.
    pub fn next_message(&mut self) -> Result<Option<Message>, FrameError> {
        let len = match frame_len(&self.buf)? {
            Some(len) if self.buf.len() >= len => len,
            _ => return Ok(None),
        };

        let (timestamp, message_type) = read_header(&self.buf);
        let mut frame = self.buf.split_to(len);
        frame.advance(PAYLOAD_START);

        Ok(Some(Message::new_unchecked(
            timestamp,
            message_type,
            frame.freeze(),
        )))
    }

    /// Bytes held that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

fn invalid_data(e: FrameError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Read one complete message from a stream.
///
/// Returns `Ok(None)` on a clean EOF before the length prefix.
///
/// # Errors
/// - `InvalidData` for oversized or malformed frames
/// - `UnexpectedEof` if the stream ends mid-frame
pub async fn read_message<R>(stream: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_FIELD_SIZE];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = frame_len(&len_buf)
        .map_err(invalid_data)?
        .unwrap_or(LENGTH_FIELD_SIZE);

    let mut frame = BytesMut::with_capacity(len);
    frame.extend_from_slice(&len_buf);
    frame.resize(len, 0);
    stream.read_exact(&mut frame[LENGTH_FIELD_SIZE..]).await?;

    let (timestamp, message_type) = read_header(&frame);
    frame.advance(PAYLOAD_START);
    Ok(Some(Message::new_unchecked(
        timestamp,
        message_type,
        frame.freeze(),
    )))
}

/// Write one message and flush.
pub async fn write_message<W>(stream: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&encode(message)).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(timestamp: i64, code: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((HEADER_SIZE + payload.len()) as u32).to_be_bytes());
        out.extend_from_slice(&timestamp.to_be_bytes());
        out.push(code);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_encode_layout() {
        let msg = Message::new(0x0102, MessageType::Produce, &b"hi"[..]).unwrap();
        let bytes = encode(&msg);
        assert_eq!(bytes.as_ref(), frame_bytes(0x0102, 0x01, b"hi").as_slice());
        assert_eq!(&bytes[..4], &[0, 0, 0, 11]);
    }

    #[test]
    fn test_decode_exact_frame() {
        let raw = frame_bytes(42, 0x01, b"hello");
        match decode(&raw).unwrap() {
            Decoded::Frame { message, consumed } => {
                assert_eq!(consumed, raw.len());
                assert_eq!(message.timestamp(), 42);
                assert_eq!(message.message_type(), MessageType::Produce);
                assert_eq!(message.payload().as_ref(), b"hello");
            }
            Decoded::Incomplete => panic!("expected frame"),
        }
    }

    #[test]
    fn test_decode_incomplete_consumes_nothing() {
        let raw = frame_bytes(1, 0x02, &7u64.to_be_bytes());
        assert_eq!(decode(&[]).unwrap(), Decoded::Incomplete);
        assert_eq!(decode(&raw[..3]).unwrap(), Decoded::Incomplete);
        assert_eq!(decode(&raw[..raw.len() - 1]).unwrap(), Decoded::Incomplete);
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut raw = frame_bytes(1, 0x03, b"");
        let first_len = raw.len();
        raw.extend_from_slice(&frame_bytes(2, 0x01, b"abc")[..5]);

        match decode(&raw).unwrap() {
            Decoded::Frame { message, consumed } => {
                assert_eq!(consumed, first_len);
                assert_eq!(message.message_type(), MessageType::Ack);
            }
            Decoded::Incomplete => panic!("expected frame"),
        }
        assert_eq!(decode(&raw[first_len..]).unwrap(), Decoded::Incomplete);
    }

    #[test]
    fn test_unknown_type_decodes_as_error() {
        let raw = frame_bytes(9, 0x42, b"opaque");
        match decode(&raw).unwrap() {
            Decoded::Frame { message, .. } => {
                assert_eq!(message.message_type(), MessageType::Error);
                assert_eq!(message.payload().as_ref(), b"opaque");
            }
            Decoded::Incomplete => panic!("expected frame"),
        }
    }

    #[test]
    fn test_unknown_type_does_not_round_trip_code() {
        // 0x42 decodes to Error and re-encodes as 0xFF.
        let raw = frame_bytes(9, 0x42, b"x");
        if let Decoded::Frame { message, .. } = decode(&raw).unwrap() {
            assert_eq!(encode(&message)[12], 0xFF);
        }
    }

    #[test]
    fn test_oversized_rejected_from_prefix_alone() {
        let declared = (HEADER_SIZE + MAX_MESSAGE_SIZE + 1) as u32;
        let err = decode(&declared.to_be_bytes()).unwrap_err();
        assert_eq!(err, FrameError::Oversized(MAX_MESSAGE_SIZE + 1, MAX_MESSAGE_SIZE));
    }

    #[test]
    fn test_max_size_accepted() {
        let declared = (HEADER_SIZE + MAX_MESSAGE_SIZE) as u32;
        assert_eq!(decode(&declared.to_be_bytes()).unwrap(), Decoded::Incomplete);
    }

    #[test]
    fn test_short_length_is_malformed() {
        assert_eq!(decode(&8u32.to_be_bytes()).unwrap_err(), FrameError::Malformed(8));
        assert_eq!(decode(&0u32.to_be_bytes()).unwrap_err(), FrameError::Malformed(0));
    }

    #[test]
    fn test_frame_decoder_splits_pipelined_frames() {
        let mut decoder = FrameDecoder::new();
        let mut raw = frame_bytes(1, 0x01, b"a");
        raw.extend(frame_bytes(2, 0x01, b"bb"));
        raw.extend(frame_bytes(3, 0x02, &0u64.to_be_bytes()));
        decoder.extend(&raw);

        let a = decoder.next_message().unwrap().unwrap();
        let b = decoder.next_message().unwrap().unwrap();
        let c = decoder.next_message().unwrap().unwrap();
        assert_eq!(a.payload().as_ref(), b"a");
        assert_eq!(b.payload().as_ref(), b"bb");
        assert_eq!(c.message_type(), MessageType::Fetch);
        assert!(decoder.next_message().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[tokio::test]
    async fn test_async_read_write_message() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let msg = Message::produce(&b"over the wire"[..]).unwrap();

        write_message(&mut client, &msg).await.unwrap();
        drop(client);

        let read = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(read, msg);
        assert!(read_message(&mut server).await.unwrap().is_none());
    }
}
