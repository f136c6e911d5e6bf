use crate::protocol::frame::{read_message, write_message};
use crate::protocol::{encode_into, Message, MessageType};
use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Result of a FETCH as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Payload(Bytes),
    Error(String),
}

/// Minimal async client: one connection, one request at a time unless
/// [`pipeline`](BrokerClient::pipeline) is used.
pub struct BrokerClient {
    stream: TcpStream,
}

impl BrokerClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send one message and wait for its response.
    ///
    /// # Errors
    /// - `UnexpectedEof` if the broker closed the connection
    pub async fn send(&mut self, request: &Message) -> io::Result<Message> {
        write_message(&mut self.stream, request).await?;
        self.recv().await
    }

    /// Read the next response.
    pub async fn recv(&mut self) -> io::Result<Message> {
        read_message(&mut self.stream)
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "broker closed connection"))
    }

    /// Write several requests back to back, then read one response per
    /// request, in order.
    pub async fn pipeline(&mut self, requests: &[Message]) -> io::Result<Vec<Message>> {
        let mut batch = BytesMut::new();
        for request in requests {
            encode_into(request, &mut batch);
        }
        self.stream.write_all(&batch).await?;
        self.stream.flush().await?;

        let mut responses = Vec::with_capacity(requests.len());
        for _ in requests {
            responses.push(self.recv().await?);
        }
        Ok(responses)
    }

    /// PRODUCE `payload`. `Ok(Err(text))` carries a broker-side ERROR.
    pub async fn produce(&mut self, payload: impl Into<Bytes>) -> io::Result<Result<(), String>> {
        let request = Message::produce(payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let response = self.send(&request).await?;
        Ok(match response.message_type() {
            MessageType::Ack => Ok(()),
            _ => Err(response.payload_lossy()),
        })
    }

    /// FETCH the message at `offset`.
    pub async fn fetch(&mut self, offset: u64) -> io::Result<FetchOutcome> {
        let response = self.send(&Message::fetch(offset)).await?;
        Ok(match response.message_type() {
            MessageType::Fetch => FetchOutcome::Payload(response.payload().clone()),
            _ => FetchOutcome::Error(response.payload_lossy()),
        })
    }
}
