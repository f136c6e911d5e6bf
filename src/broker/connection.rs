use crate::broker::processor::MessageProcessor;
use crate::clock::monotonic_nanos;
use crate::error::BrokerError;
use crate::metrics::{LatencyRecord, MetricsAggregator};
use crate::protocol::{encode_into, FrameDecoder, Message};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything a connection needs from the broker. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionContext {
    pub processor: Arc<MessageProcessor>,
    pub metrics: Arc<MetricsAggregator>,
    pub idle_timeout: Option<Duration>,
    pub read_buffer_size: usize,
}

/// Why a connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed its side.
    ClientClosed,
    /// No bytes arrived within the idle timeout.
    IdleTimeout,
    /// Broker is stopping.
    Shutdown,
}

/// While draining for shutdown, how long a read waits for bytes the client
/// already sent before the connection is considered quiet.
const DRAIN_QUIET_PERIOD: Duration = Duration::from_millis(50);

/// Serve one client connection until it closes.
///
/// Connection lifecycle:
/// 1. Read whatever bytes are available into the connection's buffer
/// 2. Pop every complete frame, hand each to the processor, encode the
///    responses into one output buffer (request order is preserved)
/// 3. Write the output buffer; the write waits for the socket to become
///    writable, so a slow reader applies backpressure to this connection only
/// 4. Repeat until EOF, idle timeout, shutdown, or an error
///
/// A latency sample is recorded per request, from the moment its bytes were
/// read to the moment its response was encoded.
///
/// Once shutdown is signalled the connection drains: requests the client
/// already sent are still read and answered, and the connection closes at
/// the first read that finds nothing within [`DRAIN_QUIET_PERIOD`]. The
/// owning event loop bounds the drain with its grace period.
///
/// # Errors
/// - `Frame` on an oversized or malformed frame; an ERROR response naming
///   the violation is written first
/// - `Io` on transport failures
pub async fn handle_connection<S>(
    mut stream: S,
    ctx: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<CloseReason, BrokerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::with_capacity(ctx.read_buffer_size);
    let mut out = BytesMut::with_capacity(ctx.read_buffer_size);
    let mut draining = *shutdown.borrow();

    loop {
        // Make room for at least one full read.
        decoder.buffer_mut().reserve(ctx.read_buffer_size);

        let read = if draining {
            read_some(&mut stream, decoder.buffer_mut(), Some(DRAIN_QUIET_PERIOD)).await?
        } else {
            tokio::select! {
                biased;
                // Also fires if the sender is gone; either way, drain.
                _ = shutdown.changed() => {
                    debug!("draining connection for shutdown");
                    draining = true;
                    continue;
                }
                read = read_some(&mut stream, decoder.buffer_mut(), ctx.idle_timeout) => read?,
            }
        };

        let n = match read {
            Some(n) => n,
            None if draining => return Ok(CloseReason::Shutdown),
            None => return Ok(CloseReason::IdleTimeout),
        };

        if n == 0 {
            if decoder.buffered() > 0 {
                debug!(bytes = decoder.buffered(), "discarding partial frame on close");
            }
            return Ok(CloseReason::ClientClosed);
        }

        let arrival = monotonic_nanos();

        loop {
            match decoder.next_message() {
                Ok(Some(request)) => {
                    let response = ctx.processor.handle(request);
                    encode_into(&response, &mut out);
                    ctx.metrics.record(LatencyRecord::new(arrival, monotonic_nanos()));
                }
                Ok(None) => break,
                Err(e) => {
                    // Answer the good frames that preceded the bad one, then
                    // tell the client why it is being dropped.
                    encode_into(&Message::error(format!("frame error: {}", e)), &mut out);
                    if let Err(write_err) = write_out(&mut stream, &out).await {
                        debug!(error = %write_err, "failed to deliver frame error response");
                    }
                    return Err(e.into());
                }
            }
        }

        if !out.is_empty() {
            write_out(&mut stream, &out).await?;
            out.clear();
        }
    }
}

async fn write_out<S>(stream: &mut S, out: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(out).await?;
    stream.flush().await
}

/// One read, bounded by the idle timeout. `Ok(None)` means the timeout hit.
async fn read_some<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    idle_timeout: Option<Duration>,
) -> std::io::Result<Option<usize>>
where
    S: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.read_buf(buf)).await {
            Ok(read) => read.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read_buf(buf).await.map(Some),
    }
}

/// Run `handle_connection` and log how it ended.
///
/// Errors stay inside this connection; nothing propagates to the event loop.
pub async fn serve<S>(
    stream: S,
    peer: SocketAddr,
    ctx: ConnectionContext,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match handle_connection(stream, ctx, shutdown).await {
        Ok(CloseReason::ClientClosed) => info!(%peer, "connection closed"),
        Ok(CloseReason::IdleTimeout) => info!(%peer, "closing idle connection"),
        Ok(CloseReason::Shutdown) => debug!(%peer, "connection closed for shutdown"),
        Err(BrokerError::Frame(e)) => warn!(%peer, error = %e, "protocol violation, connection dropped"),
        Err(e) => warn!(%peer, error = %e, "connection error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{read_message, write_message};
    use crate::protocol::MessageType;
    use crate::storage::{MemoryLog, MessageLog};
    use tokio::io::duplex;

    fn context(idle_timeout: Option<Duration>) -> ConnectionContext {
        ConnectionContext {
            processor: Arc::new(MessageProcessor::new(Arc::new(MemoryLog::new()))),
            metrics: Arc::new(MetricsAggregator::new()),
            idle_timeout,
            read_buffer_size: 1024,
        }
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let ctx = context(None);
        let metrics = Arc::clone(&ctx.metrics);
        let (_tx, rx) = watch::channel(false);
        let (mut client, server) = duplex(64 * 1024);
        let task = tokio::spawn(handle_connection(server, ctx, rx));

        let mut batch = BytesMut::new();
        encode_into(&Message::produce(&b"one"[..]).unwrap(), &mut batch);
        encode_into(&Message::produce(&b"two"[..]).unwrap(), &mut batch);
        encode_into(&Message::fetch(1), &mut batch);
        client.write_all(&batch).await.unwrap();

        let a = read_message(&mut client).await.unwrap().unwrap();
        let b = read_message(&mut client).await.unwrap().unwrap();
        let c = read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(a.message_type(), MessageType::Ack);
        assert_eq!(b.message_type(), MessageType::Ack);
        assert_eq!(c.message_type(), MessageType::Fetch);
        assert_eq!(c.payload().as_ref(), b"two");

        drop(client);
        assert_eq!(task.await.unwrap().unwrap(), CloseReason::ClientClosed);
        assert_eq!(metrics.len(), 3);
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let (_tx, rx) = watch::channel(false);
        let (mut client, server) = duplex(1024);
        tokio::spawn(handle_connection(server, context(None), rx));

        let frame = crate::protocol::encode(&Message::produce(&b"split"[..]).unwrap());
        for byte in frame.iter() {
            client.write_all(&[*byte]).await.unwrap();
            client.flush().await.unwrap();
        }

        let ack = read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(ack.message_type(), MessageType::Ack);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (_tx, rx) = watch::channel(false);
        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(handle_connection(server, context(None), rx));

        let declared = (9 + crate::protocol::MAX_MESSAGE_SIZE + 1) as u32;
        client.write_all(&declared.to_be_bytes()).await.unwrap();

        let err = read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(err.message_type(), MessageType::Error);
        assert!(err.payload_lossy().contains("too large"));

        assert!(matches!(task.await.unwrap(), Err(BrokerError::Frame(_))));
        assert!(read_message(&mut client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (_tx, rx) = watch::channel(false);
        let (_client, server) = duplex(1024);
        let result = handle_connection(server, context(Some(Duration::from_millis(50))), rx).await;
        assert_eq!(result.unwrap(), CloseReason::IdleTimeout);
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes_idle_connection() {
        let (tx, rx) = watch::channel(false);
        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(handle_connection(server, context(None), rx));

        write_message(&mut client, &Message::produce(&b"before"[..]).unwrap())
            .await
            .unwrap();
        let ack = read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(ack.message_type(), MessageType::Ack);

        tx.send(true).unwrap();
        assert_eq!(task.await.unwrap().unwrap(), CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn test_requests_sent_before_shutdown_are_answered() {
        let ctx = context(None);
        let log = Arc::clone(ctx.processor.log());
        let (tx, rx) = watch::channel(false);
        let (mut client, server) = duplex(1024);

        write_message(&mut client, &Message::produce(&b"in flight"[..]).unwrap())
            .await
            .unwrap();
        tx.send(true).unwrap();
        let task = tokio::spawn(handle_connection(server, ctx, rx));

        let ack = read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(ack.message_type(), MessageType::Ack);
        assert_eq!(task.await.unwrap().unwrap(), CloseReason::Shutdown);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_draining_connection_answers_late_pipelined_frame() {
        let ctx = context(None);
        let (tx, rx) = watch::channel(false);
        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(handle_connection(server, ctx, rx));

        // First half of a frame arrives before shutdown, the rest after.
        let frame = crate::protocol::encode(&Message::produce(&b"split"[..]).unwrap());
        client.write_all(&frame[..6]).await.unwrap();
        tokio::task::yield_now().await;
        tx.send(true).unwrap();
        client.write_all(&frame[6..]).await.unwrap();

        let ack = read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(ack.message_type(), MessageType::Ack);
        assert_eq!(task.await.unwrap().unwrap(), CloseReason::Shutdown);
    }
}
