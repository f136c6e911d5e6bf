/// Broker-level errors.
///
/// Lifecycle and configuration failures reported to the operator (bind
/// failure, bad configuration, unopenable log), plus the transport and
/// framing failures that end a single connection. Request-level failures
/// never show up here: the processor turns them into ERROR responses.
#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker already running")]
    AlreadyRunning,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),
}

/// Errors surfaced by a [`MessageLog`](crate::storage::MessageLog).
///
/// All of them are recoverable at the request level.
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("offset {0} not found")]
    OffsetNotFound(i64),

    #[error("offset {0} out of range")]
    OffsetOutOfRange(i64),

    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt log entry at offset {offset}: {reason}")]
    Corrupt { offset: i64, reason: String },

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Framing violations detected while decoding.
///
/// Any of these closes the offending connection. `Incomplete` input is not
/// an error and is reported through [`Decoded::Incomplete`](crate::protocol::frame::Decoded).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame payload too large: {0} bytes (max: {1})")]
    Oversized(usize, usize),

    #[error("malformed frame: declared length {0} is shorter than the 9-byte header")]
    Malformed(u32),
}
