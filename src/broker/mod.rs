//! Reactor layer: sockets, connection lifecycle, and request dispatch.
//!
//! - `processor`: request → response mapping over the log
//! - `connection`: per-connection read → decode → process → encode → write
//! - `event_loop`: accept loops and per-loop connection sets
//! - `lifecycle`: start/stop state shared by both strategies
//! - `single` / `group`: the two reactor strategies
pub mod connection;
pub mod event_loop;
pub mod group;
pub mod lifecycle;
pub mod processor;
pub mod single;

use crate::config::{BrokerConfiguration, ReactorKind};
use crate::error::BrokerError;
use crate::metrics::MetricsAggregator;
use crate::storage::{self, MessageLog};
use std::net::SocketAddr;
use std::sync::Arc;

pub use connection::{CloseReason, ConnectionContext};
pub use group::EventLoopGroupReactor;
pub use lifecycle::BrokerState;
pub use processor::MessageProcessor;
pub use single::SingleThreadReactor;

/// Contract shared by every reactor strategy.
pub trait Broker: Send + Sync {
    /// Bind the listener and start serving.
    ///
    /// Returns the bound address (useful with port 0).
    ///
    /// # Errors
    /// - `AlreadyRunning` if the broker is not stopped
    /// - `Io` on bind, runtime or thread creation failures
    fn start(&self) -> Result<SocketAddr, BrokerError>;

    /// Stop accepting, let in-flight requests finish within the grace
    /// period, then close everything. Blocks until the reactor threads have
    /// exited. No-op when not running.
    fn stop(&self) -> Result<(), BrokerError>;

    /// Current state; never blocks.
    fn is_running(&self) -> bool;

    /// Bound address while running.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Build the reactor selected by `config.reactor()`.
pub fn reactor(
    config: BrokerConfiguration,
    processor: Arc<MessageProcessor>,
    metrics: Arc<MetricsAggregator>,
) -> Box<dyn Broker> {
    let ctx = ConnectionContext {
        processor,
        metrics,
        idle_timeout: config.idle_timeout(),
        read_buffer_size: config.read_buffer_size(),
    };

    match config.reactor() {
        ReactorKind::SingleThreaded => Box::new(SingleThreadReactor::new(config, ctx)),
        ReactorKind::EventLoopGroup => Box::new(EventLoopGroupReactor::new(config, ctx)),
    }
}

/// A fully wired broker: log, processor, metrics and reactor.
pub struct BrokerServer {
    log: Arc<dyn MessageLog>,
    metrics: Arc<MetricsAggregator>,
    reactor: Box<dyn Broker>,
}

impl BrokerServer {
    /// Open the configured log and build the configured reactor.
    ///
    /// # Errors
    /// - `Log` if the file-backed log cannot be opened or recovered
    pub fn from_config(config: BrokerConfiguration) -> Result<Self, BrokerError> {
        let log = storage::open_log(&config)?;
        let metrics = Arc::new(MetricsAggregator::with_capacity(config.metrics_capacity()));
        let processor = Arc::new(MessageProcessor::new(Arc::clone(&log)));
        let reactor = reactor(config, processor, Arc::clone(&metrics));

        Ok(Self {
            log,
            metrics,
            reactor,
        })
    }

    pub fn log(&self) -> &Arc<dyn MessageLog> {
        &self.log
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }
}

impl Broker for BrokerServer {
    fn start(&self) -> Result<SocketAddr, BrokerError> {
        self.reactor.start()
    }

    fn stop(&self) -> Result<(), BrokerError> {
        self.reactor.stop()
    }

    fn is_running(&self) -> bool {
        self.reactor.is_running()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.reactor.local_addr()
    }
}
