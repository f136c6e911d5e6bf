use crate::broker::connection::ConnectionContext;
use crate::broker::event_loop;
use crate::broker::lifecycle::Lifecycle;
use crate::broker::Broker;
use crate::config::BrokerConfiguration;
use crate::error::BrokerError;
use std::net::SocketAddr;
use std::thread;
use tokio::sync::mpsc;

/// Event-loop-group reactor.
///
/// ```text
///                 ┌──────────────┐
///  listener ────▶ │  acceptor    │ round-robin
///                 └──────┬───────┘
///        ┌───────────────┼───────────────┐
///        ▼               ▼               ▼
///   event loop 0    event loop 1 …  event loop N-1
///   (own thread,    (own thread,    (own thread,
///    own runtime)    own runtime)    own runtime)
/// ```
///
/// Each event loop is a current-thread runtime on its own OS thread and
/// multiplexes a disjoint set of connections. A connection is registered
/// with exactly one loop and never moves, so responses on a socket cannot be
/// reordered. Per-connection behavior is identical to
/// [`SingleThreadReactor`](crate::broker::SingleThreadReactor).
pub struct EventLoopGroupReactor {
    config: BrokerConfiguration,
    ctx: ConnectionContext,
    lifecycle: Lifecycle,
}

impl EventLoopGroupReactor {
    pub fn new(config: BrokerConfiguration, ctx: ConnectionContext) -> Self {
        Self {
            config,
            ctx,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn num_event_loops(&self) -> usize {
        self.config.num_threads()
    }
}

impl Broker for EventLoopGroupReactor {
    fn start(&self) -> Result<SocketAddr, BrokerError> {
        let ctx = self.ctx.clone();
        let grace = self.config.shutdown_grace();
        let num_loops = self.config.num_threads();

        self.lifecycle
            .start(&self.config.bind_addr(), move |listener, shutdown| {
                // Build every runtime up front so a failure spawns nothing.
                let mut runtimes = Vec::with_capacity(num_loops + 1);
                for _ in 0..=num_loops {
                    runtimes.push(
                        tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()?,
                    );
                }

                let mut threads = Vec::with_capacity(num_loops + 1);
                let mut senders = Vec::with_capacity(num_loops);
                let acceptor_runtime = runtimes.remove(0);

                for (id, runtime) in runtimes.into_iter().enumerate() {
                    let (tx, rx) = mpsc::unbounded_channel();
                    senders.push(tx);

                    let ctx = ctx.clone();
                    let shutdown = shutdown.clone();
                    threads.push(
                        thread::Builder::new()
                            .name(format!("minibroker-loop-{}", id))
                            .spawn(move || {
                                runtime.block_on(event_loop::run_worker(
                                    id, rx, ctx, shutdown, grace,
                                ));
                            })?,
                    );
                }

                threads.push(
                    thread::Builder::new()
                        .name("minibroker-acceptor".to_string())
                        .spawn(move || {
                            acceptor_runtime.block_on(event_loop::run_acceptor(
                                listener, senders, shutdown,
                            ));
                        })?,
                );

                Ok(threads)
            })
    }

    fn stop(&self) -> Result<(), BrokerError> {
        self.lifecycle.stop()
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }
}

impl Drop for EventLoopGroupReactor {
    fn drop(&mut self) {
        let _ = self.lifecycle.stop();
    }
}
