use crate::broker::connection::ConnectionContext;
use crate::broker::event_loop;
use crate::broker::lifecycle::Lifecycle;
use crate::broker::Broker;
use crate::config::BrokerConfiguration;
use crate::error::BrokerError;
use std::net::SocketAddr;
use std::thread;

/// Single-threaded multiplexing reactor.
///
/// One OS thread runs a current-thread tokio runtime. Its I/O driver is the
/// readiness multiplexer (epoll/kqueue) for the listener and every
/// connection; accept, read, process and write all happen on that thread.
pub struct SingleThreadReactor {
    config: BrokerConfiguration,
    ctx: ConnectionContext,
    lifecycle: Lifecycle,
}

impl SingleThreadReactor {
    pub fn new(config: BrokerConfiguration, ctx: ConnectionContext) -> Self {
        Self {
            config,
            ctx,
            lifecycle: Lifecycle::new(),
        }
    }
}

impl Broker for SingleThreadReactor {
    fn start(&self) -> Result<SocketAddr, BrokerError> {
        let ctx = self.ctx.clone();
        let grace = self.config.shutdown_grace();

        self.lifecycle
            .start(&self.config.bind_addr(), move |listener, shutdown| {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;

                let handle = thread::Builder::new()
                    .name("minibroker-reactor".to_string())
                    .spawn(move || {
                        runtime.block_on(event_loop::run_single(listener, ctx, shutdown, grace));
                    })?;

                Ok(vec![handle])
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

impl Drop for SingleThreadReactor {
    fn drop(&mut self) {
        let _ = self.lifecycle.stop();
    }
}
