use crate::broker::connection::{self, ConnectionContext};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept (e.g. out of file descriptors) so the loop
/// does not spin while the condition persists.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A connection handed from the acceptor to an event loop.
///
/// Carried as a std socket: a tokio socket is bound to the runtime that
/// registered it, and each event loop must drive its own sockets.
pub type Handoff = (std::net::TcpStream, SocketAddr);

/// Connections owned by one event loop.
pub struct ConnectionSet {
    tasks: JoinSet<()>,
    ctx: ConnectionContext,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionSet {
    pub fn new(ctx: ConnectionContext, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            tasks: JoinSet::new(),
            ctx,
            shutdown,
        }
    }

    /// Spawn a connection task on the current runtime.
    ///
    /// On a current-thread runtime this pins the connection to the thread
    /// that runs the runtime for its whole life.
    pub fn spawn(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
        let ctx = self.ctx.clone();
        let shutdown = self.shutdown.clone();
        self.tasks
            .spawn(async move { connection::serve(stream, peer, ctx, shutdown).await });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for one connection task to finish. Pending forever when empty,
    /// so it can sit in a `select!` next to accept.
    pub async fn reap(&mut self) {
        match self.tasks.join_next().await {
            Some(Err(e)) if e.is_panic() => error!(error = %e, "connection task panicked"),
            Some(_) => {}
            None => std::future::pending::<()>().await,
        }
    }

    /// Wait up to `grace` for open connections to finish their in-flight
    /// requests, then abort whatever is left.
    pub async fn drain(mut self, grace: Duration) {
        if self.tasks.is_empty() {
            return;
        }

        debug!(open = self.tasks.len(), "draining connections");
        let wait_all = async {
            while self.tasks.join_next().await.is_some() {}
        };

        if tokio::time::timeout(grace, wait_all).await.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "shutdown grace period expired, force-closing connections"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

/// Single-threaded reactor body: accept and serve on one runtime.
pub async fn run_single(
    listener: std::net::TcpListener,
    ctx: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to register listener");
            return;
        }
    };

    let mut connections = ConnectionSet::new(ctx, shutdown.clone());

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "accepted connection");
                    connections.spawn(stream, peer);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            _ = connections.reap() => {}
        }
    }

    // Stop accepting before draining.
    drop(listener);
    connections.drain(grace).await;
}

/// Acceptor of an event-loop group: accept and hand connections to workers
/// round-robin.
pub async fn run_acceptor(
    listener: std::net::TcpListener,
    workers: Vec<mpsc::UnboundedSender<Handoff>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to register listener");
            return;
        }
    };

    let mut next = 0usize;

    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        let stream = match stream.into_std() {
            Ok(s) => s,
            Err(e) => {
                warn!(%peer, error = %e, "failed to detach accepted socket");
                continue;
            }
        };

        // Round-robin, skipping any event loop whose channel has closed.
        let mut handoff = (stream, peer);
        let mut delivered = None;
        for _ in 0..workers.len() {
            let worker = next % workers.len();
            next = next.wrapping_add(1);
            match workers[worker].send(handoff) {
                Ok(()) => {
                    delivered = Some(worker);
                    break;
                }
                Err(mpsc::error::SendError(returned)) => {
                    warn!(%peer, worker, "event loop unavailable, trying next");
                    handoff = returned;
                }
            }
        }

        match delivered {
            Some(worker) => info!(%peer, worker, "accepted connection"),
            None => {
                error!(%peer, "no event loop available, acceptor exiting");
                break;
            }
        }
    }
}

/// One event loop of a group: serve connections handed over by the acceptor.
pub async fn run_worker(
    id: usize,
    mut handoffs: mpsc::UnboundedReceiver<Handoff>,
    ctx: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) {
    let mut connections = ConnectionSet::new(ctx, shutdown.clone());
    debug!(worker = id, "event loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            handoff = handoffs.recv() => match handoff {
                Some((stream, peer)) => match TcpStream::from_std(stream) {
                    Ok(stream) => connections.spawn(stream, peer),
                    Err(e) => warn!(worker = id, %peer, error = %e, "failed to register connection"),
                },
                None => break,
            },
            _ = connections.reap() => {}
        }
    }

    // Sockets still queued in the channel never got served; dropping closes them.
    handoffs.close();
    connections.drain(grace).await;
    debug!(worker = id, "event loop stopped");
}
