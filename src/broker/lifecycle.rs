use crate::error::BrokerError;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::watch;
use tracing::{error, info};

/// Lifecycle state of a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BrokerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl BrokerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BrokerState::Starting,
            2 => BrokerState::Running,
            3 => BrokerState::Stopping,
            _ => BrokerState::Stopped,
        }
    }
}

/// Atomic state cell. Transitions are compare-and-swap, so concurrent
/// `start`/`stop` calls cannot both win.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        StateCell(AtomicU8::new(BrokerState::Stopped as u8))
    }

    pub fn get(&self) -> BrokerState {
        BrokerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: BrokerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: BrokerState, to: BrokerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Threads and shutdown handle of a started reactor.
struct Active {
    shutdown: watch::Sender<bool>,
    threads: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
}

/// Start/stop bookkeeping shared by both reactor strategies.
///
/// `start` binds the listener on the caller's thread, so bind failures are
/// returned directly; the strategy only supplies how threads are launched.
/// `stop` sends the shutdown signal through a `watch` channel every event
/// loop listens on, then joins the threads.
pub struct Lifecycle {
    state: StateCell,
    active: Mutex<Option<Active>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: StateCell::new(),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BrokerState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state.get() == BrokerState::Running
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.local_addr)
    }

    /// Bind `addr` and launch the reactor threads.
    ///
    /// # Errors
    /// - `AlreadyRunning` unless currently stopped
    /// - `Io` if binding fails
    /// - whatever `launch` returns (runtime or thread creation failures)
    pub fn start<F>(&self, addr: &str, launch: F) -> Result<SocketAddr, BrokerError>
    where
        F: FnOnce(TcpListener, watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>, BrokerError>,
    {
        if !self.state.transition(BrokerState::Stopped, BrokerState::Starting) {
            return Err(BrokerError::AlreadyRunning);
        }

        match Self::launch(addr, launch) {
            Ok(active) => {
                let local_addr = active.local_addr;
                *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(active);
                self.state.set(BrokerState::Running);
                info!(%local_addr, "broker listening");
                Ok(local_addr)
            }
            Err(e) => {
                // Threads spawned before the failure see the sender drop and exit.
                self.state.set(BrokerState::Stopped);
                Err(e)
            }
        }
    }

    fn launch<F>(addr: &str, launch: F) -> Result<Active, BrokerError>
    where
        F: FnOnce(TcpListener, watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>, BrokerError>,
    {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let threads = launch(listener, shutdown_rx)?;

        Ok(Active {
            shutdown,
            threads,
            local_addr,
        })
    }

    /// Signal shutdown and wait for every reactor thread to exit.
    ///
    /// The event loops stop accepting, give open connections the configured
    /// grace period, and force-close the rest before their threads return.
    /// A no-op unless running.
    ///
    /// # Errors
    /// - `WorkerPanicked` if a reactor thread panicked; the broker still ends
    ///   up stopped
    pub fn stop(&self) -> Result<(), BrokerError> {
        if !self.state.transition(BrokerState::Running, BrokerState::Stopping) {
            return Ok(());
        }

        info!("stopping broker");
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner).take();

        let mut result = Ok(());
        if let Some(active) = active {
            // Receivers may already be gone if a thread exited early.
            let _ = active.shutdown.send(true);
            for handle in active.threads {
                let name = handle.thread().name().unwrap_or("reactor").to_string();
                if handle.join().is_err() {
                    error!(thread = %name, "reactor thread panicked");
                    result = Err(BrokerError::WorkerPanicked(name));
                }
            }
        }

        self.state.set(BrokerState::Stopped);
        info!("broker stopped");
        result
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
