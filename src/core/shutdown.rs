//! Shutdown Coordination
//!
//! Process-wide and per-consumer shutdown signalling. A [`ShutdownCoordinator`]
//! owns the trigger; cheap [`ShutdownSignal`] handles let long waits (such as
//! the backpressure drain wait) be cancelled when shutdown begins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Owns the shutdown trigger for one consumer or for the whole process
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> (Self, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(8);
        let coordinator = Self {
            shutdown_tx,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        };
        (coordinator, shutdown_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Cloneable handle for observing this coordinator's shutdown
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            shutdown_tx: self.shutdown_tx.clone(),
            shutdown_requested: self.shutdown_requested.clone(),
        }
    }

    /// Mark shutdown requested and wake every subscriber; idempotent
    pub fn trigger_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Run `future_fn` with a coordinator wired to process signals
    ///
    /// The first SIGINT/SIGTERM/SIGHUP/SIGQUIT (or Ctrl-C) triggers shutdown;
    /// a second one exits the process with status 130.
    pub async fn guard_with_coordinator<F, Fut, R, E>(future_fn: F) -> Result<R, E>
    where
        F: FnOnce(Self, broadcast::Receiver<()>) -> Fut,
        Fut: std::future::Future<Output = Result<R, E>>,
    {
        let (coordinator, shutdown_rx) = Self::new();
        setup_signal_handlers(
            coordinator.shutdown_tx.clone(),
            coordinator.shutdown_requested.clone(),
        );
        future_fn(coordinator, shutdown_rx).await
    }
}

/// Read-only view of a [`ShutdownCoordinator`]
#[derive(Clone)]
pub struct ShutdownSignal {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Resolve once shutdown has been triggered
    ///
    /// Subscribes before checking the flag so a trigger racing with the
    /// call is never missed.
    pub async fn cancelled(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        if self.is_shutdown_requested() {
            return;
        }
        // Lagged or Closed both mean a trigger happened or can no longer happen
        let _ = rx.recv().await;
    }
}

fn request_shutdown(
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_requested: &AtomicBool,
    signal_count: &std::sync::atomic::AtomicUsize,
) {
    let previous = signal_count.fetch_add(1, Ordering::AcqRel);
    shutdown_requested.store(true, Ordering::Release);
    let _ = shutdown_tx.send(());
    if previous >= 1 {
        log::warn!("Second shutdown signal received; exiting");
        std::process::exit(130);
    }
    log::info!("Shutdown requested, finishing in-flight messages");
}

fn setup_signal_handlers(shutdown_tx: broadcast::Sender<()>, shutdown_requested: Arc<AtomicBool>) {
    use std::sync::atomic::AtomicUsize;
    let signal_count = Arc::new(AtomicUsize::new(0));

    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }

        use tokio::signal::unix::{signal, SignalKind};
        let signals = [
            SignalKind::interrupt(),
            SignalKind::terminate(),
            SignalKind::hangup(),
            SignalKind::quit(),
        ];

        for kind in signals {
            let tx = shutdown_tx.clone();
            let requested = shutdown_requested.clone();
            let count = signal_count.clone();
            tokio::spawn(async move {
                if let Ok(mut sig) = signal(kind) {
                    while sig.recv().await.is_some() {
                        request_shutdown(&tx, &requested, &count);
                    }
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                request_shutdown(&shutdown_tx, &shutdown_requested, &signal_count);
            }
        });
    }
}
