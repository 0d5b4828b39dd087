//! Shutdown coordination.
//!
//! Signals, the node's offline event, the node run loop returning and fatal
//! sampler errors all funnel into [`ShutdownCoordinator::trigger`]. The first
//! trigger records its reason, stops the registered source and cancels the
//! shutdown token. Later triggers are no-ops.

use crate::error::{BridgeError, Result};
use crate::input::InputSource;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Why the bridge is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    NodeOffline,
    RunLoopReturned,
    Fatal(String),
}

impl ShutdownReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received {}", name),
            Self::NodeOffline => write!(f, "node went offline"),
            Self::RunLoopReturned => write!(f, "node run loop returned"),
            Self::Fatal(reason) => write!(f, "fatal error: {}", reason),
        }
    }
}

/// Owner of the single active input source.
#[derive(Default)]
pub struct ShutdownCoordinator {
    source: Mutex<Option<Box<dyn InputSource>>>,
    reason: OnceLock<ShutdownReason>,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hand the active source over. Only one source may be registered.
    ///
    /// A source registered after shutdown started is stopped right away.
    pub fn register(&self, mut source: Box<dyn InputSource>) -> Result<()> {
        let mut slot = self.source.lock();
        if slot.is_some() {
            return Err(BridgeError::SourceAlreadyActive);
        }
        if self.token.is_cancelled() {
            drop(slot);
            debug!("[Shutdown] Source registered after shutdown, stopping it");
            source.stop();
            return Ok(());
        }
        debug!("[Shutdown] Registered {} source", source.kind());
        *slot = Some(source);
        Ok(())
    }

    /// Start shutdown. Only the first call has any effect.
    pub fn trigger(&self, reason: ShutdownReason) {
        if self.reason.set(reason.clone()).is_err() {
            debug!("[Shutdown] Already shutting down, ignoring: {}", reason);
            return;
        }
        if reason.is_fatal() {
            error!("[Shutdown] Shutting down: {}", reason);
        } else {
            info!("[Shutdown] Shutting down: {}", reason);
        }

        // Cancel under the lock so a racing register() sees it
        let source = {
            let mut slot = self.source.lock();
            self.token.cancel();
            slot.take()
        };
        if let Some(mut source) = source {
            source.stop();
            info!("[Shutdown] {} source stopped", source.kind());
        }
    }

    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Trigger shutdown on SIGINT or SIGTERM.
pub fn spawn_signal_listener(coordinator: Arc<ShutdownCoordinator>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let token = coordinator.token();

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = token.cancelled() => return,
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        coordinator.trigger(ShutdownReason::Signal(name));
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{SourceKind, SourceState, StateCell};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        state: StateCell,
        stops: Arc<AtomicUsize>,
    }

    impl CountingSource {
        fn boxed(stops: &Arc<AtomicUsize>) -> Box<dyn InputSource> {
            let state = StateCell::new();
            state.start();
            Box::new(Self {
                state,
                stops: stops.clone(),
            })
        }
    }

    impl InputSource for CountingSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Console
        }

        fn state(&self) -> SourceState {
            self.state.get()
        }

        fn stop(&mut self) {
            if self.state.stop() {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_second_source_rejected() {
        let stops = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator::new();
        coordinator.register(CountingSource::boxed(&stops)).unwrap();
        assert!(matches!(
            coordinator.register(CountingSource::boxed(&stops)),
            Err(BridgeError::SourceAlreadyActive)
        ));
    }

    #[test]
    fn test_first_reason_wins() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger(ShutdownReason::NodeOffline);
        coordinator.trigger(ShutdownReason::Fatal("late".into()));
        assert_eq!(coordinator.reason(), Some(&ShutdownReason::NodeOffline));
        assert!(coordinator.is_shutting_down());
    }

    #[test]
    fn test_register_after_shutdown_stops_source() {
        let stops = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger(ShutdownReason::RunLoopReturned);
        coordinator.register(CountingSource::boxed(&stops)).unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_tear_down_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator::new();
        coordinator.register(CountingSource::boxed(&stops)).unwrap();

        let token = coordinator.token();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let reason = if i % 2 == 0 {
                        ShutdownReason::Signal("SIGINT")
                    } else {
                        ShutdownReason::NodeOffline
                    };
                    coordinator.trigger(reason);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(token.is_cancelled());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(coordinator.reason().is_some());
    }
}
