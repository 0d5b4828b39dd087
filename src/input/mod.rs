//! Input sources for the sensor bridge.
//!
//! Every source pushes logical values into a [`ChangeSink`], the sending half
//! of a single-consumer channel drained by the propagation pump. Sources share
//! one small state machine:
//!
//! ```text
//! Uninitialized -> Watching -> Stopped
//! ```
//!
//! Current input sources:
//! - `gpio`: hardware pin watcher (contact variant)
//! - `console`: line-toggle simulator (contact fallback)
//! - `sampler`: periodic measurement (command or random)

pub mod console;
pub mod gpio;
pub mod sampler;
pub mod selector;

pub use console::{Console, ConsoleInput};
pub use gpio::{Availability, GpioInput, PinBackend, SysfsGpio, WatchedPin};
pub use sampler::{MeasurementKind, MeasurementSampler};
pub use selector::{acquire_contact_source, acquire_gpio};

use std::sync::atomic::{AtomicU8, Ordering};
use strum::Display;
use tokio::sync::mpsc;

/// Which acquisition path produced a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SourceKind {
    #[strum(serialize = "gpio")]
    Gpio,
    #[strum(serialize = "console")]
    Console,
    #[strum(serialize = "sampler")]
    Sampler,
}

/// Lifecycle of an input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum SourceState {
    Uninitialized = 0,
    Watching = 1,
    Stopped = 2,
}

/// Atomic holder for [`SourceState`], shared between a source handle and its
/// watcher thread or task.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(SourceState::Uninitialized as u8))
    }

    pub fn get(&self) -> SourceState {
        match self.0.load(Ordering::SeqCst) {
            0 => SourceState::Uninitialized,
            1 => SourceState::Watching,
            _ => SourceState::Stopped,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.get() == SourceState::Watching
    }

    /// `Uninitialized -> Watching`. Returns false from any other state.
    pub fn start(&self) -> bool {
        self.0
            .compare_exchange(
                SourceState::Uninitialized as u8,
                SourceState::Watching as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Move to `Stopped`. Returns true only for the call that performed the transition.
    pub fn stop(&self) -> bool {
        self.0.swap(SourceState::Stopped as u8, Ordering::SeqCst) != SourceState::Stopped as u8
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// An active acquisition handle.
///
/// Owned by exactly one holder (normally the shutdown coordinator).
pub trait InputSource: Send {
    fn kind(&self) -> SourceKind;

    fn state(&self) -> SourceState;

    /// Release the underlying pin, timer or reader. A no-op once stopped.
    fn stop(&mut self);
}

/// Sending half of the value-change channel.
#[derive(Debug)]
pub struct ChangeSink<V> {
    tx: mpsc::UnboundedSender<V>,
}

impl<V> Clone for ChangeSink<V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<V> ChangeSink<V> {
    /// Queue a value for propagation. Returns false if the pump is gone.
    pub fn emit(&self, value: V) -> bool {
        self.tx.send(value).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a change channel. The receiver goes to the propagation pump.
pub fn change_channel<V>() -> (ChangeSink<V>, mpsc::UnboundedReceiver<V>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChangeSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let state = StateCell::new();
        assert_eq!(state.get(), SourceState::Uninitialized);

        assert!(state.start());
        assert!(state.is_watching());
        // Only one start
        assert!(!state.start());

        assert!(state.stop());
        assert_eq!(state.get(), SourceState::Stopped);
        // Second stop is a no-op
        assert!(!state.stop());
        // Cannot restart
        assert!(!state.start());
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (sink, rx) = change_channel::<bool>();
        assert!(sink.emit(true));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(false));
    }
}
