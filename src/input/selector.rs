//! Hardware-first source selection for the contact variant.

use super::console::Console;
use super::gpio::{Availability, GpioInput, PinBackend};
use super::{ChangeSink, InputSource};
use crate::config::GpioConfig;
use log::{info, warn};
use tokio::io::AsyncBufRead;
use tokio_util::task::TaskTracker;

/// Try to acquire the configured pin.
///
/// Never fails: missing hardware or an unusable pin is logged and reported as
/// `None` so the caller can fall back.
pub fn acquire_gpio(
    backend: &dyn PinBackend,
    config: &GpioConfig,
    sink: ChangeSink<bool>,
    tracker: &TaskTracker,
) -> Option<GpioInput> {
    if let Availability::Unavailable(reason) = backend.availability() {
        warn!(
            "[GPIO] {} backend unavailable for pin {}: {}. Falling back to mock input.",
            backend.name(),
            config.pin,
            reason
        );
        return None;
    }

    info!(
        "[GPIO] Configuring pin {} with debounce {}ms",
        config.pin,
        config.debounce.as_millis()
    );
    let pin = match backend.open(config.pin, config.debounce) {
        Ok(pin) => pin,
        Err(e) => {
            warn!(
                "[GPIO] Failed to open pin {}: {}. Falling back to mock input.",
                config.pin, e
            );
            return None;
        }
    };

    match GpioInput::start(pin, sink, tracker) {
        Ok(input) => Some(input),
        Err(e) => {
            warn!(
                "[GPIO] Failed to start watching pin {}: {}. Falling back to mock input.",
                config.pin, e
            );
            None
        }
    }
}

/// Hardware source when possible, otherwise the console simulator built by `fallback`.
pub fn acquire_contact_source<R, F>(
    backend: &dyn PinBackend,
    config: &GpioConfig,
    sink: ChangeSink<bool>,
    tracker: &TaskTracker,
    fallback: F,
) -> Box<dyn InputSource>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    F: FnOnce() -> Console<R>,
{
    match acquire_gpio(backend, config, sink.clone(), tracker) {
        Some(input) => Box::new(input),
        None => Box::new(fallback().start(sink, tracker)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::gpio::testing::ScriptedBackend;
    use crate::input::{SourceKind, SourceState, change_channel};
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn gpio_config(pin: u32) -> GpioConfig {
        GpioConfig {
            pin,
            debounce: Duration::from_millis(10),
            sysfs_root: PathBuf::from("/nonexistent"),
        }
    }

    #[test]
    fn test_unavailable_hardware_yields_none() {
        let backend = ScriptedBackend::unavailable("no gpiochip");
        let (sink, mut rx) = change_channel();
        assert!(acquire_gpio(&backend, &gpio_config(17), sink, &TaskTracker::new()).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_open_failure_yields_none() {
        // Scripted for pin 5, asked for pin 17
        let (backend, _edges, releases) = ScriptedBackend::with_pin(5, true);
        let (sink, _rx) = change_channel();
        assert!(acquire_gpio(&backend, &gpio_config(17), sink, &TaskTracker::new()).is_none());
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_acquired_pin_emits_one_initial_value() {
        let (backend, _edges, releases) = ScriptedBackend::with_pin(17, true);
        let (sink, mut rx) = change_channel();
        let tracker = TaskTracker::new();
        let mut input = acquire_gpio(&backend, &gpio_config(17), sink, &tracker).unwrap();

        assert_eq!(rx.try_recv().ok(), Some(true));
        assert!(rx.try_recv().is_err());

        input.stop();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_to_console() {
        let backend = ScriptedBackend::unavailable("no gpiochip");
        let tracker = TaskTracker::new();
        let (sink, mut rx) = change_channel();

        let mut source = acquire_contact_source(&backend, &gpio_config(17), sink, &tracker, || {
            Console::new(&b"\n"[..])
        });
        assert_eq!(source.kind(), SourceKind::Console);
        assert_eq!(rx.recv().await, Some(true));

        source.stop();
        assert_eq!(source.state(), SourceState::Stopped);
    }

    #[tokio::test]
    async fn test_hardware_preferred_over_console() {
        let (backend, _edges, _releases) = ScriptedBackend::with_pin(17, false);
        let tracker = TaskTracker::new();
        let (sink, mut rx) = change_channel();

        let mut source = acquire_contact_source(&backend, &gpio_config(17), sink, &tracker, || {
            Console::new(&b"\n\n"[..])
        });
        assert_eq!(source.kind(), SourceKind::Gpio);
        assert_eq!(rx.recv().await, Some(false));
        source.stop();
    }
}
