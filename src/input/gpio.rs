//! Hardware GPIO input for the contact variant.
//!
//! A [`PinBackend`] answers whether pin hardware exists at all and opens
//! individual pins. An opened [`WatchedPin`] is handed to [`GpioInput`], which
//! performs the initial synchronous read and then moves the pin onto a
//! dedicated watcher thread. Edges are debounced in the backend; the watcher
//! only forwards levels into the change sink.
//!
//! Stopping never blocks an async worker: inside a runtime the watcher is
//! joined on the blocking pool, tracked by the caller's [`TaskTracker`].

use super::{ChangeSink, InputSource, SourceKind, SourceState, StateCell};
use crate::error::{BridgeError, Result};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// Upper bound on how long the watcher blocks before re-checking its state.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Default sysfs GPIO root.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Result of probing for pin hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(String),
}

/// Source of watchable pins.
pub trait PinBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Check for pin hardware without touching any pin.
    fn availability(&self) -> Availability;

    /// Configure `pin` as an input watching both edges.
    fn open(&self, pin: u32, debounce: Duration) -> Result<Box<dyn WatchedPin>>;
}

/// One configured input pin.
pub trait WatchedPin: Send {
    fn pin(&self) -> u32;

    /// Synchronous level read (`true` = high).
    fn read(&mut self) -> Result<bool>;

    /// Block for at most `timeout` waiting for an edge.
    ///
    /// Returns the debounced level, or `None` if nothing changed.
    fn wait_edge(&mut self, timeout: Duration) -> Result<Option<bool>>;

    /// Stop watching and hand the pin back to the system.
    fn release(&mut self) -> Result<()>;
}

/// Watching GPIO input source.
pub struct GpioInput {
    pin: u32,
    state: Arc<StateCell>,
    watcher: Option<JoinHandle<()>>,
    tracker: TaskTracker,
}

impl GpioInput {
    /// Emit the current level once, then watch edges on a dedicated thread.
    ///
    /// On failure the pin is released before the error is returned.
    pub fn start(
        mut pin: Box<dyn WatchedPin>,
        sink: ChangeSink<bool>,
        tracker: &TaskTracker,
    ) -> Result<Self> {
        let number = pin.pin();
        let state = Arc::new(StateCell::new());

        let initial = match pin.read() {
            Ok(level) => level,
            Err(e) => {
                release_pin(pin.as_mut());
                return Err(e);
            }
        };
        info!("[GPIO] Pin {} initial level: {}", number, level_name(initial));
        sink.emit(initial);
        state.start();

        let watcher_state = state.clone();
        let watcher = std::thread::Builder::new()
            .name(format!("gpio{}-watch", number))
            .spawn(move || watch_loop(pin, sink, watcher_state));

        match watcher {
            Ok(handle) => Ok(Self {
                pin: number,
                state,
                watcher: Some(handle),
                tracker: tracker.clone(),
            }),
            Err(e) => {
                // Dropped with the closure; pins release themselves on drop
                state.stop();
                Err(BridgeError::Gpio {
                    pin: number,
                    source: e,
                })
            }
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl InputSource for GpioInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Gpio
    }

    fn state(&self) -> SourceState {
        self.state.get()
    }

    fn stop(&mut self) {
        if !self.state.stop() {
            return;
        }
        debug!("[GPIO] Stopping watcher for pin {}", self.pin);
        let Some(handle) = self.watcher.take() else {
            return;
        };
        let pin = self.pin;
        let join = move || {
            if handle.join().is_err() {
                error!("[GPIO] Watcher thread for pin {} panicked", pin);
            }
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            self.tracker.spawn_blocking(join);
        } else {
            join();
        }
    }
}

impl Drop for GpioInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_loop(mut pin: Box<dyn WatchedPin>, sink: ChangeSink<bool>, state: Arc<StateCell>) {
    let number = pin.pin();
    while state.is_watching() {
        match pin.wait_edge(POLL_SLICE) {
            Ok(Some(level)) => {
                // Edges racing teardown are dropped, not queued
                if !state.is_watching() {
                    break;
                }
                debug!("[GPIO] Pin {} edge: {}", number, level_name(level));
                if !sink.emit(level) {
                    debug!("[GPIO] Change channel closed, pin {} edge dropped", number);
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("[GPIO] Read error on pin {}: {}", number, e);
                std::thread::sleep(POLL_SLICE);
            }
        }
    }
    release_pin(pin.as_mut());
}

fn release_pin(pin: &mut dyn WatchedPin) {
    match pin.release() {
        Ok(()) => info!("[GPIO] Released pin {}", pin.pin()),
        Err(e) => warn!("[GPIO] Failed to release pin {}: {}", pin.pin(), e),
    }
}

fn level_name(level: bool) -> &'static str {
    if level { "high" } else { "low" }
}

/// Linux sysfs GPIO backend (`/sys/class/gpio`).
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new(SYSFS_GPIO_ROOT)
    }
}

impl PinBackend for SysfsGpio {
    fn name(&self) -> &str {
        "sysfs"
    }

    fn availability(&self) -> Availability {
        let export = self.root.join("export");
        match fs::metadata(&export) {
            Ok(meta) if meta.permissions().readonly() => {
                Availability::Unavailable(format!("{} is read-only", export.display()))
            }
            Ok(_) => Availability::Available,
            Err(e) => Availability::Unavailable(format!("{}: {}", export.display(), e)),
        }
    }

    fn open(&self, pin: u32, debounce: Duration) -> Result<Box<dyn WatchedPin>> {
        let io_err = |source: std::io::Error| BridgeError::Gpio { pin, source };
        let dir = self.root.join(format!("gpio{}", pin));

        if !dir.exists() {
            fs::write(self.root.join("export"), pin.to_string()).map_err(io_err)?;
        }
        wait_for_attributes(&dir);

        fs::write(dir.join("direction"), "in").map_err(io_err)?;
        fs::write(dir.join("edge"), "both").map_err(io_err)?;
        let value = OpenOptions::new()
            .read(true)
            .open(dir.join("value"))
            .map_err(io_err)?;

        Ok(Box::new(SysfsPin {
            pin,
            root: self.root.clone(),
            value,
            debounce,
            last: None,
            exported: true,
        }))
    }
}

/// udev may need a moment to fix permissions on a freshly exported pin.
fn wait_for_attributes(dir: &Path) {
    for _ in 0..20 {
        let writable = fs::metadata(dir.join("direction"))
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false);
        if writable {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

struct SysfsPin {
    pin: u32,
    root: PathBuf,
    value: File,
    debounce: Duration,
    last: Option<bool>,
    exported: bool,
}

impl WatchedPin for SysfsPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn read(&mut self) -> Result<bool> {
        let pin = self.pin;
        let io_err = |source: std::io::Error| BridgeError::Gpio { pin, source };
        let mut buf = [0u8; 1];
        self.value.seek(SeekFrom::Start(0)).map_err(io_err)?;
        let n = self.value.read(&mut buf).map_err(io_err)?;
        let level = n == 1 && buf[0] == b'1';
        self.last = Some(level);
        Ok(level)
    }

    fn wait_edge(&mut self, timeout: Duration) -> Result<Option<bool>> {
        let timeout_ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let ready = {
            let mut fds = [PollFd::new(
                self.value.as_fd(),
                PollFlags::POLLPRI | PollFlags::POLLERR,
            )];
            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(n) => n,
                Err(Errno::EINTR) => 0,
                Err(e) => return Err(e.into()),
            }
        };
        if ready == 0 {
            return Ok(None);
        }

        // Let the contact settle, then sample once
        if !self.debounce.is_zero() {
            std::thread::sleep(self.debounce);
        }
        let previous = self.last;
        let level = self.read()?;
        if previous == Some(level) {
            return Ok(None);
        }
        Ok(Some(level))
    }

    fn release(&mut self) -> Result<()> {
        if !self.exported {
            return Ok(());
        }
        self.exported = false;
        fs::write(self.root.join("unexport"), self.pin.to_string()).map_err(|source| {
            BridgeError::Gpio {
                pin: self.pin,
                source,
            }
        })
    }
}

impl Drop for SysfsPin {
    fn drop(&mut self) {
        if self.exported {
            release_pin(self);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};

    /// Scripted pin: the initial level is fixed, edges arrive over a channel.
    pub struct ScriptedPin {
        pub pin: u32,
        pub initial: std::result::Result<bool, String>,
        pub edges: Receiver<std::result::Result<bool, String>>,
        pub releases: Arc<AtomicUsize>,
    }

    impl WatchedPin for ScriptedPin {
        fn pin(&self) -> u32 {
            self.pin
        }

        fn read(&mut self) -> Result<bool> {
            self.initial
                .clone()
                .map_err(|reason| BridgeError::GpioUnavailable {
                    pin: self.pin,
                    reason,
                })
        }

        fn wait_edge(&mut self, timeout: Duration) -> Result<Option<bool>> {
            match self.edges.recv_timeout(timeout) {
                Ok(Ok(level)) => Ok(Some(level)),
                Ok(Err(reason)) => Err(BridgeError::GpioUnavailable {
                    pin: self.pin,
                    reason,
                }),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(timeout);
                    Ok(None)
                }
            }
        }

        fn release(&mut self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Backend handing out one scripted pin.
    pub struct ScriptedBackend {
        pub availability: Availability,
        pub pin: Mutex<Option<ScriptedPin>>,
    }

    impl ScriptedBackend {
        pub fn unavailable(reason: &str) -> Self {
            Self {
                availability: Availability::Unavailable(reason.to_string()),
                pin: Mutex::new(None),
            }
        }

        /// Available backend; returns the edge sender and release counter.
        pub fn with_pin(
            pin: u32,
            initial: bool,
        ) -> (
            Self,
            Sender<std::result::Result<bool, String>>,
            Arc<AtomicUsize>,
        ) {
            let (tx, rx) = channel();
            let releases = Arc::new(AtomicUsize::new(0));
            let backend = Self {
                availability: Availability::Available,
                pin: Mutex::new(Some(ScriptedPin {
                    pin,
                    initial: Ok(initial),
                    edges: rx,
                    releases: releases.clone(),
                })),
            };
            (backend, tx, releases)
        }
    }

    impl PinBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn availability(&self) -> Availability {
            self.availability.clone()
        }

        fn open(&self, pin: u32, _debounce: Duration) -> Result<Box<dyn WatchedPin>> {
            match self.pin.lock().take() {
                Some(scripted) if scripted.pin == pin => Ok(Box::new(scripted)),
                _ => Err(BridgeError::GpioUnavailable {
                    pin,
                    reason: "not scripted".into(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::input::change_channel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_initial_read_emitted_before_edges() {
        let (backend, edges, releases) = ScriptedBackend::with_pin(17, true);
        // Queue an edge before the source even starts
        edges.send(Ok(false)).unwrap();

        let (sink, mut rx) = change_channel();
        let tracker = TaskTracker::new();
        let pin = backend.open(17, Duration::from_millis(10)).unwrap();
        let mut input = GpioInput::start(pin, sink, &tracker).unwrap();
        assert_eq!(input.state(), SourceState::Watching);

        assert_eq!(rx.recv().await, Some(true));
        let edge = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(edge, Some(false));

        input.stop();
        assert_eq!(input.state(), SourceState::Stopped);

        // The watcher is joined on the blocking pool
        tracker.close();
        timeout(Duration::from_secs(2), tracker.wait()).await.unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_error_keeps_watching() {
        let (backend, edges, _releases) = ScriptedBackend::with_pin(4, false);
        let (sink, mut rx) = change_channel();
        let tracker = TaskTracker::new();
        let pin = backend.open(4, Duration::ZERO).unwrap();
        let mut input = GpioInput::start(pin, sink, &tracker).unwrap();
        assert_eq!(rx.recv().await, Some(false));

        edges.send(Err("EIO".into())).unwrap();
        edges.send(Ok(true)).unwrap();

        let next = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(next, Some(true));
        assert_eq!(input.state(), SourceState::Watching);
        input.stop();
    }

    #[test]
    fn test_double_stop_releases_once() {
        let (backend, _edges, releases) = ScriptedBackend::with_pin(17, false);
        let (sink, _rx) = change_channel();
        let tracker = TaskTracker::new();
        let pin = backend.open(17, Duration::ZERO).unwrap();
        let mut input = GpioInput::start(pin, sink, &tracker).unwrap();

        input.stop();
        input.stop();
        drop(input);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_initial_read_releases_pin() {
        let (_tx, rx) = channel();
        let releases = Arc::new(AtomicUsize::new(0));
        let pin = ScriptedPin {
            pin: 22,
            initial: Err("permission denied".into()),
            edges: rx,
            releases: releases.clone(),
        };
        let (sink, _rx) = change_channel();
        assert!(GpioInput::start(Box::new(pin), sink, &TaskTracker::new()).is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_edges_after_stop() {
        let (backend, edges, _releases) = ScriptedBackend::with_pin(17, false);
        let (sink, mut rx) = change_channel();
        let tracker = TaskTracker::new();
        let pin = backend.open(17, Duration::ZERO).unwrap();
        let mut input = GpioInput::start(pin, sink, &tracker).unwrap();
        assert_eq!(rx.try_recv().ok(), Some(false));

        input.stop();
        let _ = edges.send(Ok(true));
        std::thread::sleep(Duration::from_millis(150));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sysfs_missing_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SysfsGpio::new(dir.path().join("no-gpio"));
        assert!(matches!(
            backend.availability(),
            Availability::Unavailable(_)
        ));
    }

    #[test]
    fn test_sysfs_open_and_read() {
        // Fake sysfs tree with the pin already exported
        let dir = tempfile::tempdir().unwrap();
        let pin_dir = dir.path().join("gpio5");
        fs::create_dir_all(&pin_dir).unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        fs::write(pin_dir.join("direction"), "out").unwrap();
        fs::write(pin_dir.join("edge"), "none").unwrap();
        fs::write(pin_dir.join("value"), "1\n").unwrap();

        let backend = SysfsGpio::new(dir.path());
        assert_eq!(backend.availability(), Availability::Available);

        let mut pin = backend.open(5, Duration::ZERO).unwrap();
        assert_eq!(fs::read_to_string(pin_dir.join("direction")).unwrap(), "in");
        assert_eq!(fs::read_to_string(pin_dir.join("edge")).unwrap(), "both");
        assert!(pin.read().unwrap());

        pin.release().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "5");

        // Released pins are not unexported a second time on drop
        fs::write(dir.path().join("unexport"), "").unwrap();
        drop(pin);
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "");
    }

    #[test]
    fn test_sysfs_pin_unexported_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let pin_dir = dir.path().join("gpio6");
        fs::create_dir_all(&pin_dir).unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        fs::write(pin_dir.join("direction"), "out").unwrap();
        fs::write(pin_dir.join("edge"), "none").unwrap();
        fs::write(pin_dir.join("value"), "0\n").unwrap();

        let pin = SysfsGpio::new(dir.path()).open(6, Duration::ZERO).unwrap();
        drop(pin);
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "6");
    }
}
