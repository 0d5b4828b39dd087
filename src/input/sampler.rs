//! Periodic measurement sampler.
//!
//! Produces one reading per interval, either from an external command or from
//! a random generator. The first tick fires immediately.

use super::{ChangeSink, InputSource, SourceKind, SourceState, StateCell};
use crate::config::strip_matching_quotes;
use crate::error::{BridgeError, Result};
use crate::node::DeviceKind;
use log::{debug, error, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// What the measurement variant reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    /// Hundredths of a degree Celsius
    Temperature,
    /// Relative humidity
    Humidity,
}

impl MeasurementKind {
    pub fn allows_negative(&self) -> bool {
        matches!(self, Self::Temperature)
    }

    pub fn device_kind(&self) -> DeviceKind {
        match self {
            Self::Temperature => DeviceKind::TemperatureSensor,
            Self::Humidity => DeviceKind::HumiditySensor,
        }
    }

    pub fn endpoint_id(&self) -> &'static str {
        match self {
            Self::Temperature => "tempsensor",
            Self::Humidity => "humsensor",
        }
    }

    fn random_value(&self) -> i32 {
        let roll: i32 = rand::thread_rng().gen_range(0..=100);
        match self {
            Self::Temperature => (roll - 50) * 100,
            Self::Humidity => roll,
        }
    }
}

/// Turn raw command output into a reading.
///
/// One layer of matching quotes is stripped, the number is rounded half-up and
/// humidity is clamped at zero.
pub fn parse_sample(kind: MeasurementKind, command: &str, raw: &str) -> Result<i32> {
    let malformed = || BridgeError::MalformedSample {
        command: command.to_string(),
        output: raw.to_string(),
    };

    let text = strip_matching_quotes(raw.trim());
    info!("[Sampler] Command result: {}", text);

    let parsed: f64 = text
        .trim()
        .replace('\u{2212}', "-")
        .parse()
        .map_err(|_| malformed())?;
    if !parsed.is_finite() {
        return Err(malformed());
    }

    let rounded = (parsed + 0.5).floor();
    if rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
        return Err(malformed());
    }
    let value = rounded as i32;

    if !kind.allows_negative() && value < 0 {
        return Ok(0);
    }
    Ok(value)
}

async fn run_command(command: &str) -> Result<String> {
    let failed = |reason: String| BridgeError::SampleCommand {
        command: command.to_string(),
        reason,
    };

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| failed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!("{} ({})", output.status, stderr.trim())));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn sample_command(kind: MeasurementKind, command: &str) -> Result<i32> {
    let raw = run_command(command).await?;
    parse_sample(kind, command, &raw)
}

/// Running sampler handle.
pub struct MeasurementSampler {
    kind: MeasurementKind,
    state: Arc<StateCell>,
    cancel: CancellationToken,
}

impl MeasurementSampler {
    /// Spawn the sampling task.
    ///
    /// `on_fatal` runs at most once, when the command fails or its output
    /// cannot be parsed. The sampler is already stopped at that point.
    pub fn start<F>(
        kind: MeasurementKind,
        interval: Duration,
        command: Option<String>,
        sink: ChangeSink<i32>,
        tracker: &TaskTracker,
        on_fatal: F,
    ) -> Self
    where
        F: FnOnce(BridgeError) + Send + 'static,
    {
        let state = Arc::new(StateCell::new());
        let cancel = CancellationToken::new();
        state.start();

        match &command {
            Some(cmd) => info!(
                "[Sampler] Sampling {} every {:?} from `{}`",
                kind, interval, cmd
            ),
            None => info!(
                "[Sampler] Sampling random {} every {:?}",
                kind, interval
            ),
        }

        tracker.spawn(sample_loop(
            kind,
            interval,
            command,
            sink,
            state.clone(),
            cancel.clone(),
            on_fatal,
        ));

        Self {
            kind,
            state,
            cancel,
        }
    }

    pub fn kind(&self) -> MeasurementKind {
        self.kind
    }
}

async fn sample_loop<F>(
    kind: MeasurementKind,
    interval: Duration,
    command: Option<String>,
    sink: ChangeSink<i32>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    on_fatal: F,
) where
    F: FnOnce(BridgeError) + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let value = match &command {
            Some(cmd) => {
                let sampled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sampled = sample_command(kind, cmd) => sampled,
                };
                match sampled {
                    Ok(value) => value,
                    Err(e) => {
                        error!("[Sampler] {}", e);
                        state.stop();
                        on_fatal(e);
                        return;
                    }
                }
            }
            None => kind.random_value(),
        };

        if !state.is_watching() {
            break;
        }
        debug!("[Sampler] {} = {}", kind, value);
        sink.emit(value);
    }

    debug!("[Sampler] Timer stopped");
}

impl InputSource for MeasurementSampler {
    fn kind(&self) -> SourceKind {
        SourceKind::Sampler
    }

    fn state(&self) -> SourceState {
        self.state.get()
    }

    fn stop(&mut self) {
        if self.state.stop() {
            debug!("[Sampler] Stopping {} sampler", self.kind);
        }
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::change_channel;
    use tokio::sync::oneshot;
    use tokio::time::Instant;
    use tokio_test::assert_err;

    fn no_fatal(e: BridgeError) {
        panic!("unexpected fatal error: {}", e);
    }

    #[test]
    fn test_parse_sample() {
        let t = MeasurementKind::Temperature;
        let h = MeasurementKind::Humidity;
        assert_eq!(parse_sample(t, "cmd", "42\n").unwrap(), 42);
        assert_eq!(parse_sample(t, "cmd", "'-5'").unwrap(), -5);
        assert_eq!(parse_sample(h, "cmd", "'-5'").unwrap(), 0);
        assert_eq!(parse_sample(t, "cmd", "\"2150.4\"").unwrap(), 2150);
        assert_eq!(parse_sample(t, "cmd", "21.5").unwrap(), 22);
        assert_eq!(parse_sample(t, "cmd", "-2.5").unwrap(), -2);
        assert_eq!(parse_sample(t, "cmd", "\u{2212}7").unwrap(), -7);

        assert_err!(parse_sample(t, "cmd", "warm"));
        assert_err!(parse_sample(t, "cmd", "'5\""));
        assert_err!(parse_sample(t, "cmd", ""));
        assert_err!(parse_sample(t, "cmd", "inf"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            "Humidity".parse::<MeasurementKind>().ok(),
            Some(MeasurementKind::Humidity)
        );
        assert_eq!(MeasurementKind::Temperature.to_string(), "temperature");
        assert_eq!(
            MeasurementKind::Humidity.device_kind(),
            DeviceKind::HumiditySensor
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_values_on_interval() {
        let tracker = TaskTracker::new();
        let (sink, mut rx) = change_channel();
        let started = Instant::now();
        let mut sampler = MeasurementSampler::start(
            MeasurementKind::Temperature,
            Duration::from_secs(60),
            None,
            sink,
            &tracker,
            no_fatal,
        );

        for _ in 0..3 {
            let value = rx.recv().await.unwrap();
            assert!((-5000..=5000).contains(&value));
            assert_eq!(value % 100, 0);
        }
        // First tick is immediate, then two full intervals
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert!(started.elapsed() < Duration::from_secs(180));

        sampler.stop();
        sampler.stop();
        tracker.close();
        tracker.wait().await;
        assert_eq!(sampler.state(), SourceState::Stopped);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_humidity_range() {
        let tracker = TaskTracker::new();
        let (sink, mut rx) = change_channel();
        let mut sampler = MeasurementSampler::start(
            MeasurementKind::Humidity,
            Duration::from_secs(1),
            None,
            sink,
            &tracker,
            no_fatal,
        );
        for _ in 0..20 {
            assert!((0..=100).contains(&rx.recv().await.unwrap()));
        }
        sampler.stop();
    }

    #[tokio::test]
    async fn test_command_value_every_tick() {
        let tracker = TaskTracker::new();
        let (sink, mut rx) = change_channel();
        let mut sampler = MeasurementSampler::start(
            MeasurementKind::Temperature,
            Duration::from_millis(20),
            Some("echo 42".into()),
            sink,
            &tracker,
            no_fatal,
        );
        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(42));
        }
        sampler.stop();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_quoted_negative_per_kind() {
        for (kind, expected) in [
            (MeasurementKind::Temperature, -5),
            (MeasurementKind::Humidity, 0),
        ] {
            let tracker = TaskTracker::new();
            let (sink, mut rx) = change_channel();
            let mut sampler = MeasurementSampler::start(
                kind,
                Duration::from_secs(60),
                Some("echo \"'-5'\"".into()),
                sink,
                &tracker,
                no_fatal,
            );
            assert_eq!(rx.recv().await, Some(expected));
            sampler.stop();
        }
    }

    #[tokio::test]
    async fn test_malformed_output_is_fatal() {
        let tracker = TaskTracker::new();
        let (sink, mut rx) = change_channel();
        let (tx, fatal) = oneshot::channel();
        let sampler = MeasurementSampler::start(
            MeasurementKind::Temperature,
            Duration::from_secs(60),
            Some("echo not-a-number".into()),
            sink,
            &tracker,
            move |e| {
                let _ = tx.send(e);
            },
        );

        let err = fatal.await.unwrap();
        assert!(matches!(err, BridgeError::MalformedSample { ref output, .. } if output.trim() == "not-a-number"));
        assert!(err.is_fatal());
        assert_eq!(rx.recv().await, None);
        assert_eq!(sampler.state(), SourceState::Stopped);
    }

    #[tokio::test]
    async fn test_failing_command_is_fatal() {
        let tracker = TaskTracker::new();
        let (sink, _rx) = change_channel();
        let (tx, fatal) = oneshot::channel();
        let _sampler = MeasurementSampler::start(
            MeasurementKind::Humidity,
            Duration::from_secs(60),
            Some("exit 3".into()),
            sink,
            &tracker,
            move |e| {
                let _ = tx.send(e);
            },
        );
        assert!(matches!(
            fatal.await.unwrap(),
            BridgeError::SampleCommand { .. }
        ));
    }
}
