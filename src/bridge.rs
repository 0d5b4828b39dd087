//! Wiring of one endpoint to one input source for the life of the node.

use crate::error::Result;
use crate::input::{ChangeSink, InputSource, change_channel};
use crate::lifecycle::{ShutdownCoordinator, ShutdownReason};
use crate::node::{AttributeValue, DeviceNode, EndpointDescriptor};
use crate::propagate::{ChangePropagator, spawn_propagation};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;

/// How long shutdown waits for input tasks and the propagation pump
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run `node` with a single endpoint fed by the source `acquire` builds.
///
/// Endpoint registration failures are returned before anything is started.
/// `acquire` runs on the blocking pool, since opening hardware may sleep.
/// Afterwards every way out (signal, node offline, run loop return, fatal
/// source error) goes through `coordinator`, and the result is the process
/// exit code.
pub async fn serve<V, F>(
    node: Arc<dyn DeviceNode>,
    descriptor: EndpointDescriptor,
    coordinator: Arc<ShutdownCoordinator>,
    acquire: F,
) -> Result<i32>
where
    V: Into<AttributeValue> + Send + 'static,
    F: FnOnce(ChangeSink<V>, &TaskTracker, Arc<ShutdownCoordinator>) -> Box<dyn InputSource>
        + Send
        + 'static,
{
    let endpoint = node.add_endpoint(descriptor).await?;
    let propagator = Arc::new(ChangePropagator::new(endpoint));
    let (sink, rx) = change_channel::<V>();
    let pump = spawn_propagation(propagator.clone(), rx);
    let tracker = TaskTracker::new();

    {
        let coordinator = coordinator.clone();
        node.on_offline(Box::new(move || {
            coordinator.trigger(ShutdownReason::NodeOffline)
        }));
    }
    {
        let node = node.clone();
        let token = coordinator.token();
        tokio::spawn(async move {
            token.cancelled().await;
            node.close();
        });
    }

    let source = {
        let tracker = tracker.clone();
        let coordinator = coordinator.clone();
        tokio::task::spawn_blocking(move || acquire(sink, &tracker, coordinator)).await?
    };
    info!("Using {} input", source.kind());
    coordinator.register(source)?;

    info!("Matter sensor node '{}' is starting.", node.id());
    let reason = match node.run().await {
        Ok(()) => ShutdownReason::RunLoopReturned,
        Err(e) => ShutdownReason::Fatal(e.to_string()),
    };
    coordinator.trigger(reason);

    tracker.close();
    if timeout(SHUTDOWN_GRACE, tracker.wait()).await.is_err() {
        warn!("[Shutdown] Input tasks did not finish in time");
    }
    if timeout(SHUTDOWN_GRACE, pump).await.is_err() {
        warn!("[Shutdown] Pending updates dropped");
    }
    propagator.log_stats();

    let fatal = coordinator.reason().is_some_and(|r| r.is_fatal());
    Ok(if fatal { 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::input::{Console, MeasurementKind, MeasurementSampler};
    use crate::node::{AttributePath, DeviceKind, HeadlessNode, test_node_options};
    use tokio::io::{AsyncWriteExt, BufReader};

    fn headless() -> Arc<HeadlessNode> {
        Arc::new(HeadlessNode::create(test_node_options()).unwrap())
    }

    async fn wait_for_contact(node: &HeadlessNode, expected: bool) {
        let path = AttributePath::BOOLEAN_STATE_VALUE;
        timeout(Duration::from_secs(2), async {
            while node.read_attribute("contact", &path) != Some(AttributeValue::Bool(expected)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failing_value_command_exits_with_error() {
        let node = headless();
        let coordinator = ShutdownCoordinator::new();
        let descriptor = EndpointDescriptor::new("tempsensor", DeviceKind::TemperatureSensor, 0);

        let code = timeout(
            Duration::from_secs(10),
            serve(node.clone(), descriptor, coordinator.clone(), |sink, tracker, coordinator| {
                Box::new(MeasurementSampler::start(
                    MeasurementKind::Temperature,
                    Duration::from_secs(60),
                    Some("echo nope".to_string()),
                    sink,
                    tracker,
                    move |e| coordinator.trigger(ShutdownReason::Fatal(e.to_string())),
                ))
            }),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(code, 1);
        assert!(coordinator.reason().is_some_and(|r| r.is_fatal()));
        assert!(node.is_offline());
    }

    #[tokio::test]
    async fn test_close_stops_console_and_keeps_last_value() {
        let node = headless();
        let coordinator = ShutdownCoordinator::new();
        let (mut writer, reader) = tokio::io::duplex(64);
        let descriptor = EndpointDescriptor::new("contact", DeviceKind::ContactSensor, false);

        let serving = tokio::spawn(serve(
            node.clone(),
            descriptor,
            coordinator.clone(),
            move |sink, tracker, _| {
                Box::new(Console::new(BufReader::new(reader)).start(sink, tracker))
            },
        ));

        for expected in [true, false, true] {
            writer.write_all(b"\n").await.unwrap();
            wait_for_contact(&node, expected).await;
        }
        node.close();

        // The writer stays open: only the stopped source lets the tracker drain
        let code = timeout(Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(
            node.read_attribute("contact", &AttributePath::BOOLEAN_STATE_VALUE),
            Some(AttributeValue::Bool(true))
        );
        assert!(!coordinator.reason().is_some_and(|r| r.is_fatal()));
    }

    #[tokio::test]
    async fn test_signal_shutdown_closes_node() {
        let node = headless();
        let coordinator = ShutdownCoordinator::new();
        let (_writer, reader) = tokio::io::duplex(64);
        let descriptor = EndpointDescriptor::new("contact", DeviceKind::ContactSensor, false);

        let serving = tokio::spawn(serve(
            node.clone(),
            descriptor,
            coordinator.clone(),
            move |sink, tracker, _| {
                Box::new(Console::new(BufReader::new(reader)).start(sink, tracker))
            },
        ));
        tokio::task::yield_now().await;
        coordinator.trigger(ShutdownReason::Signal("SIGTERM"));

        let code = timeout(Duration::from_secs(2), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(code, 0);
        assert!(node.is_offline());
    }

    #[tokio::test]
    async fn test_endpoint_failure_starts_nothing() {
        let node = headless();
        let coordinator = ShutdownCoordinator::new();
        // A contact endpoint cannot hold an integer
        let descriptor = EndpointDescriptor::new("contact", DeviceKind::ContactSensor, 1);

        let result = serve(node.clone(), descriptor, coordinator.clone(), |sink, tracker, _| {
            let (_writer, reader) = tokio::io::duplex(8);
            Box::new(Console::new(BufReader::new(reader)).start(sink, tracker))
        })
        .await;

        assert!(matches!(result, Err(BridgeError::UnsupportedAttribute { .. })));
        assert!(!coordinator.is_shutting_down());
        assert!(!node.is_offline());
    }
}
