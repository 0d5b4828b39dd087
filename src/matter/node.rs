//! rs-matter backed [`DeviceNode`].

use super::clusters::SensorCell;
use super::stack::{StackParams, run_matter_stack};
use crate::error::{BridgeError, Result};
use crate::node::{
    AttributePath, AttributeValue, DeviceKind, DeviceNode, EndpointDescriptor, NodeEndpoint,
    NodeOptions, OfflineCallback, OfflineEvent,
};
use async_trait::async_trait;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Stack thread stack size (matches rs-matter examples)
const STACK_THREAD_SIZE: usize = 550 * 1024;

/// Commissionable Matter node with one sensor endpoint.
pub struct MatterNode {
    options: NodeOptions,
    storage_dir: PathBuf,
    interface: Option<String>,
    endpoint: Mutex<Option<Arc<MatterEndpoint>>>,
    stop: CancellationToken,
    offline: Arc<OfflineEvent>,
}

impl MatterNode {
    pub fn create(
        options: NodeOptions,
        storage_dir: impl Into<PathBuf>,
        interface: Option<String>,
    ) -> Result<Self> {
        options.commissioning.validate()?;
        Ok(Self {
            options,
            storage_dir: storage_dir.into(),
            interface,
            endpoint: Mutex::new(None),
            stop: CancellationToken::new(),
            offline: Arc::new(OfflineEvent::new()),
        })
    }
}

#[async_trait]
impl DeviceNode for MatterNode {
    fn id(&self) -> &str {
        &self.options.id
    }

    async fn add_endpoint(&self, descriptor: EndpointDescriptor) -> Result<Arc<dyn NodeEndpoint>> {
        let path = descriptor.kind.attribute();
        let initial = match descriptor.initial {
            AttributeValue::Bool(v) => i32::from(v),
            AttributeValue::Int(v) => v,
        };
        if !descriptor.kind.accepts(descriptor.initial) {
            return Err(BridgeError::UnsupportedAttribute {
                path: path.to_string(),
                value: descriptor.initial.to_string(),
            });
        }

        let mut slot = self.endpoint.lock();
        if let Some(existing) = slot.as_ref() {
            return Err(BridgeError::DuplicateEndpoint(existing.id.clone()));
        }
        let endpoint = Arc::new(MatterEndpoint {
            id: descriptor.id,
            kind: descriptor.kind,
            sensor: Arc::new(SensorCell::new(initial)),
            offline: self.offline.clone(),
        });
        *slot = Some(endpoint.clone());
        info!(
            "[Matter] Endpoint '{}' ({}) registered",
            endpoint.id, endpoint.kind
        );
        Ok(endpoint)
    }

    async fn run(&self) -> Result<()> {
        let Some(endpoint) = self.endpoint.lock().clone() else {
            return Err(BridgeError::NodeStartFailed("no endpoint registered".into()));
        };

        let params = StackParams {
            options: self.options.clone(),
            kind: endpoint.kind,
            sensor: endpoint.sensor.clone(),
            storage_dir: self.storage_dir.clone(),
            interface: self.interface.clone(),
        };
        let stop = self.stop.clone();
        let (tx, rx) = oneshot::channel();

        // rs-matter drives its own executor; give it a dedicated thread
        std::thread::Builder::new()
            .name("matter-stack".into())
            .stack_size(STACK_THREAD_SIZE)
            .spawn(move || {
                let result = futures_lite::future::block_on(run_matter_stack(params, stop));
                let _ = tx.send(result);
            })
            .map_err(|e| BridgeError::NodeStartFailed(e.to_string()))?;

        info!("[Matter] Node '{}' starting", self.options.id);
        let result = match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::NodeStartFailed(format!("{:?}", e))),
            Err(_) => Err(BridgeError::NodeStartFailed(
                "stack thread exited without a result".into(),
            )),
        };
        if let Err(e) = &result {
            error!("[Matter] {}", e);
        }
        info!("[Matter] Node '{}' offline", self.options.id);
        self.offline.fire();
        result
    }

    fn on_offline(&self, callback: OfflineCallback) {
        self.offline.subscribe(callback);
    }

    fn close(&self) {
        self.stop.cancel();
    }
}

struct MatterEndpoint {
    id: String,
    kind: DeviceKind,
    sensor: Arc<SensorCell>,
    offline: Arc<OfflineEvent>,
}

#[async_trait]
impl NodeEndpoint for MatterEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    async fn set_attribute(&self, path: &AttributePath, value: AttributeValue) -> Result<()> {
        if self.offline.has_fired() {
            return Err(BridgeError::NodeOffline);
        }
        if *path != self.kind.attribute() || !self.kind.accepts(value) {
            return Err(BridgeError::UnsupportedAttribute {
                path: path.to_string(),
                value: value.to_string(),
            });
        }
        let raw = match value {
            AttributeValue::Bool(v) => i32::from(v),
            AttributeValue::Int(v) => v,
        };
        self.sensor.set(raw);
        debug!("[Matter] {}/{} = {}", self.id, path, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_endpoint_writes_reach_sensor_cell() {
        let node =
            MatterNode::create(crate::node::test_node_options(), "/tmp/unused", None).unwrap();
        let endpoint = node
            .add_endpoint(EndpointDescriptor::new(
                "tempsensor",
                DeviceKind::TemperatureSensor,
                0,
            ))
            .await
            .unwrap();
        endpoint
            .set_attribute(&AttributePath::TEMPERATURE_MEASURED_VALUE, 2150.into())
            .await
            .unwrap();

        let cell = node.endpoint.lock().as_ref().unwrap().sensor.clone();
        assert_eq!(cell.get(), 2150);
        assert_eq!(cell.version(), 1);

        assert!(matches!(
            node.add_endpoint(EndpointDescriptor::new(
                "other",
                DeviceKind::TemperatureSensor,
                0
            ))
            .await,
            Err(BridgeError::DuplicateEndpoint(_))
        ));
    }
}
