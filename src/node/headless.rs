//! In-process device node.
//!
//! Keeps the attribute store in memory and logs every write. Used when the
//! bridge is built without the `matter` feature, and by tests.

use super::{
    AttributePath, AttributeValue, DeviceKind, DeviceNode, EndpointDescriptor, NodeEndpoint,
    NodeOptions, OfflineCallback, OfflineEvent,
};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Node that never leaves the process.
pub struct HeadlessNode {
    options: NodeOptions,
    endpoints: RwLock<HashMap<String, Arc<HeadlessEndpoint>>>,
    stop: CancellationToken,
    offline: Arc<OfflineEvent>,
}

impl HeadlessNode {
    /// Create a node. Fails if the commissioning parameters are unusable.
    pub fn create(options: NodeOptions) -> Result<Self> {
        options.commissioning.validate()?;
        info!(
            "[Node] Created headless node '{}' ({} / 0x{:04X}:0x{:04X})",
            options.id,
            options.product.product_name,
            options.product.vendor_id,
            options.product.product_id
        );
        Ok(Self {
            options,
            endpoints: RwLock::new(HashMap::new()),
            stop: CancellationToken::new(),
            offline: Arc::new(OfflineEvent::new()),
        })
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Current value of an attribute on one of this node's endpoints.
    pub fn read_attribute(&self, endpoint_id: &str, path: &AttributePath) -> Option<AttributeValue> {
        let endpoints = self.endpoints.read();
        let endpoint = endpoints.get(endpoint_id)?;
        endpoint.attributes.read().get(path).copied()
    }

    pub fn is_offline(&self) -> bool {
        self.offline.has_fired()
    }
}

#[async_trait]
impl DeviceNode for HeadlessNode {
    fn id(&self) -> &str {
        &self.options.id
    }

    async fn add_endpoint(&self, descriptor: EndpointDescriptor) -> Result<Arc<dyn NodeEndpoint>> {
        let path = descriptor.kind.attribute();
        if !descriptor.kind.accepts(descriptor.initial) {
            return Err(BridgeError::UnsupportedAttribute {
                path: path.to_string(),
                value: descriptor.initial.to_string(),
            });
        }

        let mut endpoints = self.endpoints.write();
        if endpoints.contains_key(&descriptor.id) {
            return Err(BridgeError::DuplicateEndpoint(descriptor.id));
        }

        let endpoint = Arc::new(HeadlessEndpoint {
            id: descriptor.id.clone(),
            kind: descriptor.kind,
            attributes: RwLock::new(HashMap::from([(path, descriptor.initial)])),
            offline: self.offline.clone(),
        });
        endpoints.insert(descriptor.id.clone(), endpoint.clone());
        info!(
            "[Node] Added endpoint '{}' ({}, {} = {})",
            descriptor.id, descriptor.kind, path, descriptor.initial
        );
        Ok(endpoint)
    }

    async fn run(&self) -> Result<()> {
        if self.offline.has_fired() {
            return Ok(());
        }
        info!(
            "[Node] '{}' online with {} endpoint(s)",
            self.options.id,
            self.endpoints.read().len()
        );
        self.stop.cancelled().await;
        info!("[Node] '{}' going offline", self.options.id);
        self.offline.fire();
        Ok(())
    }

    fn on_offline(&self, callback: OfflineCallback) {
        self.offline.subscribe(callback);
    }

    fn close(&self) {
        self.stop.cancel();
    }
}

struct HeadlessEndpoint {
    id: String,
    kind: DeviceKind,
    attributes: RwLock<HashMap<AttributePath, AttributeValue>>,
    offline: Arc<OfflineEvent>,
}

#[async_trait]
impl NodeEndpoint for HeadlessEndpoint {
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
        self.attributes.write().insert(*path, value);
        debug!("[Node] {}/{} = {}", self.id, path, value);
        Ok(())
    }
}
