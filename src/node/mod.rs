//! Device node seam.
//!
//! The bridge never talks to a Matter stack directly. It creates a node,
//! registers one endpoint, writes attribute values into it and waits for the
//! node to go offline. [`HeadlessNode`] keeps everything in process; the
//! rs-matter backed node lives in `crate::matter` behind the `matter` feature.

pub mod headless;
pub mod pairing;

pub use headless::HeadlessNode;
pub use pairing::generate_pairing_code;

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::warn;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strum::{Display, EnumString};

/// Kind of sensor endpoint exposed by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    /// Contact sensor using BooleanState cluster (0x0045)
    ContactSensor,
    /// Temperature sensor using TemperatureMeasurement cluster (0x0402)
    TemperatureSensor,
    /// Humidity sensor using RelativeHumidityMeasurement cluster (0x0405)
    HumiditySensor,
}

impl DeviceKind {
    /// Matter device type id.
    pub const fn device_type_id(&self) -> u16 {
        match self {
            Self::ContactSensor => 0x0015,
            Self::TemperatureSensor => 0x0302,
            Self::HumiditySensor => 0x0307,
        }
    }

    /// The attribute carrying the sensor reading for this kind.
    pub const fn attribute(&self) -> AttributePath {
        match self {
            Self::ContactSensor => AttributePath::BOOLEAN_STATE_VALUE,
            Self::TemperatureSensor => AttributePath::TEMPERATURE_MEASURED_VALUE,
            Self::HumiditySensor => AttributePath::HUMIDITY_MEASURED_VALUE,
        }
    }

    /// Check that `value` fits the attribute encoding for this kind.
    pub fn accepts(&self, value: AttributeValue) -> bool {
        match (self, value) {
            (Self::ContactSensor, AttributeValue::Bool(_)) => true,
            // MeasuredValue is int16 in centidegrees
            (Self::TemperatureSensor, AttributeValue::Int(v)) => {
                (i16::MIN as i32..=i16::MAX as i32).contains(&v)
            }
            // MeasuredValue is uint16, 0..=10000
            (Self::HumiditySensor, AttributeValue::Int(v)) => (0..=10_000).contains(&v),
            _ => false,
        }
    }
}

/// Cluster/attribute address inside an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributePath {
    pub cluster: &'static str,
    pub attribute: &'static str,
    pub cluster_id: u32,
    pub attribute_id: u32,
}

impl AttributePath {
    pub const BOOLEAN_STATE_VALUE: Self = Self {
        cluster: "booleanState",
        attribute: "stateValue",
        cluster_id: 0x0045,
        attribute_id: 0x0000,
    };

    pub const TEMPERATURE_MEASURED_VALUE: Self = Self {
        cluster: "temperatureMeasurement",
        attribute: "measuredValue",
        cluster_id: 0x0402,
        attribute_id: 0x0000,
    };

    pub const HUMIDITY_MEASURED_VALUE: Self = Self {
        cluster: "relativeHumidityMeasurement",
        attribute: "measuredValue",
        cluster_id: 0x0405,
        attribute_id: 0x0000,
    };
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cluster, self.attribute)
    }
}

/// Attribute payload written by the propagator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i32),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
        }
    }
}

/// Passcodes the Matter core specification forbids (section 5.1.7.1).
const INVALID_PASSCODES: [u32; 12] = [
    0, 11111111, 22222222, 33333333, 44444444, 55555555, 66666666, 77777777, 88888888,
    99999999, 12345678, 87654321,
];

/// Commissioning parameters for the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissioningParams {
    pub passcode: u32,
    pub discriminator: u16,
    pub port: u16,
}

impl CommissioningParams {
    /// Reject values a controller would refuse to pair with.
    pub fn validate(&self) -> Result<()> {
        if self.passcode > 99_999_998 || INVALID_PASSCODES.contains(&self.passcode) {
            return Err(BridgeError::Commissioning(format!(
                "passcode {} is not allowed",
                self.passcode
            )));
        }
        if self.discriminator > 0x0FFF {
            return Err(BridgeError::Commissioning(format!(
                "discriminator {} exceeds 12 bits",
                self.discriminator
            )));
        }
        if self.port == 0 {
            return Err(BridgeError::Commissioning("port must not be 0".into()));
        }
        Ok(())
    }

    /// 11-digit manual pairing code for these parameters.
    pub fn manual_pairing_code(&self) -> String {
        generate_pairing_code(self.discriminator, self.passcode)
    }
}

/// BasicInformation values announced by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductMetadata {
    pub vendor_name: String,
    pub vendor_id: u16,
    pub product_name: String,
    pub product_label: String,
    pub node_label: String,
    pub product_id: u16,
    pub serial_number: String,
    pub unique_id: String,
}

/// Everything needed to create a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOptions {
    /// Stable node id, also the storage key for node state
    pub id: String,
    pub commissioning: CommissioningParams,
    pub product: ProductMetadata,
}

/// Endpoint to register on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub id: String,
    pub kind: DeviceKind,
    /// Value the attribute holds before the first propagated reading
    pub initial: AttributeValue,
}

impl EndpointDescriptor {
    pub fn new(id: impl Into<String>, kind: DeviceKind, initial: impl Into<AttributeValue>) -> Self {
        Self {
            id: id.into(),
            kind,
            initial: initial.into(),
        }
    }
}

pub type OfflineCallback = Box<dyn Fn() + Send + Sync>;

/// Remote-visible attribute store of one endpoint.
#[async_trait]
pub trait NodeEndpoint: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> DeviceKind;

    /// Write one attribute value. May fail if the node is not ready or rejects the value.
    async fn set_attribute(&self, path: &AttributePath, value: AttributeValue) -> Result<()>;
}

/// A commissionable device node.
#[async_trait]
pub trait DeviceNode: Send + Sync {
    fn id(&self) -> &str;

    async fn add_endpoint(&self, descriptor: EndpointDescriptor) -> Result<Arc<dyn NodeEndpoint>>;

    /// Bring the node online. Resolves once the node is offline again.
    async fn run(&self) -> Result<()>;

    /// Register a callback for the node's offline lifecycle event.
    fn on_offline(&self, callback: OfflineCallback);

    /// Ask the node to go offline. Idempotent.
    fn close(&self);
}

/// One-shot lifecycle event shared by node implementations.
#[derive(Default)]
pub struct OfflineEvent {
    fired: AtomicBool,
    callbacks: Mutex<Vec<OfflineCallback>>,
}

impl OfflineEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Register a callback. Runs immediately if the event already fired.
    pub fn subscribe(&self, callback: OfflineCallback) {
        let mut callbacks = self.callbacks.lock();
        if self.has_fired() {
            drop(callbacks);
            callback();
            return;
        }
        callbacks.push(callback);
    }

    /// Fire the event. Only the first call runs the callbacks.
    pub fn fire(&self) {
        let callbacks = {
            let mut callbacks = self.callbacks.lock();
            if self.fired.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };
        if callbacks.is_empty() {
            warn!("[Node] Offline event fired with no listeners");
        }
        for callback in callbacks {
            callback();
        }
    }
}

#[cfg(test)]
pub(crate) fn test_node_options() -> NodeOptions {
    NodeOptions {
        id: "test-node".into(),
        commissioning: CommissioningParams {
            passcode: 20202021,
            discriminator: 3840,
            port: 5540,
        },
        product: ProductMetadata {
            vendor_name: "Prototype".into(),
            vendor_id: 0xFFF1,
            product_name: "Test Sensor".into(),
            product_label: "Test Sensor".into(),
            node_label: "Test Sensor".into(),
            product_id: 0x8001,
            serial_number: "test-node".into(),
            unique_id: "test-node".into(),
        },
    }
}
