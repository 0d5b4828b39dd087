//! Read-only sensor clusters.
//!
//! BooleanState, TemperatureMeasurement and RelativeHumidityMeasurement all
//! expose one measured attribute, optionally with a fixed range. A single
//! [`SensorClusterHandler`] serves any of them from a [`SensorCell`], driven by
//! a [`SensorCluster`] descriptor. The node endpoint writes into the cell;
//! the handler notices the version bump on the next read and bumps its
//! dataver so subscribers get a report.

use rs_matter::dm::{
    Access, Attribute, Cluster, Dataver, Handler, NonBlockingHandler, Quality, ReadContext,
    ReadReply, Reply, WriteContext,
};
use rs_matter::error::{Error, ErrorCode};
use rs_matter::tlv::TLVWrite;
use rs_matter::{attribute_enum, attributes, with};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use strum::FromRepr;

/// Latest sensor reading plus a change counter.
///
/// Booleans are stored as 0/1.
#[derive(Debug, Default)]
pub struct SensorCell {
    value: AtomicI32,
    version: AtomicU32,
}

impl SensorCell {
    pub fn new(initial: i32) -> Self {
        Self {
            value: AtomicI32::new(initial),
            version: AtomicU32::new(0),
        }
    }

    pub fn get(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: i32) {
        self.value.store(value, Ordering::SeqCst);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }
}

/// Bump `dataver` if the cell changed since the last read.
pub fn sync_dataver_with_sensor(sensor: &SensorCell, last_version: &AtomicU32, dataver: &Dataver) {
    let current = sensor.version();
    let last = last_version.swap(current, Ordering::SeqCst);
    if current != last {
        dataver.changed();
    }
}

/// Attribute ids shared by the measurement clusters.
///
/// BooleanState only has `0x0000` (StateValue).
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromRepr)]
#[repr(u32)]
pub enum SensorAttribute {
    MeasuredValue = 0x0000,
    MinMeasuredValue = 0x0001,
    MaxMeasuredValue = 0x0002,
    Tolerance = 0x0003,
}

attribute_enum!(SensorAttribute);

/// TLV type of the measured value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueEncoding {
    Bool,
    I16,
    U16,
}

/// A value ready to be written as TLV.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncodedValue {
    Bool(bool),
    I16(i16),
    U16(u16),
}

/// Static description of one sensor cluster.
pub struct SensorCluster {
    pub cluster: Cluster<'static>,
    pub encoding: ValueEncoding,
    pub min: i32,
    pub max: i32,
}

impl SensorCluster {
    /// Value of `attribute` given the current `reading`.
    ///
    /// Readings outside the TLV type are reported as the type's "unknown"
    /// sentinel; endpoint writes are range-checked before they get here.
    pub fn encode(&self, attribute: SensorAttribute, reading: i32) -> EncodedValue {
        let raw = match attribute {
            SensorAttribute::MeasuredValue => reading,
            SensorAttribute::MinMeasuredValue => self.min,
            SensorAttribute::MaxMeasuredValue => self.max,
            SensorAttribute::Tolerance => return EncodedValue::U16(0),
        };
        match self.encoding {
            ValueEncoding::Bool => EncodedValue::Bool(raw != 0),
            ValueEncoding::I16 => EncodedValue::I16(i16::try_from(raw).unwrap_or(i16::MIN)),
            ValueEncoding::U16 => EncodedValue::U16(u16::try_from(raw).unwrap_or(u16::MAX)),
        }
    }
}

/// BooleanState (0x0045), contact sensor.
pub const BOOLEAN_STATE: SensorCluster = SensorCluster {
    cluster: Cluster {
        id: 0x0045,
        revision: 1,
        feature_map: 0,
        attributes: attributes!(Attribute::new(
            SensorAttribute::MeasuredValue as _,
            Access::RV,
            Quality::NONE
        ),),
        commands: &[],
        with_attrs: with!(all),
        with_cmds: with!(all),
    },
    encoding: ValueEncoding::Bool,
    min: 0,
    max: 1,
};

/// TemperatureMeasurement (0x0402), centidegrees Celsius.
///
/// Advertised range: -50.00°C (lowest simulated reading) to 125.00°C.
pub const TEMPERATURE_MEASUREMENT: SensorCluster = SensorCluster {
    cluster: Cluster {
        id: 0x0402,
        revision: 4,
        feature_map: 0,
        attributes: attributes!(
            Attribute::new(
                SensorAttribute::MeasuredValue as _,
                Access::RV,
                Quality::NULLABLE
            ),
            Attribute::new(
                SensorAttribute::MinMeasuredValue as _,
                Access::RV,
                Quality::NULLABLE
            ),
            Attribute::new(
                SensorAttribute::MaxMeasuredValue as _,
                Access::RV,
                Quality::NULLABLE
            ),
            Attribute::new(SensorAttribute::Tolerance as _, Access::RV, Quality::NONE),
        ),
        commands: &[],
        with_attrs: with!(all),
        with_cmds: with!(all),
    },
    encoding: ValueEncoding::I16,
    min: -5000,
    max: 12500,
};

/// RelativeHumidityMeasurement (0x0405), hundredths of a percent.
///
/// Readings are passed through unscaled: a value command should print
/// hundredths (4200 for 42%). Simulated readings are drawn from 0..=100.
pub const RELATIVE_HUMIDITY: SensorCluster = SensorCluster {
    cluster: Cluster {
        id: 0x0405,
        revision: 3,
        feature_map: 0,
        attributes: attributes!(
            Attribute::new(
                SensorAttribute::MeasuredValue as _,
                Access::RV,
                Quality::NULLABLE
            ),
            Attribute::new(
                SensorAttribute::MinMeasuredValue as _,
                Access::RV,
                Quality::NULLABLE
            ),
            Attribute::new(
                SensorAttribute::MaxMeasuredValue as _,
                Access::RV,
                Quality::NULLABLE
            ),
        ),
        commands: &[],
        with_attrs: with!(all),
        with_cmds: with!(all),
    },
    encoding: ValueEncoding::U16,
    min: 0,
    max: 10_000,
};

/// Read-only handler for one [`SensorCluster`] backed by a [`SensorCell`].
pub struct SensorClusterHandler {
    meta: &'static SensorCluster,
    dataver: Dataver,
    sensor: Arc<SensorCell>,
    last_sensor_version: AtomicU32,
}

impl SensorClusterHandler {
    pub fn new(meta: &'static SensorCluster, dataver: Dataver, sensor: Arc<SensorCell>) -> Self {
        Self {
            meta,
            dataver,
            sensor,
            last_sensor_version: AtomicU32::new(0),
        }
    }

    pub fn cluster_id(&self) -> u32 {
        self.meta.cluster.id
    }

    fn read_impl(&self, ctx: impl ReadContext, reply: impl ReadReply) -> Result<(), Error> {
        sync_dataver_with_sensor(&self.sensor, &self.last_sensor_version, &self.dataver);

        let attr = ctx.attr();

        let Some(mut writer) = reply.with_dataver(self.dataver.get())? else {
            return Ok(());
        };

        if attr.is_system() {
            return self.meta.cluster.read(attr, writer);
        }

        let attribute: SensorAttribute = attr.attr_id.try_into()?;
        if self.meta.encoding == ValueEncoding::Bool && attribute != SensorAttribute::MeasuredValue
        {
            return Err(ErrorCode::AttributeNotFound.into());
        }

        let tag = writer.tag();
        {
            let mut tw = writer.writer();

            match self.meta.encode(attribute, self.sensor.get()) {
                EncodedValue::Bool(v) => tw.bool(tag, v)?,
                EncodedValue::I16(v) => tw.i16(tag, v)?,
                EncodedValue::U16(v) => tw.u16(tag, v)?,
            }
        }

        writer.complete()
    }
}

impl Handler for SensorClusterHandler {
    fn read(&self, ctx: impl ReadContext, reply: impl ReadReply) -> Result<(), Error> {
        self.read_impl(ctx, reply)
    }

    fn write(&self, _ctx: impl WriteContext) -> Result<(), Error> {
        Err(ErrorCode::UnsupportedAccess.into())
    }
}

impl NonBlockingHandler for SensorClusterHandler {}
