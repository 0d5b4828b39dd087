//! Matter device types exposed by the bridge.

use rs_matter::dm::DeviceType;

/// Matter Contact Sensor device type
///
/// Required clusters: BooleanState (0x0045), Descriptor
pub const DEV_TYPE_CONTACT_SENSOR: DeviceType = DeviceType {
    dtype: 0x0015,
    drev: 1,
};

/// Matter Temperature Sensor device type
///
/// Required clusters: TemperatureMeasurement (0x0402), Identify, Descriptor
pub const DEV_TYPE_TEMPERATURE_SENSOR: DeviceType = DeviceType {
    dtype: 0x0302,
    drev: 2,
};

/// Matter Humidity Sensor device type
///
/// Required clusters: RelativeHumidityMeasurement (0x0405), Identify, Descriptor
pub const DEV_TYPE_HUMIDITY_SENSOR: DeviceType = DeviceType {
    dtype: 0x0307,
    drev: 2,
};
