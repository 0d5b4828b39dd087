//! Configuration snapshot.
//!
//! Values are resolved once at startup, in order of precedence: command line
//! or environment, then the persisted device record, then defaults. The
//! resolved values are written back so the node keeps its identity.

use crate::cli::{Cli, Commands};
use crate::input::MeasurementKind;
use crate::node::{CommissioningParams, NodeOptions, ProductMetadata};
use crate::storage::DeviceRecord;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PIN: u32 = 17;
pub const DEFAULT_DEBOUNCE_MS: u64 = 10;
pub const DEFAULT_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_PASSCODE: u32 = 20202021;
pub const DEFAULT_DISCRIMINATOR: u16 = 3840;
pub const DEFAULT_VENDOR_ID: u16 = 0xFFF1;
pub const DEFAULT_CONTACT_PRODUCT_ID: u16 = 0x8001;
pub const DEFAULT_MEASUREMENT_PRODUCT_ID: u16 = 0x8000;
pub const DEFAULT_PORT: u16 = 5540;
pub const DEFAULT_CONTACT_NODE_ID: &str = "gpio-contact-node";

const VENDOR_NAME: &str = "Prototype";

/// Strip one layer of matching single or double quotes.
pub fn strip_matching_quotes(value: &str) -> &str {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

fn load_dotenv_from(env_path: &Path) {
    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var_os(key).is_none() {
            // SAFETY: called from main before the runtime or any other thread starts
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), strip_matching_quotes(value.trim())))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioConfig {
    pub pin: u32,
    pub debounce: Duration,
    pub sysfs_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingConfig {
    pub kind: MeasurementKind,
    pub interval: Duration,
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorConfig {
    Contact(GpioConfig),
    Measurement(SamplingConfig),
}

/// Immutable startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub node: NodeOptions,
    pub sensor: SensorConfig,
    pub storage_dir: PathBuf,
    pub interface: Option<String>,
}

impl Config {
    /// Resolve the snapshot and the record to persist for the next start.
    ///
    /// `now_ms` seeds the unique id of a fresh measurement node.
    pub fn resolve(
        cli: &Cli,
        stored: &DeviceRecord,
        storage_dir: PathBuf,
        now_ms: i64,
    ) -> (Self, DeviceRecord) {
        let args = &cli.node;
        let passcode = args
            .passcode
            .or(stored.passcode)
            .unwrap_or(DEFAULT_PASSCODE);
        let discriminator = args
            .discriminator
            .or(stored.discriminator)
            .unwrap_or(DEFAULT_DISCRIMINATOR);
        let vendor_id = args
            .vendor_id
            .or(stored.vendor_id)
            .unwrap_or(DEFAULT_VENDOR_ID);
        let port = args.port.unwrap_or(DEFAULT_PORT);

        let (sensor, product, record) = match &cli.command {
            Commands::Contact {
                pin,
                debounce_ms,
                sysfs_root,
            } => {
                let unique_id = args
                    .unique_id
                    .clone()
                    .or_else(|| stored.unique_id.clone())
                    .unwrap_or_else(|| DEFAULT_CONTACT_NODE_ID.to_string());
                let product_id = args
                    .product_id
                    .or(stored.product_id)
                    .unwrap_or(DEFAULT_CONTACT_PRODUCT_ID);

                let sensor = SensorConfig::Contact(GpioConfig {
                    pin: *pin,
                    debounce: Duration::from_millis(*debounce_ms),
                    sysfs_root: sysfs_root.clone(),
                });
                let product = ProductMetadata {
                    vendor_name: VENDOR_NAME.to_string(),
                    vendor_id,
                    product_name: "Raspberry Pi GPIO Contact".to_string(),
                    product_label: "GPIO Contact".to_string(),
                    node_label: "GPIO Contact".to_string(),
                    product_id,
                    serial_number: unique_id.clone(),
                    unique_id: unique_id.clone(),
                };
                let record = DeviceRecord {
                    passcode: Some(passcode),
                    discriminator: Some(discriminator),
                    vendor_id: Some(vendor_id),
                    product_id: Some(product_id),
                    unique_id: Some(unique_id),
                    ..stored.clone()
                };
                (sensor, product, record)
            }
            Commands::Measurement {
                kind,
                interval,
                value_command,
            } => {
                let kind = resolve_kind(*kind, stored.is_temperature);
                let interval = resolve_interval(interval.or(stored.interval));
                let unique_id = args
                    .unique_id
                    .clone()
                    .or_else(|| stored.unique_id.clone())
                    .unwrap_or_else(|| now_ms.to_string());
                let product_id = args
                    .product_id
                    .or(stored.product_id)
                    .unwrap_or(DEFAULT_MEASUREMENT_PRODUCT_ID);

                let sensor = SensorConfig::Measurement(SamplingConfig {
                    kind,
                    interval: Duration::from_secs(interval.unsigned_abs()),
                    command: value_command.clone(),
                });
                let name = match kind {
                    MeasurementKind::Temperature => "Temperature Sensor",
                    MeasurementKind::Humidity => "Humidity Sensor",
                };
                let product = ProductMetadata {
                    vendor_name: VENDOR_NAME.to_string(),
                    vendor_id,
                    product_name: format!("Matter {}", name),
                    product_label: name.to_string(),
                    node_label: name.to_string(),
                    product_id,
                    serial_number: format!("sensor-{}", unique_id),
                    unique_id: unique_id.clone(),
                };
                let record = DeviceRecord {
                    passcode: Some(passcode),
                    discriminator: Some(discriminator),
                    vendor_id: Some(vendor_id),
                    product_id: Some(product_id),
                    interval: Some(interval),
                    is_temperature: Some(kind == MeasurementKind::Temperature),
                    unique_id: Some(unique_id),
                };
                (sensor, product, record)
            }
        };

        let config = Self {
            node: NodeOptions {
                id: product.unique_id.clone(),
                commissioning: CommissioningParams {
                    passcode,
                    discriminator,
                    port,
                },
                product,
            },
            sensor,
            storage_dir,
            interface: args.interface.clone(),
        };
        (config, record)
    }

    pub fn log_summary(&self) {
        let node = &self.node;
        info!("Configuration loaded:");
        info!("  Node: {} ({})", node.id, node.product.product_name);
        info!("  Vendor ID: 0x{:04X}", node.product.vendor_id);
        info!("  Product ID: 0x{:04X}", node.product.product_id);
        info!("  Discriminator: {}", node.commissioning.discriminator);
        info!("  Port: {}", node.commissioning.port);
        match &self.sensor {
            SensorConfig::Contact(gpio) => {
                info!("  GPIO pin: {} (debounce {:?})", gpio.pin, gpio.debounce);
            }
            SensorConfig::Measurement(sampling) => {
                info!("  Type: {}", sampling.kind);
                info!("  Interval: {}s", sampling.interval.as_secs());
                match &sampling.command {
                    Some(cmd) => info!("  Value command: {}", cmd),
                    None => info!("  Value command: none (random values)"),
                }
            }
        }
        info!("  Storage location: {}", self.storage_dir.display());
    }
}

/// A stored type always wins over the requested one.
fn resolve_kind(requested: Option<MeasurementKind>, stored: Option<bool>) -> MeasurementKind {
    match stored {
        Some(is_temperature) => {
            let kind = if is_temperature {
                MeasurementKind::Temperature
            } else {
                MeasurementKind::Humidity
            };
            info!(
                "Device type {} found in storage. --type parameter is ignored.",
                kind
            );
            kind
        }
        None => requested.unwrap_or(MeasurementKind::Temperature),
    }
}

fn resolve_interval(interval: Option<i64>) -> i64 {
    let interval = interval.unwrap_or(DEFAULT_INTERVAL_SECS);
    if interval < 1 {
        warn!(
            "Invalid interval {}, set to {}s",
            interval, DEFAULT_INTERVAL_SECS
        );
        return DEFAULT_INTERVAL_SECS;
    }
    interval
}
