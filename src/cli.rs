//! Command line interface.
//!
//! Every flag has an environment fallback so the bridge can be configured from
//! a `.env` file or a service unit as well.

use crate::config::{DEFAULT_DEBOUNCE_MS, DEFAULT_PIN};
use crate::input::MeasurementKind;
use crate::input::gpio::SYSFS_GPIO_ROOT;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "matter-sensor-bridge")]
#[command(about = "Expose a GPIO contact or a sampled measurement as a Matter sensor")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub node: NodeArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Node identity and commissioning overrides, shared by both variants.
#[derive(Args, Debug, Clone, Default)]
pub struct NodeArgs {
    /// Setup passcode
    #[arg(long, env = "MATTER_PASSCODE", global = true)]
    pub passcode: Option<u32>,

    /// 12-bit discriminator
    #[arg(long, env = "MATTER_DISCRIMINATOR", global = true)]
    pub discriminator: Option<u16>,

    /// Vendor id (decimal or 0x-prefixed hex)
    #[arg(long = "vendor-id", env = "MATTER_VENDORID", value_parser = parse_id, global = true)]
    pub vendor_id: Option<u16>,

    /// Product id (decimal or 0x-prefixed hex)
    #[arg(long = "product-id", env = "MATTER_PRODUCTID", value_parser = parse_id, global = true)]
    pub product_id: Option<u16>,

    /// UDP port the node listens on
    #[arg(long, env = "MATTER_PORT", global = true)]
    pub port: Option<u16>,

    /// Unique id, also the node's storage key
    #[arg(long = "unique-id", env = "MATTER_UNIQUEID", global = true)]
    pub unique_id: Option<String>,

    /// Storage directory for the device record and node state
    #[arg(long = "storage-path", env = "MATTER_STORAGE_PATH", global = true)]
    pub storage_path: Option<PathBuf>,

    /// Start with empty storage
    #[arg(long = "storage-clear", global = true)]
    pub storage_clear: bool,

    /// Network interface for operational discovery
    #[arg(long, env = "MATTER_INTERFACE", global = true)]
    pub interface: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Contact sensor driven by a GPIO pin, with a console fallback
    Contact {
        /// GPIO pin number
        #[arg(long, env = "GPIO_PIN", default_value_t = DEFAULT_PIN)]
        pin: u32,

        /// Debounce window in milliseconds
        #[arg(long = "debounce-ms", env = "GPIO_DEBOUNCE_MS", default_value_t = DEFAULT_DEBOUNCE_MS)]
        debounce_ms: u64,

        /// sysfs GPIO root
        #[arg(long = "sysfs-root", env = "GPIO_SYSFS_ROOT", default_value = SYSFS_GPIO_ROOT)]
        sysfs_root: PathBuf,
    },
    /// Temperature or humidity sensor sampled on an interval
    Measurement {
        /// Sensor type: temperature or humidity (ignored once stored)
        #[arg(long = "type", env = "MATTER_TYPE")]
        kind: Option<MeasurementKind>,

        /// Sampling interval in seconds
        #[arg(long, env = "MATTER_INTERVAL", allow_negative_numbers = true)]
        interval: Option<i64>,

        /// Shell command printing the reading (random values if unset)
        #[arg(long = "value-command", env = "MATTER_VALUE")]
        value_command: Option<String>,
    },
}

impl Commands {
    /// Storage context of the variant. Each variant keeps its own record.
    pub fn context(&self) -> &'static str {
        match self {
            Self::Contact { .. } => "contact",
            Self::Measurement { .. } => "measurement",
        }
    }
}

/// Parse an id given as decimal or `0x` hex.
fn parse_id(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid id '{}': {}", s, e))
}
