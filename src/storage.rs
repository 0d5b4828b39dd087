//! Persisted device record.
//!
//! Commissioning values and the node's unique id are written back after every
//! start so the node keeps its identity across restarts. Each sensor variant
//! uses its own context file inside the storage directory.

use crate::error::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name under the platform data dir
const STORAGE_DIR: &str = "matter-sensor-bridge";

/// Values remembered between runs. Absent fields fall back to CLI/env or defaults.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceRecord {
    pub passcode: Option<u32>,
    pub discriminator: Option<u16>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub interval: Option<i64>,
    pub is_temperature: Option<bool>,
    pub unique_id: Option<String>,
}

/// JSON-file storage for one device context.
#[derive(Debug, Clone)]
pub struct DeviceStorage {
    dir: PathBuf,
    path: PathBuf,
}

impl DeviceStorage {
    /// Default storage directory (`$XDG_DATA_HOME/matter-sensor-bridge` or similar).
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STORAGE_DIR)
    }

    /// Open (creating if needed) the storage directory for `context`.
    pub fn open(dir: impl Into<PathBuf>, context: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", context));
        Ok(Self { dir, path })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record. Missing or unreadable files yield an empty record.
    pub fn load(&self) -> DeviceRecord {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<DeviceRecord>(&bytes) {
                Ok(record) => {
                    info!("[Storage] Loaded device record from {:?}", self.path);
                    record
                }
                Err(e) => {
                    warn!("[Storage] Failed to parse {:?}: {}", self.path, e);
                    DeviceRecord::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("[Storage] No device record found (first run)");
                DeviceRecord::default()
            }
            Err(e) => {
                error!("[Storage] Failed to read {:?}: {}", self.path, e);
                DeviceRecord::default()
            }
        }
    }

    pub fn save(&self, record: &DeviceRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(record)?;
        fs::write(&self.path, data)?;
        info!("[Storage] Saved device record to {:?}", self.path);
        Ok(())
    }

    /// Wipe everything in the storage directory, including node state.
    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        fs::create_dir_all(&self.dir)?;
        info!("[Storage] Cleared {:?}", self.dir);
        Ok(())
    }
}
