//! Single instance lock using Unix socket.
//!
//! Prevents two bridges with the same node identity from running at once and
//! fighting over the same pin and storage. Uses a Unix socket which is
//! automatically cleaned up by the OS when the process dies, avoiding stale
//! lock files.

use crate::error::{BridgeError, Result};
use log::debug;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

/// Lock held for the lifetime of the process. Dropping it removes the socket.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock for `node_id` in the runtime directory.
    pub fn acquire(node_id: &str) -> Result<Self> {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
        Self::acquire_at(socket_path(runtime_dir.as_deref(), node_id), node_id)
    }

    fn acquire_at(path: PathBuf, node_id: &str) -> Result<Self> {
        // A socket left behind by a SIGKILL'd process refuses connections
        if path.exists() {
            match UnixStream::connect(&path) {
                Ok(_) => return Err(BridgeError::AlreadyRunning(node_id.to_string())),
                Err(_) => {
                    debug!("[Lock] Removing stale socket {:?}", path);
                    let _ = std::fs::remove_file(&path);
                }
            }
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            // Another instance bound between our check and bind
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(BridgeError::AlreadyRunning(node_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Socket path for `node_id`, under the runtime dir or `/tmp`.
pub fn socket_path(runtime_dir: Option<&Path>, node_id: &str) -> PathBuf {
    let name: String = node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    runtime_dir
        .unwrap_or(Path::new("/tmp"))
        .join(format!("matter-sensor-bridge-{}.sock", name))
}
