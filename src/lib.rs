//! Matter sensor bridge library.
//!
//! Bridges a GPIO contact, or a periodically sampled temperature or humidity
//! reading, into the sensor attribute of a commissionable device node.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod instance_lock;
pub mod lifecycle;
#[cfg(feature = "matter")]
pub mod matter;
pub mod node;
pub mod propagate;
pub mod storage;
