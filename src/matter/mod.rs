//! rs-matter backend (feature `matter`).

mod netif;
mod node;
mod stack;

pub mod clusters;
pub mod device_types;

pub use node::MatterNode;
