//! Device topology store
//!
//! The owned forest of controllers, block devices, partitions, and mount
//! bindings. Nodes live in generation-checked arenas: parent and binding
//! relations are handle lookups, never raw back-pointers, so a removal can
//! never leave a dangling reference - a stale handle resolves to `NotFound`.

mod arena;
mod store;

pub use arena::NodeHandle;
pub use store::{ControllerHandle, DeviceHandle, TopologyStore};
