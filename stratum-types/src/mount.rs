//! Mount and install-target bindings
//!
//! Bindings are weak references into the topology: removing the backing
//! device invalidates them. A "target" binding belongs to an offline
//! install image being prepared for later boot, not to the live system.

use serde::{Deserialize, Serialize};

/// Reference to the device or partition backing a mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingRef {
    /// Backing block device name
    pub device: String,

    /// Partition index on the device, or None for whole-device use
    pub partition: Option<u32>,
}

/// A mount point or install-target binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountBinding {
    /// Absolute mount path
    pub path: String,

    /// Filesystem kind (e.g., "ext4", "vfat", "swap")
    pub fs_kind: String,

    /// Mount options, comma-separated as in fstab
    pub options: String,

    /// What the binding is backed by
    pub backing: BackingRef,

    /// Whether this binding belongs to an offline install image
    pub target: bool,
}

impl MountBinding {
    /// Whether `path` is acceptable as a binding path (absolute, non-root ok)
    pub fn path_is_valid(path: &str) -> bool {
        path.starts_with('/') && !path.contains("//")
    }
}
