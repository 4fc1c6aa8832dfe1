//! Block device models
//!
//! These types represent the canonical domain model for block devices.
//! A device's layout is a closed sum type: it is unformatted, carries a
//! partition table, or is a RAID/pool composite - never more than one at a
//! time. Filesystem/swap/mount attributes may sit directly on an
//! unformatted device, mutually exclusive with a partition table.

use serde::{Deserialize, Serialize};

use crate::partition::TableKind;

/// Connection bus a block device is attached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    Ata,
    Scsi,
    Nvme,
    Usb,
    Virtual,
    Unknown,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ata => "ata",
            Self::Scsi => "scsi",
            Self::Nvme => "nvme",
            Self::Usb => "usb",
            Self::Virtual => "virtual",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ata" | "sata" | "ide" => Self::Ata,
            "scsi" | "sas" => Self::Scsi,
            "nvme" => Self::Nvme,
            "usb" => Self::Usb,
            "loop" | "virtual" | "md" | "zpool" => Self::Virtual,
            _ => Self::Unknown,
        }
    }
}

/// One component of a RAID composite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidMember {
    /// Name of the component block device
    pub device: String,

    /// Partition index on the component, if the slave is a partition
    pub partition: Option<u32>,

    /// Logical role within the array (e.g., "active", "spare")
    pub role: String,
}

/// Pool composite metadata (zpool-style volume manager group)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetadata {
    /// On-disk pool format version
    pub version: u64,

    /// Number of member devices
    pub member_count: u32,

    /// Redundancy level description (e.g., "mirror", "raidz1")
    pub redundancy: String,
}

/// How a block device's capacity is organized.
///
/// Exactly one variant applies to a device at any time; mutation code
/// dispatches by exhaustive matching so a new layout kind is a compile-time
/// checked, single-point change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceLayout {
    /// No recognized organization (may carry a filesystem directly)
    Unformatted,

    /// Carries a partition table of the given kind
    Partitioned { table: TableKind },

    /// Assembled from slave devices by a RAID driver
    RaidComposite { members: Vec<RaidMember> },

    /// A storage-pool volume manager group
    PoolComposite { meta: PoolMetadata },
}

impl DeviceLayout {
    /// Whether this layout may carry a partition table
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Self::Partitioned { .. })
    }
}

/// Complete block device information (single source of truth)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceInfo {
    // === Identity ===
    /// Device name, unique within the topology (e.g., "sda", "nvme0n1")
    pub name: String,

    /// Device model name
    pub model: String,

    /// Firmware revision
    pub revision: String,

    /// Serial number
    pub serial: String,

    /// World-wide name, if the transport reports one
    pub wwn: Option<String>,

    // === Geometry ===
    /// Logical sector size in bytes (what LBAs are counted in)
    pub logical_sector_size: u32,

    /// Physical sector size in bytes
    pub physical_sector_size: u32,

    /// Total size in logical sectors
    pub size_sectors: u64,

    // === Media properties ===
    /// Whether the device is removable
    pub removable: bool,

    /// Whether the media rotates (HDD vs SSD)
    pub rotational: bool,

    /// Whether the write cache is enabled
    pub write_cache: bool,

    /// Whether the BIOS considers this device bootable
    pub bios_bootable: bool,

    /// Connection bus type
    pub transport: TransportKind,
}

impl BlockDeviceInfo {
    /// Total size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_sectors
            .saturating_mul(u64::from(self.logical_sector_size))
    }

    /// Get a human-readable display name for the device
    pub fn display_name(&self) -> String {
        if !self.model.is_empty() {
            self.model.clone()
        } else {
            self.name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parse_normalizes_aliases() {
        assert_eq!(TransportKind::parse("sata"), TransportKind::Ata);
        assert_eq!(TransportKind::parse("sas"), TransportKind::Scsi);
        assert_eq!(TransportKind::parse("loop"), TransportKind::Virtual);
        assert_eq!(TransportKind::parse("floppy"), TransportKind::Unknown);
    }
}
