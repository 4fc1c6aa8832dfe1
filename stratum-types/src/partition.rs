//! Partition models
//!
//! PartitionInfo is the flat, table-independent view of one partition entry.
//! The role of a partition is never stored independently: it is derived from
//! the table kind, the type code, and the entry index, so the model cannot
//! drift out of sync with the on-disk encoding.

use serde::{Deserialize, Serialize};
use uuid::{Uuid, uuid};

use crate::common::LbaRange;

/// EFI System Partition type GUID
pub const ESP_TYPE_GUID: Uuid = uuid!("c12a7328-f81f-11d2-ba4b-00a0c93ec93b");

/// Partition table type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    /// GPT (GUID Partition Table)
    Gpt,

    /// MBR/DOS (Master Boot Record)
    MbrDos,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::MbrDos => "dos",
        }
    }

    /// Parse a normalized table-type name. Accepts the usual aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gpt" => Some(Self::Gpt),
            "dos" | "mbr" | "msdos" => Some(Self::MbrDos),
            _ => None,
        }
    }
}

/// Partition type identifier (MBR type byte or GPT type GUID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeCode {
    Mbr(u8),
    Gpt(Uuid),
}

impl TypeCode {
    /// Whether the code marks an MBR extended container partition
    pub fn is_mbr_extended(&self) -> bool {
        matches!(self, Self::Mbr(0x05) | Self::Mbr(0x0f) | Self::Mbr(0x85))
    }
}

/// GPT attribute flags (single bits within the 64-bit attributes field)
#[enumflags2::bitflags]
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GptAttr {
    /// Bit 0: required by the platform, never delete
    PlatformRequired = 1,

    /// Bit 2: legacy BIOS bootable
    LegacyBootable = 1 << 2,

    /// Bit 60: read-only
    ReadOnly = 1 << 60,

    /// Bit 62: hidden
    Hidden = 1 << 62,

    /// Bit 63: do not automount
    NoAutomount = 1 << 63,
}

/// The raw attribute bits a typed flag occupies
pub fn gpt_attr_bits(attr: GptAttr) -> u64 {
    attr as u64
}

/// MBR bootable flag as stored in the entry status byte
pub const MBR_BOOTABLE: u64 = 0x80;

/// Partition role, derived from table kind, type code, and entry position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionRole {
    /// MBR primary slot
    Primary,

    /// MBR extended container
    Extended,

    /// MBR logical partition inside an extended chain
    Logical,

    /// Ordinary GPT partition
    Gpt,

    /// EFI System Partition
    EfiSystem,
}

impl PartitionRole {
    /// Derive the role from the encoding; no extra state is consulted.
    ///
    /// MBR logical partitions are those past the four primary slots
    /// (1-based index >= 5, Linux numbering).
    pub fn derive(table: TableKind, type_code: &TypeCode, index: u32) -> Self {
        match table {
            TableKind::Gpt => match type_code {
                TypeCode::Gpt(g) if *g == ESP_TYPE_GUID => Self::EfiSystem,
                _ => Self::Gpt,
            },
            TableKind::MbrDos => {
                if type_code.is_mbr_extended() {
                    Self::Extended
                } else if index >= 5 {
                    Self::Logical
                } else {
                    Self::Primary
                }
            }
        }
    }
}

/// Detailed partition information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Partition number (1-based)
    pub index: u32,

    /// First LBA
    pub first_lba: u64,

    /// Length in sectors
    pub length: u64,

    /// Partition type identifier
    pub type_code: TypeCode,

    /// Unique partition GUID (GPT; synthesized as nil for MBR)
    pub uuid: Uuid,

    /// Partition name (GPT only, empty for MBR)
    pub name: String,

    /// Derived role
    pub role: PartitionRole,

    /// Raw attribute flags bitfield
    pub flags: u64,
}

impl PartitionInfo {
    /// The LBA range this partition occupies
    pub fn range(&self) -> LbaRange {
        LbaRange::new(self.first_lba, self.length)
    }

    /// Check a typed GPT attribute flag
    pub fn has_attr(&self, attr: GptAttr) -> bool {
        self.flags & gpt_attr_bits(attr) != 0
    }
}
