//! Partition type catalog and utilities
//!
//! Provides partition type information for GPT and DOS/MBR partition
//! tables. Used by validation (type-code resolution) and by collaborators
//! for type selection.

mod catalog;
mod query;

use serde::Deserialize;

pub use catalog::{COMMON_DOS_TYPES, COMMON_GPT_TYPES, PARTITION_TYPES};
pub use query::{all_for_table, find_by_id, find_by_name, find_gpt_by_guid, find_mbr_by_code};

/// Detailed information about a partition type.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PartitionTypeInfo {
    /// A partition table type, `dos` or `gpt`
    pub table_type: String,

    /// The partition type identifier: a type GUID for `gpt`, a `0x`-prefixed
    /// hex byte for `dos`
    pub ty: String,

    /// Human-readable name of the partition type
    pub name: String,
}

impl PartitionTypeInfo {
    /// The MBR type byte, if this is a `dos` entry
    pub fn mbr_code(&self) -> Option<u8> {
        let hex = self.ty.strip_prefix("0x")?;
        u8::from_str_radix(hex, 16).ok()
    }

    /// The GPT type GUID, if this is a `gpt` entry
    pub fn gpt_guid(&self) -> Option<uuid::Uuid> {
        if self.table_type != "gpt" {
            return None;
        }
        uuid::Uuid::parse_str(&self.ty).ok()
    }
}
