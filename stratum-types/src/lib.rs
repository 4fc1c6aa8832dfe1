// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the stratum storage-topology core
//!
//! This crate defines the single source of truth for all storage domain
//! types. They are used throughout the stack:
//!
//! - **stratum-core**: builds its topology store and codec around them
//! - collaborators (REPL, reporting, installers) consume them through the
//!   core's query API
//!
//! ## Architecture
//!
//! The model is an owned forest: controllers own block devices, block
//! devices own either a partition table's partitions or a RAID/pool member
//! set, and mount bindings are weak references into that forest. A device's
//! layout is a closed sum type (`DeviceLayout`), so dispatch over layout
//! kinds is exhaustive matching rather than tag comparisons.

pub mod common;
pub mod controller;
pub mod device;
pub mod mount;
pub mod partition;
pub mod partition_types;
pub mod swap;

pub use common::{DEFAULT_ALIGNMENT_BYTES, LbaRange, align_up, bytes_to_pretty};
pub use controller::{BusKind, ControllerInfo, PcieAddress};
pub use device::{BlockDeviceInfo, DeviceLayout, PoolMetadata, RaidMember, TransportKind};
pub use mount::{BackingRef, MountBinding};
pub use partition::{
    ESP_TYPE_GUID, GptAttr, MBR_BOOTABLE, PartitionInfo, PartitionRole, TableKind, TypeCode,
    gpt_attr_bits,
};
pub use partition_types::{
    COMMON_DOS_TYPES, COMMON_GPT_TYPES, PARTITION_TYPES, PartitionTypeInfo, all_for_table,
    find_by_id, find_by_name, find_gpt_by_guid, find_mbr_by_code,
};
pub use swap::SwapState;
