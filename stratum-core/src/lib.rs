// SPDX-License-Identifier: GPL-3.0-only

//! Storage topology engine
//!
//! This crate owns the hard parts of storage management:
//!
//! - **codec**: bit-exact GPT and (protective) MBR partition-table
//!   parsing and serialization over a raw block extent
//! - **validate**: checksum, alignment, uniqueness, and free-extent rules
//! - **topology**: the owned graph of controllers, block devices,
//!   partitions, and mount bindings, addressed by generation-checked
//!   handles
//! - **core**: the event/lock core serializing hardware events and user
//!   commands over the single shared topology store, plus the
//!   transactional mutation verbs
//!
//! Collaborators (REPL, reporting, installers, subprocess drivers) consume
//! the query and mutation API on [`StorageCore`]; nothing in this crate
//! shells out or formats text.

pub mod codec;
pub mod core;
pub mod error;
pub mod events;
pub mod extent;
pub mod topology;
pub mod validate;

pub use codec::{GptImage, MbrImage, NewEntry, TableImage};
pub use crate::core::{AddPartitionSpec, StorageCore};
pub use error::{Result, StorageError};
pub use events::{ChangeEvent, EVENT_CHANNEL_CAPACITY, HardwareEvent};
pub use extent::{BlockExtent, FileExtent, MemExtent};
pub use topology::{ControllerHandle, DeviceHandle, TopologyStore};
