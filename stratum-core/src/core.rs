// SPDX-License-Identifier: GPL-3.0-only

//! The event/lock core
//!
//! One process-wide [`TopologyStore`] behind one `tokio::sync::Mutex`.
//! User commands and hardware events both serialize through it: a command
//! holds the lock for its full duration, codec I/O included, except for
//! long-running operations (rescan, reset) which release the lock around
//! the blocking call and re-validate every device reference afterwards.
//!
//! Every committed mutation fans out a [`ChangeEvent`] over a broadcast
//! channel; observers see changes in lock-acquisition order.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use stratum_types::{
    BlockDeviceInfo, ControllerInfo, DeviceLayout, LbaRange, MountBinding, PartitionInfo,
    TableKind, TypeCode,
};

use crate::codec::{self, NewEntry, TableImage};
use crate::error::{Result, StorageError};
use crate::events::{ChangeEvent, EVENT_CHANNEL_CAPACITY, HardwareEvent, run_event_loop};
use crate::extent::BlockExtent;
use crate::topology::{ControllerHandle, DeviceHandle, TopologyStore};
use crate::validate;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Request for a new partition
#[derive(Debug, Clone, Default)]
pub struct AddPartitionSpec {
    /// GPT name (required for GPT tables, ignored for MBR)
    pub name: String,

    /// Length in sectors
    pub length: u64,

    /// Start alignment in sectors; None = 1 MiB for the device
    pub alignment: Option<u64>,

    /// Explicit type code; wins over `type_name`
    pub type_code: Option<TypeCode>,

    /// Catalog type name (e.g., "Linux swap"), resolved per table kind
    pub type_name: Option<String>,

    /// Unique partition GUID; None generates one
    pub uuid: Option<Uuid>,
}

/// Handle to the shared storage core. Cheap to clone; all clones share the
/// same store, lock, and notification channel.
#[derive(Clone)]
pub struct StorageCore {
    topo: Arc<Mutex<TopologyStore>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl StorageCore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            topo: Arc::new(Mutex::new(TopologyStore::new())),
            changes,
        }
    }

    /// Subscribe to committed topology changes
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Spawn the hardware event loop and return its sender side. Dropping
    /// the sender shuts the loop down.
    pub fn spawn_event_loop(&self) -> mpsc::Sender<HardwareEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(run_event_loop(self.clone(), rx));
        tx
    }

    pub(crate) fn notify(&self, event: ChangeEvent) {
        // No receivers is fine; notifications are best-effort fan-out.
        let _ = self.changes.send(event);
    }

    // === Structural mutation (event path) ===

    pub async fn insert_controller(&self, info: ControllerInfo) -> Result<ControllerHandle> {
        let name = info.name.clone();
        let handle = self.topo.lock().await.insert_controller(info)?;
        self.notify(ChangeEvent::ControllerAdded(name));
        Ok(handle)
    }

    pub async fn remove_controller(&self, name: &str) -> Result<()> {
        let removed = self.topo.lock().await.remove_controller(name)?;
        for device in removed {
            self.notify(ChangeEvent::DeviceRemoved(device));
        }
        self.notify(ChangeEvent::ControllerRemoved(name.to_string()));
        Ok(())
    }

    pub async fn insert_device(
        &self,
        controller: &str,
        info: BlockDeviceInfo,
        layout: DeviceLayout,
        extent: Arc<dyn BlockExtent>,
    ) -> Result<DeviceHandle> {
        let name = info.name.clone();
        let handle = self
            .topo
            .lock()
            .await
            .insert_device(controller, info, layout, extent)?;
        self.notify(ChangeEvent::DeviceAdded(name));
        Ok(handle)
    }

    pub async fn remove_device(&self, name: &str) -> Result<()> {
        self.topo.lock().await.remove_device(name)?;
        self.notify(ChangeEvent::DeviceRemoved(name.to_string()));
        Ok(())
    }

    // === Query API ===

    pub async fn controllers(&self) -> Vec<ControllerInfo> {
        self.topo.lock().await.controllers()
    }

    pub async fn devices_of(&self, controller: &str) -> Result<Vec<BlockDeviceInfo>> {
        self.topo.lock().await.devices_of(controller)
    }

    pub async fn device(&self, name: &str) -> Result<BlockDeviceInfo> {
        let topo = self.topo.lock().await;
        let handle = topo.lookup_device(name)?;
        Ok(topo.device_info(handle)?.clone())
    }

    pub async fn partitions_of(&self, device: &str) -> Result<Vec<PartitionInfo>> {
        self.topo.lock().await.partitions_of(device)
    }

    pub async fn partition(&self, device: &str, index: u32) -> Result<PartitionInfo> {
        self.topo.lock().await.lookup_partition(device, index)
    }

    pub async fn mounts(&self) -> Vec<MountBinding> {
        self.topo.lock().await.mounts().to_vec()
    }

    /// Free extents on a partitioned device, computed from the live table
    pub async fn free_extents_of(&self, device: &str) -> Result<Vec<LbaRange>> {
        let topo = self.topo.lock().await;
        let extent = table_io(&topo, device)?;
        let image = codec::read_table(extent.as_ref())?;
        Ok(validate::free_extents(&image))
    }

    // === Table-level mutation verbs ===

    /// Create a fresh, empty partition table, destroying any existing one.
    pub async fn create_table(&self, device: &str, kind: TableKind) -> Result<()> {
        let mut topo = self.topo.lock().await;
        let extent = table_io(&topo, device)?;
        let image = codec::new_table(extent.as_ref(), kind)?;
        codec::write_table(extent.as_ref(), &image)?;
        topo.attach_table(device, &image)?;
        drop(topo);

        info!(device, kind = kind.as_str(), "created partition table");
        self.notify(ChangeEvent::TableCreated {
            device: device.to_string(),
            kind,
        });
        Ok(())
    }

    /// Destroy any partition table on the device. Idempotent.
    pub async fn zap_table(&self, device: &str) -> Result<()> {
        let mut topo = self.topo.lock().await;
        let extent = table_io(&topo, device)?;
        codec::zap_table(extent.as_ref())?;
        topo.detach_table(device)?;
        drop(topo);

        info!(device, "zapped partition table");
        self.notify(ChangeEvent::TableZapped {
            device: device.to_string(),
        });
        Ok(())
    }

    /// Add a partition: stage the edit on a working copy, validate, write
    /// the verified table, then commit to the topology. No partial update
    /// is ever visible.
    pub async fn add_partition(
        &self,
        device: &str,
        spec: AddPartitionSpec,
    ) -> Result<PartitionInfo> {
        let mut topo = self.topo.lock().await;
        let extent = table_io(&topo, device)?;
        let mut image = codec::read_table(extent.as_ref())?;

        let type_code = match (spec.type_code, &spec.type_name) {
            (Some(code), _) => Some(code),
            (None, Some(name)) => Some(validate::resolve_type_name(image.kind(), name)?),
            (None, None) => None,
        };
        let entry = NewEntry {
            name: spec.name,
            length: spec.length,
            alignment: Some(spec.alignment.unwrap_or_else(|| {
                validate::default_alignment_sectors(extent.sector_size())
            })),
            type_code,
            uuid: spec.uuid,
        };

        let info = codec::add_entry(&mut image, &entry)?;
        codec::write_table(extent.as_ref(), &image)?;
        topo.attach_table(device, &image)?;
        drop(topo);

        info!(device, index = info.index, "added partition");
        self.notify(ChangeEvent::PartitionAdded {
            device: device.to_string(),
            index: info.index,
        });
        Ok(info)
    }

    pub async fn delete_partition(&self, device: &str, index: u32) -> Result<()> {
        let mut topo = self.topo.lock().await;
        let extent = table_io(&topo, device)?;
        let mut image = codec::read_table(extent.as_ref())?;
        codec::remove_entry(&mut image, index)?;
        codec::write_table(extent.as_ref(), &image)?;
        topo.attach_table(device, &image)?;
        drop(topo);

        info!(device, index, "deleted partition");
        self.notify(ChangeEvent::PartitionRemoved {
            device: device.to_string(),
            index,
        });
        Ok(())
    }

    pub async fn rename_partition(&self, device: &str, index: u32, name: &str) -> Result<()> {
        self.modify_partition(device, index, |image| {
            codec::rename_entry(image, index, name)
        })
        .await
    }

    pub async fn set_partition_type(
        &self,
        device: &str,
        index: u32,
        type_code: TypeCode,
    ) -> Result<()> {
        self.modify_partition(device, index, |image| codec::set_type(image, index, type_code))
            .await
    }

    /// Set or clear one attribute flag bit
    pub async fn set_partition_flag(
        &self,
        device: &str,
        index: u32,
        flag: u64,
        enable: bool,
    ) -> Result<()> {
        self.modify_partition(device, index, |image| {
            codec::set_flag(image, index, flag, enable)
        })
        .await
    }

    pub async fn set_partition_uuid(&self, device: &str, index: u32, uuid: Uuid) -> Result<()> {
        self.modify_partition(device, index, |image| codec::set_uuid(image, index, uuid))
            .await
    }

    /// Shared read-edit-write-commit sequence for entry-level edits
    async fn modify_partition<F>(&self, device: &str, index: u32, edit: F) -> Result<()>
    where
        F: FnOnce(&mut TableImage) -> Result<()>,
    {
        let mut topo = self.topo.lock().await;
        let extent = table_io(&topo, device)?;
        let mut image = codec::read_table(extent.as_ref())?;
        edit(&mut image)?;
        codec::write_table(extent.as_ref(), &image)?;
        topo.attach_table(device, &image)?;
        drop(topo);

        debug!(device, index, "modified partition");
        self.notify(ChangeEvent::PartitionModified {
            device: device.to_string(),
            index,
        });
        Ok(())
    }

    // === Mount bindings ===

    pub async fn prepare_mount(&self, binding: MountBinding) -> Result<()> {
        let path = binding.path.clone();
        self.topo.lock().await.bind_mount(binding)?;
        self.notify(ChangeEvent::MountBound { path });
        Ok(())
    }

    pub async fn unmount(&self, path: &str) -> Result<MountBinding> {
        let binding = self.topo.lock().await.unbind_mount(path)?;
        self.notify(ChangeEvent::MountUnbound {
            path: path.to_string(),
        });
        Ok(binding)
    }

    // === Long-running operations ===

    /// Rescan a device: the blocking I/O runs with the lock released so
    /// hardware events are not starved; afterwards the device is looked up
    /// again rather than trusted, because it may have departed mid-rescan.
    pub async fn rescan_device(&self, device: &str) -> Result<()> {
        let extent = {
            let mut topo = self.topo.lock().await;
            topo.check_not_busy(device)?;
            let handle = topo.lookup_device(device)?;
            let extent = topo.device_extent(handle)?;
            topo.mark_busy(device);
            extent
        };
        // Lock released: removal events for this device can now land.

        let io_result = tokio::task::spawn_blocking(move || extent.flush())
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        let mut topo = self.topo.lock().await;
        topo.clear_busy(device);
        io_result?;

        // Re-validate: never operate on a reference cached across the
        // unlock window.
        let handle = match topo.lookup_device(device) {
            Ok(handle) => handle,
            Err(e) => {
                debug!(device, "device departed during rescan");
                return Err(e);
            }
        };
        let extent = topo.device_extent(handle)?;
        match codec::read_table(extent.as_ref()) {
            Ok(image) => topo.attach_table(device, &image)?,
            Err(StorageError::NoTable) => topo.detach_table(device)?,
            Err(e) => return Err(e),
        }
        drop(topo);

        self.notify(ChangeEvent::RescanComplete {
            device: device.to_string(),
        });
        Ok(())
    }
}

impl Default for StorageCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Busy and layout guards shared by every table-level verb: composites
/// never carry a table directly, and devices under rescan refuse
/// structural mutation.
fn table_io(topo: &TopologyStore, device: &str) -> Result<Arc<dyn BlockExtent>> {
    topo.check_not_busy(device)?;
    let handle = topo.lookup_device(device)?;
    match topo.device_layout(handle)? {
        DeviceLayout::Unformatted | DeviceLayout::Partitioned { .. } => {}
        DeviceLayout::RaidComposite { .. } | DeviceLayout::PoolComposite { .. } => {
            return Err(StorageError::NotSupported(format!(
                "composite device {device:?} cannot carry a partition table"
            )));
        }
    }
    topo.device_extent(handle)
}
