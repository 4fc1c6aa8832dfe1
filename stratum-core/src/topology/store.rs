// SPDX-License-Identifier: GPL-3.0-only

//! The owned topology forest and its structural mutations

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use stratum_types::{
    BlockDeviceInfo, ControllerInfo, DeviceLayout, MountBinding, PartitionInfo, TableKind,
};

use super::arena::{Arena, NodeHandle};
use crate::codec::TableImage;
use crate::error::{Result, StorageError};
use crate::extent::BlockExtent;

/// Handle to a controller node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerHandle(pub(crate) NodeHandle);

/// Handle to a block device node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub(crate) NodeHandle);

struct ControllerNode {
    info: ControllerInfo,
    devices: Vec<DeviceHandle>,
}

struct DeviceNode {
    info: BlockDeviceInfo,
    layout: DeviceLayout,
    partitions: Vec<PartitionInfo>,
    controller: ControllerHandle,
    extent: Arc<dyn BlockExtent>,
}

/// The single shared topology. All access goes through the core lock; this
/// type itself is not synchronized.
pub struct TopologyStore {
    controllers: Arena<ControllerNode>,
    devices: Arena<DeviceNode>,
    controller_names: HashMap<String, ControllerHandle>,
    device_names: HashMap<String, DeviceHandle>,
    mounts: Vec<MountBinding>,
    busy: HashSet<String>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self {
            controllers: Arena::new(),
            devices: Arena::new(),
            controller_names: HashMap::new(),
            device_names: HashMap::new(),
            mounts: Vec::new(),
            busy: HashSet::new(),
        }
    }

    // === Lookup ===

    pub fn lookup_controller(&self, name: &str) -> Result<ControllerHandle> {
        self.controller_names
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NotFound(format!("controller {name:?}")))
    }

    pub fn lookup_device(&self, name: &str) -> Result<DeviceHandle> {
        self.device_names
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NotFound(format!("device {name:?}")))
    }

    pub fn controller_info(&self, handle: ControllerHandle) -> Result<&ControllerInfo> {
        self.controllers
            .get(handle.0)
            .map(|node| &node.info)
            .ok_or_else(|| StorageError::NotFound("stale controller handle".to_string()))
    }

    pub fn device_info(&self, handle: DeviceHandle) -> Result<&BlockDeviceInfo> {
        self.device_node(handle).map(|node| &node.info)
    }

    pub fn device_layout(&self, handle: DeviceHandle) -> Result<&DeviceLayout> {
        self.device_node(handle).map(|node| &node.layout)
    }

    pub fn device_extent(&self, handle: DeviceHandle) -> Result<Arc<dyn BlockExtent>> {
        self.device_node(handle).map(|node| Arc::clone(&node.extent))
    }

    pub fn lookup_partition(&self, device: &str, index: u32) -> Result<PartitionInfo> {
        let handle = self.lookup_device(device)?;
        self.device_node(handle)?
            .partitions
            .iter()
            .find(|p| p.index == index)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("partition {index} on {device:?}")))
    }

    fn device_node(&self, handle: DeviceHandle) -> Result<&DeviceNode> {
        self.devices
            .get(handle.0)
            .ok_or_else(|| StorageError::NotFound("stale device handle".to_string()))
    }

    // === Enumeration (collaborator query API) ===

    pub fn controllers(&self) -> Vec<ControllerInfo> {
        let mut out: Vec<ControllerInfo> =
            self.controllers.iter().map(|(_, n)| n.info.clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn devices_of(&self, controller: &str) -> Result<Vec<BlockDeviceInfo>> {
        let handle = self.lookup_controller(controller)?;
        let node = self
            .controllers
            .get(handle.0)
            .ok_or_else(|| StorageError::NotFound("stale controller handle".to_string()))?;
        Ok(node
            .devices
            .iter()
            .filter_map(|d| self.devices.get(d.0))
            .map(|n| n.info.clone())
            .collect())
    }

    pub fn partitions_of(&self, device: &str) -> Result<Vec<PartitionInfo>> {
        let handle = self.lookup_device(device)?;
        Ok(self.device_node(handle)?.partitions.clone())
    }

    pub fn mounts(&self) -> &[MountBinding] {
        &self.mounts
    }

    // === Structural mutation (arrival/departure, always under the lock) ===

    pub fn insert_controller(&mut self, info: ControllerInfo) -> Result<ControllerHandle> {
        if self.controller_names.contains_key(&info.name) {
            return Err(StorageError::DuplicateName(info.name));
        }
        let name = info.name.clone();
        let handle = ControllerHandle(self.controllers.insert(ControllerNode {
            info,
            devices: Vec::new(),
        }));
        self.controller_names.insert(name, handle);
        Ok(handle)
    }

    /// Remove a controller and every device it owns. Returns the removed
    /// device names so the caller can fan out notifications.
    pub fn remove_controller(&mut self, name: &str) -> Result<Vec<String>> {
        let handle = self.lookup_controller(name)?;
        let device_handles = self
            .controllers
            .get(handle.0)
            .map(|n| n.devices.clone())
            .unwrap_or_default();

        let mut removed = Vec::new();
        for dh in device_handles {
            if let Some(dev_name) = self.devices.get(dh.0).map(|n| n.info.name.clone()) {
                self.remove_device(&dev_name)?;
                removed.push(dev_name);
            }
        }

        self.controllers.remove(handle.0);
        self.controller_names.remove(name);
        debug!(controller = name, devices = removed.len(), "controller removed");
        Ok(removed)
    }

    pub fn insert_device(
        &mut self,
        controller: &str,
        info: BlockDeviceInfo,
        layout: DeviceLayout,
        extent: Arc<dyn BlockExtent>,
    ) -> Result<DeviceHandle> {
        if self.device_names.contains_key(&info.name) {
            return Err(StorageError::DuplicateName(info.name));
        }
        let controller_handle = self.lookup_controller(controller)?;
        let name = info.name.clone();

        let handle = DeviceHandle(self.devices.insert(DeviceNode {
            info,
            layout,
            partitions: Vec::new(),
            controller: controller_handle,
            extent,
        }));
        self.devices_mut(controller_handle)?.push(handle);
        self.device_names.insert(name, handle);
        Ok(handle)
    }

    /// Remove a device, cascading to its partitions, mount bindings, and
    /// any RAID member references pointing at it. The arena generation bump
    /// turns every outstanding handle into a `NotFound`.
    pub fn remove_device(&mut self, name: &str) -> Result<()> {
        let handle = self.lookup_device(name)?;
        let controller = self.device_node(handle)?.controller;

        self.devices.remove(handle.0);
        self.device_names.remove(name);
        if let Ok(devices) = self.devices_mut(controller) {
            devices.retain(|d| *d != handle);
        }

        self.mounts.retain(|m| m.backing.device != name);
        let mut member_handles: Vec<NodeHandle> = Vec::new();
        for (h, node) in self.devices.iter() {
            if matches!(&node.layout, DeviceLayout::RaidComposite { members }
                if members.iter().any(|m| m.device == name))
            {
                member_handles.push(h);
            }
        }
        for h in member_handles {
            if let Some(node) = self.devices.get_mut(h)
                && let DeviceLayout::RaidComposite { members } = &mut node.layout
            {
                members.retain(|m| m.device != name);
            }
        }

        debug!(device = name, "device removed from topology");
        Ok(())
    }

    fn devices_mut(&mut self, handle: ControllerHandle) -> Result<&mut Vec<DeviceHandle>> {
        self.controllers
            .get_mut(handle.0)
            .map(|node| &mut node.devices)
            .ok_or_else(|| StorageError::NotFound("stale controller handle".to_string()))
    }

    // === Table binding ===

    /// Bind a codec image to a device: the device becomes `Partitioned` and
    /// its partition list mirrors the image's entries. Composite devices
    /// never carry a table directly.
    pub fn attach_table(&mut self, device: &str, image: &TableImage) -> Result<()> {
        let handle = self.lookup_device(device)?;
        let node = self
            .devices
            .get_mut(handle.0)
            .ok_or_else(|| StorageError::NotFound("stale device handle".to_string()))?;

        match &node.layout {
            DeviceLayout::Unformatted | DeviceLayout::Partitioned { .. } => {}
            DeviceLayout::RaidComposite { .. } | DeviceLayout::PoolComposite { .. } => {
                return Err(StorageError::NotSupported(format!(
                    "composite device {device:?} cannot carry a partition table"
                )));
            }
        }

        node.layout = DeviceLayout::Partitioned {
            table: image.kind(),
        };
        node.partitions = image.partitions();
        Ok(())
    }

    /// Unbind any table: the device reverts to `Unformatted` and partition
    /// mount bindings die with their partitions.
    pub fn detach_table(&mut self, device: &str) -> Result<()> {
        let handle = self.lookup_device(device)?;
        let node = self
            .devices
            .get_mut(handle.0)
            .ok_or_else(|| StorageError::NotFound("stale device handle".to_string()))?;

        node.layout = DeviceLayout::Unformatted;
        node.partitions.clear();
        self.mounts
            .retain(|m| !(m.backing.device == device && m.backing.partition.is_some()));
        Ok(())
    }

    /// The table kind a partitioned device carries
    pub fn table_kind(&self, device: &str) -> Result<TableKind> {
        let handle = self.lookup_device(device)?;
        match self.device_layout(handle)? {
            DeviceLayout::Partitioned { table } => Ok(*table),
            _ => Err(StorageError::NoTable),
        }
    }

    // === Mount bindings ===

    pub fn bind_mount(&mut self, binding: MountBinding) -> Result<()> {
        if !MountBinding::path_is_valid(&binding.path) {
            return Err(StorageError::NotSupported(format!(
                "invalid mount path {:?}",
                binding.path
            )));
        }
        if self.mounts.iter().any(|m| m.path == binding.path) {
            return Err(StorageError::DuplicateName(binding.path));
        }
        // The backing must resolve right now; the binding stays weak.
        let handle = self.lookup_device(&binding.backing.device)?;
        if let Some(index) = binding.backing.partition {
            let node = self.device_node(handle)?;
            if !node.partitions.iter().any(|p| p.index == index) {
                return Err(StorageError::NotFound(format!(
                    "partition {index} on {:?}",
                    binding.backing.device
                )));
            }
        }
        self.mounts.push(binding);
        Ok(())
    }

    pub fn unbind_mount(&mut self, path: &str) -> Result<MountBinding> {
        let pos = self
            .mounts
            .iter()
            .position(|m| m.path == path)
            .ok_or_else(|| StorageError::NotFound(format!("mount {path:?}")))?;
        Ok(self.mounts.remove(pos))
    }

    // === Busy tracking (rescan/reset windows) ===

    pub fn mark_busy(&mut self, device: &str) {
        self.busy.insert(device.to_string());
    }

    pub fn clear_busy(&mut self, device: &str) {
        self.busy.remove(device);
    }

    pub fn check_not_busy(&self, device: &str) -> Result<()> {
        if self.busy.contains(device) {
            return Err(StorageError::Busy(device.to_string()));
        }
        Ok(())
    }
}

impl Default for TopologyStore {
    fn default() -> Self {
        Self::new()
    }
}
