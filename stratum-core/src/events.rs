//! Hardware event ingestion and change notification fan-out
//!
//! Hardware discovery delivers typed events over a bounded channel; a
//! single spawned loop consumes them under the same lock discipline as
//! command execution. There are no caller-supplied callbacks, so an event
//! handler can never re-enter a mutation in progress.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use stratum_types::{BlockDeviceInfo, ControllerInfo, DeviceLayout, TableKind};

use crate::core::StorageCore;
use crate::extent::BlockExtent;

/// Bound on the hardware event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// One hardware-discovery event.
///
/// Device arrival carries the extent the core will use for all codec I/O
/// on that device; the discovery collaborator owns probing and opening.
pub enum HardwareEvent {
    AdapterArrived(ControllerInfo),
    AdapterRemoved(String),
    DeviceArrived {
        controller: String,
        info: BlockDeviceInfo,
        layout: DeviceLayout,
        extent: Arc<dyn BlockExtent>,
    },
    DeviceRemoved(String),
    RescanComplete(String),
}

impl std::fmt::Debug for HardwareEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterArrived(info) => write!(f, "AdapterArrived({:?})", info.name),
            Self::AdapterRemoved(name) => write!(f, "AdapterRemoved({name:?})"),
            Self::DeviceArrived { info, .. } => write!(f, "DeviceArrived({:?})", info.name),
            Self::DeviceRemoved(name) => write!(f, "DeviceRemoved({name:?})"),
            Self::RescanComplete(name) => write!(f, "RescanComplete({name:?})"),
        }
    }
}

/// A committed topology change, broadcast to observers after the store
/// update. Observers see changes in lock-acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    ControllerAdded(String),
    ControllerRemoved(String),
    DeviceAdded(String),
    DeviceRemoved(String),
    TableCreated { device: String, kind: TableKind },
    TableZapped { device: String },
    PartitionAdded { device: String, index: u32 },
    PartitionRemoved { device: String, index: u32 },
    PartitionModified { device: String, index: u32 },
    MountBound { path: String },
    MountUnbound { path: String },
    RescanComplete { device: String },
}

/// Consume hardware events until the sender side closes.
///
/// Each event takes the core lock, applies its structural mutation, and
/// releases before the next receive, so event handling serializes with
/// command execution and never starves it.
pub async fn run_event_loop(core: StorageCore, mut rx: mpsc::Receiver<HardwareEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = handle_event(&core, event).await {
            // Arrival/removal races (e.g. duplicate removal after a
            // controller cascade) are expected; log and keep consuming.
            warn!("hardware event dropped: {e}");
        }
    }
    info!("hardware event channel closed; event loop exiting");
}

async fn handle_event(core: &StorageCore, event: HardwareEvent) -> crate::error::Result<()> {
    match event {
        HardwareEvent::AdapterArrived(info) => {
            let name = info.name.clone();
            core.insert_controller(info).await?;
            info!(controller = %name, "adapter arrived");
        }
        HardwareEvent::AdapterRemoved(name) => {
            core.remove_controller(&name).await?;
            info!(controller = %name, "adapter removed");
        }
        HardwareEvent::DeviceArrived {
            controller,
            info,
            layout,
            extent,
        } => {
            let name = info.name.clone();
            core.insert_device(&controller, info, layout, extent).await?;
            info!(device = %name, controller = %controller, "device arrived");
        }
        HardwareEvent::DeviceRemoved(name) => {
            core.remove_device(&name).await?;
            info!(device = %name, "device removed");
        }
        HardwareEvent::RescanComplete(name) => {
            core.notify(ChangeEvent::RescanComplete { device: name });
        }
    }
    Ok(())
}
