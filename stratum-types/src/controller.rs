//! Host bus adapter models
//!
//! A controller is the root of the topology forest: a PCIe function, or a
//! virtual bus gathering synthetic devices (loop images, RAID composites).

use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of bus a controller sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusKind {
    /// A PCI Express function with a topology address
    Pcie,

    /// A synthetic bus for devices with no physical adapter
    Virtual,

    /// Bus type could not be determined
    Unknown,
}

/// PCIe topology address (domain/bus/device/function)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcieAddress {
    pub domain: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl fmt::Display for PcieAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// Host bus adapter information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    /// Unique controller name (e.g., "ahci-0", "virtual")
    pub name: String,

    /// Bus kind
    pub bus: BusKind,

    /// PCIe address (None for virtual/unknown buses)
    pub address: Option<PcieAddress>,

    /// Negotiated link width in lanes (PCIe only)
    pub link_width: Option<u32>,

    /// Negotiated link generation (PCIe only)
    pub link_gen: Option<u32>,

    /// Adapter firmware version, if reported
    pub firmware: Option<String>,

    /// Human-readable adapter description
    pub description: String,
}

impl ControllerInfo {
    /// A synthetic bus for devices that have no physical adapter
    pub fn virtual_bus(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bus: BusKind::Virtual,
            address: None,
            link_width: None,
            link_gen: None,
            firmware: None,
            description: "Virtual device bus".to_string(),
        }
    }

    /// Get a display name for the controller
    pub fn display_name(&self) -> String {
        match (&self.bus, &self.address) {
            (BusKind::Pcie, Some(addr)) => format!("{} [{}]", self.description, addr),
            _ => self.description.clone(),
        }
    }
}
