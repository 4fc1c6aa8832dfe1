//! MBR binary encoding
//!
//! Classic DOS partition tables: four primary slots in LBA 0, an optional
//! extended chain of EBRs for logical partitions, and the protective MBR a
//! GPT disk carries in LBA 0. CHS fields are written as LBA-saturation
//! values; nothing here does geometry translation.

use stratum_types::{LbaRange, MBR_BOOTABLE, PartitionInfo, PartitionRole, TableKind, TypeCode};
use uuid::Uuid;

use crate::error::Result;
use crate::extent::BlockExtent;

pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xaa];
pub const MBR_GPT_PROTECTIVE: u8 = 0xee;
const ENTRY_TABLE_OFFSET: usize = 446;
const DISK_ID_OFFSET: usize = 440;
/// Guard against cyclic EBR chains
const MAX_LOGICAL: usize = 128;

/// One MBR slot (primary or logical)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrEntry {
    pub bootable: bool,
    pub type_code: u8,
    pub first_lba: u64,
    pub length: u64,
}

impl MbrEntry {
    pub fn range(&self) -> LbaRange {
        LbaRange::new(self.first_lba, self.length)
    }
}

/// In-memory MBR image.
///
/// Logical partitions are read for visibility and cascade on delete, but
/// `write_table` only rewrites LBA 0: dropping an extended entry orphans
/// its EBR chain, which is exactly how the table dies on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbrImage {
    pub disk_id: u32,
    pub total_sectors: u64,
    pub primaries: [Option<MbrEntry>; 4],
    pub logicals: Vec<MbrEntry>,
}

impl MbrImage {
    pub fn empty(disk_id: u32, total_sectors: u64) -> Self {
        Self {
            disk_id,
            total_sectors,
            primaries: [None; 4],
            logicals: Vec::new(),
        }
    }

    /// The window partitions may occupy: everything but LBA 0
    pub fn usable(&self) -> LbaRange {
        LbaRange::new(1, self.total_sectors.saturating_sub(1))
    }

    pub fn free_slot(&self) -> Option<u32> {
        self.primaries
            .iter()
            .position(|slot| slot.is_none())
            .map(|i| i as u32)
    }

    pub fn entry_at(&self, index: u32) -> Option<&MbrEntry> {
        if (1..=4).contains(&index) {
            self.primaries[(index - 1) as usize].as_ref()
        } else {
            self.logicals.get((index as usize).checked_sub(5)?)
        }
    }

    pub fn entry_at_mut(&mut self, index: u32) -> Option<&mut MbrEntry> {
        if (1..=4).contains(&index) {
            self.primaries[(index - 1) as usize].as_mut()
        } else {
            self.logicals.get_mut((index as usize).checked_sub(5)?)
        }
    }

    pub fn partitions(&self) -> Vec<PartitionInfo> {
        let mut out = Vec::new();
        for (i, slot) in self.primaries.iter().enumerate() {
            if let Some(entry) = slot {
                out.push(entry_info(entry, i as u32 + 1));
            }
        }
        for (i, entry) in self.logicals.iter().enumerate() {
            out.push(entry_info(entry, i as u32 + 5));
        }
        out
    }
}

pub(crate) fn entry_info(entry: &MbrEntry, index: u32) -> PartitionInfo {
    let type_code = TypeCode::Mbr(entry.type_code);
    PartitionInfo {
        index,
        first_lba: entry.first_lba,
        length: entry.length,
        type_code,
        uuid: Uuid::nil(),
        name: String::new(),
        role: PartitionRole::derive(TableKind::MbrDos, &type_code, index),
        flags: if entry.bootable { MBR_BOOTABLE } else { 0 },
    }
}

fn encode_slot(buf: &mut [u8], entry: &MbrEntry) {
    buf[0] = if entry.bootable { 0x80 } else { 0x00 };
    // CHS saturation triples; every modern consumer reads the LBA fields
    buf[1..4].copy_from_slice(&[0xfe, 0xff, 0xff]);
    buf[4] = entry.type_code;
    buf[5..8].copy_from_slice(&[0xfe, 0xff, 0xff]);
    buf[8..12].copy_from_slice(&(entry.first_lba.min(u32::MAX as u64) as u32).to_le_bytes());
    buf[12..16].copy_from_slice(&(entry.length.min(u32::MAX as u64) as u32).to_le_bytes());
}

fn decode_slot(buf: &[u8]) -> Option<MbrEntry> {
    let type_code = buf[4];
    let first_lba = u64::from(u32::from_le_bytes(buf[8..12].try_into().unwrap()));
    let length = u64::from(u32::from_le_bytes(buf[12..16].try_into().unwrap()));
    if type_code == 0 || length == 0 {
        return None;
    }
    Some(MbrEntry {
        bootable: buf[0] & 0x80 != 0,
        type_code,
        first_lba,
        length,
    })
}

/// Serialize the boot sector (LBA 0) for this image.
pub fn encode_boot_sector(image: &MbrImage, sector: &mut [u8]) {
    sector.fill(0);
    sector[DISK_ID_OFFSET..DISK_ID_OFFSET + 4].copy_from_slice(&image.disk_id.to_le_bytes());
    for (i, slot) in image.primaries.iter().enumerate() {
        if let Some(entry) = slot {
            let off = ENTRY_TABLE_OFFSET + i * 16;
            encode_slot(&mut sector[off..off + 16], entry);
        }
    }
    sector[510..512].copy_from_slice(&MBR_SIGNATURE);
}

/// Whether the sector carries the 0x55AA boot signature
pub fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[510..512] == MBR_SIGNATURE
}

/// Whether any primary slot carries the GPT protective marker
pub fn has_protective_marker(sector: &[u8]) -> bool {
    (0..4).any(|i| sector[ENTRY_TABLE_OFFSET + i * 16 + 4] == MBR_GPT_PROTECTIVE)
}

/// Decode LBA 0 and walk any extended chain for logical partitions.
pub fn decode_table(extent: &dyn BlockExtent, sector: &[u8]) -> Result<MbrImage> {
    let mut image = MbrImage::empty(
        u32::from_le_bytes(sector[DISK_ID_OFFSET..DISK_ID_OFFSET + 4].try_into().unwrap()),
        extent.total_sectors(),
    );

    for i in 0..4 {
        let off = ENTRY_TABLE_OFFSET + i * 16;
        image.primaries[i] = decode_slot(&sector[off..off + 16]);
    }

    if let Some(extended) = image
        .primaries
        .iter()
        .flatten()
        .find(|e| TypeCode::Mbr(e.type_code).is_mbr_extended())
        .copied()
    {
        image.logicals = walk_extended_chain(extent, &extended)?;
    }

    Ok(image)
}

/// Follow the EBR chain inside an extended partition.
///
/// Entry 0 of each EBR is a logical partition relative to that EBR; entry 1
/// links to the next EBR relative to the extended partition start.
fn walk_extended_chain(extent: &dyn BlockExtent, extended: &MbrEntry) -> Result<Vec<MbrEntry>> {
    let sector_size = extent.sector_size() as usize;
    let mut logicals = Vec::new();
    let mut ebr_lba = extended.first_lba;
    let mut buf = vec![0u8; sector_size];

    while logicals.len() < MAX_LOGICAL {
        if ebr_lba >= extent.total_sectors() {
            break;
        }
        extent.read_at(ebr_lba * sector_size as u64, &mut buf)?;
        if !has_boot_signature(&buf) {
            break;
        }

        if let Some(mut logical) = decode_slot(&buf[ENTRY_TABLE_OFFSET..ENTRY_TABLE_OFFSET + 16]) {
            logical.first_lba += ebr_lba;
            logicals.push(logical);
        }

        match decode_slot(&buf[ENTRY_TABLE_OFFSET + 16..ENTRY_TABLE_OFFSET + 32]) {
            Some(link) => ebr_lba = extended.first_lba + link.first_lba,
            None => break,
        }
    }

    Ok(logicals)
}

/// Build the protective MBR a GPT disk carries in LBA 0: a single 0xEE
/// entry from LBA 1 covering the rest of the device (saturated at u32).
pub fn protective_image(total_sectors: u64) -> MbrImage {
    let mut image = MbrImage::empty(0, total_sectors);
    image.primaries[0] = Some(MbrEntry {
        bootable: false,
        type_code: MBR_GPT_PROTECTIVE,
        first_lba: 1,
        length: total_sectors.saturating_sub(1).min(u64::from(u32::MAX)),
    });
    image
}
