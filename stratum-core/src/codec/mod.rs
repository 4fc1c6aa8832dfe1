//! Partition table codec
//!
//! Pure with respect to the topology: given a [`BlockExtent`], this module
//! reads and writes complete partition-table images, and edits entries on
//! in-memory images only. Nothing touches disk until [`write_table`], which
//! re-validates its own output before reporting success.

pub mod gpt;
pub mod mbr;

use tracing::{debug, warn};
use uuid::Uuid;

use stratum_types::{LbaRange, PartitionInfo, TableKind, TypeCode};

use crate::error::{Result, StorageError};
use crate::extent::BlockExtent;
use crate::validate;

pub use gpt::{GptEntry, GptHeader, GptImage};
pub use mbr::{MbrEntry, MbrImage};

/// A complete in-memory partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableImage {
    Gpt(GptImage),
    Mbr(MbrImage),
}

impl TableImage {
    pub fn kind(&self) -> TableKind {
        match self {
            Self::Gpt(_) => TableKind::Gpt,
            Self::Mbr(_) => TableKind::MbrDos,
        }
    }

    /// All partitions in the image, in index order
    pub fn partitions(&self) -> Vec<PartitionInfo> {
        match self {
            Self::Gpt(image) => image.partitions(),
            Self::Mbr(image) => image.partitions(),
        }
    }

    /// The window partitions may occupy
    pub fn usable(&self) -> LbaRange {
        match self {
            Self::Gpt(image) => image.usable(),
            Self::Mbr(image) => image.usable(),
        }
    }

    pub fn partition_at(&self, index: u32) -> Option<PartitionInfo> {
        self.partitions().into_iter().find(|p| p.index == index)
    }
}

/// Parameters for a new partition entry
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    /// GPT name; must be non-empty for GPT tables, ignored for MBR
    pub name: String,

    /// Length in sectors
    pub length: u64,

    /// Start alignment in sectors; None = 2048 (1 MiB at 512-byte sectors).
    /// Callers with other sector sizes pass the alignment explicitly.
    pub alignment: Option<u64>,

    /// Type code; None picks Linux filesystem / 0x83
    pub type_code: Option<TypeCode>,

    /// Unique partition GUID; None generates one (GPT only)
    pub uuid: Option<Uuid>,
}

const LINUX_FS_GUID: Uuid = uuid::uuid!("0fc63daf-8483-4772-8e79-3d69d8477de4");
const MBR_LINUX: u8 = 0x83;

/// Read and validate whichever table the extent carries.
///
/// Detection order: boot signature in LBA 0, then the protective-MBR GPT
/// marker, then the GPT primary header at LBA 1 with fallback to the backup
/// header at the last LBA. A bad primary is never silently preferred: if
/// both GPT copies fail, the error carries both reasons.
pub fn read_table(extent: &dyn BlockExtent) -> Result<TableImage> {
    let sector_size = extent.sector_size() as usize;
    let total = extent.total_sectors();
    if total < 2 {
        return Err(StorageError::NoTable);
    }

    let mut lba0 = vec![0u8; sector_size];
    extent.read_at(0, &mut lba0)?;

    if !mbr::has_boot_signature(&lba0) {
        return Err(StorageError::NoTable);
    }

    if !mbr::has_protective_marker(&lba0) {
        return Ok(TableImage::Mbr(mbr::decode_table(extent, &lba0)?));
    }

    // GPT. Try the primary header first.
    let primary_reason = match read_gpt_copy(extent, 1) {
        Ok(image) => return Ok(TableImage::Gpt(image)),
        Err(reason) => reason,
    };

    warn!("primary GPT header failed ({primary_reason}); trying backup");
    match read_gpt_copy(extent, total - 1) {
        Ok(mut image) => {
            // Normalize to primary orientation so callers and re-writes
            // see one canonical image regardless of which copy was read.
            let header = &mut image.header;
            if header.current_lba != 1 {
                std::mem::swap(&mut header.current_lba, &mut header.backup_lba);
                header.entry_start_lba = header.current_lba + 1;
            }
            Ok(TableImage::Gpt(image))
        }
        Err(backup_reason) => Err(StorageError::Corrupt {
            primary: primary_reason,
            backup: backup_reason,
        }),
    }
}

/// Read one GPT header copy plus the entry array it points at.
fn read_gpt_copy(extent: &dyn BlockExtent, header_lba: u64) -> std::result::Result<GptImage, String> {
    let sector_size = extent.sector_size() as usize;
    let mut sector = vec![0u8; sector_size];
    extent
        .read_at(header_lba * sector_size as u64, &mut sector)
        .map_err(|e| format!("header read at LBA {header_lba}: {e}"))?;

    let (header, claimed_crc) = gpt::decode_header(&sector, extent.total_sectors())
        .map_err(|reason| format!("header at LBA {header_lba}: {reason}"))?;

    let array_bytes = header.entry_count as usize * header.entry_size as usize;
    let array_sectors = gpt::entry_array_sectors(
        header.entry_count,
        header.entry_size,
        extent.sector_size(),
    );
    let mut buf = vec![0u8; usize::try_from(array_sectors).unwrap() * sector_size];
    extent
        .read_at(header.entry_start_lba * sector_size as u64, &mut buf)
        .map_err(|e| format!("entry array read at LBA {}: {e}", header.entry_start_lba))?;
    buf.truncate(array_bytes);

    let computed = crc32fast::hash(&buf);
    if computed != claimed_crc {
        return Err(format!(
            "entry array CRC mismatch for header at LBA {header_lba} (stored {claimed_crc:#010x}, computed {computed:#010x})"
        ));
    }

    let entries = gpt::decode_entries(&header, &buf);
    Ok(GptImage { header, entries })
}

/// Persist a table image.
///
/// For GPT: recomputes the entry-array CRC32, recomputes each header's own
/// CRC32 (field zeroed during computation), writes entry array, primary
/// header, the backup mirror at the far end, and the protective MBR, then
/// flushes and re-validates with [`read_table`]. The verification read is
/// retried exactly once; the write never is. Steps are atomic from the
/// caller's perspective: either the verified new table or `Corrupt`.
pub fn write_table(extent: &dyn BlockExtent, image: &TableImage) -> Result<()> {
    match image {
        TableImage::Gpt(gpt_image) => write_gpt(extent, gpt_image)?,
        TableImage::Mbr(mbr_image) => {
            let mut sector = vec![0u8; extent.sector_size() as usize];
            mbr::encode_boot_sector(mbr_image, &mut sector);
            extent.write_at(0, &sector)?;
        }
    }
    extent.flush()?;

    // Re-validate; trust nothing about the write path. The verification
    // read is retried exactly once to tolerate a transient read-back delay.
    let first = match verify_written(extent, image) {
        Ok(()) => return Ok(()),
        Err(reason) => reason,
    };
    debug!("post-write verification failed ({first}); retrying read once");
    match verify_written(extent, image) {
        Ok(()) => Ok(()),
        Err(second) => Err(StorageError::Corrupt {
            primary: first,
            backup: second,
        }),
    }
}

fn verify_written(extent: &dyn BlockExtent, image: &TableImage) -> std::result::Result<(), String> {
    match read_table(extent) {
        Ok(read_back) if &read_back == image => Ok(()),
        Ok(_) => Err("verification read back a different table".to_string()),
        Err(e) => Err(format!("verification read failed: {e}")),
    }
}

fn write_gpt(extent: &dyn BlockExtent, image: &GptImage) -> Result<()> {
    let sector_size = extent.sector_size();
    let ss = u64::from(sector_size);
    let header = &image.header;

    let array_sectors = image.entry_array_sectors(sector_size);
    let mut array = gpt::encode_entries(header, &image.entries);
    let entry_crc = crc32fast::hash(&array);
    array.resize(usize::try_from(array_sectors * ss).unwrap(), 0);

    extent.write_at(header.entry_start_lba * ss, &array)?;

    let mut sector = vec![0u8; sector_size as usize];
    gpt::encode_header(header, entry_crc, &mut sector);
    extent.write_at(header.current_lba * ss, &sector)?;

    // Backup mirror: entry array directly below the backup header,
    // current/backup LBAs swapped
    let backup_entry_lba = header.backup_lba - array_sectors;
    extent.write_at(backup_entry_lba * ss, &array)?;

    let backup_header = GptHeader {
        current_lba: header.backup_lba,
        backup_lba: header.current_lba,
        entry_start_lba: backup_entry_lba,
        ..header.clone()
    };
    gpt::encode_header(&backup_header, entry_crc, &mut sector);
    extent.write_at(header.backup_lba * ss, &sector)?;

    let mut lba0 = vec![0u8; sector_size as usize];
    mbr::encode_boot_sector(&mbr::protective_image(extent.total_sectors()), &mut lba0);
    extent.write_at(0, &lba0)?;

    Ok(())
}

/// Initialize an empty in-memory table for the extent's geometry.
///
/// Nothing is written; call [`write_table`] to persist.
pub fn new_table(extent: &dyn BlockExtent, kind: TableKind) -> Result<TableImage> {
    let total = extent.total_sectors();
    match kind {
        TableKind::Gpt => {
            let array_sectors = gpt::entry_array_sectors(
                gpt::GPT_ENTRY_COUNT,
                gpt::GPT_ENTRY_SIZE,
                extent.sector_size(),
            );
            // LBA 0 + two headers + two entry arrays, plus at least one
            // usable sector
            if total < 2 * array_sectors + 4 {
                return Err(StorageError::NotSupported(format!(
                    "device too small for GPT ({total} sectors)"
                )));
            }
            Ok(TableImage::Gpt(GptImage {
                header: GptHeader {
                    current_lba: 1,
                    backup_lba: total - 1,
                    first_usable: 2 + array_sectors,
                    last_usable: total - 2 - array_sectors,
                    disk_guid: Uuid::new_v4(),
                    entry_start_lba: 2,
                    entry_count: gpt::GPT_ENTRY_COUNT,
                    entry_size: gpt::GPT_ENTRY_SIZE,
                },
                entries: Vec::new(),
            }))
        }
        TableKind::MbrDos => {
            if total < 2 {
                return Err(StorageError::NotSupported(format!(
                    "device too small for MBR ({total} sectors)"
                )));
            }
            let disk_id = Uuid::new_v4().as_u128() as u32;
            Ok(TableImage::Mbr(MbrImage::empty(disk_id, total)))
        }
    }
}

/// Destroy any partition table: zero the boot sector, both GPT header
/// locations, and both entry array regions. Idempotent; the extent reads
/// back as `NoTable` afterwards.
pub fn zap_table(extent: &dyn BlockExtent) -> Result<()> {
    let sector_size = extent.sector_size();
    let ss = u64::from(sector_size);
    let total = extent.total_sectors();
    let array_sectors =
        gpt::entry_array_sectors(gpt::GPT_ENTRY_COUNT, gpt::GPT_ENTRY_SIZE, sector_size);

    let head = (2 + array_sectors).min(total);
    let zeroes = vec![0u8; usize::try_from(head * ss).unwrap()];
    extent.write_at(0, &zeroes)?;

    let tail = (1 + array_sectors).min(total);
    let zeroes = vec![0u8; usize::try_from(tail * ss).unwrap()];
    extent.write_at((total - tail) * ss, &zeroes)?;

    extent.flush()?;
    Ok(())
}

/// Add a partition entry to an in-memory image.
///
/// Validates placement, name/UUID uniqueness, and the type code before
/// mutating; on any failure the image is untouched.
pub fn add_entry(image: &mut TableImage, spec: &NewEntry) -> Result<PartitionInfo> {
    if spec.length == 0 {
        return Err(StorageError::NotSupported(
            "zero-length partition".to_string(),
        ));
    }

    let alignment = spec
        .alignment
        .unwrap_or_else(|| validate::default_alignment_sectors(512));

    match image {
        TableImage::Gpt(gpt_image) => {
            if spec.name.is_empty() {
                return Err(StorageError::NotSupported(
                    "GPT partitions require a name".to_string(),
                ));
            }
            let type_guid = match spec.type_code.unwrap_or(TypeCode::Gpt(LINUX_FS_GUID)) {
                TypeCode::Gpt(g) => g,
                TypeCode::Mbr(_) => {
                    return Err(StorageError::InvalidTypeCode(
                        "MBR type byte on a GPT table".to_string(),
                    ));
                }
            };
            validate::check_type_code(TableKind::Gpt, &TypeCode::Gpt(type_guid))?;

            let slot = gpt_image.free_slot().ok_or_else(|| {
                StorageError::NotSupported("no free GPT entry slot".to_string())
            })?;

            let snapshot = TableImage::Gpt(gpt_image.clone());
            validate::check_name_unique(&snapshot, &spec.name, None)?;
            let unique = spec.uuid.unwrap_or_else(Uuid::new_v4);
            validate::check_uuid_unique(&snapshot, unique, None)?;
            let range = validate::place(&snapshot, spec.length, alignment)?;
            validate::check_no_overlap(&snapshot, range, None)?;

            let entry = GptEntry {
                slot,
                type_guid,
                unique_guid: unique,
                first_lba: range.start,
                last_lba: range.last(),
                attrs: 0,
                name: spec.name.clone(),
            };
            let info = entry.to_partition_info();

            gpt_image.entries.push(entry);
            gpt_image.entries.sort_by_key(|e| e.slot);
            debug!(
                slot,
                start = range.start,
                length = spec.length,
                "staged GPT entry {:?}",
                spec.name
            );
            Ok(info)
        }
        TableImage::Mbr(mbr_image) => {
            let type_code = match spec.type_code.unwrap_or(TypeCode::Mbr(MBR_LINUX)) {
                TypeCode::Mbr(b) => b,
                TypeCode::Gpt(_) => {
                    return Err(StorageError::InvalidTypeCode(
                        "GPT type GUID on an MBR table".to_string(),
                    ));
                }
            };
            validate::check_type_code(TableKind::MbrDos, &TypeCode::Mbr(type_code))?;

            let slot = mbr_image.free_slot().ok_or_else(|| {
                StorageError::NotSupported("no free MBR primary slot".to_string())
            })?;

            let snapshot = TableImage::Mbr(mbr_image.clone());
            let range = validate::place(&snapshot, spec.length, alignment)?;
            validate::check_no_overlap(&snapshot, range, None)?;

            let entry = MbrEntry {
                bootable: false,
                type_code,
                first_lba: range.start,
                length: spec.length,
            };
            mbr_image.primaries[slot as usize] = Some(entry);
            Ok(mbr::entry_info(&entry, slot + 1))
        }
    }
}

/// Remove an entry. Removing an MBR extended partition cascades to its
/// logical partitions (their EBR chain becomes unreachable).
pub fn remove_entry(image: &mut TableImage, index: u32) -> Result<()> {
    match image {
        TableImage::Gpt(gpt_image) => {
            let pos = gpt_image
                .entries
                .iter()
                .position(|e| e.slot + 1 == index)
                .ok_or_else(|| StorageError::NotFound(format!("partition {index}")))?;
            gpt_image.entries.remove(pos);
            Ok(())
        }
        TableImage::Mbr(mbr_image) => {
            if index >= 5 {
                return Err(StorageError::NotSupported(
                    "removing a single logical partition requires rewriting the EBR chain"
                        .to_string(),
                ));
            }
            let slot = mbr_image
                .entry_at(index)
                .copied()
                .ok_or_else(|| StorageError::NotFound(format!("partition {index}")))?;
            if TypeCode::Mbr(slot.type_code).is_mbr_extended() {
                mbr_image.logicals.clear();
            }
            mbr_image.primaries[(index - 1) as usize] = None;
            Ok(())
        }
    }
}

/// Rename a GPT entry. MBR tables have no partition names.
pub fn rename_entry(image: &mut TableImage, index: u32, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::NotSupported(
            "GPT partitions require a name".to_string(),
        ));
    }
    validate::check_name_unique(image, name, Some(index))?;
    match image {
        TableImage::Gpt(gpt_image) => {
            let entry = gpt_image
                .entry_at_mut(index)
                .ok_or_else(|| StorageError::NotFound(format!("partition {index}")))?;
            entry.name = name.to_string();
            Ok(())
        }
        TableImage::Mbr(_) => Err(StorageError::NotSupported(
            "MBR partitions have no names".to_string(),
        )),
    }
}

/// Change an entry's type code.
pub fn set_type(image: &mut TableImage, index: u32, type_code: TypeCode) -> Result<()> {
    validate::check_type_code(image.kind(), &type_code)?;
    match (image, type_code) {
        (TableImage::Gpt(gpt_image), TypeCode::Gpt(guid)) => {
            let entry = gpt_image
                .entry_at_mut(index)
                .ok_or_else(|| StorageError::NotFound(format!("partition {index}")))?;
            entry.type_guid = guid;
            Ok(())
        }
        (TableImage::Mbr(mbr_image), TypeCode::Mbr(byte)) => {
            let entry = mbr_image
                .entry_at_mut(index)
                .ok_or_else(|| StorageError::NotFound(format!("partition {index}")))?;
            entry.type_code = byte;
            Ok(())
        }
        (TableImage::Gpt(_), TypeCode::Mbr(_)) => Err(StorageError::InvalidTypeCode(
            "MBR type byte on a GPT table".to_string(),
        )),
        (TableImage::Mbr(_), TypeCode::Gpt(_)) => Err(StorageError::InvalidTypeCode(
            "GPT type GUID on an MBR table".to_string(),
        )),
    }
}

/// Set or clear a single attribute flag bit.
pub fn set_flag(image: &mut TableImage, index: u32, flag: u64, enable: bool) -> Result<()> {
    validate::check_flag_value(image.kind(), flag)?;
    match image {
        TableImage::Gpt(gpt_image) => {
            let entry = gpt_image
                .entry_at_mut(index)
                .ok_or_else(|| StorageError::NotFound(format!("partition {index}")))?;
            if enable {
                entry.attrs |= flag;
            } else {
                entry.attrs &= !flag;
            }
            Ok(())
        }
        TableImage::Mbr(mbr_image) => {
            let entry = mbr_image
                .entry_at_mut(index)
                .ok_or_else(|| StorageError::NotFound(format!("partition {index}")))?;
            entry.bootable = enable;
            Ok(())
        }
    }
}

/// Replace a GPT entry's unique partition GUID.
pub fn set_uuid(image: &mut TableImage, index: u32, uuid: Uuid) -> Result<()> {
    validate::check_uuid_unique(image, uuid, Some(index))?;
    match image {
        TableImage::Gpt(gpt_image) => {
            let entry = gpt_image
                .entry_at_mut(index)
                .ok_or_else(|| StorageError::NotFound(format!("partition {index}")))?;
            entry.unique_guid = uuid;
            Ok(())
        }
        TableImage::Mbr(_) => Err(StorageError::NotSupported(
            "MBR partitions have no GUIDs".to_string(),
        )),
    }
}
