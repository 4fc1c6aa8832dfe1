//! Validation and consistency rules
//!
//! Pure functions over a [`TableImage`]: free-extent computation, first-fit
//! placement, name/UUID uniqueness, and flag/type-code checks. The codec's
//! edit verbs call these before mutating, so a failed check never leaves a
//! half-edited image.

use stratum_types::{DEFAULT_ALIGNMENT_BYTES, LbaRange, MBR_BOOTABLE, TableKind, TypeCode, align_up};
use uuid::Uuid;

use crate::codec::TableImage;
use crate::error::{Result, StorageError};

/// The default 1 MiB alignment expressed in sectors
pub fn default_alignment_sectors(sector_size: u32) -> u64 {
    DEFAULT_ALIGNMENT_BYTES / u64::from(sector_size.max(1))
}

/// Ranges occupied by partitions, paired with their indices.
///
/// MBR logical partitions live inside their extended container, which is
/// already occupied, so only primaries count toward free space.
fn occupied(image: &TableImage) -> Vec<(u32, LbaRange)> {
    let mut ranges: Vec<(u32, LbaRange)> = match image {
        TableImage::Gpt(_) => image
            .partitions()
            .iter()
            .map(|p| (p.index, p.range()))
            .collect(),
        TableImage::Mbr(mbr) => mbr
            .primaries
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|e| (i as u32 + 1, e.range())))
            .collect(),
    };
    ranges.sort_by_key(|(_, r)| r.start);
    ranges
}

/// The complement of all partitions within the usable window, sorted by
/// start LBA.
pub fn free_extents(image: &TableImage) -> Vec<LbaRange> {
    let usable = image.usable();
    let mut free = Vec::new();
    let mut cursor = usable.start;

    for (_, range) in occupied(image) {
        if range.start > cursor {
            free.push(LbaRange::new(cursor, range.start - cursor));
        }
        cursor = cursor.max(range.end());
    }
    if cursor < usable.end() {
        free.push(LbaRange::new(cursor, usable.end() - cursor));
    }

    free
}

/// First-fit placement: round each free extent's start up to `alignment`
/// and take the first extent that still holds `length` sectors.
pub fn place(image: &TableImage, length: u64, alignment: u64) -> Result<LbaRange> {
    let mut largest_free = 0;

    for extent in free_extents(image) {
        let start = align_up(extent.start, alignment);
        if start >= extent.end() {
            continue;
        }
        let available = extent.end() - start;
        largest_free = largest_free.max(available);
        if available >= length {
            return Ok(LbaRange::new(start, length));
        }
    }

    Err(StorageError::InsufficientSpace {
        requested: length,
        largest_free,
    })
}

/// Fail with `DuplicateName` if any entry other than `exclude` carries
/// `name`. Uniqueness is per owning table.
pub fn check_name_unique(image: &TableImage, name: &str, exclude: Option<u32>) -> Result<()> {
    for p in image.partitions() {
        if Some(p.index) == exclude {
            continue;
        }
        if !p.name.is_empty() && p.name == name {
            return Err(StorageError::DuplicateName(name.to_string()));
        }
    }
    Ok(())
}

/// Fail with `DuplicateUuid` if any entry other than `exclude` carries
/// `uuid`. Operates on canonical logical GUIDs, never the on-disk
/// byte-swapped form.
pub fn check_uuid_unique(image: &TableImage, uuid: Uuid, exclude: Option<u32>) -> Result<()> {
    for p in image.partitions() {
        if Some(p.index) == exclude {
            continue;
        }
        if !p.uuid.is_nil() && p.uuid == uuid {
            return Err(StorageError::DuplicateUuid(uuid));
        }
    }
    Ok(())
}

/// GPT attribute values must be a single bit within the 64-bit field and
/// non-zero. MBR knows only the bootable flag.
pub fn check_flag_value(kind: TableKind, value: u64) -> Result<()> {
    if value == 0 || !value.is_power_of_two() {
        return Err(StorageError::InvalidFlag(value));
    }
    if kind == TableKind::MbrDos && value != MBR_BOOTABLE {
        return Err(StorageError::InvalidFlag(value));
    }
    Ok(())
}

/// MBR type codes must fit one byte (1-255); GPT type GUIDs must be
/// non-nil and resolvable through the type catalog.
pub fn check_type_code(kind: TableKind, code: &TypeCode) -> Result<()> {
    match (kind, code) {
        (TableKind::MbrDos, TypeCode::Mbr(0)) => Err(StorageError::InvalidTypeCode(
            "MBR type 0x00 marks an empty slot".to_string(),
        )),
        (TableKind::MbrDos, TypeCode::Mbr(_)) => Ok(()),
        (TableKind::Gpt, TypeCode::Gpt(guid)) => {
            if guid.is_nil() {
                return Err(StorageError::InvalidTypeCode(
                    "nil GPT type GUID".to_string(),
                ));
            }
            Ok(())
        }
        (TableKind::Gpt, TypeCode::Mbr(b)) => Err(StorageError::InvalidTypeCode(format!(
            "MBR type {b:#04x} on a GPT table"
        ))),
        (TableKind::MbrDos, TypeCode::Gpt(g)) => Err(StorageError::InvalidTypeCode(format!(
            "GPT type GUID {g} on an MBR table"
        ))),
    }
}

/// Resolve a type name (e.g., "Linux swap") through the catalog for the
/// given table kind.
pub fn resolve_type_name(kind: TableKind, name: &str) -> Result<TypeCode> {
    let info = stratum_types::partition_types::find_by_name(kind.as_str(), name)
        .ok_or_else(|| StorageError::InvalidTypeCode(format!("unknown type name {name:?}")))?;
    match kind {
        TableKind::Gpt => info
            .gpt_guid()
            .map(TypeCode::Gpt)
            .ok_or_else(|| StorageError::InvalidTypeCode(format!("bad catalog GUID for {name:?}"))),
        TableKind::MbrDos => info
            .mbr_code()
            .map(TypeCode::Mbr)
            .ok_or_else(|| StorageError::InvalidTypeCode(format!("bad catalog code for {name:?}"))),
    }
}

/// Fail with `Overlap` if `range` intersects any entry other than
/// `exclude`, or leaves the usable window.
pub fn check_no_overlap(image: &TableImage, range: LbaRange, exclude: Option<u32>) -> Result<()> {
    let usable = image.usable();
    if !range.contained_in(&usable) {
        return Err(StorageError::Overlap {
            requested: range,
            existing: 0,
        });
    }
    for (index, existing) in occupied(image) {
        if Some(index) == exclude {
            continue;
        }
        if range.overlaps(&existing) {
            return Err(StorageError::Overlap {
                requested: range,
                existing: index,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, NewEntry};
    use crate::extent::MemExtent;

    fn empty_gpt(total_sectors: u64) -> TableImage {
        let extent = MemExtent::new(total_sectors, 512);
        codec::new_table(&extent, TableKind::Gpt).unwrap()
    }

    fn add(image: &mut TableImage, name: &str, length: u64) -> crate::error::Result<()> {
        codec::add_entry(
            image,
            &NewEntry {
                name: name.to_string(),
                length,
                alignment: Some(2048),
                type_code: None,
                uuid: None,
            },
        )
        .map(|_| ())
    }

    #[test]
    fn free_extents_of_an_empty_table_is_the_usable_window() {
        let image = empty_gpt(1_000_000);
        let free = free_extents(&image);
        assert_eq!(free, vec![LbaRange::new(34, 999_966 - 34 + 1)]);
    }

    #[test]
    fn placement_rounds_up_to_alignment() {
        let image = empty_gpt(1_000_000);
        let range = place(&image, 500_000, 2048).unwrap();
        assert_eq!(range.start, 2048);

        let range = place(&image, 500_000, 1).unwrap();
        assert_eq!(range.start, 34);
    }

    #[test]
    fn placement_skips_occupied_extents_first_fit() {
        let mut image = empty_gpt(1_000_000);
        add(&mut image, "a", 500_000).unwrap();

        // Next fit starts after 2048 + 500_000 = 502_048, aligned up.
        let range = place(&image, 200_000, 2048).unwrap();
        assert_eq!(range.start, 503_808);
    }

    #[test]
    fn insufficient_space_reports_largest_free_extent() {
        let image = empty_gpt(10_000);
        let err = place(&image, 1_000_000, 2048).unwrap_err();
        match err {
            StorageError::InsufficientSpace {
                requested,
                largest_free,
            } => {
                assert_eq!(requested, 1_000_000);
                assert!(largest_free > 0 && largest_free < 10_000);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn space_accounting_matches_after_adds_and_deletes() {
        let mut image = empty_gpt(1_000_000);
        add(&mut image, "a", 100_000).unwrap();
        add(&mut image, "b", 100_000).unwrap();
        add(&mut image, "c", 100_000).unwrap();
        codec::remove_entry(&mut image, 2).unwrap();

        // Recompute from the surviving entry set alone.
        let mut rebuilt = empty_gpt(1_000_000);
        for p in image.partitions() {
            let range = p.range();
            codec::add_entry(
                &mut rebuilt,
                &NewEntry {
                    name: p.name.clone(),
                    length: range.length,
                    alignment: Some(1),
                    type_code: Some(p.type_code),
                    uuid: Some(p.uuid),
                },
            )
            .unwrap();
        }

        assert_eq!(free_extents(&image), free_extents(&rebuilt));
    }

    #[test]
    fn duplicate_names_and_uuids_are_rejected() {
        let mut image = empty_gpt(1_000_000);
        add(&mut image, "root", 10_000).unwrap();

        let err = add(&mut image, "root", 10_000).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateName(ref n) if n == "root"));

        let existing = image.partitions()[0].uuid;
        let err = check_uuid_unique(&image, existing, None).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateUuid(u) if u == existing));
        check_uuid_unique(&image, existing, Some(1)).unwrap();
    }

    #[test]
    fn flag_values_must_be_single_bits() {
        check_flag_value(TableKind::Gpt, 1).unwrap();
        check_flag_value(TableKind::Gpt, 1 << 63).unwrap();
        assert!(check_flag_value(TableKind::Gpt, 0).is_err());
        assert!(check_flag_value(TableKind::Gpt, 0b11).is_err());
        check_flag_value(TableKind::MbrDos, MBR_BOOTABLE).unwrap();
        assert!(check_flag_value(TableKind::MbrDos, 1).is_err());
    }

    #[test]
    fn type_codes_validate_per_table_kind() {
        check_type_code(TableKind::MbrDos, &TypeCode::Mbr(0x83)).unwrap();
        assert!(check_type_code(TableKind::MbrDos, &TypeCode::Mbr(0)).is_err());
        assert!(check_type_code(TableKind::Gpt, &TypeCode::Gpt(Uuid::nil())).is_err());
        assert!(check_type_code(TableKind::Gpt, &TypeCode::Mbr(0x83)).is_err());
    }

    #[test]
    fn type_names_resolve_through_the_catalog() {
        let code = resolve_type_name(TableKind::Gpt, "Linux swap").unwrap();
        assert!(matches!(code, TypeCode::Gpt(_)));

        let code = resolve_type_name(TableKind::MbrDos, "Linux").unwrap();
        assert_eq!(code, TypeCode::Mbr(0x83));

        assert!(resolve_type_name(TableKind::Gpt, "No Such Type").is_err());
    }

    #[test]
    fn overlap_detection_names_the_colliding_partition() {
        let mut image = empty_gpt(1_000_000);
        add(&mut image, "a", 100_000).unwrap();

        let err = check_no_overlap(&image, LbaRange::new(2048, 10), None).unwrap_err();
        assert!(matches!(err, StorageError::Overlap { existing: 1, .. }));

        check_no_overlap(&image, LbaRange::new(2048, 10), Some(1)).unwrap();

        // Outside the usable window.
        assert!(check_no_overlap(&image, LbaRange::new(0, 10), None).is_err());
    }
}
