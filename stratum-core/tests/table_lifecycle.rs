// SPDX-License-Identifier: GPL-3.0-only

//! Full partition-table lifecycle over an in-memory extent: create,
//! populate, persist, damage, recover, zap.

use stratum_core::codec::{self, NewEntry, TableImage, gpt};
use stratum_core::{BlockExtent, MemExtent, StorageError, validate};
use stratum_types::{LbaRange, MBR_BOOTABLE, TableKind, TypeCode};
use uuid::uuid;

const DISK_SECTORS: u64 = 1_000_000;

fn gpt_disk() -> (MemExtent, TableImage) {
    let extent = MemExtent::new(DISK_SECTORS, 512);
    let image = codec::new_table(&extent, TableKind::Gpt).unwrap();
    codec::write_table(&extent, &image).unwrap();
    (extent, image)
}

#[test]
fn empty_gpt_reads_back_with_full_usable_window() {
    let (extent, image) = gpt_disk();
    let reread = codec::read_table(&extent).unwrap();

    assert_eq!(reread.kind(), TableKind::Gpt);
    assert!(reread.partitions().is_empty());
    // 32 entry-array sectors on each side of the disk plus the two headers
    assert_eq!(reread.usable(), LbaRange::new(34, 999_966 - 34 + 1));
    assert_eq!(reread, image);
}

#[test]
fn first_fit_placement_aligns_to_one_mebibyte() {
    let (extent, mut image) = gpt_disk();

    let root = codec::add_entry(
        &mut image,
        &NewEntry {
            name: "root".into(),
            length: 500_000,
            alignment: Some(2048),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(root.index, 1);
    assert_eq!(root.first_lba, 2048);
    assert_eq!(root.range(), LbaRange::new(2048, 500_000));

    // Second partition lands just past the first, rounded up to the next
    // 2048-sector boundary: 502048 -> 503808.
    let swap = codec::add_entry(
        &mut image,
        &NewEntry {
            name: "swap".into(),
            length: 200_000,
            alignment: Some(2048),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(swap.index, 2);
    assert_eq!(swap.first_lba, 503_808);

    codec::write_table(&extent, &image).unwrap();
    let reread = codec::read_table(&extent).unwrap();
    assert_eq!(reread.partitions().len(), 2);
    assert_eq!(reread, image);
}

#[test]
fn oversized_request_leaves_the_table_untouched() {
    let (_extent, mut image) = gpt_disk();
    codec::add_entry(
        &mut image,
        &NewEntry {
            name: "root".into(),
            length: 500_000,
            alignment: Some(2048),
            ..Default::default()
        },
    )
    .unwrap();

    let before = validate::free_extents(&image);
    let err = codec::add_entry(
        &mut image,
        &NewEntry {
            name: "huge".into(),
            length: DISK_SECTORS,
            alignment: Some(2048),
            ..Default::default()
        },
    )
    .unwrap_err();

    match err {
        StorageError::InsufficientSpace {
            requested,
            largest_free,
        } => {
            assert_eq!(requested, DISK_SECTORS);
            assert!(largest_free < DISK_SECTORS);
        }
        other => panic!("expected InsufficientSpace, got {other:?}"),
    }
    assert_eq!(validate::free_extents(&image), before);
}

#[test]
fn duplicate_names_and_uuids_are_rejected() {
    let (_extent, mut image) = gpt_disk();
    let fixed = uuid!("c2f1b5f6-c1a0-4d2e-9f0e-0c7a3f6d1b42");
    codec::add_entry(
        &mut image,
        &NewEntry {
            name: "data".into(),
            length: 4096,
            uuid: Some(fixed),
            ..Default::default()
        },
    )
    .unwrap();

    let err = codec::add_entry(
        &mut image,
        &NewEntry {
            name: "data".into(),
            length: 4096,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateName(n) if n == "data"));

    let err = codec::add_entry(
        &mut image,
        &NewEntry {
            name: "data2".into(),
            length: 4096,
            uuid: Some(fixed),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateUuid(u) if u == fixed));
}

#[test]
fn primary_corruption_falls_back_to_the_backup() {
    let (extent, mut image) = gpt_disk();
    codec::add_entry(
        &mut image,
        &NewEntry {
            name: "root".into(),
            length: 100_000,
            ..Default::default()
        },
    )
    .unwrap();
    codec::write_table(&extent, &image).unwrap();

    // Damage the primary header signature at LBA 1.
    extent.flip_bit(512, 0);
    let recovered = codec::read_table(&extent).unwrap();
    assert_eq!(recovered.partitions(), image.partitions());
    assert_eq!(recovered.usable(), image.usable());
}

#[test]
fn double_corruption_reports_both_failures() {
    let (extent, image) = gpt_disk();
    codec::write_table(&extent, &image).unwrap();

    extent.flip_bit(512, 3);
    extent.flip_bit((DISK_SECTORS - 1) * 512 + 40, 3);

    match codec::read_table(&extent).unwrap_err() {
        StorageError::Corrupt { primary, backup } => {
            assert!(!primary.is_empty());
            assert!(!backup.is_empty());
        }
        other => panic!("expected Corrupt, got {other:?}"),
    }
}

#[test]
fn a_single_flipped_bit_in_the_entry_array_is_detected() {
    let (extent, mut image) = gpt_disk();
    codec::add_entry(
        &mut image,
        &NewEntry {
            name: "root".into(),
            length: 100_000,
            ..Default::default()
        },
    )
    .unwrap();
    codec::write_table(&extent, &image).unwrap();

    // Flip one bit in both copies of the entry array so neither side can
    // satisfy its checksum.
    extent.flip_bit(2 * 512 + 32, 5);
    extent.flip_bit((DISK_SECTORS - 33) * 512 + 32, 5);
    assert!(matches!(
        codec::read_table(&extent),
        Err(StorageError::Corrupt { .. })
    ));
}

#[test]
fn crc_valid_hostile_geometry_reads_as_corruption_not_a_crash() {
    let (extent, mut image) = gpt_disk();
    codec::add_entry(
        &mut image,
        &NewEntry {
            name: "root".into(),
            length: 100_000,
            ..Default::default()
        },
    )
    .unwrap();
    codec::write_table(&extent, &image).unwrap();

    let TableImage::Gpt(gpt_image) = &image else {
        panic!("expected a GPT image");
    };

    // Replace the primary header with one whose CRC is valid but whose
    // claimed entry size would describe a multi-terabyte entry array. The
    // read must reject it on geometry and recover from the backup instead
    // of sizing an allocation from the hostile value.
    let mut hostile = gpt_image.header.clone();
    hostile.entry_size = u32::MAX;
    let mut sector = vec![0u8; 512];
    gpt::encode_header(&hostile, 0, &mut sector);
    extent.write_at(512, &sector).unwrap();

    let recovered = codec::read_table(&extent).unwrap();
    assert_eq!(recovered.partitions(), image.partitions());

    // A header anchoring its backup at a bogus location is equally
    // corrupt; with the far-end header also damaged the disk must surface
    // as Corrupt rather than hand mutation verbs an image whose mirror
    // could never be placed.
    let mut hostile = gpt_image.header.clone();
    hostile.backup_lba = 5;
    gpt::encode_header(&hostile, 0, &mut sector);
    extent.write_at(512, &sector).unwrap();
    extent.flip_bit((DISK_SECTORS - 1) * 512 + 40, 3);

    match codec::read_table(&extent).unwrap_err() {
        StorageError::Corrupt { primary, backup } => {
            assert!(primary.contains("header locations"), "primary: {primary}");
            assert!(!backup.is_empty());
        }
        other => panic!("expected Corrupt, got {other:?}"),
    }
}

#[test]
fn zap_is_idempotent_and_total() {
    let (extent, mut image) = gpt_disk();
    codec::add_entry(
        &mut image,
        &NewEntry {
            name: "root".into(),
            length: 100_000,
            ..Default::default()
        },
    )
    .unwrap();
    codec::write_table(&extent, &image).unwrap();

    codec::zap_table(&extent).unwrap();
    assert!(matches!(
        codec::read_table(&extent),
        Err(StorageError::NoTable)
    ));

    // Second zap of an already-empty disk is a no-op, not an error.
    codec::zap_table(&extent).unwrap();
    assert!(matches!(
        codec::read_table(&extent),
        Err(StorageError::NoTable)
    ));
}

#[test]
fn mbr_round_trips_with_boot_flag_and_types() {
    let extent = MemExtent::new(DISK_SECTORS, 512);
    let mut image = codec::new_table(&extent, TableKind::MbrDos).unwrap();

    let part = codec::add_entry(
        &mut image,
        &NewEntry {
            name: String::new(),
            length: 100_000,
            type_code: Some(TypeCode::Mbr(0x83)),
            ..Default::default()
        },
    )
    .unwrap();
    codec::set_flag(&mut image, part.index, MBR_BOOTABLE, true).unwrap();

    codec::write_table(&extent, &image).unwrap();
    let reread = codec::read_table(&extent).unwrap();
    assert_eq!(reread.kind(), TableKind::MbrDos);
    let parts = reread.partitions();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].type_code, TypeCode::Mbr(0x83));
    assert!(parts[0].flags & MBR_BOOTABLE != 0);

    // Any flag bit other than the boot flag is invalid on MBR.
    assert!(matches!(
        codec::set_flag(&mut image, part.index, 0x40, true),
        Err(StorageError::InvalidFlag(0x40))
    ));
}

#[test]
fn delete_and_rename_survive_a_round_trip() {
    let (extent, mut image) = gpt_disk();
    for name in ["root", "home", "var"] {
        codec::add_entry(
            &mut image,
            &NewEntry {
                name: name.into(),
                length: 50_000,
                ..Default::default()
            },
        )
        .unwrap();
    }

    codec::remove_entry(&mut image, 2).unwrap();
    codec::rename_entry(&mut image, 3, "srv").unwrap();
    codec::write_table(&extent, &image).unwrap();

    let reread = codec::read_table(&extent).unwrap();
    let names: Vec<_> = reread.partitions().iter().map(|p| p.name.clone()).collect();
    assert_eq!(names, vec!["root".to_string(), "srv".to_string()]);

    // The freed slot is reused by the next add.
    let refill = codec::add_entry(
        &mut image,
        &NewEntry {
            name: "home2".into(),
            length: 50_000,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(refill.index, 2);
}
