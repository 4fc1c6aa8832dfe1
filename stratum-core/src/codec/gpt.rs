//! GPT binary encoding
//!
//! Bit-exact encode/decode of the 92-byte GPT header and 128-byte
//! partition entries per the UEFI specification. GUIDs are stored on disk
//! in the mixed-endian layout (first three fields little-endian, last two
//! big-endian); `Uuid::to_bytes_le`/`from_bytes_le` perform that transform,
//! so everything above this module works with canonical logical GUIDs.

use uuid::Uuid;

use stratum_types::{LbaRange, PartitionInfo, PartitionRole, TableKind, TypeCode};

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;
pub const GPT_HEADER_SIZE: u32 = 92;
pub const GPT_ENTRY_SIZE: u32 = 128;
pub const GPT_ENTRY_COUNT: u32 = 128;
/// Largest entry size accepted on decode (the UEFI forms are 128 * 2^n)
pub const GPT_ENTRY_SIZE_MAX: u32 = 4096;
const GPT_ENTRY_COUNT_MAX: u32 = 1024;
const GPT_NAME_UNITS: usize = 36;

/// Decoded GPT header fields. CRCs are not stored: they are recomputed on
/// encode and verified on decode, so a decoded header is always consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptHeader {
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable: u64,
    pub last_usable: u64,
    pub disk_guid: Uuid,
    pub entry_start_lba: u64,
    pub entry_count: u32,
    pub entry_size: u32,
}

/// One used GPT partition entry. `slot` is the zero-based position in the
/// entry array; the public 1-based partition index is `slot + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptEntry {
    pub slot: u32,
    pub type_guid: Uuid,
    pub unique_guid: Uuid,
    pub first_lba: u64,
    pub last_lba: u64,
    pub attrs: u64,
    pub name: String,
}

impl GptEntry {
    pub fn range(&self) -> LbaRange {
        LbaRange::new(self.first_lba, self.last_lba - self.first_lba + 1)
    }

    pub fn to_partition_info(&self) -> PartitionInfo {
        let type_code = TypeCode::Gpt(self.type_guid);
        PartitionInfo {
            index: self.slot + 1,
            first_lba: self.first_lba,
            length: self.last_lba - self.first_lba + 1,
            type_code,
            uuid: self.unique_guid,
            name: self.name.clone(),
            role: PartitionRole::derive(TableKind::Gpt, &type_code, self.slot + 1),
            flags: self.attrs,
        }
    }
}

/// A complete in-memory GPT image: header geometry plus the used entries,
/// sorted by slot. Always a private working copy during a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptImage {
    pub header: GptHeader,
    pub entries: Vec<GptEntry>,
}

impl GptImage {
    /// The window partitions may occupy, inclusive of both ends
    pub fn usable(&self) -> LbaRange {
        LbaRange::new(
            self.header.first_usable,
            self.header.last_usable - self.header.first_usable + 1,
        )
    }

    /// Sectors occupied by the entry array for this geometry
    pub fn entry_array_sectors(&self, sector_size: u32) -> u64 {
        entry_array_sectors(self.header.entry_count, self.header.entry_size, sector_size)
    }

    pub fn entry_at(&self, index: u32) -> Option<&GptEntry> {
        self.entries.iter().find(|e| e.slot + 1 == index)
    }

    pub fn entry_at_mut(&mut self, index: u32) -> Option<&mut GptEntry> {
        self.entries.iter_mut().find(|e| e.slot + 1 == index)
    }

    /// First unused slot in the entry array
    pub fn free_slot(&self) -> Option<u32> {
        (0..self.header.entry_count).find(|slot| self.entries.iter().all(|e| e.slot != *slot))
    }

    pub fn partitions(&self) -> Vec<PartitionInfo> {
        self.entries.iter().map(GptEntry::to_partition_info).collect()
    }
}

pub fn entry_array_sectors(count: u32, size: u32, sector_size: u32) -> u64 {
    (u64::from(count) * u64::from(size)).div_ceil(u64::from(sector_size))
}

/// Serialize the header into the first 92 bytes of `sector`, computing the
/// header CRC with its own field zeroed, per the UEFI specification.
pub fn encode_header(header: &GptHeader, entry_array_crc: u32, sector: &mut [u8]) {
    sector.fill(0);
    sector[0..8].copy_from_slice(GPT_SIGNATURE);
    sector[8..12].copy_from_slice(&GPT_REVISION.to_le_bytes());
    sector[12..16].copy_from_slice(&GPT_HEADER_SIZE.to_le_bytes());
    // 16..20 header CRC, filled below; 20..24 reserved, stays zero
    sector[24..32].copy_from_slice(&header.current_lba.to_le_bytes());
    sector[32..40].copy_from_slice(&header.backup_lba.to_le_bytes());
    sector[40..48].copy_from_slice(&header.first_usable.to_le_bytes());
    sector[48..56].copy_from_slice(&header.last_usable.to_le_bytes());
    sector[56..72].copy_from_slice(&header.disk_guid.to_bytes_le());
    sector[72..80].copy_from_slice(&header.entry_start_lba.to_le_bytes());
    sector[80..84].copy_from_slice(&header.entry_count.to_le_bytes());
    sector[84..88].copy_from_slice(&header.entry_size.to_le_bytes());
    sector[88..92].copy_from_slice(&entry_array_crc.to_le_bytes());

    let crc = crc32fast::hash(&sector[0..GPT_HEADER_SIZE as usize]);
    sector[16..20].copy_from_slice(&crc.to_le_bytes());
}

/// Decode and fully validate one header copy.
///
/// Returns the header fields plus the entry-array CRC it claims, or a
/// human-readable failure reason used to build `Corrupt` errors.
pub fn decode_header(sector: &[u8], total_sectors: u64) -> std::result::Result<(GptHeader, u32), String> {
    if sector.len() < GPT_HEADER_SIZE as usize {
        return Err("sector shorter than GPT header".to_string());
    }
    if &sector[0..8] != GPT_SIGNATURE {
        return Err("bad signature".to_string());
    }

    let header_size = u32::from_le_bytes(sector[12..16].try_into().unwrap());
    if !(GPT_HEADER_SIZE..=512).contains(&header_size)
        || header_size as usize > sector.len()
    {
        return Err(format!("implausible header size {header_size}"));
    }

    let stored_crc = u32::from_le_bytes(sector[16..20].try_into().unwrap());
    let mut scratch = sector[0..header_size as usize].to_vec();
    scratch[16..20].fill(0);
    let computed = crc32fast::hash(&scratch);
    if computed != stored_crc {
        return Err(format!(
            "header CRC mismatch (stored {stored_crc:#010x}, computed {computed:#010x})"
        ));
    }

    let header = GptHeader {
        current_lba: u64::from_le_bytes(sector[24..32].try_into().unwrap()),
        backup_lba: u64::from_le_bytes(sector[32..40].try_into().unwrap()),
        first_usable: u64::from_le_bytes(sector[40..48].try_into().unwrap()),
        last_usable: u64::from_le_bytes(sector[48..56].try_into().unwrap()),
        disk_guid: Uuid::from_bytes_le(sector[56..72].try_into().unwrap()),
        entry_start_lba: u64::from_le_bytes(sector[72..80].try_into().unwrap()),
        entry_count: u32::from_le_bytes(sector[80..84].try_into().unwrap()),
        entry_size: u32::from_le_bytes(sector[84..88].try_into().unwrap()),
    };
    let entry_crc = u32::from_le_bytes(sector[88..92].try_into().unwrap());

    // A matching CRC only proves the header was written as-is; the claimed
    // geometry is still untrusted and must be bounded before it sizes any
    // allocation or arithmetic downstream.
    if header.first_usable == 0
        || header.first_usable > header.last_usable
        || header.last_usable >= total_sectors
    {
        return Err(format!(
            "implausible usable window {}..{} for {total_sectors}-sector device",
            header.first_usable, header.last_usable
        ));
    }
    if !(GPT_ENTRY_SIZE..=GPT_ENTRY_SIZE_MAX).contains(&header.entry_size)
        || !header.entry_size.is_power_of_two()
        || header.entry_count == 0
        || header.entry_count > GPT_ENTRY_COUNT_MAX
    {
        return Err(format!(
            "implausible entry geometry ({} entries of {} bytes)",
            header.entry_count, header.entry_size
        ));
    }

    // Header copies live at LBA 1 and the last LBA; anything else cannot
    // anchor a backup mirror.
    let last_lba = total_sectors - 1;
    let locations_ok = (header.current_lba == 1 && header.backup_lba == last_lba)
        || (header.current_lba == last_lba && header.backup_lba == 1);
    if !locations_ok {
        return Err(format!(
            "implausible header locations (current {}, backup {}) for {total_sectors}-sector device",
            header.current_lba, header.backup_lba
        ));
    }

    let array_sectors = entry_array_sectors(
        header.entry_count,
        header.entry_size,
        u32::try_from(sector.len()).unwrap_or(u32::MAX),
    );
    if header.entry_start_lba == 0
        || header.entry_start_lba.saturating_add(array_sectors) > total_sectors
    {
        return Err(format!(
            "entry array at LBA {} does not fit a {total_sectors}-sector device",
            header.entry_start_lba
        ));
    }

    Ok((header, entry_crc))
}

/// Serialize the full entry array for `header`'s geometry.
pub fn encode_entries(header: &GptHeader, entries: &[GptEntry]) -> Vec<u8> {
    let len = header.entry_count as usize * header.entry_size as usize;
    let mut buf = vec![0u8; len];

    for entry in entries {
        let off = entry.slot as usize * header.entry_size as usize;
        let slot = &mut buf[off..off + header.entry_size as usize];
        slot[0..16].copy_from_slice(&entry.type_guid.to_bytes_le());
        slot[16..32].copy_from_slice(&entry.unique_guid.to_bytes_le());
        slot[32..40].copy_from_slice(&entry.first_lba.to_le_bytes());
        slot[40..48].copy_from_slice(&entry.last_lba.to_le_bytes());
        slot[48..56].copy_from_slice(&entry.attrs.to_le_bytes());

        for (i, unit) in entry.name.encode_utf16().take(GPT_NAME_UNITS).enumerate() {
            slot[72 + i * 2..74 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
    }

    buf
}

/// Decode the used entries from a raw entry array.
pub fn decode_entries(header: &GptHeader, buf: &[u8]) -> Vec<GptEntry> {
    let mut entries = Vec::new();

    for slot in 0..header.entry_count {
        let off = slot as usize * header.entry_size as usize;
        if off + header.entry_size as usize > buf.len() {
            break;
        }
        let raw = &buf[off..off + header.entry_size as usize];

        let type_guid = Uuid::from_bytes_le(raw[0..16].try_into().unwrap());
        if type_guid.is_nil() {
            continue;
        }

        let mut name = String::new();
        let units: Vec<u16> = (0..GPT_NAME_UNITS)
            .map(|i| u16::from_le_bytes(raw[72 + i * 2..74 + i * 2].try_into().unwrap()))
            .take_while(|u| *u != 0)
            .collect();
        name.extend(char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)));

        entries.push(GptEntry {
            slot,
            type_guid,
            unique_guid: Uuid::from_bytes_le(raw[16..32].try_into().unwrap()),
            first_lba: u64::from_le_bytes(raw[32..40].try_into().unwrap()),
            last_lba: u64::from_le_bytes(raw[40..48].try_into().unwrap()),
            attrs: u64::from_le_bytes(raw[48..56].try_into().unwrap()),
            name,
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::uuid;

    fn sample_header() -> GptHeader {
        GptHeader {
            current_lba: 1,
            backup_lba: 999_999,
            first_usable: 34,
            last_usable: 999_966,
            disk_guid: uuid!("12345678-9abc-def0-1234-56789abcdef0"),
            entry_start_lba: 2,
            entry_count: GPT_ENTRY_COUNT,
            entry_size: GPT_ENTRY_SIZE,
        }
    }

    #[test]
    fn header_round_trips_with_valid_crc() {
        let header = sample_header();
        let mut sector = vec![0u8; 512];
        encode_header(&header, 0xdeadbeef, &mut sector);

        let (decoded, entry_crc) = decode_header(&sector, 1_000_000).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(entry_crc, 0xdeadbeef);
    }

    #[test]
    fn header_crc_is_computed_with_crc_field_zeroed() {
        let header = sample_header();
        let mut sector = vec![0u8; 512];
        encode_header(&header, 0, &mut sector);

        let mut scratch = sector[0..92].to_vec();
        let stored = u32::from_le_bytes(scratch[16..20].try_into().unwrap());
        scratch[16..20].fill(0);
        assert_eq!(crc32fast::hash(&scratch), stored);
    }

    #[test]
    fn flipping_a_header_bit_fails_validation() {
        let header = sample_header();
        let mut sector = vec![0u8; 512];
        encode_header(&header, 0, &mut sector);

        sector[40] ^= 0x01; // first_usable low byte
        let err = decode_header(&sector, 1_000_000).unwrap_err();
        assert!(err.contains("CRC mismatch"), "unexpected reason: {err}");
    }

    #[test]
    fn oversized_entry_geometry_is_rejected_despite_a_valid_crc() {
        let mut header = sample_header();
        header.entry_size = u32::MAX;
        let mut sector = vec![0u8; 512];
        encode_header(&header, 0, &mut sector);

        // The CRC covers the hostile value, so only the geometry bound can
        // refuse it.
        let err = decode_header(&sector, 1_000_000).unwrap_err();
        assert!(err.contains("entry geometry"), "unexpected reason: {err}");

        header.entry_size = 192; // not a 128 * 2^n form
        encode_header(&header, 0, &mut sector);
        assert!(decode_header(&sector, 1_000_000).is_err());
    }

    #[test]
    fn misplaced_header_locations_are_rejected() {
        let mut header = sample_header();
        header.backup_lba = 5;
        let mut sector = vec![0u8; 512];
        encode_header(&header, 0, &mut sector);

        let err = decode_header(&sector, 1_000_000).unwrap_err();
        assert!(err.contains("header locations"), "unexpected reason: {err}");
    }

    #[test]
    fn entry_array_must_fit_the_device() {
        let mut header = sample_header();
        header.entry_start_lba = 999_998;
        let mut sector = vec![0u8; 512];
        encode_header(&header, 0, &mut sector);

        let err = decode_header(&sector, 1_000_000).unwrap_err();
        assert!(err.contains("does not fit"), "unexpected reason: {err}");
    }

    #[test]
    fn guid_is_stored_mixed_endian() {
        let header = sample_header();
        let mut sector = vec![0u8; 512];
        encode_header(&header, 0, &mut sector);

        // First field of 12345678-... is little-endian on disk.
        assert_eq!(&sector[56..60], &[0x78, 0x56, 0x34, 0x12]);
        // Final node field stays big-endian.
        assert_eq!(&sector[66..72], &[0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0]);
    }

    #[test]
    fn entries_round_trip_including_utf16_names() {
        let header = sample_header();
        let entry = GptEntry {
            slot: 3,
            type_guid: uuid!("0fc63daf-8483-4772-8e79-3d69d8477de4"),
            unique_guid: uuid!("11111111-2222-3333-4444-555555555555"),
            first_lba: 2048,
            last_lba: 502_047,
            attrs: 1 << 63,
            name: "root-ärk".to_string(),
        };

        let buf = encode_entries(&header, &[entry.clone()]);
        assert_eq!(buf.len(), 128 * 128);

        let decoded = decode_entries(&header, &buf);
        assert_eq!(decoded, vec![entry]);
    }

    #[test]
    fn names_truncate_at_36_utf16_units() {
        let header = sample_header();
        let long = "x".repeat(50);
        let entry = GptEntry {
            slot: 0,
            type_guid: uuid!("0fc63daf-8483-4772-8e79-3d69d8477de4"),
            unique_guid: uuid!("11111111-2222-3333-4444-555555555555"),
            first_lba: 2048,
            last_lba: 4095,
            attrs: 0,
            name: long,
        };

        let buf = encode_entries(&header, &[entry]);
        let decoded = decode_entries(&header, &buf);
        assert_eq!(decoded[0].name.len(), 36);
    }
}
