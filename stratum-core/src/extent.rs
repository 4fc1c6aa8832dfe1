//! Raw block extent access
//!
//! The codec never talks to a device directly; it goes through
//! [`BlockExtent`], a sector-aligned read/write/flush surface. Production
//! devices use [`FileExtent`] over an opened block node; tests and loop
//! image staging use [`MemExtent`].

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use crate::error::{Result, StorageError};

/// Sector-aligned access to a raw block extent.
///
/// Offsets and lengths must be multiples of `sector_size()`; implementations
/// reject anything else with `Misaligned` rather than rounding.
pub trait BlockExtent: Send + Sync {
    /// Logical sector size in bytes
    fn sector_size(&self) -> u32;

    /// Total size in bytes (a whole number of sectors)
    fn size_bytes(&self) -> u64;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Persist all completed writes to stable storage
    fn flush(&self) -> Result<()>;

    /// Total size in logical sectors
    fn total_sectors(&self) -> u64 {
        self.size_bytes() / u64::from(self.sector_size())
    }
}

fn check_aligned(extent: &dyn BlockExtent, offset: u64, len: usize) -> Result<()> {
    let ss = u64::from(extent.sector_size());
    if offset % ss != 0 || (len as u64) % ss != 0 {
        return Err(StorageError::Misaligned { offset });
    }
    if offset.saturating_add(len as u64) > extent.size_bytes() {
        return Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("access past end of extent at offset {offset}"),
        )));
    }
    Ok(())
}

/// An in-memory extent backed by a byte vector.
///
/// Interior mutability so the codec's `&dyn BlockExtent` write path works
/// against shared test fixtures.
pub struct MemExtent {
    sector_size: u32,
    data: Mutex<Vec<u8>>,
}

impl MemExtent {
    pub fn new(total_sectors: u64, sector_size: u32) -> Self {
        let len = usize::try_from(total_sectors * u64::from(sector_size))
            .expect("extent too large for memory");
        Self {
            sector_size,
            data: Mutex::new(vec![0u8; len]),
        }
    }

    /// Flip a single bit at a byte offset. Test hook for checksum
    /// sensitivity checks.
    pub fn flip_bit(&self, byte_offset: u64, bit: u8) {
        let mut data = self.data.lock().expect("extent lock poisoned");
        let idx = usize::try_from(byte_offset).expect("offset too large");
        data[idx] ^= 1 << bit;
    }

    /// Copy of one sector, for white-box assertions
    pub fn sector(&self, lba: u64) -> Vec<u8> {
        let ss = self.sector_size as usize;
        let data = self.data.lock().expect("extent lock poisoned");
        let start = usize::try_from(lba).expect("lba too large") * ss;
        data[start..start + ss].to_vec()
    }
}

impl BlockExtent for MemExtent {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn size_bytes(&self) -> u64 {
        self.data.lock().expect("extent lock poisoned").len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_aligned(self, offset, buf.len())?;
        let data = self.data.lock().expect("extent lock poisoned");
        let start = usize::try_from(offset).expect("offset too large");
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        check_aligned(self, offset, bytes.len())?;
        let mut data = self.data.lock().expect("extent lock poisoned");
        let start = usize::try_from(offset).expect("offset too large");
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A file-backed extent over an opened block device node or disk image.
///
/// The sector size is supplied by the discovery collaborator (which probes
/// ioctl/sysfs); this layer only enforces it.
pub struct FileExtent {
    file: File,
    sector_size: u32,
    size_bytes: u64,
}

impl FileExtent {
    pub fn new(file: File, sector_size: u32) -> Result<Self> {
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            file,
            sector_size,
            size_bytes,
        })
    }

    /// Open with an explicit size, for block nodes where metadata length
    /// does not report capacity.
    pub fn with_size(file: File, sector_size: u32, size_bytes: u64) -> Self {
        Self {
            file,
            sector_size,
            size_bytes,
        }
    }
}

impl BlockExtent for FileExtent {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_aligned(self, offset, buf.len())?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        check_aligned(self, offset, bytes.len())?;
        self.file.write_all_at(bytes, offset)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
