//! Common utility types shared across models

use serde::{Deserialize, Serialize};

/// Partition alignment boundary (1 MiB) - standard for modern disks
pub const DEFAULT_ALIGNMENT_BYTES: u64 = 1024 * 1024;

/// A contiguous run of logical blocks (used for partitions and free space)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbaRange {
    /// First sector (inclusive)
    pub start: u64,

    /// Length in sectors
    pub length: u64,
}

impl LbaRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// First sector past the end of the range (exclusive)
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    /// Last sector inside the range (inclusive). Meaningless for empty ranges.
    pub fn last(&self) -> u64 {
        self.end().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Check whether two ranges share at least one sector
    pub fn overlaps(&self, other: &LbaRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end() && other.start < self.end()
    }

    /// Check whether this range lies entirely within `outer`
    pub fn contained_in(&self, outer: &LbaRange) -> bool {
        self.start >= outer.start && self.end() <= outer.end()
    }
}

/// Round `lba` up to the next multiple of `alignment` sectors.
///
/// An alignment of zero or one leaves the value untouched.
pub fn align_up(lba: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return lba;
    }
    lba.div_ceil(alignment) * alignment
}

/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: u64) -> String {
    let mut steps = 0;
    let mut val: f64 = bytes as f64;

    while val > 1024. && steps <= 5 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        _ => "EB",
    };

    format!("{:.2} {}", val, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(34, 2048), 2048);
        assert_eq!(align_up(2048, 2048), 2048);
        assert_eq!(align_up(2049, 2048), 4096);
        assert_eq!(align_up(502048, 2048), 503808);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn range_overlap_is_symmetric_and_exclusive_of_touching() {
        let a = LbaRange::new(2048, 1000);
        let b = LbaRange::new(3048, 1000);
        let c = LbaRange::new(3000, 100);

        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn empty_ranges_never_overlap() {
        let a = LbaRange::new(100, 0);
        let b = LbaRange::new(50, 200);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }
}
