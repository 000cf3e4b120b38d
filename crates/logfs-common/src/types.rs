//! Core type definitions for logfs
//!
//! Offsets and ranges shared by the buffer, the logs built on top of it and
//! the block device layer.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// Absolute byte offset on the block device
pub type DiskOffset = u64;

/// Half-open interval `[beg, end)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range<T> {
    pub beg: T,
    pub end: T,
}

impl<T> Range<T>
where
    T: Copy + PartialOrd + Sub<Output = T>,
{
    /// Create a new range
    pub const fn new(beg: T, end: T) -> Self {
        Self { beg, end }
    }

    /// Number of elements in the range
    pub fn size(&self) -> T {
        self.end - self.beg
    }

    /// Returns true if the range holds nothing
    pub fn is_empty(&self) -> bool {
        self.beg >= self.end
    }

    /// Returns true if `x` lies inside the range
    pub fn contains(&self, x: T) -> bool {
        self.beg <= x && x < self.end
    }

    /// Returns true if the two ranges share at least one element
    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_empty() && !other.is_empty() && self.beg < other.end && other.beg < self.end
    }
}

impl Range<usize> {
    /// Convert to the std slice range
    #[must_use]
    pub const fn as_std(&self) -> std::ops::Range<usize> {
        self.beg..self.end
    }
}

/// Byte range inside a file
pub type FileRange = Range<u64>;

/// Inode number
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    From,
    Into,
    Display,
)]
#[display("inode#{_0}")]
pub struct InodeId(u64);

impl InodeId {
    /// Create from a raw inode number
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw inode number
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// 1 KiB
pub const KIB: u64 = 1024;
/// 1 MiB
pub const MIB: u64 = 1024 * KIB;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_size() {
        let r = Range::new(512usize, 1024);
        assert_eq!(r.size(), 512);
        assert!(!r.is_empty());
        assert!(r.contains(512));
        assert!(!r.contains(1024));
        assert_eq!(r.as_std(), 512..1024);

        let empty = Range::new(1024usize, 1024);
        assert!(empty.is_empty());
        assert_eq!(empty.size(), 0);
    }

    #[test]
    fn test_range_intersects() {
        let a = Range::new(0u64, 512);
        let b = Range::new(512u64, 1024);
        let c = Range::new(100u64, 600);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(b.intersects(&c));
        assert!(!a.intersects(&Range::new(10, 10)));
    }

    #[test]
    fn test_inode_display() {
        let inode = InodeId::new(42);
        assert_eq!(inode.to_string(), "inode#42");
        assert_eq!(u64::from(inode), 42);
    }
}
