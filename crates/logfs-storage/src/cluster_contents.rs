//! Bookkeeping of file data stored in a data cluster
//!
//! Each data vector maps a disk range inside the cluster to the inode and
//! file range whose bytes it holds. Vectors never overlap; overwriting or
//! truncating a file cuts the vectors it no longer references.

use logfs_common::{DiskOffset, FileRange, InodeId};
use std::collections::BTreeMap;

/// File data stored at one disk offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterDataVec {
    pub data_owner: InodeId,
    pub data_range: FileRange,
}

/// Data vectors of one cluster, ordered by disk offset
#[derive(Debug, Default)]
pub struct DataClusterContents {
    up_to_date_data_size: u64,
    data: BTreeMap<DiskOffset, ClusterDataVec>,
}

impl DataClusterContents {
    pub fn new() -> Self {
        Self::default()
    }

    /// All data vectors by disk offset
    pub fn data(&self) -> &BTreeMap<DiskOffset, ClusterDataVec> {
        &self.data
    }

    /// Returns true if no file references data in this cluster
    pub fn is_empty(&self) -> bool {
        self.up_to_date_data_size == 0
    }

    /// Bytes of the cluster still referenced by files
    pub fn up_to_date_data_size(&self) -> u64 {
        self.up_to_date_data_size
    }

    /// Record that `data_range` of `inode` is stored at `disk_offset`
    ///
    /// # Panics
    ///
    /// Panics if the vector overlaps one already recorded.
    pub fn add_data(&mut self, disk_offset: DiskOffset, inode: InodeId, data_range: FileRange) {
        let end = disk_offset + data_range.size();
        if let Some((&prev_offset, prev)) = self.data.range(..=disk_offset).next_back() {
            assert!(
                prev_offset + prev.data_range.size() <= disk_offset,
                "data vector at {disk_offset} overlaps the one at {prev_offset}"
            );
        }
        if let Some((&next_offset, _)) = self.data.range(disk_offset..).next() {
            assert!(
                next_offset >= end,
                "data vector at {disk_offset} overlaps the one at {next_offset}"
            );
        }

        self.data.insert(
            disk_offset,
            ClusterDataVec {
                data_owner: inode,
                data_range,
            },
        );
        self.up_to_date_data_size += data_range.size();
    }

    /// Replace the vector at `disk_offset` by its remaining left and right
    /// parts
    ///
    /// Either part may be empty. The bytes between them stop being
    /// referenced.
    ///
    /// # Panics
    ///
    /// Panics if there is no vector at `disk_offset`, it does not cover
    /// `former_range`, or the new parts are not its prefix and suffix.
    pub fn cut_data(
        &mut self,
        disk_offset: DiskOffset,
        former_range: FileRange,
        new_left_range: FileRange,
        new_right_range: FileRange,
    ) {
        let former = self
            .data
            .remove(&disk_offset)
            .unwrap_or_else(|| panic!("no data vector at {disk_offset}"));
        assert_eq!(former.data_range, former_range);
        assert!(
            former_range.beg == new_left_range.beg && former_range.end == new_right_range.end,
            "new parts must start and end where the former range did"
        );
        assert!(new_left_range.end <= new_right_range.beg);

        if !new_left_range.is_empty() {
            self.data.insert(
                disk_offset,
                ClusterDataVec {
                    data_owner: former.data_owner,
                    data_range: new_left_range,
                },
            );
        }
        if !new_right_range.is_empty() {
            self.data.insert(
                disk_offset + former_range.size() - new_right_range.size(),
                ClusterDataVec {
                    data_owner: former.data_owner,
                    data_range: new_right_range,
                },
            );
        }
        self.up_to_date_data_size -=
            former_range.size() - new_left_range.size() - new_right_range.size();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(beg: u64, end: u64) -> FileRange {
        FileRange::new(beg, end)
    }

    #[test]
    fn test_add_data() {
        let mut contents = DataClusterContents::new();
        assert!(contents.is_empty());

        contents.add_data(0, InodeId::new(1), range(0, 100));
        contents.add_data(100, InodeId::new(2), range(4096, 4196));
        contents.add_data(512, InodeId::new(1), range(100, 200));

        assert!(!contents.is_empty());
        assert_eq!(contents.up_to_date_data_size(), 300);
        let offsets: Vec<_> = contents.data().keys().copied().collect();
        assert_eq!(offsets, vec![0, 100, 512]);
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn test_add_overlapping_data_panics() {
        let mut contents = DataClusterContents::new();
        contents.add_data(0, InodeId::new(1), range(0, 100));
        contents.add_data(50, InodeId::new(1), range(100, 200));
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn test_add_data_before_existing_overlapping_panics() {
        let mut contents = DataClusterContents::new();
        contents.add_data(100, InodeId::new(1), range(0, 100));
        contents.add_data(50, InodeId::new(1), range(100, 200));
    }

    #[test]
    fn test_cut_data_middle() {
        let mut contents = DataClusterContents::new();
        let inode = InodeId::new(7);
        contents.add_data(1000, inode, range(0, 100));

        // Drop file bytes [30, 60)
        contents.cut_data(1000, range(0, 100), range(0, 30), range(60, 100));

        assert_eq!(contents.up_to_date_data_size(), 70);
        let data = contents.data();
        assert_eq!(
            data[&1000],
            ClusterDataVec {
                data_owner: inode,
                data_range: range(0, 30)
            }
        );
        assert_eq!(
            data[&1060],
            ClusterDataVec {
                data_owner: inode,
                data_range: range(60, 100)
            }
        );
    }

    #[test]
    fn test_cut_data_whole() {
        let mut contents = DataClusterContents::new();
        contents.add_data(0, InodeId::new(3), range(10, 20));
        contents.cut_data(0, range(10, 20), range(10, 10), range(20, 20));

        assert!(contents.is_empty());
        assert!(contents.data().is_empty());
    }

    #[test]
    fn test_cut_data_keeps_suffix() {
        let mut contents = DataClusterContents::new();
        contents.add_data(512, InodeId::new(3), range(0, 64));
        contents.cut_data(512, range(0, 64), range(0, 0), range(16, 64));

        assert_eq!(contents.up_to_date_data_size(), 48);
        assert_eq!(contents.data()[&528].data_range, range(16, 64));
    }
}
