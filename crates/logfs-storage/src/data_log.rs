//! Data log writer
//!
//! Appends raw file data to one data cluster through a [`DiskBuffer`] and
//! remembers which inode and file range every appended piece belongs to.

use crate::cluster_contents::DataClusterContents;
use crate::device::BlockDevice;
use crate::disk_buffer::{BufferInitError, DiskBuffer, FlushHandle, NoHooks};
use logfs_common::{DiskOffset, Error, FileRange, InodeId, Result};
use std::sync::Arc;
use tracing::trace;

/// Writer of file data into a single cluster
#[derive(Debug)]
pub struct DataLogWriter {
    buffer: DiskBuffer<NoHooks>,
    contents: DataClusterContents,
}

impl DataLogWriter {
    /// Create a writer for the cluster at `cluster_begin_offset`
    pub fn new(
        cluster_size: u64,
        alignment: u64,
        cluster_begin_offset: DiskOffset,
    ) -> std::result::Result<Self, BufferInitError> {
        let mut buffer = DiskBuffer::default();
        buffer.init(cluster_size, alignment, cluster_begin_offset)?;
        Ok(Self {
            buffer,
            contents: DataClusterContents::new(),
        })
    }

    /// Append `data`, the file bytes of `inode` starting at `file_offset`
    ///
    /// Returns the disk offset the data will be written at.
    ///
    /// # Errors
    ///
    /// - [`Error::ClusterSizeTooSmallToPerformOperation`] if `data` is larger
    ///   than a whole cluster
    /// - [`Error::NoMoreSpace`] if it does not fit in what is left of this one
    pub fn append(&mut self, inode: InodeId, file_offset: u64, data: &[u8]) -> Result<DiskOffset> {
        if data.len() > self.buffer.max_size() {
            return Err(Error::ClusterSizeTooSmallToPerformOperation);
        }
        let disk_offset = self.buffer.disk_offset_of_unflushed_end();
        if !self.buffer.append(data) {
            return Err(Error::NoMoreSpace);
        }

        let file_range = FileRange::new(file_offset, file_offset + data.len() as u64);
        self.contents.add_data(disk_offset, inode, file_range);
        trace!(%inode, disk_offset, len = data.len(), "appended file data");
        Ok(disk_offset)
    }

    /// Flush appended data; see [`DiskBuffer::flush_to_disk`]
    pub fn flush_to_disk<D>(&mut self, device: &Arc<D>) -> FlushHandle
    where
        D: BlockDevice + ?Sized + 'static,
    {
        self.buffer.flush_to_disk(device)
    }

    /// Space left in the cluster
    pub fn bytes_left(&self) -> usize {
        self.buffer.bytes_left()
    }

    /// Space left in the cluster right after flushing now
    pub fn bytes_left_after_flush_if_done_now(&self) -> usize {
        self.buffer.bytes_left_after_flush_if_done_now()
    }

    pub fn contents(&self) -> &DataClusterContents {
        &self.contents
    }

    pub fn buffer(&self) -> &DiskBuffer<NoHooks> {
        &self.buffer
    }
}
