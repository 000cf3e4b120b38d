//! Block device abstraction
//!
//! The disk buffer only needs an asynchronous, offset-addressed write that
//! reports how many bytes actually reached the device. Two implementations
//! are provided:
//! - [`FileBlockDevice`]: a raw file or block device driven through the
//!   blocking thread pool
//! - [`MemoryBlockDevice`]: RAM-backed, records every write, can inject
//!   short writes and hold writes back

use crate::raw_io::{AlignedBuffer, RawFile, misaligned};
use async_trait::async_trait;
use bytes::Bytes;
use logfs_common::{DiskOffset, Error, Range, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Asynchronous, offset-addressed block device
#[async_trait]
pub trait BlockDevice: Send + Sync {
    /// Write `data` at absolute disk offset `offset`
    ///
    /// Returns the number of bytes actually written, which may be less than
    /// `data.len()`. Offset and length should be multiples of
    /// [`alignment`](Self::alignment).
    async fn write(&self, offset: DiskOffset, data: Bytes) -> Result<usize>;

    /// Read `len` bytes at absolute disk offset `offset`
    async fn read(&self, offset: DiskOffset, len: usize) -> Result<Bytes>;

    /// Required alignment of offsets and lengths
    fn alignment(&self) -> usize;

    /// Device capacity in bytes
    fn size(&self) -> u64;

    /// Make completed writes durable
    async fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<D: BlockDevice + ?Sized> BlockDevice for Arc<D> {
    async fn write(&self, offset: DiskOffset, data: Bytes) -> Result<usize> {
        (**self).write(offset, data).await
    }

    async fn read(&self, offset: DiskOffset, len: usize) -> Result<Bytes> {
        (**self).read(offset, len).await
    }

    fn alignment(&self) -> usize {
        (**self).alignment()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    async fn sync(&self) -> Result<()> {
        (**self).sync().await
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::DiskIo(std::io::Error::other(e))
}

/// Block device backed by a [`RawFile`]
pub struct FileBlockDevice {
    file: Arc<RawFile>,
}

impl FileBlockDevice {
    /// Wrap an opened raw file
    pub fn new(file: RawFile) -> Self {
        Self {
            file: Arc::new(file),
        }
    }

    /// Get the underlying file path
    pub fn path(&self) -> &str {
        self.file.path()
    }
}

#[async_trait]
impl BlockDevice for FileBlockDevice {
    async fn write(&self, offset: DiskOffset, data: Bytes) -> Result<usize> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.write_at(offset, &data))
            .await
            .map_err(join_error)?
    }

    async fn read(&self, offset: DiskOffset, len: usize) -> Result<Bytes> {
        let file = Arc::clone(&self.file);
        let alignment = self.file.alignment();
        tokio::task::spawn_blocking(move || {
            let mut buf = AlignedBuffer::with_alignment(len, alignment);
            let read = file.read_at(offset, buf.as_mut_slice())?;
            Ok(Bytes::from_owner(buf).slice(..read.min(len)))
        })
        .await
        .map_err(join_error)?
    }

    fn alignment(&self) -> usize {
        self.file.alignment()
    }

    fn size(&self) -> u64 {
        self.file.size()
    }

    async fn sync(&self) -> Result<()> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(join_error)?
    }
}

/// A completed write as seen by a [`MemoryBlockDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Disk range the caller asked to write
    pub requested: Range<DiskOffset>,
    /// Bytes actually stored
    pub written: usize,
}

/// RAM-backed block device
pub struct MemoryBlockDevice {
    data: Mutex<Vec<u8>>,
    alignment: usize,
    writes: Mutex<Vec<WriteRecord>>,
    short_write: Mutex<Option<usize>>,
    gate: watch::Sender<bool>,
}

impl MemoryBlockDevice {
    /// Create a zero-filled device of `size` bytes
    pub fn new(size: usize, alignment: usize) -> Self {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        let (gate, _) = watch::channel(true);
        Self {
            data: Mutex::new(vec![0; size]),
            alignment,
            writes: Mutex::new(Vec::new()),
            short_write: Mutex::new(None),
            gate,
        }
    }

    /// Make the next write store only `written` bytes and report that count
    pub fn fail_next_write_short(&self, written: usize) {
        *self.short_write.lock() = Some(written);
    }

    /// Hold every write until [`resume_writes`](Self::resume_writes)
    pub fn pause_writes(&self) {
        self.gate.send_replace(false);
    }

    /// Let held and future writes complete
    pub fn resume_writes(&self) {
        self.gate.send_replace(true);
    }

    /// Completed writes in completion order
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Copy of the device contents in `[offset, offset + len)`
    pub fn contents(&self, offset: usize, len: usize) -> Vec<u8> {
        self.data.lock()[offset..offset + len].to_vec()
    }

    fn check_range(&self, offset: DiskOffset, len: usize) -> Result<Range<usize>> {
        if offset % self.alignment as u64 != 0 || len % self.alignment != 0 {
            return Err(misaligned(format!(
                "write [{offset}, +{len}) is not aligned to {}",
                self.alignment
            )));
        }
        let beg = usize::try_from(offset).map_err(|_| Error::InvalidClusterRange)?;
        let end = beg.checked_add(len).ok_or(Error::InvalidClusterRange)?;
        if end > self.data.lock().len() {
            return Err(Error::NoMoreSpace);
        }
        Ok(Range::new(beg, end))
    }
}

#[async_trait]
impl BlockDevice for MemoryBlockDevice {
    async fn write(&self, offset: DiskOffset, data: Bytes) -> Result<usize> {
        let range = self.check_range(offset, data.len())?;

        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = gate.wait_for(|open| *open).await;

        let written = self
            .short_write
            .lock()
            .take()
            .map_or(data.len(), |n| n.min(data.len()));
        self.data.lock()[range.beg..range.beg + written].copy_from_slice(&data[..written]);
        self.writes.lock().push(WriteRecord {
            requested: Range::new(offset, offset + data.len() as u64),
            written,
        });
        Ok(written)
    }

    async fn read(&self, offset: DiskOffset, len: usize) -> Result<Bytes> {
        let range = self.check_range(offset, len)?;
        Ok(Bytes::copy_from_slice(&self.data.lock()[range.as_std()]))
    }

    fn alignment(&self) -> usize {
        self.alignment
    }

    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_memory_device_write_and_read() {
        let device = MemoryBlockDevice::new(4096, 512);
        let written = device
            .write(512, Bytes::from(vec![7u8; 512]))
            .await
            .unwrap();
        assert_eq!(written, 512);

        let read = device.read(512, 512).await.unwrap();
        assert!(read.iter().all(|&b| b == 7));
        assert_eq!(
            device.writes(),
            vec![WriteRecord {
                requested: Range::new(512, 1024),
                written: 512
            }]
        );
    }

    #[tokio::test]
    async fn test_memory_device_rejects_misaligned_and_out_of_range() {
        let device = MemoryBlockDevice::new(4096, 512);
        assert!(matches!(
            device.write(100, Bytes::from(vec![0u8; 512])).await,
            Err(Error::DiskIo(_))
        ));
        assert!(matches!(
            device.write(4096, Bytes::from(vec![0u8; 512])).await,
            Err(Error::NoMoreSpace)
        ));
        assert!(device.writes().is_empty());
    }

    #[tokio::test]
    async fn test_memory_device_short_write() {
        let device = MemoryBlockDevice::new(4096, 512);
        device.fail_next_write_short(100);
        let written = device.write(0, Bytes::from(vec![1u8; 512])).await.unwrap();
        assert_eq!(written, 100);
        assert_eq!(device.contents(99, 2), vec![1, 0]);

        let written = device.write(0, Bytes::from(vec![1u8; 512])).await.unwrap();
        assert_eq!(written, 512);
    }

    #[tokio::test]
    async fn test_memory_device_pause() {
        let device = Arc::new(MemoryBlockDevice::new(4096, 512));
        device.pause_writes();

        let task = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.write(0, Bytes::from(vec![3u8; 512])).await })
        };
        tokio::task::yield_now().await;
        assert!(device.writes().is_empty());

        device.resume_writes();
        assert_eq!(task.await.unwrap().unwrap(), 512);
        assert_eq!(device.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_file_device_roundtrip() {
        let temp = NamedTempFile::new().unwrap();
        let file = RawFile::create(temp.path(), 16384, false)
            .unwrap()
            .with_alignment(512);
        let device = FileBlockDevice::new(file);
        assert_eq!(device.size(), 16384);
        assert_eq!(device.alignment(), 512);

        let mut buf = AlignedBuffer::with_alignment(1024, 512);
        buf.copy_from(b"logfs cluster data");
        let written = device.write(8192, Bytes::from_owner(buf)).await.unwrap();
        assert_eq!(written, 1024);
        device.sync().await.unwrap();

        let read = device.read(8192, 1024).await.unwrap();
        assert_eq!(read.len(), 1024);
        assert!(read.starts_with(b"logfs cluster data"));
    }
}
