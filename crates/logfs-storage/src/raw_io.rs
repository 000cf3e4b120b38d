//! Platform-specific raw disk I/O
//!
//! Provides direct disk access bypassing the OS page cache:
//! - Linux: O_DIRECT flag
//! - macOS: F_NOCACHE fcntl

use logfs_common::{Error, Result};
use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

/// Default alignment requirement for direct I/O
pub const ALIGNMENT: usize = 4096;

/// Raw file handle with direct I/O support
pub struct RawFile {
    file: File,
    path: String,
    size: u64,
    alignment: usize,
    read_only: bool,
}

impl RawFile {
    /// Open a file for raw I/O
    pub fn open(path: impl AsRef<Path>, read_only: bool, direct_io: bool) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let mut options = OpenOptions::new();
        options.read(true);

        if !read_only {
            options.write(true);
        }

        #[cfg(target_os = "linux")]
        if direct_io {
            // O_DIRECT bypasses page cache on Linux
            options.custom_flags(libc::O_DIRECT);
        }

        let file = options
            .open(&path)
            .map_err(|e| io_error(format!("failed to open {path_str}"), e))?;

        #[cfg(target_os = "macos")]
        if direct_io {
            Self::set_nocache(&file, &path_str)?;
        }

        let size = if Self::is_block_device(&path) {
            Self::get_block_device_size(&file, &path_str)?
        } else {
            file.metadata()
                .map_err(|e| io_error(format!("failed to get metadata for {path_str}"), e))?
                .len()
        };

        Ok(Self {
            file,
            path: path_str,
            size,
            alignment: ALIGNMENT,
            read_only,
        })
    }

    /// Create a new file for raw I/O with the given size
    ///
    /// For regular files, this creates/truncates the file and sets its size.
    /// For block devices, this opens the device (size parameter is ignored,
    /// actual device size is used).
    pub fn create(path: impl AsRef<Path>, size: u64, direct_io: bool) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let is_block_device = Self::is_block_device(&path);

        let mut options = OpenOptions::new();
        options.read(true).write(true);

        if !is_block_device {
            options.create(true).truncate(true);
        }

        #[cfg(target_os = "linux")]
        if direct_io {
            options.custom_flags(libc::O_DIRECT);
        }

        let file = options
            .open(&path)
            .map_err(|e| io_error(format!("failed to create {path_str}"), e))?;

        let actual_size = if is_block_device {
            Self::get_block_device_size(&file, &path_str)?
        } else {
            file.set_len(size)
                .map_err(|e| io_error(format!("failed to set size for {path_str}"), e))?;
            size
        };

        #[cfg(target_os = "macos")]
        if direct_io {
            Self::set_nocache(&file, &path_str)?;
        }

        Ok(Self {
            file,
            path: path_str,
            size: actual_size,
            alignment: ALIGNMENT,
            read_only: false,
        })
    }

    /// Override the alignment enforced on offsets and lengths
    ///
    /// Must be a power of two; 512 is the smallest value O_DIRECT accepts on
    /// most devices.
    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        self.alignment = alignment;
        self
    }

    #[cfg(target_os = "macos")]
    #[allow(unsafe_code)]
    fn set_nocache(file: &File, path: &str) -> Result<()> {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `file` and stays open for the call
        let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
        if ret == -1 {
            return Err(io_error(
                format!("failed to set F_NOCACHE on {path}"),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    /// Check if path is a block device
    fn is_block_device(path: impl AsRef<Path>) -> bool {
        use std::os::unix::fs::FileTypeExt;
        // A missing file is created as a regular file
        std::fs::metadata(&path).is_ok_and(|m| m.file_type().is_block_device())
    }

    /// Get block device size using ioctl
    #[cfg(target_os = "linux")]
    #[allow(unsafe_code)]
    fn get_block_device_size(file: &File, path: &str) -> Result<u64> {
        use std::os::unix::io::AsRawFd;

        // BLKGETSIZE64 ioctl
        const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

        let mut size: u64 = 0;
        // SAFETY: BLKGETSIZE64 writes a single u64 through the pointer
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut size) };

        if ret == -1 {
            return Err(io_error(
                format!("failed to get block device size for {path}"),
                std::io::Error::last_os_error(),
            ));
        }

        Ok(size)
    }

    /// Get block device size (non-Linux fallback)
    #[cfg(not(target_os = "linux"))]
    fn get_block_device_size(file: &File, path: &str) -> Result<u64> {
        use std::io::{Seek, SeekFrom};
        let mut f = file;
        let size = f
            .seek(SeekFrom::End(0))
            .map_err(|e| io_error(format!("failed to get device size for {path}"), e))?;
        f.seek(SeekFrom::Start(0))
            .map_err(|e| io_error(format!("failed to seek to start for {path}"), e))?;
        Ok(size)
    }

    /// Get the file size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the enforced alignment
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Read data at the given offset
    ///
    /// Both offset and buffer size must be aligned. Issues a single
    /// positional read and returns the number of bytes read.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_alignment(offset, buf.len())?;

        FileExt::read_at(&self.file, buf, offset)
            .map_err(|e| io_error(format!("read failed on {}", self.path), e))
    }

    /// Write data at the given offset
    ///
    /// Both offset and buffer size must be aligned. Issues a single
    /// positional write and returns the number of bytes the kernel accepted,
    /// which may be short.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(Error::configuration(format!("{} is read-only", self.path)));
        }

        self.check_alignment(offset, buf.len())?;

        FileExt::write_at(&self.file, buf, offset)
            .map_err(|e| io_error(format!("write failed on {}", self.path), e))
    }

    /// Sync data to disk
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| io_error(format!("sync failed on {}", self.path), e))
    }

    /// Sync data only (not metadata) to disk
    pub fn sync_data(&self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| io_error(format!("sync_data failed on {}", self.path), e))
    }

    /// Check alignment requirements
    fn check_alignment(&self, offset: u64, size: usize) -> Result<()> {
        if offset % self.alignment as u64 != 0 {
            return Err(misaligned(format!(
                "offset {offset} is not aligned to {}",
                self.alignment
            )));
        }
        if size % self.alignment != 0 {
            return Err(misaligned(format!(
                "size {size} is not aligned to {}",
                self.alignment
            )));
        }
        Ok(())
    }
}

fn io_error(context: String, e: std::io::Error) -> Error {
    Error::DiskIo(std::io::Error::new(e.kind(), format!("{context}: {e}")))
}

pub(crate) fn misaligned(msg: String) -> Error {
    Error::DiskIo(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))
}

/// Aligned buffer for direct I/O operations
///
/// With O_DIRECT the memory must be aligned to the device block size
/// (typically 512 or 4096 bytes). The allocation is zeroed, its length is a
/// multiple of the alignment and it is never resized.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
}

// SAFETY: the buffer exclusively owns its allocation
#[allow(unsafe_code)]
unsafe impl Send for AlignedBuffer {}
// SAFETY: shared access only hands out `&[u8]`
#[allow(unsafe_code)]
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Create a new aligned buffer of the given size
    pub fn new(size: usize) -> Self {
        Self::with_alignment(size, ALIGNMENT)
    }

    /// Create a new aligned buffer with custom alignment
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two or the rounded size
    /// overflows `isize`.
    pub fn with_alignment(size: usize, alignment: usize) -> Self {
        Self::try_with_alignment(size, alignment).expect("invalid layout for aligned buffer")
    }

    /// Create a new aligned buffer, returning `None` if no allocation layout
    /// can describe `size` bytes at `alignment`
    #[allow(unsafe_code)]
    pub fn try_with_alignment(size: usize, alignment: usize) -> Option<Self> {
        let aligned_size = size.checked_next_multiple_of(alignment)?;
        let layout = Layout::from_size_align(aligned_size, alignment).ok()?;

        if aligned_size == 0 {
            return Some(Self {
                ptr: NonNull::dangling(),
                len: 0,
                alignment,
            });
        }

        // SAFETY: the layout has a non-zero size
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout)
        };

        Some(Self {
            ptr,
            len: aligned_size,
            alignment,
        })
    }

    /// An empty buffer that owns no memory
    pub fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            alignment: 1,
        }
    }

    /// Get the buffer as a slice
    #[allow(unsafe_code)]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` initialized bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Get the buffer as a mutable slice
    #[allow(unsafe_code)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` is valid for `len` bytes and `&mut self` is unique
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Raw pointer to the first byte
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Get the buffer size
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the alignment of the allocation
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Copy data into the buffer (pads with zeros if source is smaller)
    pub fn copy_from(&mut self, src: &[u8]) {
        let data = self.as_mut_slice();
        let copy_len = src.len().min(data.len());
        data[..copy_len].copy_from_slice(&src[..copy_len]);
        data[copy_len..].fill(0);
    }

    /// Get a view of the actual data (up to the given size)
    pub fn data(&self, size: usize) -> &[u8] {
        &self.as_slice()[..size.min(self.len)]
    }
}

impl Default for AlignedBuffer {
    fn default() -> Self {
        Self::new(ALIGNMENT)
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish()
    }
}

impl Drop for AlignedBuffer {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: allocated in `try_with_alignment` with exactly this layout
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, self.alignment);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for AlignedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_aligned_buffer() {
        let mut buf = AlignedBuffer::new(4096);
        assert_eq!(buf.len(), 4096);
        assert_eq!(buf.as_slice().as_ptr() as usize % 4096, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));

        buf.copy_from(b"hello");
        assert_eq!(buf.data(5), b"hello");
    }

    #[test]
    fn test_aligned_buffer_rounds_up() {
        let buf = AlignedBuffer::with_alignment(100, 512);
        assert_eq!(buf.len(), 512);
        assert_eq!(buf.alignment(), 512);
        assert_eq!(buf.as_slice().as_ptr() as usize % 512, 0);
    }

    #[test]
    fn test_aligned_buffer_zero_size() {
        let buf = AlignedBuffer::with_alignment(0, 4096);
        assert!(buf.is_empty());
        assert!(buf.as_slice().is_empty());
        assert!(AlignedBuffer::empty().is_empty());
    }

    #[test]
    fn test_aligned_buffer_invalid_layout() {
        assert!(AlignedBuffer::try_with_alignment(64, 3).is_none());
        assert!(AlignedBuffer::try_with_alignment(usize::MAX - 10, 4096).is_none());
    }

    #[test]
    fn test_raw_file_create_and_read() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path();

        // Page-cached I/O so the test also runs on tmpfs
        {
            let file = RawFile::create(path, 8192, false).unwrap();
            let mut buf = AlignedBuffer::new(4096);
            buf.copy_from(b"test data pattern");
            assert_eq!(file.write_at(4096, buf.as_slice()).unwrap(), 4096);
            file.sync().unwrap();
        }

        {
            let file = RawFile::open(path, true, false).unwrap();
            assert_eq!(file.size(), 8192);
            let mut buf = AlignedBuffer::new(4096);
            file.read_at(4096, buf.as_mut_slice()).unwrap();
            assert!(buf.as_slice().starts_with(b"test data pattern"));
        }
    }

    #[test]
    fn test_raw_file_rejects_misaligned() {
        let temp = NamedTempFile::new().unwrap();
        let file = RawFile::create(temp.path(), 8192, false)
            .unwrap()
            .with_alignment(512);

        let buf = AlignedBuffer::with_alignment(512, 512);
        assert!(file.write_at(100, buf.as_slice()).is_err());
        assert!(file.write_at(0, &buf.as_slice()[..100]).is_err());
        assert_eq!(file.write_at(512, buf.as_slice()).unwrap(), 512);
    }

    #[test]
    fn test_raw_file_read_only() {
        let temp = NamedTempFile::new().unwrap();
        RawFile::create(temp.path(), 4096, false).unwrap();
        let file = RawFile::open(temp.path(), true, false).unwrap();
        let buf = AlignedBuffer::new(4096);
        assert!(matches!(
            file.write_at(0, buf.as_slice()),
            Err(Error::Configuration(_))
        ));
    }
}
