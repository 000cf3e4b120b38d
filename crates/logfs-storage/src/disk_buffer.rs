//! Buffered cluster writer
//!
//! A [`DiskBuffer`] accumulates appended bytes in an aligned, fixed-size
//! memory region that mirrors one cluster of the block device, and flushes
//! them in alignment-sized chunks.
//!
//! Flush layout:
//! ```text
//! |.........................|00000000000000000000000|
//! ^ unflushed.beg           ^ unflushed.end         ^ real_write.end
//!   (aligned)                 (maybe unaligned)       (aligned)
//!   == real_write.beg                                 == next unflushed.beg
//!                           |<------ padding ------>|
//! ```
//!
//! After every flush the next segment starts at the aligned end of the range
//! that was handed to the device. Consecutive writes therefore never overlap,
//! so the device may complete them in any order without one overwriting
//! another. The buffer stays usable while a write is in flight: everything
//! below `unflushed.beg` is read-only from then on and everything at or
//! above it is writable.

use crate::device::BlockDevice;
use crate::raw_io::AlignedBuffer;
use bytes::Bytes;
use logfs_common::{
    BufferConfig, DiskOffset, Error, Range, Result, is_power_of_2, mod_by_power_of_2,
    round_up_to_multiple_of_power_of_2,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Reasons [`DiskBuffer::init`] rejects its parameters
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferInitError {
    #[error("alignment is not a power of two")]
    AlignmentIsNotPowerOfTwo,

    #[error("max size is not a multiple of alignment")]
    MaxSizeIsNotAligned,

    #[error("cluster begin offset is not a multiple of alignment")]
    ClusterBegOffsetIsNotAligned,

    #[error("alignment is smaller than the segment framing requires")]
    AlignmentTooSmallForHooks,

    #[error("max size does not fit in memory")]
    MaxSizeTooBig,
}

impl From<BufferInitError> for Error {
    fn from(e: BufferInitError) -> Self {
        Self::configuration(e.to_string())
    }
}

/// Per-role behaviour plugged into a [`DiskBuffer`]
///
/// All hooks default to doing nothing.
pub trait SegmentHooks {
    /// Smallest alignment the hooks can frame segments with
    ///
    /// Every segment opened after a flush starts with either nothing or at
    /// least one alignment unit of space left.
    fn min_alignment(&self) -> u64 {
        1
    }

    /// A new unflushed segment begins: after `init` and right after each
    /// flush is issued, before its write completes
    fn on_segment_start(&mut self, segment: &mut SegmentWriter<'_>) {
        let _ = segment;
    }

    /// The current segment is about to be padded and written
    fn on_prepare_flush(&mut self, segment: &mut SegmentWriter<'_>) {
        let _ = segment;
    }

    /// `bytes` were just acknowledged through [`DiskBuffer::acknowledge_write`]
    fn on_bytes_acknowledged(&mut self, bytes: &[u8]) {
        let _ = bytes;
    }
}

/// Plain buffer without per-segment framing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SegmentHooks for NoHooks {}

/// Aligned memory shared between the buffer and its in-flight writes
///
/// Only the ranged accessors below touch the memory, and callers keep the
/// ranges they hand out disjoint.
#[derive(Debug)]
struct SharedMemory(AlignedBuffer);

impl SharedMemory {
    /// # Safety
    ///
    /// No other live reference may overlap `range`.
    #[allow(unsafe_code, clippy::mut_from_ref)]
    unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [u8] {
        debug_assert!(range.end <= self.0.len());
        // SAFETY: in bounds; exclusivity is the caller's obligation
        unsafe { std::slice::from_raw_parts_mut(self.0.as_ptr().add(range.beg), range.size()) }
    }

    /// # Safety
    ///
    /// No mutable reference may overlap `range` while the slice lives.
    #[allow(unsafe_code)]
    unsafe fn slice(&self, range: Range<usize>) -> &[u8] {
        debug_assert!(range.end <= self.0.len());
        // SAFETY: in bounds; absence of writers is the caller's obligation
        unsafe { std::slice::from_raw_parts(self.0.as_ptr().add(range.beg), range.size()) }
    }
}

/// Bytes of a flushed range, kept alive until the device is done with them
struct FlushedRange {
    memory: Arc<SharedMemory>,
    range: Range<usize>,
}

impl AsRef<[u8]> for FlushedRange {
    #[allow(unsafe_code)]
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the range lies below the buffer's `unflushed.beg`, which
        // never moves backwards for this allocation, so nothing writes it
        unsafe { self.memory.slice(self.range) }
    }
}

/// Buffer state shared by the public API and the hooks
#[derive(Debug)]
struct BufferCore {
    memory: Arc<SharedMemory>,
    max_size: usize,
    alignment: usize,
    cluster_begin_offset: DiskOffset,
    unflushed: Range<usize>,
}

impl BufferCore {
    fn empty() -> Self {
        Self {
            memory: Arc::new(SharedMemory(AlignedBuffer::empty())),
            max_size: 0,
            alignment: 1,
            cluster_begin_offset: 0,
            unflushed: Range::new(0, 0),
        }
    }

    fn bytes_left(&self) -> usize {
        self.max_size - self.unflushed.end
    }

    #[allow(unsafe_code)]
    fn write_pointer(&mut self) -> &mut [u8] {
        let range = Range::new(self.unflushed.end, self.max_size);
        // SAFETY: at or above `unflushed.beg`, so no in-flight write covers
        // it; `&mut self` rules out other live slices of the writable part
        unsafe { self.memory.slice_mut(range) }
    }

    #[allow(unsafe_code)]
    fn segment_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `write_pointer`
        unsafe { self.memory.slice_mut(self.unflushed) }
    }

    #[allow(unsafe_code)]
    fn bytes(&self, range: Range<usize>) -> &[u8] {
        debug_assert!(range.beg >= self.unflushed.beg && range.end <= self.unflushed.end);
        // SAFETY: inside the current segment; writers need `&mut self`
        unsafe { self.memory.slice(range) }
    }

    fn acknowledge(&mut self, len: usize) -> Range<usize> {
        assert!(
            len <= self.bytes_left(),
            "acknowledged {len} bytes with only {} left",
            self.bytes_left()
        );
        let acked = Range::new(self.unflushed.end, self.unflushed.end + len);
        self.unflushed.end = acked.end;
        acked
    }

    fn append(&mut self, data: &[u8]) -> bool {
        if data.len() > self.bytes_left() {
            return false;
        }
        self.write_pointer()[..data.len()].copy_from_slice(data);
        self.acknowledge(data.len());
        true
    }

    #[allow(unsafe_code)]
    fn zero(&mut self, range: Range<usize>) {
        debug_assert!(range.beg >= self.unflushed.beg && range.end <= self.max_size);
        // SAFETY: as in `write_pointer`
        unsafe { self.memory.slice_mut(range) }.fill(0);
    }

    fn disk_offset(&self, pos: usize) -> DiskOffset {
        self.cluster_begin_offset + pos as u64
    }

    /// Hand out `range` to a device write
    ///
    /// Must only be called once `unflushed.beg >= range.end`.
    fn freeze(&self, range: Range<usize>) -> Bytes {
        debug_assert!(range.end <= self.unflushed.beg);
        Bytes::from_owner(FlushedRange {
            memory: Arc::clone(&self.memory),
            range,
        })
    }
}

/// Raw access to the current segment for [`SegmentHooks`]
///
/// Acknowledging through a `SegmentWriter` does not call
/// [`SegmentHooks::on_bytes_acknowledged`].
pub struct SegmentWriter<'a> {
    core: &'a mut BufferCore,
}

impl SegmentWriter<'_> {
    /// Writable memory at the end of the segment
    pub fn write_pointer(&mut self) -> &mut [u8] {
        self.core.write_pointer()
    }

    /// Extend the segment by `len` bytes written through the write pointer
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`bytes_left`](Self::bytes_left).
    pub fn acknowledge_write(&mut self, len: usize) {
        self.core.acknowledge(len);
    }

    /// Copy `data` to the end of the segment; false if it does not fit
    pub fn append(&mut self, data: &[u8]) -> bool {
        self.core.append(data)
    }

    /// Bytes appended to the segment so far, for backfilling
    pub fn segment_mut(&mut self) -> &mut [u8] {
        self.core.segment_mut()
    }

    /// Buffer range of the segment
    pub fn unflushed(&self) -> Range<usize> {
        self.core.unflushed
    }

    /// Space left before the buffer is full
    pub fn bytes_left(&self) -> usize {
        self.core.bytes_left()
    }

    /// Disk offset of the first segment byte
    pub fn disk_offset(&self) -> DiskOffset {
        self.core.disk_offset(self.core.unflushed.beg)
    }
}

/// Counters of a [`DiskBuffer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Flushes handed to a device
    pub flushes: u64,
    /// Bytes handed to a device, padding included
    pub bytes_flushed: u64,
    /// Zero bytes added to reach alignment
    pub padding_bytes: u64,
    /// Bytes acknowledged by callers
    pub bytes_acknowledged: u64,
}

/// Alignment-constrained write buffer for one cluster
///
/// Construct with [`new`](Self::new) and call [`init`](Self::init) before
/// use. Not `Clone`: the memory and the bookkeeping of in-flight writes
/// belong to one owner.
#[derive(Debug)]
pub struct DiskBuffer<H: SegmentHooks = NoHooks> {
    core: BufferCore,
    hooks: H,
    stats: BufferStats,
    initialized: bool,
}

impl<H: SegmentHooks + Default> Default for DiskBuffer<H> {
    fn default() -> Self {
        Self::new(H::default())
    }
}

impl<H: SegmentHooks> DiskBuffer<H> {
    /// Create an uninitialized buffer
    pub fn new(hooks: H) -> Self {
        Self {
            core: BufferCore::empty(),
            hooks,
            stats: BufferStats::default(),
            initialized: false,
        }
    }

    /// Allocate the buffer for a cluster
    ///
    /// At most `aligned_max_size` bytes may be appended. Cluster byte 0
    /// lives at disk offset `cluster_begin_offset`. On error nothing
    /// changes and `init` may be retried.
    pub fn init(
        &mut self,
        aligned_max_size: u64,
        alignment: u64,
        cluster_begin_offset: DiskOffset,
    ) -> std::result::Result<(), BufferInitError> {
        if !is_power_of_2(alignment) {
            return Err(BufferInitError::AlignmentIsNotPowerOfTwo);
        }
        if mod_by_power_of_2(aligned_max_size, alignment) != 0 {
            return Err(BufferInitError::MaxSizeIsNotAligned);
        }
        if mod_by_power_of_2(cluster_begin_offset, alignment) != 0 {
            return Err(BufferInitError::ClusterBegOffsetIsNotAligned);
        }
        if alignment < self.hooks.min_alignment() {
            return Err(BufferInitError::AlignmentTooSmallForHooks);
        }
        let (Ok(max_size), Ok(alignment)) =
            (usize::try_from(aligned_max_size), usize::try_from(alignment))
        else {
            return Err(BufferInitError::MaxSizeTooBig);
        };
        let memory = AlignedBuffer::try_with_alignment(max_size, alignment)
            .ok_or(BufferInitError::MaxSizeTooBig)?;

        self.core = BufferCore {
            memory: Arc::new(SharedMemory(memory)),
            max_size,
            alignment,
            cluster_begin_offset,
            unflushed: Range::new(0, 0),
        };
        self.initialized = true;
        self.start_new_segment();
        Ok(())
    }

    /// Allocate the buffer from a configured geometry
    pub fn init_with(&mut self, config: &BufferConfig) -> std::result::Result<(), BufferInitError> {
        self.init(
            config.cluster_size,
            config.alignment,
            config.cluster_begin_offset,
        )
    }

    /// Writable memory at the end of the unflushed data, `bytes_left()` long
    pub fn get_write_pointer(&mut self) -> &mut [u8] {
        self.core.write_pointer()
    }

    /// Mark `len` bytes written through the write pointer as appended
    ///
    /// # Panics
    ///
    /// Panics if `len > bytes_left()`: the caller wrote past the memory it
    /// was given.
    pub fn acknowledge_write(&mut self, len: usize) {
        let acked = self.core.acknowledge(len);
        self.stats.bytes_acknowledged += len as u64;
        self.hooks.on_bytes_acknowledged(self.core.bytes(acked));
    }

    /// Copy `data` in through the write pointer
    ///
    /// Returns false, appending nothing, if it does not fit.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if data.len() > self.bytes_left() {
            return false;
        }
        self.get_write_pointer()[..data.len()].copy_from_slice(data);
        self.acknowledge_write(data.len());
        true
    }

    /// Maximum number of bytes that may be appended before a flush
    pub fn bytes_left(&self) -> usize {
        self.core.bytes_left()
    }

    /// Bytes that would be left right after flushing now
    pub fn bytes_left_after_flush_if_done_now(&self) -> usize {
        self.core.max_size
            - round_up_to_multiple_of_power_of_2(self.core.unflushed.end, self.core.alignment)
    }

    /// Write the unflushed data to `device` and open a new segment
    ///
    /// The unflushed data is padded with zeros up to the alignment, and the
    /// next segment starts right after the padding. The write is issued on
    /// the tokio runtime before this returns; the returned handle resolves
    /// when it completes. The buffer may be appended to while the handle is
    /// pending, but the next flush must wait for it.
    ///
    /// A device reporting fewer bytes than requested resolves the handle
    /// with [`Error::PartialWrite`]. The write is not retried.
    ///
    /// # Panics
    ///
    /// Panics if a write has to be issued outside a tokio runtime.
    pub fn flush_to_disk<D>(&mut self, device: &Arc<D>) -> FlushHandle
    where
        D: BlockDevice + ?Sized + 'static,
    {
        if self.core.unflushed.beg == self.core.max_size {
            return FlushHandle::ready();
        }

        self.hooks.on_prepare_flush(&mut SegmentWriter {
            core: &mut self.core,
        });

        debug_assert_eq!(
            mod_by_power_of_2(self.core.unflushed.beg, self.core.alignment),
            0
        );
        let real_write = Range::new(
            self.core.unflushed.beg,
            round_up_to_multiple_of_power_of_2(self.core.unflushed.end, self.core.alignment),
        );
        let padding = Range::new(self.core.unflushed.end, real_write.end);
        self.core.zero(padding);

        // Usable before the write completes
        self.core.unflushed = Range::new(real_write.end, real_write.end);
        self.start_new_segment();

        let offset = self.core.disk_offset(real_write.beg);
        let requested = real_write.size();
        let data = self.core.freeze(real_write);

        self.stats.flushes += 1;
        self.stats.bytes_flushed += requested as u64;
        self.stats.padding_bytes += padding.size() as u64;
        debug!(
            offset,
            len = requested,
            padding = padding.size(),
            "flushing disk buffer"
        );

        let device = Arc::clone(device);
        let task = tokio::spawn(async move {
            let written = device.write(offset, data).await?;
            if written != requested {
                warn!(offset, requested, written, "partial write");
                return Err(Error::PartialWrite {
                    offset,
                    requested,
                    written,
                });
            }
            Ok(())
        });

        FlushHandle {
            task: Some(task),
            disk_range: Range::new(offset, offset + requested as u64),
        }
    }

    fn start_new_segment(&mut self) {
        trace!(
            offset = self.core.disk_offset(self.core.unflushed.beg),
            "starting segment"
        );
        self.hooks.on_segment_start(&mut SegmentWriter {
            core: &mut self.core,
        });
    }

    /// Check whether `init` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Buffer capacity
    pub fn max_size(&self) -> usize {
        self.core.max_size
    }

    /// Required alignment of disk offsets and write lengths
    pub fn alignment(&self) -> usize {
        self.core.alignment
    }

    /// Disk offset of buffer position 0
    pub fn cluster_begin_offset(&self) -> DiskOffset {
        self.core.cluster_begin_offset
    }

    /// Buffer range appended but not yet handed to a device
    pub fn unflushed(&self) -> Range<usize> {
        self.core.unflushed
    }

    /// Disk offset the next appended byte will land at
    pub fn disk_offset_of_unflushed_end(&self) -> DiskOffset {
        self.core.disk_offset(self.core.unflushed.end)
    }

    /// Bytes appended to the current segment so far
    pub fn unflushed_data(&self) -> &[u8] {
        self.core.bytes(self.core.unflushed)
    }

    /// Hooks framing the segments
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Counters since construction
    pub fn stats(&self) -> BufferStats {
        self.stats
    }
}

/// Pending result of [`DiskBuffer::flush_to_disk`]
///
/// Dropping the handle does not cancel the write.
#[must_use = "a flush must be awaited before the next one is issued"]
#[derive(Debug)]
pub struct FlushHandle {
    task: Option<JoinHandle<Result<()>>>,
    disk_range: Range<DiskOffset>,
}

impl FlushHandle {
    /// A handle with nothing to wait for
    pub fn ready() -> Self {
        Self {
            task: None,
            disk_range: Range::default(),
        }
    }

    /// Disk range handed to the device; empty if nothing was written
    pub fn disk_range(&self) -> Range<DiskOffset> {
        self.disk_range
    }

    /// Check whether a device write was issued
    pub fn is_write_issued(&self) -> bool {
        self.task.is_some()
    }
}

impl Default for FlushHandle {
    fn default() -> Self {
        Self::ready()
    }
}

impl Future for FlushHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(task) = self.task.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(Pin::new(task).poll(cx));
        self.task = None;
        Poll::Ready(match result {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::OperationBecameInvalid),
        })
    }
}
