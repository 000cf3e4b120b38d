//! logfs Storage - Buffered cluster writes to raw disks
//!
//! This crate implements the write path of the logfs storage engine:
//! - Raw disk access (O_DIRECT / F_NOCACHE) and aligned memory
//! - Asynchronous block device abstraction
//! - Alignment-constrained disk buffer flushing one cluster in
//!   non-overlapping, aligned chunks
//! - Metadata log segment framing (checkpoint headers)
//! - Data log writer with per-cluster contents bookkeeping

pub mod cluster_contents;
pub mod data_log;
pub mod device;
pub mod disk_buffer;
pub mod metadata_log;
pub mod raw_io;

// Re-exports
pub use cluster_contents::{ClusterDataVec, DataClusterContents};
pub use data_log::DataLogWriter;
pub use device::{BlockDevice, FileBlockDevice, MemoryBlockDevice, WriteRecord};
pub use disk_buffer::{
    BufferInitError, BufferStats, DiskBuffer, FlushHandle, NoHooks, SegmentHooks, SegmentWriter,
};
pub use metadata_log::{
    CHECKPOINT_HEADER_SIZE, CheckpointHeader, MetadataLogBuffer, MetadataLogHooks,
    verify_checkpoint,
};
pub use raw_io::{ALIGNMENT, AlignedBuffer, RawFile};
