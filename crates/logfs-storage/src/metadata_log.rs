//! Metadata log segment framing
//!
//! Every segment a metadata log buffer flushes starts with a checkpoint
//! header describing the entries that follow it:
//! ```text
//! +--------+--------+--------+---------+
//! | Magic  | CRC32C | Length | Entries |
//! | 4B     | 4B     | 4B     | var     |
//! +--------+--------+--------+---------+
//! ```
//! The header is written with zero placeholders when the segment starts and
//! backfilled right before the segment is flushed. Anything after `Length`
//! bytes of entries is alignment padding.

use crate::disk_buffer::{DiskBuffer, SegmentHooks, SegmentWriter};
use logfs_common::{BootstrapError, Result};

/// Checkpoint header magic number
pub const CHECKPOINT_MAGIC: u32 = 0x4D4C_4350; // "MLCP"

/// Checkpoint header size
pub const CHECKPOINT_HEADER_SIZE: usize = 12;

/// Disk buffer of a metadata log
pub type MetadataLogBuffer = DiskBuffer<MetadataLogHooks>;

/// Parsed checkpoint header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointHeader {
    /// CRC32C of the entries
    pub checksum: u32,
    /// Length of the entries in bytes
    pub length: u32,
}

impl CheckpointHeader {
    fn to_bytes(self) -> [u8; CHECKPOINT_HEADER_SIZE] {
        let mut buf = [0u8; CHECKPOINT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&CHECKPOINT_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..12].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Parse a header from the start of a flushed segment
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(header) = data.get(..CHECKPOINT_HEADER_SIZE) else {
            return Err(BootstrapError::FailedMetadataLogClusterRead.into());
        };
        let field = |at: usize| {
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };

        if field(0) != CHECKPOINT_MAGIC {
            return Err(BootstrapError::InvalidMetadataLogEntry.into());
        }
        Ok(Self {
            checksum: field(4),
            length: field(8),
        })
    }
}

/// Verify a flushed segment and return its entries
pub fn verify_checkpoint(segment: &[u8]) -> Result<&[u8]> {
    let header = CheckpointHeader::parse(segment)?;
    let end = usize::try_from(header.length)
        .ok()
        .and_then(|length| CHECKPOINT_HEADER_SIZE.checked_add(length))
        .ok_or(BootstrapError::FailedMetadataLogClusterRead)?;
    let entries = segment
        .get(CHECKPOINT_HEADER_SIZE..end)
        .ok_or(BootstrapError::FailedMetadataLogClusterRead)?;
    if crc32c::crc32c(entries) != header.checksum {
        return Err(BootstrapError::InvalidMetadataLogEntry.into());
    }
    Ok(entries)
}

/// Hooks writing a checkpoint header into every metadata log segment
#[derive(Debug, Default)]
pub struct MetadataLogHooks {
    /// Whether the current segment got a header
    open: bool,
    checksum: u32,
    length: u32,
    checkpoints: u64,
}

impl MetadataLogHooks {
    /// Checkpoints finalized so far
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints
    }

    /// Entry bytes in the current segment
    pub fn pending_length(&self) -> u32 {
        self.length
    }
}

impl SegmentHooks for MetadataLogHooks {
    // Any non-empty segment then has room for a header
    fn min_alignment(&self) -> u64 {
        CHECKPOINT_HEADER_SIZE as u64
    }

    fn on_segment_start(&mut self, segment: &mut SegmentWriter<'_>) {
        self.checksum = 0;
        self.length = 0;
        // Only a full buffer gets no header, and nothing can be appended to it
        self.open = segment.append(&[0; CHECKPOINT_HEADER_SIZE]);
    }

    fn on_prepare_flush(&mut self, segment: &mut SegmentWriter<'_>) {
        if !self.open {
            return;
        }
        let header = CheckpointHeader {
            checksum: self.checksum,
            length: self.length,
        };
        segment.segment_mut()[..CHECKPOINT_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        self.checkpoints += 1;
    }

    fn on_bytes_acknowledged(&mut self, bytes: &[u8]) {
        if !self.open {
            return;
        }
        self.checksum = crc32c::crc32c_append(self.checksum, bytes);
        self.length = self
            .length
            .saturating_add(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
    }
}
