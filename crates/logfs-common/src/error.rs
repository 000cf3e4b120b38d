//! Error types for logfs
//!
//! One taxonomy is shared by the whole filesystem. The buffered writer only
//! ever produces [`Error::PartialWrite`] (and I/O failures coming from the
//! device); the other kinds are raised by the layers built on top of it and
//! pass through unchanged.

use crate::types::DiskOffset;
use thiserror::Error;

/// Common result type for logfs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for logfs
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cluster size is too small to perform operation")]
    ClusterSizeTooSmallToPerformOperation,

    #[error("Invalid inode")]
    InvalidInode,

    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Operation became invalid")]
    OperationBecameInvalid,

    #[error("No more space on device")]
    NoMoreSpace,

    #[error("File already exists")]
    FileAlreadyExists,

    #[error("Filename too long")]
    FilenameTooLong,

    #[error("Is a directory")]
    IsDirectory,

    #[error("Directory is not empty")]
    DirectoryNotEmpty,

    #[error("Cannot modify the root")]
    CannotModifyRoot,

    #[error("File used on unintended shard")]
    FileUsedOnUnintendedShard,

    #[error("Invalid cluster range")]
    InvalidClusterRange,

    #[error("Too little available clusters")]
    TooLittleAvailableClusters,

    #[error("File has been closed")]
    FileHasBeenClosed,

    #[error("File system has not been invalidated")]
    FilesystemHasNotBeenInvalidated,

    #[error(transparent)]
    PathLookup(#[from] PathLookupError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    // Write path errors
    #[error("Partial write at offset {offset}: requested {requested} bytes, written {written}")]
    PartialWrite {
        offset: DiskOffset,
        requested: usize,
        written: usize,
    },

    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Failures while resolving a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathLookupError {
    #[error("Path is not absolute")]
    PathIsNotAbsolute,

    #[error("Path is invalid")]
    InvalidPath,

    #[error("No such file or directory")]
    NoSuchFileOrDirectory,

    #[error("A component used as a directory is not a directory")]
    PathComponentNotDirectory,
}

/// Failures while bootstrapping a filesystem from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BootstrapError {
    #[error("Cannot bootstrap already bootstrapped metadata log cluster")]
    MetadataLogClusterLoop,

    #[error("Failed to read whole cluster of the metadata log")]
    FailedMetadataLogClusterRead,

    #[error("Invalid metadata log entry")]
    InvalidMetadataLogEntry,

    #[error("Metadata log and data log use the same cluster (it is forbidden)")]
    MetadataAndDataLogOverlap,
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this kind belongs to the filesystem error family
    ///
    /// Running out of cluster space for a single operation, device I/O and
    /// configuration problems sit outside of it.
    #[must_use]
    pub const fn is_fs_error(&self) -> bool {
        !matches!(
            self,
            Self::ClusterSizeTooSmallToPerformOperation
                | Self::PartialWrite { .. }
                | Self::DiskIo(_)
                | Self::Configuration(_)
        )
    }

    /// Check if this is a path lookup error
    #[must_use]
    pub const fn is_path_lookup(&self) -> bool {
        matches!(self, Self::PathLookup(_))
    }

    /// Check if this is a bootstrap error
    #[must_use]
    pub const fn is_bootstrap(&self) -> bool {
        matches!(self, Self::Bootstrap(_))
    }

    /// Check if the on-disk state may be inconsistent after this error
    ///
    /// A partial write leaves the written range in an unknown state; there
    /// is no retry on this path.
    #[must_use]
    pub const fn is_write_path_fatal(&self) -> bool {
        matches!(self, Self::PartialWrite { .. } | Self::DiskIo(_))
    }
}
