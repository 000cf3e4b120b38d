//! Configuration types for logfs
//!
//! This module defines configuration structures used across components.

use crate::types::MIB;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for logfs
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Block device configuration
    #[serde(default)]
    pub device: DeviceConfig,
    /// Disk buffer geometry
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Benchmark runner configuration
    #[serde(default)]
    pub bench: BenchConfig,
}

/// Block device configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path to the disk device or backing file
    pub path: PathBuf,
    /// Use direct I/O (O_DIRECT on Linux, F_NOCACHE on macOS)
    pub direct_io: bool,
    /// Size to create the backing file with (ignored for block devices)
    pub size: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/logfs/device"),
            direct_io: true,
            size: 256 * MIB,
        }
    }
}

/// Disk buffer geometry
///
/// These are the parameters a disk buffer is initialized with: it covers
/// one cluster of `cluster_size` bytes starting at `cluster_begin_offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Buffer capacity, a multiple of `alignment` (default: 1 MiB)
    pub cluster_size: u64,
    /// Device alignment, a power of two (default: 4 KiB)
    pub alignment: u64,
    /// Disk offset of the first cluster byte
    pub cluster_begin_offset: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            cluster_size: MIB,
            alignment: 4096,
            cluster_begin_offset: 0,
        }
    }
}

/// Benchmark runner configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Number of timed runs
    pub runs: usize,
    /// Bytes written per run
    pub total_bytes: u64,
    /// Size of a single appended record
    pub record_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            runs: 5,
            total_bytes: 64 * MIB,
            record_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.buffer.cluster_size, MIB);
        assert_eq!(config.buffer.alignment, 4096);
        assert!(config.device.direct_io);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [buffer]
            cluster_size = 4096
            alignment = 512
            cluster_begin_offset = 8192
            "#,
        )
        .unwrap();
        assert_eq!(config.buffer.cluster_size, 4096);
        assert_eq!(config.buffer.cluster_begin_offset, 8192);
        assert_eq!(config.bench.runs, 5);
    }
}
