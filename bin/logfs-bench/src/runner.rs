//! Timed sequential write runs through a disk buffer

use anyhow::{Context, Result, bail, ensure};
use logfs_common::{
    BenchConfig, BufferConfig, round_down_to_multiple_of_power_of_2,
};
use logfs_storage::{
    BlockDevice, DiskBuffer, FileBlockDevice, FlushHandle, MemoryBlockDevice, RawFile,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where a run writes to
#[derive(Debug, Clone)]
pub enum Target {
    /// Fresh in-memory device per run
    Memory,
    /// File or block device, recreated per run
    File { path: PathBuf, direct_io: bool },
}

/// Writes `total_bytes` in `record_size` appends, one cluster at a time
#[derive(Debug)]
pub struct Runner {
    buffer: BufferConfig,
    bench: BenchConfig,
    target: Target,
}

impl Runner {
    pub fn new(buffer: BufferConfig, bench: BenchConfig, target: Target) -> Result<Self> {
        ensure!(bench.record_size > 0, "record size must not be zero");
        ensure!(
            bench.record_size as u64 <= buffer.cluster_size,
            "record size {} does not fit in a {} byte cluster",
            bench.record_size,
            buffer.cluster_size
        );
        let runner = Self {
            buffer,
            bench,
            target,
        };
        // Reject bad geometry before any device is touched
        runner.cluster_buffer(0).context("invalid buffer geometry")?;
        Ok(runner)
    }

    pub fn test_name(&self) -> String {
        format!("sequential_write_{}B", self.bench.record_size)
    }

    /// Clusters needed to hold one run
    pub fn clusters_needed(&self) -> u64 {
        let records_per_cluster = self.buffer.cluster_size / self.bench.record_size as u64;
        let records = self.bench.total_bytes.div_ceil(self.bench.record_size as u64);
        records.div_ceil(records_per_cluster).max(1)
    }

    /// Disk space needed to hold one run
    pub fn device_size(&self) -> u64 {
        self.buffer.cluster_begin_offset + self.clusters_needed() * self.buffer.cluster_size
    }

    /// Run all configured iterations, returning run times in milliseconds
    pub async fn run(&self) -> Result<Vec<f64>> {
        let mut samples = Vec::with_capacity(self.bench.runs);
        for run in 0..self.bench.runs {
            let elapsed = match &self.target {
                Target::Memory => {
                    let size = usize::try_from(self.device_size())
                        .context("device size does not fit in memory")?;
                    let alignment = usize::try_from(self.buffer.alignment)
                        .context("alignment does not fit in memory")?;
                    self.run_once(Arc::new(MemoryBlockDevice::new(size, alignment)))
                        .await?
                }
                Target::File { path, direct_io } => {
                    let alignment = usize::try_from(self.buffer.alignment)
                        .context("alignment does not fit in memory")?;
                    let file = RawFile::create(path, self.device_size(), *direct_io)
                        .with_context(|| format!("create device {}", path.display()))?
                        .with_alignment(alignment);
                    self.run_once(Arc::new(FileBlockDevice::new(file))).await?
                }
            };
            info!(run, elapsed_ms = elapsed.as_secs_f64() * 1e3, "run finished");
            samples.push(elapsed.as_secs_f64() * 1e3);
        }
        Ok(samples)
    }

    /// One timed run against a fresh device
    pub async fn run_once<D>(&self, device: Arc<D>) -> Result<Duration>
    where
        D: BlockDevice + 'static,
    {
        // A tail shorter than the alignment cannot be written
        let usable = round_down_to_multiple_of_power_of_2(device.size(), self.buffer.alignment);
        if usable < self.device_size() {
            bail!(
                "device holds {usable} usable bytes, a run needs {}",
                self.device_size()
            );
        }

        let record = vec![0xA5u8; self.bench.record_size];
        let mut cluster: u64 = 0;
        let mut buffer = self.cluster_buffer(cluster)?;
        let mut pending = FlushHandle::default();
        let mut left = self.bench.total_bytes;

        let start = Instant::now();
        while left > 0 {
            let len = usize::try_from(left).map_or(record.len(), |left| left.min(record.len()));
            if !buffer.append(&record[..len]) {
                // One flush in flight at a time
                pending.await?;
                pending = buffer.flush_to_disk(&device);
                cluster += 1;
                debug!(cluster, "advancing to next cluster");
                buffer = self.cluster_buffer(cluster)?;
                continue;
            }
            left -= len as u64;
        }
        pending.await?;
        buffer.flush_to_disk(&device).await?;
        device.sync().await?;

        Ok(start.elapsed())
    }

    fn cluster_buffer(&self, cluster: u64) -> Result<DiskBuffer> {
        let geometry = BufferConfig {
            cluster_begin_offset: self.buffer.cluster_begin_offset
                + cluster * self.buffer.cluster_size,
            ..self.buffer
        };
        let mut buffer = DiskBuffer::default();
        buffer.init_with(&geometry).with_context(|| {
            format!(
                "init buffer for cluster at {}",
                geometry.cluster_begin_offset
            )
        })?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(total_bytes: u64, record_size: usize, target: Target) -> Runner {
        let buffer = BufferConfig {
            cluster_size: 4096,
            alignment: 512,
            cluster_begin_offset: 1024,
        };
        let bench = BenchConfig {
            runs: 3,
            total_bytes,
            record_size,
        };
        Runner::new(buffer, bench, target).unwrap()
    }

    #[test]
    fn test_geometry() {
        // 40 records per cluster
        let r = runner(10_000, 100, Target::Memory);
        assert_eq!(r.clusters_needed(), 3);
        assert_eq!(r.device_size(), 1024 + 3 * 4096);
        assert_eq!(r.test_name(), "sequential_write_100B");
    }

    #[test]
    fn test_rejects_oversized_record() {
        let buffer = BufferConfig {
            cluster_size: 4096,
            alignment: 512,
            cluster_begin_offset: 0,
        };
        let bench = BenchConfig {
            runs: 1,
            total_bytes: 8192,
            record_size: 5000,
        };
        assert!(Runner::new(buffer, bench, Target::Memory).is_err());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let bench = BenchConfig {
            runs: 1,
            total_bytes: 4096,
            record_size: 100,
        };
        for buffer in [
            BufferConfig {
                cluster_size: 4096,
                alignment: 3000,
                cluster_begin_offset: 0,
            },
            BufferConfig {
                cluster_size: 4000,
                alignment: 512,
                cluster_begin_offset: 0,
            },
            BufferConfig {
                cluster_size: 4096,
                alignment: 512,
                cluster_begin_offset: 100,
            },
        ] {
            let err = Runner::new(buffer, bench.clone(), Target::Memory).unwrap_err();
            assert!(err.to_string().contains("invalid buffer geometry"));
        }
    }

    #[tokio::test]
    async fn test_run_writes_every_byte() {
        let r = runner(10_000, 100, Target::Memory);
        let device = Arc::new(MemoryBlockDevice::new(
            usize::try_from(r.device_size()).unwrap(),
            512,
        ));
        r.run_once(Arc::clone(&device)).await.unwrap();

        // Clusters hold 4000, 4000 and 2000 bytes of records
        let writes = device.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].requested, logfs_common::Range::new(1024, 5120));
        assert_eq!(writes[1].requested, logfs_common::Range::new(5120, 9216));
        assert_eq!(writes[2].requested, logfs_common::Range::new(9216, 11264));
        assert!(device.contents(1024, 4000).iter().all(|&b| b == 0xA5));
        assert!(device.contents(5024, 96).iter().all(|&b| b == 0));
        assert!(device.contents(9216, 2000).iter().all(|&b| b == 0xA5));
    }

    #[tokio::test]
    async fn test_small_device_rejected() {
        let r = runner(10_000, 100, Target::Memory);
        let device = Arc::new(MemoryBlockDevice::new(4096, 512));
        assert!(r.run_once(device).await.is_err());

        // The unaligned tail does not count
        let size = usize::try_from(r.device_size()).unwrap();
        let device = Arc::new(MemoryBlockDevice::new(size - 1, 512));
        assert!(r.run_once(device).await.is_err());
    }

    #[tokio::test]
    async fn test_file_target() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(
            8000,
            100,
            Target::File {
                path: dir.path().join("device"),
                direct_io: false,
            },
        );
        let samples = r.run().await.unwrap();
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|&ms| ms >= 0.0));
    }
}
