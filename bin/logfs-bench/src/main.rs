//! logfs write-path benchmark
//!
//! Times sequential record appends through the disk buffer against a file,
//! a block device or memory.

mod results;
mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use logfs_common::Config;
use results::{JsonPrinter, ResultPrinter, RunResult, TextPrinter};
use runner::{Runner, Target};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "logfs-bench")]
#[command(about = "Benchmark the logfs disk buffer write path")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/logfs/bench.toml")]
    config: PathBuf,

    /// Device or backing file to write to
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Write to memory instead of a device
    #[arg(long, conflicts_with = "device")]
    memory: bool,

    /// Disable O_DIRECT / F_NOCACHE
    #[arg(long)]
    no_direct_io: bool,

    /// Cluster (buffer) size in bytes
    #[arg(long)]
    cluster_size: Option<u64>,

    /// Write alignment in bytes
    #[arg(long)]
    alignment: Option<u64>,

    /// Disk offset of the first cluster
    #[arg(long)]
    cluster_begin_offset: Option<u64>,

    /// Size of a single appended record
    #[arg(long)]
    record_size: Option<usize>,

    /// Bytes written per run
    #[arg(long)]
    total_bytes: Option<u64>,

    /// Number of timed runs
    #[arg(long)]
    runs: Option<usize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log level
    #[arg(long, default_value = "info", env = "LOGFS_LOG")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config: Config = if args.config.exists() {
        let config_str = std::fs::read_to_string(&args.config)
            .with_context(|| format!("read config {}", args.config.display()))?;
        toml::from_str(&config_str)
            .with_context(|| format!("parse config {}", args.config.display()))?
    } else {
        Config::default()
    };

    // CLI takes precedence
    if let Some(path) = &args.device {
        config.device.path.clone_from(path);
    }
    if args.no_direct_io {
        config.device.direct_io = false;
    }
    if let Some(cluster_size) = args.cluster_size {
        config.buffer.cluster_size = cluster_size;
    }
    if let Some(alignment) = args.alignment {
        config.buffer.alignment = alignment;
    }
    if let Some(offset) = args.cluster_begin_offset {
        config.buffer.cluster_begin_offset = offset;
    }
    if let Some(record_size) = args.record_size {
        config.bench.record_size = record_size;
    }
    if let Some(total_bytes) = args.total_bytes {
        config.bench.total_bytes = total_bytes;
    }
    if let Some(runs) = args.runs {
        config.bench.runs = runs;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let target = if args.memory {
        Target::Memory
    } else {
        Target::File {
            path: config.device.path.clone(),
            direct_io: config.device.direct_io,
        }
    };
    if config.bench.runs == 0 {
        warn!("no runs configured");
    }

    let runner = Runner::new(config.buffer, config.bench.clone(), target)?;
    info!(
        clusters = runner.clusters_needed(),
        device_size = runner.device_size(),
        "starting benchmark"
    );

    let device = if args.memory {
        "memory".to_owned()
    } else {
        config.device.path.display().to_string()
    };
    let stdout = std::io::stdout().lock();
    let mut printer: Box<dyn ResultPrinter> = if args.json {
        Box::new(JsonPrinter::new(stdout))
    } else {
        Box::new(TextPrinter::new(stdout))
    };
    printer.print_configuration(&serde_json::json!({
        "device": device,
        "direct_io": !args.memory && config.device.direct_io,
        "cluster_size": config.buffer.cluster_size,
        "alignment": config.buffer.alignment,
        "cluster_begin_offset": config.buffer.cluster_begin_offset,
        "record_size": config.bench.record_size,
        "total_bytes": config.bench.total_bytes,
        "runs": config.bench.runs,
    }))?;

    let samples = runner.run().await?;
    if let Some(result) = RunResult::from_samples(runner.test_name(), samples) {
        printer.print_result(&result)?;
    }
    Ok(())
}
