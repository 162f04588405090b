//! Spool Replay - exercise the write buffer end to end
//!
//! Reads a local file, stripes its blocks across concurrent streams in
//! shuffled order, feeds them through a shared transfer into an output
//! file, and checks the output matches the input.

mod plan;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use spool_buffer::{SharedTransfer, Transfer};
use spool_common::{Config, LogFormat, SpoolConfig};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "spool-replay")]
#[command(about = "Replay a file through the spool write buffer in out-of-order arrival")]
#[command(version)]
struct Args {
    /// File to replay
    input: PathBuf,

    /// Where the reassembled stream is written
    #[arg(short, long)]
    output: PathBuf,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/spool/spool.toml")]
    config: String,

    /// Chunk size in bytes
    #[arg(long, env = "SPOOL_BLOCK_SIZE")]
    block_size: Option<usize>,

    /// Ceiling on memory-resident buffers
    #[arg(long)]
    max_memory_slots: Option<usize>,

    /// Ceiling on file-backed buffers
    #[arg(long)]
    max_file_slots: Option<usize>,

    /// Directory for the spill file
    #[arg(long, env = "SPOOL_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Never spill to a file; fail once the memory ceiling is reached
    #[arg(long)]
    no_file_spill: bool,

    /// Concurrent streams the blocks are striped across
    #[arg(long, default_value_t = 4)]
    streams: usize,

    /// Blocks reordered together within each stream
    #[arg(long, default_value_t = 8)]
    window: usize,

    /// Seed for the arrival order (random when unset)
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(path: &str) -> Config {
    if !Path::new(path).exists() {
        return Config::default();
    }
    Config::load(path).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config file {path}: {e}");
        Config::default()
    })
}

/// CLI flags take precedence over the config file
fn merge(args: &Args, mut buffer: SpoolConfig) -> SpoolConfig {
    if let Some(block_size) = args.block_size {
        buffer.block_size = block_size;
    }
    if let Some(max) = args.max_memory_slots {
        buffer.max_memory_slots = max;
    }
    if let Some(max) = args.max_file_slots {
        buffer.max_file_slots = max;
    }
    if let Some(dir) = &args.temp_dir {
        buffer.temp_dir = Some(dir.clone());
    }
    if args.no_file_spill {
        buffer.file_spill = false;
    }
    buffer
}

fn resolve_log_level(args: &Args, config: &Config) -> String {
    args.log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone())
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config);
    let log_level = resolve_log_level(&args, &config);
    let buffer = merge(&args, config.buffer);
    init_logging(&log_level, config.logging.format);

    buffer.validate().context("invalid buffer configuration")?;
    info!("Starting spool replay");
    info!("Config file: {}", args.config);
    info!(
        "Block size: {} bytes, {} memory / {} file buffers, spill dir {}",
        buffer.block_size,
        buffer.max_memory_slots,
        buffer.max_file_slots,
        buffer.spill_dir().display()
    );

    let data = Bytes::from(
        std::fs::read(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?,
    );
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let streams = plan::striped(&data, buffer.block_size, args.streams, args.window, &mut rng);
    info!(
        "Replaying {} bytes over {} streams (window {}, seed {})",
        data.len(),
        streams.len(),
        args.window,
        seed
    );

    let output = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let transfer = SharedTransfer::new(Transfer::new(buffer, output)?);

    let started = Instant::now();
    let mut handles = Vec::with_capacity(streams.len());
    for (id, stream) in streams.into_iter().enumerate() {
        let transfer = transfer.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for arrival in stream {
                transfer.write_chunk(arrival.offset, &arrival.payload)?;
            }
            info!("Stream {} delivered all chunks", id);
            Ok::<_, spool_buffer::PoolError>(())
        }));
    }

    let mut failed = None;
    for handle in handles {
        if let Err(e) = handle.await.context("stream task panicked")? {
            error!("Stream failed: {}", e);
            failed.get_or_insert(e);
        }
    }
    if let Some(e) = failed {
        transfer.abort();
        return Err(e).context("transfer aborted");
    }

    if let Some(stats) = transfer.stats() {
        info!(
            "Peak buffers: {}, spills to file: {}, restores to memory: {}, trims: {}",
            stats.peak_buffer_count, stats.spills, stats.restores, stats.trims
        );
    }
    let written = transfer.finish()?;
    let elapsed = started.elapsed();

    let expected = crc32c::crc32c(&data);
    let actual = crc32c::crc32c(
        &std::fs::read(&args.output)
            .with_context(|| format!("failed to read back {}", args.output.display()))?,
    );
    if written != data.len() as u64 || expected != actual {
        bail!(
            "output mismatch: wrote {written} of {} bytes, crc32c {actual:08x} != {expected:08x}",
            data.len()
        );
    }
    if elapsed.as_secs_f64() > 0.0 {
        info!(
            "Wrote {} bytes in {:.3}s ({:.1} MB/s), crc32c {:08x}",
            written,
            elapsed.as_secs_f64(),
            written as f64 / elapsed.as_secs_f64() / 1e6,
            actual
        );
    } else {
        warn!("Elapsed time too small to report throughput");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["spool-replay", "in.bin", "--output", "out.bin"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = args(&[
            "--block-size",
            "4096",
            "--max-memory-slots",
            "3",
            "--no-file-spill",
        ]);
        let merged = merge(&args, SpoolConfig::default());
        assert_eq!(merged.block_size, 4096);
        assert_eq!(merged.max_memory_slots, 3);
        assert_eq!(merged.max_file_slots, SpoolConfig::default().max_file_slots);
        assert!(!merged.file_spill);
    }

    #[test]
    fn test_log_level_flag_overrides_config() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();

        assert_eq!(resolve_log_level(&args(&[]), &config), "debug");
        assert_eq!(
            resolve_log_level(&args(&["--log-level", "info"]), &config),
            "info"
        );
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.buffer, SpoolConfig::default());
    }

    #[test]
    fn test_replay_through_shared_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let data = Bytes::from((0..50_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>());
        let buffer = SpoolConfig::new(512, 4, 256).with_temp_dir(dir.path());

        let out_path = dir.path().join("out.bin");
        let output = File::create(&out_path).unwrap();
        let transfer = SharedTransfer::new(Transfer::new(buffer, output).unwrap());

        let mut rng = StdRng::seed_from_u64(9);
        let streams = plan::striped(&data, 512, 3, 6, &mut rng);
        std::thread::scope(|scope| {
            for stream in streams {
                let transfer = transfer.clone();
                scope.spawn(move || {
                    for arrival in stream {
                        transfer.write_chunk(arrival.offset, &arrival.payload).unwrap();
                    }
                });
            }
        });

        assert_eq!(transfer.finish().unwrap(), data.len() as u64);
        assert_eq!(std::fs::read(&out_path).unwrap(), data.to_vec());
    }
}
