//! CoreStage - Multi-core block staging engine
//!
//! Spawns one worker per configured core over a single backing file and
//! runs until SIGINT/SIGTERM requests a drain.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use corestage::{Engine, EngineConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// CoreStage - multi-core block staging engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of worker cores
    #[arg(long, env = "CORES", default_value_t = default_cores())]
    cores: usize,

    /// Per-core segment size in MiB
    #[arg(long, env = "SEGMENT_MB", default_value = "512")]
    segment_mb: u64,

    /// Ring log size in MiB
    #[arg(long, env = "CACHE_MB", default_value = "128")]
    cache_mb: u64,

    /// Page cache capacity in entries
    #[arg(long, env = "MAX_CACHE_ENTRIES", default_value = "32768")]
    max_cache_entries: usize,

    /// Queue-depth gap that triggers migration
    #[arg(long, env = "MIGRATION_THRESHOLD", default_value = "5")]
    migration_threshold: usize,

    /// Lower compression level for the prior-ratio selector
    #[arg(long, env = "COMPRESSION_MIN_LVL", default_value = "1")]
    compression_min_level: i32,

    /// Upper compression level for the prior-ratio selector
    #[arg(long, env = "COMPRESSION_MAX_LVL", default_value = "5")]
    compression_max_level: i32,

    /// Ratio cutoff between compressible and not (0 < x < 1)
    #[arg(long, env = "COMPRESSION_ADAPTIVE_THRESHOLD", default_value = "0.8")]
    adaptive_threshold: f64,

    /// Backing file path
    #[arg(long, env = "SWAP_IMG_PATH", default_value = "./storage_swap.img")]
    storage_path: PathBuf,

    /// Queue depth above which a core counts as loaded
    #[arg(long, env = "LOAD_THRESHOLD", default_value = "50")]
    load_threshold: usize,

    /// High-load delay in nanoseconds
    #[arg(long, env = "HIGH_LOAD_DELAY_NS", default_value = "20000000")]
    high_load_delay_ns: u64,

    /// Low-load delay in nanoseconds
    #[arg(long, env = "LOW_LOAD_DELAY_NS", default_value = "10000000")]
    low_load_delay_ns: u64,

    /// Base delay between iterations in nanoseconds
    #[arg(long, env = "BASE_LOAD_DELAY_NS", default_value = "5000000")]
    base_load_delay_ns: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn default_cores() -> usize {
    num_cpus::get().min(4)
}

impl Args {
    fn into_config(self) -> EngineConfig {
        EngineConfig {
            cores: self.cores,
            segment_mb: self.segment_mb,
            cache_mb: self.cache_mb,
            max_cache_entries: self.max_cache_entries,
            migration_threshold: self.migration_threshold,
            compression_min_level: self.compression_min_level,
            compression_max_level: self.compression_max_level,
            adaptive_threshold: self.adaptive_threshold,
            storage_path: self.storage_path,
            load_threshold: self.load_threshold,
            high_load_delay: Duration::from_nanos(self.high_load_delay_ns),
            low_load_delay: Duration::from_nanos(self.low_load_delay_ns),
            base_load_delay: Duration::from_nanos(self.base_load_delay_ns),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting CoreStage");
    info!("  Cores: {}", args.cores);
    info!("  Segment: {} MiB per core", args.segment_mb);
    info!("  Ring: {} MiB", args.cache_mb);
    info!("  Cache capacity: {} entries", args.max_cache_entries);
    info!("  Backing file: {}", args.storage_path.display());

    let engine = match Engine::new(args.into_config()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("Engine initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    // SIGINT/SIGTERM clear the running flag; workers drain at their next
    // loop iteration
    if let Err(e) = register_signals(&engine) {
        error!("Failed to install signal handlers: {}", e);
        std::process::exit(1);
    }

    match engine.run() {
        Ok(report) => {
            info!(
                "Shutdown complete: {} operations across {} cores",
                report.ops_per_core.iter().sum::<u64>(),
                report.ops_per_core.len()
            );
        }
        Err(e) => {
            error!("Engine failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn register_signals(engine: &Arc<Engine>) -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let engine = Arc::clone(engine);
    let _ = std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!(signal = sig, "termination signal received, draining workers");
                engine.shutdown();
            }
        })?;
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
