//! pagestor
//!
//! Command-line front end for the paged local cache.
//!
//! ```text
//! pagestor create <SOURCE> <CACHE>            fresh cache, nothing resident
//! pagestor warm   <SOURCE> <CACHE>            fetch every missing page
//! pagestor read   <SOURCE> <CACHE> -o N -l N  read a byte range through the cache
//! pagestor stats  <SOURCE> <CACHE>            residency and I/O counters as JSON
//! ```

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pagestor::cache::{CacheStats, MetricsSnapshot, PageCache};
use pagestor::config::CacheConfig;
use pagestor::error::{Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// pagestor - Paged local cache for slow byte sources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "PAGESTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Page size in bytes (overrides the configuration file)
    #[arg(long, env = "PAGESTOR_PAGE_SIZE")]
    page_size: Option<u64>,

    /// Dirty bytes between status writes
    #[arg(long, env = "PAGESTOR_STATUS_WRITE_THRESHOLD")]
    status_write_threshold: Option<u64>,

    /// Largest missing byte count that still counts as completable
    #[arg(long, env = "PAGESTOR_COMPLETION_THRESHOLD")]
    completion_threshold: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct CachePaths {
    /// Source file to cache
    source: PathBuf,

    /// Local cache file; the status file sits next to it
    cache: PathBuf,

    /// Create the cache when it cannot be opened
    #[arg(long)]
    create_if_missing: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty cache, discarding any previous one
    Create {
        source: PathBuf,
        cache: PathBuf,
    },

    /// Fetch every missing page
    Warm {
        #[command(flatten)]
        paths: CachePaths,

        /// Only warm when the cache is already nearly complete
        #[arg(long)]
        only_if_completable: bool,
    },

    /// Read a byte range through the cache
    Read {
        #[command(flatten)]
        paths: CachePaths,

        /// First byte to read
        #[arg(short, long)]
        offset: u64,

        /// Bytes to read
        #[arg(short, long)]
        length: usize,

        /// Write the bytes here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print residency and I/O counters as JSON
    Stats {
        #[command(flatten)]
        paths: CachePaths,
    },
}

#[derive(Serialize)]
struct StatsReport {
    num_pages: u64,
    page_size: u64,
    full_file_size: u64,
    complete: bool,
    completable: bool,
    #[serde(flatten)]
    stats: CacheStats,
    metrics: MetricsSnapshot,
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    info!(
        page_size = config.page_size,
        status_write_threshold = config.status_write_threshold,
        completion_threshold = config.completion_threshold,
        "Starting pagestor"
    );

    match args.command {
        Command::Create { source, cache } => {
            let cache = PageCache::create(config, &source, &cache)?;
            info!(pages = cache.num_pages(), "Cache created");
            cache.close()
        }
        Command::Warm {
            paths,
            only_if_completable,
        } => {
            let cache = open_cache(config, &paths)?;
            if only_if_completable && !cache.is_cache_completable() {
                let stats = cache.get_cache_stats();
                info!(missing = stats.bytes_empty, "Cache is not completable, skipping");
                return cache.close();
            }
            let fetched = cache.complete_cache()?;
            info!(bytes = fetched, "Cache warmed");
            cache.close()
        }
        Command::Read {
            paths,
            offset,
            length,
            out,
        } => {
            let cache = open_cache(config, &paths)?;
            let mut buf = vec![0u8; length];
            let n = cache.read_bytes(offset, &mut buf)?;
            match out {
                Some(path) => fs::write(path, &buf[..n])?,
                None => std::io::stdout().write_all(&buf[..n])?,
            }
            cache.close()
        }
        Command::Stats { paths } => {
            let cache = open_cache(config, &paths)?;
            let report = StatsReport {
                num_pages: cache.num_pages(),
                page_size: cache.page_size(),
                full_file_size: cache.full_file_size(),
                complete: cache.is_cache_complete(),
                completable: cache.is_cache_completable(),
                stats: cache.get_cache_stats(),
                metrics: cache.metrics(),
            };
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| Error::GenericFailure(format!("Failed to encode stats: {}", e)))?;
            println!("{}", json);
            cache.close()
        }
    }
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)?,
        None => CacheConfig::default(),
    };
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    if let Some(threshold) = args.status_write_threshold {
        config.status_write_threshold = threshold;
    }
    if let Some(threshold) = args.completion_threshold {
        config.completion_threshold = threshold;
    }
    config.validate()?;
    Ok(config)
}

fn open_cache(config: CacheConfig, paths: &CachePaths) -> Result<PageCache> {
    match PageCache::open(config.clone(), &paths.source, &paths.cache) {
        Ok(cache) => Ok(cache),
        Err(e) if paths.create_if_missing => {
            warn!("Failed to open cache ({}), creating a new one", e);
            PageCache::create(config, &paths.source, &paths.cache)
        }
        Err(e) => Err(e),
    }
}

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

    // Logs go to stderr so `read` can stream bytes on stdout
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
