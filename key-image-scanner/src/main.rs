//! Botho Key Image Scanner CLI
//!
//! Finds the transaction that spent a key image.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use botho_key_image_scanner::{
    config::ScannerConfig,
    lookup::{LookupService, Resolution},
    rpc::{HttpLedgerClient, RetryingLedgerClient},
    scan::ScanLoop,
    KeyImageStore,
};

#[derive(Parser)]
#[command(name = "botho-key-image-scanner")]
#[command(about = "Key image spend lookup for CryptoNote-style daemons")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "key-image-scanner.toml", global = true)]
    config: PathBuf,

    /// Directory of the key image index (overrides the configuration file)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Daemon RPC URL (overrides the configuration file)
    #[arg(long, global = true)]
    daemon_rpc_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan up to the chain tip, then look up a key image
    Find {
        /// Key image (64-character hex string)
        #[arg(short, long)]
        key_image: String,
    },

    /// Look up a key image in the local index without scanning
    Lookup {
        /// Key image (64-character hex string)
        #[arg(short, long)]
        key_image: String,
    },

    /// Scan the chain into the local index
    Scan {
        /// Keep polling for new blocks until interrupted
        #[arg(long)]
        follow: bool,
    },

    /// Show the state of the local index
    Status,

    /// Validate configuration file
    ValidateConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            if matches!(cli.command, Commands::ValidateConfig) {
                eprintln!("Configuration validation failed: {:#}", e);
                std::process::exit(1);
            }
            return Err(e);
        }
    };

    match cli.command {
        Commands::Find { key_image } => find(&config, &key_image),
        Commands::Lookup { key_image } => lookup(&config, &key_image),
        Commands::Scan { follow } => run_scanner(&config, follow),
        Commands::Status => show_status(&config),
        Commands::ValidateConfig => {
            println!("Configuration is valid.");
            println!("  Daemon URL: {}", config.daemon_url);
            println!("  Index path: {}", config.db_path.display());
            println!(
                "  Chunk size: {}, header batch size: {}",
                config.chunk_size, config.header_batch_size
            );
            println!("  Reorg margin: {} blocks", config.reorg_margin);
            println!(
                "  Retries: {} (base delay {} ms), timeout {} s",
                config.max_retries, config.retry_base_delay_ms, config.request_timeout_secs
            );
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Read the configuration file if there is one and apply the CLI overrides.
fn load_config(cli: &Cli) -> Result<ScannerConfig> {
    let mut config = if cli.config.exists() {
        ScannerConfig::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        tracing::debug!("No config file at {:?}, using defaults", cli.config);
        ScannerConfig::default()
    };

    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(daemon_url) = &cli.daemon_rpc_url {
        config.daemon_url = daemon_url.clone();
    }

    config.validate()?;
    Ok(config)
}

fn open_store(config: &ScannerConfig) -> Result<Arc<KeyImageStore>> {
    let store = KeyImageStore::open(&config.db_path)
        .with_context(|| format!("Failed to open index at {:?}", config.db_path))?;
    Ok(Arc::new(store))
}

fn scan_loop(
    config: &ScannerConfig,
    store: Arc<KeyImageStore>,
) -> Result<ScanLoop<RetryingLedgerClient<HttpLedgerClient>>> {
    let client = HttpLedgerClient::new(&config.daemon_url, config.request_timeout())?;
    let client = RetryingLedgerClient::new(client, config.retry_policy());
    Ok(ScanLoop::new(client, store, config))
}

fn stop_on_ctrlc() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupted, finishing the current commit");
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    })?;
    Ok(stop)
}

fn find(config: &ScannerConfig, key_image: &str) -> Result<()> {
    let store = open_store(config)?;
    let service = LookupService::new(store.clone());

    // Reject a malformed key image before touching the network.
    service.resolve_hex(key_image)?;

    let stop = stop_on_ctrlc()?;
    let mut scanner = scan_loop(config, store)?;
    scanner.run_pass(&stop)?;

    print_resolution(&service, service.resolve_hex(key_image)?)
}

fn lookup(config: &ScannerConfig, key_image: &str) -> Result<()> {
    let service = LookupService::new(open_store(config)?);
    print_resolution(&service, service.resolve_hex(key_image)?)
}

fn print_resolution(service: &LookupService, resolution: Resolution) -> Result<()> {
    match resolution {
        Resolution::Found { tx_hash } => {
            println!("{}", tx_hash);
            if let Some(record) = service.transaction(&tx_hash)? {
                tracing::info!(
                    "Transaction {} ({}) spends {} key images",
                    tx_hash,
                    record.kind,
                    record.key_images.len()
                );
            }
        }
        Resolution::NotFound { scanned_up_to } => {
            println!("not found up to block {}", scanned_up_to);
        }
    }
    Ok(())
}

fn run_scanner(config: &ScannerConfig, follow: bool) -> Result<()> {
    tracing::info!("Starting key image scanner against {}", config.daemon_url);

    let store = open_store(config)?;
    let stop = stop_on_ctrlc()?;
    let mut scanner = scan_loop(config, store)?;

    if follow {
        scanner.run(&stop, config.poll_interval())?;
    } else {
        let summary = scanner.run_pass(&stop)?;
        tracing::info!(
            "Single scan complete: {} new, {} already indexed, {} skipped, {} missed",
            summary.inserted,
            summary.duplicates,
            summary.skipped,
            summary.missed
        );
    }

    Ok(())
}

fn show_status(config: &ScannerConfig) -> Result<()> {
    let stats = open_store(config)?.stats()?;

    println!("Index: {}", config.db_path.display());
    println!("  Scanned up to block: {}", stats.cursor);
    println!("  Transactions: {}", stats.num_transactions);
    println!("  Key images: {}", stats.num_key_images);

    let last_commit = i64::try_from(stats.last_commit_timestamp)
        .ok()
        .filter(|ts| *ts > 0)
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0));
    match last_commit {
        Some(time) => println!("  Last commit: {}", time.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last commit: never"),
    }

    Ok(())
}
