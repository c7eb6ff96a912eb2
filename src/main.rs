use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rsync_cord::{Config, Dispatcher, RsyncRunner};

#[derive(Parser)]
#[command(name = "rsync-cord")]
#[command(about = "Synchronize repositories with a pool of rsync workers and notify the listener")]
#[command(version)]
struct Cli {
    /// The config file that is to be used
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// The port to run the listener on and communicate with it [default: 3450]
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// The maximum number of workers to spawn [default: 8]
    #[arg(short = 't', long = "threads")]
    threads: Option<usize>,

    /// Extra debug output in the log file
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = load_config(&cli)?;
    config.ensure_directories()?;

    init_logging(&config, cli.debug)?;
    info!("Starting rsync-cord v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        "This will process {} URIs from {}",
        config.jobs.len(),
        cli.config.display()
    );
    if config.jobs.len() == 1 {
        warn!("The URI list only has 1 URI");
    }

    let runner = Arc::new(RsyncRunner::from_config(&config));
    let dispatcher = Dispatcher::new(config, runner);

    dispatcher.ensure_listener().await?;
    let summary = dispatcher.run().await?;

    println!("🎉 Synchronization Complete!");
    println!("   👷 Workers: {}", summary.workers_spawned);
    println!("   ✅ Synced: {}", summary.jobs_synced);
    println!("   ❌ Exhausted: {}", summary.jobs_exhausted);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.notify_failures > 0 || !summary.all_done_delivered {
        println!(
            "   ⚠️  Listener notifications failed: {} (see {})",
            summary.notify_failures + usize::from(!summary.all_done_delivered),
            dispatcher.config().log_file_path().display()
        );
    }

    Ok(())
}

/// Load the configuration file and apply command line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config)?;

    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(threads) = cli.threads {
        config.pool.max_workers = threads;
    }

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;

    Ok(config)
}

/// Initialize logging into the coordinator log file
fn init_logging(config: &Config, debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let log_path = config.log_file_path();
    let log_file = File::create(&log_path)
        .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false),
        )
        .with(filter)
        .init();

    Ok(())
}
