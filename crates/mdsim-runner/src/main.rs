//! # mdsim
//!
//! Entry point for the market data simulator.
//!
//! Runs one of two roles from a JSON configuration file: the exchange
//! simulator, which streams ticks to every connected client, or the feed
//! handler, which consumes that stream into a latest-price table read by a
//! pool of reader threads.
//!
//! # Usage
//!
//! ```bash
//! mdsim exchange --config configs/mdsim.json
//! mdsim feed --config configs/mdsim.json --log-level debug
//! ```
//!
//! Ctrl+C stops either role cleanly. Any startup failure exits with code 1.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, error::ErrorKind};
use mdsim_core::{
    config::{self, MdSimConfig},
    error::MdError,
    protocol::Payload,
};
use mdsim_exchange::ExchangeSimulator;
use mdsim_feed::{FeedHandler, FeedStats, SymbolTable};
use tracing::{error, info, warn};

/// Synthetic market data exchange and feed handler.
#[derive(Parser)]
#[command(name = "mdsim", about = "Synthetic market data exchange and feed handler")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Simulate prices and broadcast them to every connected client.
    Exchange(CommonArgs),
    /// Connect to an exchange and maintain the latest message per symbol.
    Feed(CommonArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Configuration file path (JSON). Built-in defaults if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Optional log directory for file output. Overrides the config file.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if usage_exit_code(&e) == 0 {
                e.exit();
            }
            let _ = e.print();
            std::process::exit(1);
        }
    };
    let (role, args) = match &cli.mode {
        Mode::Exchange(args) => ("exchange", args),
        Mode::Feed(args) => ("feed", args),
    };

    // 1. Load configuration
    let config = match &args.config {
        Some(path) => {
            config::load_config(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => config::parse_config("{}").context("building default config")?,
    };

    // 2. Initialize logging; the guard flushes the file writer on exit
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_dir = args.log_dir.as_deref().or(config.logging.dir.as_deref());
    let _guard = mdsim_core::logging::init_logging(level, log_dir, role);

    info!(
        "mdsim {role} starting: config={}, log_level={level}",
        args.config
            .as_ref()
            .map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string()),
    );

    // 3. Run the selected role until it finishes or Ctrl+C
    let result = match cli.mode {
        Mode::Exchange(_) => run_exchange(config).await,
        Mode::Feed(_) => run_feed(config).await,
    };
    if let Err(e) = &result {
        error!("mdsim {role} failed: {e:#}");
    }
    result
}

/// Help and version requests succeed; every other usage error, an unknown
/// mode included, exits 1 like any startup failure.
fn usage_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

/// Run blocking `work` off the async runtime. Ctrl+C raises `stop`, which the
/// work is expected to observe and return from.
async fn run_until_ctrl_c<T, F>(stop: Arc<AtomicBool>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(work);
    tokio::select! {
        joined = &mut task => Ok(joined?),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl+C")?;
            info!("[runner] shutdown signal received");
            stop.store(true, Ordering::Relaxed);
            Ok(task.await?)
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

async fn run_exchange(config: MdSimConfig) -> Result<()> {
    let mut exchange = ExchangeSimulator::new(&config).context("creating exchange")?;
    let addr = exchange.listen().context("binding listener")?;
    info!(
        "[runner] exchange on {addr}: {} symbols at {} ticks/s for {} s",
        config.exchange.symbols, config.ticks.rate, config.ticks.run_duration_sec,
    );

    let stop = exchange.stop_handle();
    let stats = run_until_ctrl_c(stop, move || exchange.run()).await?.context("exchange run")?;
    info!("[runner] exchange finished: {stats}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

async fn run_feed(config: MdSimConfig) -> Result<()> {
    let feed = config.feed.clone();
    let connect_config = config.clone();
    let mut handler = tokio::task::spawn_blocking(move || FeedHandler::connect(&connect_config))
        .await?
        .context("connecting feed")?;

    let stop = handler.stop_handle();
    let table = handler.table();
    let symbols = (feed.first_symbol, feed.last_symbol);

    let readers = spawn_readers(feed.reader_threads, &table, symbols, &stop)?;
    info!("[runner] feed from {}: {} reader thread(s)", handler.peer(), readers.len());

    let reporter = tokio::spawn(report_stats(
        handler.stats(),
        table,
        symbols,
        Duration::from_millis(feed.stats_interval_ms.max(1)),
        Arc::clone(&stop),
    ));

    let result = run_until_ctrl_c(Arc::clone(&stop), move || handler.run()).await?;

    stop.store(true, Ordering::Relaxed);
    reporter.await?;
    let mut reads = 0u64;
    for reader in readers {
        match reader.join() {
            Ok(n) => reads += n,
            Err(_) => warn!("[runner] reader thread panicked"),
        }
    }
    info!("[runner] readers took {reads} snapshots");

    match result {
        Ok(()) => Ok(()),
        Err(MdError::PeerClosed) => {
            info!("[runner] exchange closed the connection");
            Ok(())
        }
        Err(e) => Err(e).context("feed run"),
    }
}

/// Reader pool: each thread sweeps the subscribed range and checks that the
/// sequence of every symbol never goes backwards. Returns snapshots taken.
fn spawn_readers(
    count: usize,
    table: &SymbolTable,
    (first, last): (u16, u16),
    stop: &Arc<AtomicBool>,
) -> Result<Vec<thread::JoinHandle<u64>>> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let table = table.clone();
        let stop = Arc::clone(stop);
        let handle = thread::Builder::new()
            .name(format!("reader-{i}"))
            .spawn(move || {
                let mut last_seen = vec![0u64; last as usize + 1];
                let mut reads = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    for id in first..=last {
                        let Some(msg) = table.get(id as usize) else { continue };
                        reads += 1;
                        let seen = &mut last_seen[id as usize];
                        if msg.sequence < *seen {
                            warn!(
                                "[reader-{i}] symbol {id} went back from {} to {}",
                                *seen, msg.sequence
                            );
                        }
                        *seen = msg.sequence;
                    }
                    thread::sleep(Duration::from_micros(100));
                }
                reads
            })
            .context("spawning reader thread")?;
        handles.push(handle);
    }
    Ok(handles)
}

/// Periodic feed statistics plus a few latest prices, standing in for a
/// terminal display.
async fn report_stats(
    stats: Arc<FeedStats>,
    table: SymbolTable,
    (first, last): (u16, u16),
    every: Duration,
    stop: Arc<AtomicBool>,
) {
    const SAMPLE: usize = 5;
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    let mut previous = stats.snapshot();

    while !stop.load(Ordering::Relaxed) {
        ticker.tick().await;
        let current = stats.snapshot();
        info!("[feed] {} (total {current})", current.delta(&previous));
        previous = current;

        let sample = latest_sample(&table, (first, last), SAMPLE);
        if !sample.is_empty() {
            info!("[feed] latest {}", sample.join(" "));
        }
    }
}

/// Latest reference price of up to `take` symbols in the range, tagged `q`
/// for a quote mid and `t` for a trade print.
fn latest_sample(table: &SymbolTable, (first, last): (u16, u16), take: usize) -> Vec<String> {
    (first..=last)
        .filter_map(|id| table.get(id as usize))
        .take(take)
        .map(|msg| {
            let tag = match msg.payload {
                Payload::Quote(_) => 'q',
                Payload::Trade(_) => 't',
            };
            format!("{}={:.2}{tag}", msg.symbol_id, msg.reference_price())
        })
        .collect()
}
