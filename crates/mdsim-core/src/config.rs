//! Configuration for the exchange simulator and the feed handler.
//!
//! Both roles read one JSON file. Every field has a default, so a partial (or
//! empty `{}`) file is valid. Validation runs once, at load time, and rejects
//! the first out-of-range or inconsistent value with [`MdError::Config`].
//!
//! # Example config
//!
//! ```json
//! {
//!   "logging":  { "level": "info", "dir": "/tmp/mdsim" },
//!   "server":   { "bind": "0.0.0.0", "port": 9876 },
//!   "exchange": { "symbols": 100, "seed": 12345 },
//!   "market":   { "drift": 0.0, "spread_min": 0.0005, "spread_max": 0.002 },
//!   "ticks":    { "rate": 50000, "run_duration_sec": 10, "dt": 0.001 },
//!   "feed":     { "host": "127.0.0.1", "first_symbol": 1, "last_symbol": 100 }
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::{
    error::{MdError, MdResult},
    protocol::{MAX_SYMBOL_ID, MIN_SYMBOL_ID},
};

/// Hard ceiling on simultaneously simulated symbols.
pub const MAX_ACTIVE_SYMBOLS: usize = 100;

/// Hard ceiling on feed reader threads.
pub const MAX_READER_THREADS: usize = 8;

/// Reader thread count used when the configured value is zero.
pub const DEFAULT_READER_THREADS: usize = 4;

/// Largest allowed magnitude of the annual drift.
pub const MAX_DRIFT: f64 = 0.05;

/// Top-level config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MdSimConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub exchange: ExchangeConfig,
    pub market: MarketConfig,
    pub ticks: TickConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rolling log files; console only if absent.
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), dir: None }
    }
}

/// Listen address of the exchange simulator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".to_string(), port: 9876 }
    }
}

/// Symbol universe and randomness of the simulator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Number of actively simulated symbols, `1..=100`.
    pub symbols: usize,
    /// Global seed; symbol `id` uses `seed ^ id`.
    pub seed: u64,
    /// Readiness events fetched per poll.
    pub max_events: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self { symbols: 100, seed: 12345, max_events: 64 }
    }
}

/// Price process parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub drift: f64,
    pub spread_min: f64,
    pub spread_max: f64,
    pub volatility_min: f64,
    pub volatility_max: f64,
    pub price_min: f64,
    pub price_max: f64,
    /// P(QUOTE) per tick; the remainder are trades.
    pub quote_ratio: f64,
    /// Log-space location of the quote size distribution.
    pub quote_size_mu: f64,
    /// Log-space scale of the quote size distribution.
    pub quote_size_sigma: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            drift: 0.0,
            spread_min: 0.0005,
            spread_max: 0.0020,
            volatility_min: 0.01,
            volatility_max: 0.06,
            price_min: 100.0,
            price_max: 5000.0,
            quote_ratio: 0.70,
            quote_size_mu: 3.5,
            quote_size_sigma: 0.8,
        }
    }
}

/// Tick schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Nominal ticks per second across all symbols.
    pub rate: u64,
    pub rate_min: u64,
    pub rate_max: u64,
    pub run_duration_sec: u64,
    /// GBM step size.
    pub dt: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { rate: 50_000, rate_min: 1_000, rate_max: 500_000, run_duration_sec: 1, dt: 0.001 }
    }
}

impl TickConfig {
    /// Nanoseconds between two ticks.
    pub fn interval_ns(&self) -> u64 {
        1_000_000_000 / self.rate.max(1)
    }

    pub fn run_duration_ns(&self) -> u64 {
        self.run_duration_sec.saturating_mul(1_000_000_000)
    }
}

/// Feed handler connection and table settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub host: String,
    /// Defaults to `server.port` when absent.
    pub port: Option<u16>,
    pub first_symbol: u16,
    pub last_symbol: u16,
    pub recv_buffer_bytes: usize,
    pub stream_buffer_bytes: usize,
    pub connect_timeout_ms: u64,
    pub poll_timeout_ms: u64,
    /// Concurrent table readers; `0` falls back to 4.
    pub reader_threads: usize,
    pub stats_interval_ms: u64,
    /// Core to pin the decode thread to.
    pub cpu_core: Option<usize>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
            first_symbol: 1,
            last_symbol: 100,
            recv_buffer_bytes: 4 * 1024 * 1024,
            stream_buffer_bytes: 64 * 1024,
            connect_timeout_ms: 5_000,
            poll_timeout_ms: 100,
            reader_threads: DEFAULT_READER_THREADS,
            stats_interval_ms: 1_000,
            cpu_core: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn check(ok: bool, msg: impl FnOnce() -> String) -> MdResult<()> {
    if ok { Ok(()) } else { Err(MdError::Config(msg())) }
}

impl MdSimConfig {
    /// Feed target port, falling back to the server port.
    pub fn feed_port(&self) -> u16 {
        self.feed.port.unwrap_or(self.server.port)
    }

    /// Check every parameter, normalizing the ones with a documented
    /// fallback.
    pub fn validate(&mut self) -> MdResult<()> {
        let ex = &self.exchange;
        check((1..=MAX_ACTIVE_SYMBOLS).contains(&ex.symbols), || {
            format!("exchange.symbols must be in 1..={MAX_ACTIVE_SYMBOLS}, got {}", ex.symbols)
        })?;
        check(ex.max_events > 0, || "exchange.max_events must be > 0".to_string())?;

        let m = &self.market;
        check(m.drift.is_finite() && m.drift.abs() <= MAX_DRIFT, || {
            format!("market.drift must be within ±{MAX_DRIFT}, got {}", m.drift)
        })?;
        check(m.spread_min > 0.0 && m.spread_max > m.spread_min, || {
            format!(
                "market spread requires spread_max > spread_min > 0, got {}..{}",
                m.spread_min, m.spread_max
            )
        })?;
        check(m.volatility_min >= 0.0 && m.volatility_max > m.volatility_min, || {
            format!(
                "market volatility requires volatility_max > volatility_min >= 0, got {}..{}",
                m.volatility_min, m.volatility_max
            )
        })?;
        check(m.price_min > 0.0 && m.price_max > m.price_min, || {
            format!(
                "market price requires price_max > price_min > 0, got {}..{}",
                m.price_min, m.price_max
            )
        })?;
        check((0.0..=1.0).contains(&m.quote_ratio), || {
            format!("market.quote_ratio must be in [0, 1], got {}", m.quote_ratio)
        })?;
        check(m.quote_size_mu.is_finite() && m.quote_size_sigma > 0.0, || {
            format!(
                "quote size log-normal requires finite mu and sigma > 0, got ({}, {})",
                m.quote_size_mu, m.quote_size_sigma
            )
        })?;

        let t = &self.ticks;
        check(t.rate_max > t.rate_min, || {
            format!("ticks.rate_max must exceed rate_min, got {}..{}", t.rate_min, t.rate_max)
        })?;
        check(t.rate > 0 && (t.rate_min..=t.rate_max).contains(&t.rate), || {
            format!(
                "ticks.rate must be > 0 and within {}..={}, got {}",
                t.rate_min, t.rate_max, t.rate
            )
        })?;
        check(t.rate <= 1_000_000_000, || {
            format!("ticks.rate {} exceeds one tick per nanosecond", t.rate)
        })?;
        check(t.dt > 0.0 && t.dt.is_finite(), || format!("ticks.dt must be > 0, got {}", t.dt))?;
        check(t.run_duration_sec > 0, || "ticks.run_duration_sec must be > 0".to_string())?;

        let f = &self.feed;
        let subscription_ok = f.first_symbol >= MIN_SYMBOL_ID
            && f.last_symbol <= MAX_SYMBOL_ID
            && f.first_symbol <= f.last_symbol;
        check(subscription_ok, || {
            format!(
                "feed subscription {}..={} must be non-empty and within {}..={}",
                f.first_symbol, f.last_symbol, MIN_SYMBOL_ID, MAX_SYMBOL_ID
            )
        })?;
        check(f.recv_buffer_bytes > 0, || "feed.recv_buffer_bytes must be > 0".to_string())?;
        check(f.stream_buffer_bytes > 0, || "feed.stream_buffer_bytes must be > 0".to_string())?;
        check(f.poll_timeout_ms > 0, || "feed.poll_timeout_ms must be > 0".to_string())?;
        check(f.reader_threads <= MAX_READER_THREADS, || {
            format!("feed.reader_threads must be <= {MAX_READER_THREADS}, got {}", f.reader_threads)
        })?;

        if self.feed.reader_threads == 0 {
            warn!("[config] feed.reader_threads is 0, using {DEFAULT_READER_THREADS}");
            self.feed.reader_threads = DEFAULT_READER_THREADS;
        }
        Ok(())
    }
}

/// Parse and validate a JSON config from a string.
pub fn parse_config(json: &str) -> MdResult<MdSimConfig> {
    let mut config: MdSimConfig =
        serde_json::from_str(json).map_err(|e| MdError::Config(format!("invalid JSON: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Load, parse, and validate a JSON config file.
pub fn load_config(path: &Path) -> MdResult<MdSimConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| MdError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_config(&content)
}
