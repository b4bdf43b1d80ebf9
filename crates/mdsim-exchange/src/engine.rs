//! Price process engine: turns scheduled ticks into QUOTE/TRADE messages.
//!
//! Randomness is split in two. A scheduler generator (`seed ^ 0xABCDEF`)
//! picks the symbol and decides QUOTE vs TRADE; each symbol's private
//! generator drives its GBM shock, sizes and aggressor side.

use mdsim_core::{
    config::{ExchangeConfig, MAX_ACTIVE_SYMBOLS, MarketConfig, MdSimConfig},
    error::{MdError, MdResult},
    protocol::{MAX_SYMBOL_ID, MIN_SYMBOL_ID, MarketMessage, Payload, Quote, Trade},
};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use rand_distr::{Distribution, LogNormal};

use crate::symbol::SymbolData;

const SCHEDULER_SEED_MASK: u64 = 0xAB_CDEF;

const QUOTE_QTY_MIN: f64 = 10.0;
const QUOTE_QTY_MAX: f64 = 10_000.0;
const TRADE_QTY_MIN: u32 = 10;
const TRADE_QTY_MAX: u32 = 2_000;

/// Counters kept by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub ticks: u64,
    pub quotes: u64,
    pub trades: u64,
}

/// Owns every active [`SymbolData`] and the scheduler generator.
pub struct PriceEngine {
    symbols: Vec<SymbolData>,
    rng: StdRng,
    dt: f64,
    quote_ratio: f64,
    quote_size: LogNormal<f64>,
    stats: EngineStats,
}

/// Shuffle the whole id space with `seed` and keep the first `count` ids.
pub fn select_active_symbols(seed: u64, count: usize) -> Vec<u16> {
    let mut ids: Vec<u16> = (MIN_SYMBOL_ID..=MAX_SYMBOL_ID).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    ids.shuffle(&mut rng);
    ids.truncate(count);
    ids
}

impl PriceEngine {
    pub fn from_config(config: &MdSimConfig) -> MdResult<Self> {
        Self::new(&config.exchange, &config.market, config.ticks.dt)
    }

    pub fn new(exchange: &ExchangeConfig, market: &MarketConfig, dt: f64) -> MdResult<Self> {
        if exchange.symbols == 0 || exchange.symbols > MAX_ACTIVE_SYMBOLS {
            return Err(MdError::Config(format!("cannot simulate {} symbols", exchange.symbols)));
        }
        if !(0.0..=1.0).contains(&market.quote_ratio) {
            return Err(MdError::Config(format!(
                "quote ratio {} outside [0, 1]",
                market.quote_ratio
            )));
        }
        let quote_size = LogNormal::new(market.quote_size_mu, market.quote_size_sigma)
            .map_err(|e| MdError::Config(format!("quote size distribution: {e}")))?;

        let symbols = select_active_symbols(exchange.seed, exchange.symbols)
            .into_iter()
            .map(|id| SymbolData::new(id, exchange.seed, market))
            .collect();

        Ok(Self {
            symbols,
            rng: StdRng::seed_from_u64(exchange.seed ^ SCHEDULER_SEED_MASK),
            dt,
            quote_ratio: market.quote_ratio,
            quote_size,
            stats: EngineStats::default(),
        })
    }

    /// Generate one tick for a uniformly chosen active symbol.
    pub fn tick(&mut self, timestamp_ns: u64) -> MarketMessage {
        let index = self.rng.random_range(0..self.symbols.len());
        self.tick_symbol(index, timestamp_ns)
    }

    /// Generate one tick for the symbol at `index` in the active set.
    fn tick_symbol(&mut self, index: usize, timestamp_ns: u64) -> MarketMessage {
        let is_quote = self.rng.random_bool(self.quote_ratio);

        let sym = &mut self.symbols[index];
        sym.evolve_price(self.dt);
        sym.update_quote_prices();

        let payload = if is_quote {
            let bid_qty = draw_quote_qty(&self.quote_size, sym.rng_mut());
            let ask_qty = draw_quote_qty(&self.quote_size, sym.rng_mut());
            Payload::Quote(Quote { bid_price: sym.bid(), ask_price: sym.ask(), bid_qty, ask_qty })
        } else {
            let rng = sym.rng_mut();
            let qty = rng.random_range(TRADE_QTY_MIN..=TRADE_QTY_MAX);
            let aggressor_buy = rng.random_bool(0.5);
            let price = if aggressor_buy { sym.ask() } else { sym.bid() };
            Payload::Trade(Trade { price, qty, aggressor_buy })
        };

        self.stats.ticks += 1;
        match payload {
            Payload::Quote(_) => self.stats.quotes += 1,
            Payload::Trade(_) => self.stats.trades += 1,
        }

        MarketMessage {
            symbol_id: sym.symbol_id(),
            sequence: sym.next_sequence(),
            timestamp_ns,
            payload,
        }
    }

    pub fn active_symbols(&self) -> impl Iterator<Item = u16> + '_ {
        self.symbols.iter().map(SymbolData::symbol_id)
    }

    pub fn symbol(&self, symbol_id: u16) -> Option<&SymbolData> {
        self.symbols.iter().find(|s| s.symbol_id() == symbol_id)
    }

    pub fn symbols(&self) -> &[SymbolData] {
        &self.symbols
    }

    #[inline]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }
}

#[inline]
fn draw_quote_qty(dist: &LogNormal<f64>, rng: &mut StdRng) -> u32 {
    dist.sample(rng).clamp(QUOTE_QTY_MIN, QUOTE_QTY_MAX) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::MIN_PRICE;
    use mdsim_core::protocol::MessageKind;

    fn engine() -> PriceEngine {
        PriceEngine::from_config(&MdSimConfig::default()).unwrap()
    }

    #[test]
    fn active_set_is_distinct_and_in_range() {
        let ids = select_active_symbols(12345, 100);
        assert_eq!(ids.len(), 100);
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 100);
        assert!(ids.iter().all(|&id| (MIN_SYMBOL_ID..=MAX_SYMBOL_ID).contains(&id)));
        assert_eq!(ids, select_active_symbols(12345, 100));
        assert_ne!(ids, select_active_symbols(54321, 100));
    }

    #[test]
    fn rejects_bad_construction() {
        let market = MarketConfig::default();
        let none = ExchangeConfig { symbols: 0, ..ExchangeConfig::default() };
        assert!(PriceEngine::new(&none, &market, 0.001).is_err());
        let bad_ratio = MarketConfig { quote_ratio: 1.5, ..MarketConfig::default() };
        assert!(PriceEngine::new(&ExchangeConfig::default(), &bad_ratio, 0.001).is_err());
    }

    #[test]
    fn book_never_crosses_and_price_stays_positive() {
        let mut e = engine();
        for t in 0..100_000u64 {
            let msg = e.tick(t);
            match msg.payload {
                Payload::Quote(q) => {
                    assert!(q.bid_price < q.ask_price, "crossed quote {msg}");
                    assert!(
                        (10..=10_000).contains(&q.bid_qty) && (10..=10_000).contains(&q.ask_qty)
                    );
                }
                Payload::Trade(tr) => {
                    assert!(tr.price > 0.0);
                    assert!((TRADE_QTY_MIN..=TRADE_QTY_MAX).contains(&tr.qty));
                }
            }
        }
        for sym in e.symbols() {
            assert!(sym.price() >= MIN_PRICE);
            assert!(sym.bid() < sym.ask());
        }
    }

    #[test]
    fn floor_holds_under_extreme_volatility() {
        let mut config = MdSimConfig::default();
        config.market.volatility_min = 3.0;
        config.market.volatility_max = 4.0;
        config.market.drift = -0.05;
        config.ticks.dt = 1.0;
        config.exchange.symbols = 5;
        let mut e = PriceEngine::from_config(&config).unwrap();
        for t in 0..20_000u64 {
            if let Payload::Quote(q) = e.tick(t).payload {
                assert!(q.bid_price < q.ask_price);
            }
        }
        assert!(e.symbols().iter().all(|s| s.price() >= MIN_PRICE && s.bid() < s.ask()));
    }

    #[test]
    fn quote_fraction_matches_ratio() {
        const N: u64 = 20_000;
        let mut e = engine();
        let quotes = (0..N).filter(|&t| e.tick(t).kind() == MessageKind::Quote).count();
        let fraction = quotes as f64 / N as f64;
        assert!((fraction - 0.70).abs() < 0.02, "quote fraction {fraction}");
        assert_eq!(e.stats().ticks, N);
        assert_eq!(e.stats().quotes + e.stats().trades, N);
    }

    #[test]
    fn trade_price_follows_aggressor_side() {
        let mut e = engine();
        for t in 0..5_000u64 {
            let msg = e.tick(t);
            if let Payload::Trade(tr) = msg.payload {
                let sym = e.symbol(msg.symbol_id).unwrap();
                let expected = if tr.aggressor_buy { sym.ask() } else { sym.bid() };
                assert_eq!(tr.price, expected);
            }
        }
    }

    #[test]
    fn sequences_increase_per_symbol() {
        let mut e = engine();
        let mut last = [0u64; MAX_SYMBOL_ID as usize + 1];
        for t in 0..10_000u64 {
            let msg = e.tick(t);
            assert_eq!(msg.sequence, last[msg.symbol_id as usize] + 1);
            assert_eq!(msg.timestamp_ns, t);
            last[msg.symbol_id as usize] = msg.sequence;
        }
    }

    #[test]
    fn same_seed_reproduces_stream() {
        let mut a = engine();
        let mut b = engine();
        for t in 0..1_000u64 {
            assert_eq!(a.tick(t), b.tick(t));
        }
    }
}
