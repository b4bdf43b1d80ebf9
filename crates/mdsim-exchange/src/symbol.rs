//! Per-symbol simulation state and the geometric Brownian motion step.

use mdsim_core::config::MarketConfig;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;

/// Lowest price a symbol may reach.
pub const MIN_PRICE: f64 = 0.01;

/// One actively simulated instrument.
///
/// Owned and mutated only by the tick loop. The private generator is seeded
/// with `seed ^ symbol_id`, so a run is reproducible for a given seed and
/// active set.
#[derive(Debug, Clone)]
pub struct SymbolData {
    symbol_id: u16,
    price: f64,
    bid: f64,
    ask: f64,
    mu: f64,
    sigma: f64,
    spread: f64,
    sequence: u64,
    rng: StdRng,
}

impl SymbolData {
    /// Draw the initial price, volatility and spread (in that order) from the
    /// symbol's own generator.
    pub fn new(symbol_id: u16, seed: u64, market: &MarketConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(seed ^ u64::from(symbol_id));
        let price = rng.random_range(market.price_min..=market.price_max);
        let sigma = rng.random_range(market.volatility_min..=market.volatility_max);
        let spread = rng.random_range(market.spread_min..=market.spread_max);

        let mut sym = Self {
            symbol_id,
            price,
            bid: 0.0,
            ask: 0.0,
            mu: market.drift,
            sigma,
            spread,
            sequence: 0,
            rng,
        };
        sym.update_quote_prices();
        sym
    }

    /// One GBM step: `price *= exp((mu - sigma²/2)·dt + sigma·√dt·Z)`,
    /// floored at [`MIN_PRICE`].
    pub fn evolve_price(&mut self, dt: f64) {
        let z: f64 = self.rng.sample(StandardNormal);
        let drift = (self.mu - 0.5 * self.sigma * self.sigma) * dt;
        let shock = self.sigma * dt.sqrt() * z;
        self.price *= (drift + shock).exp();

        // `!(>=)` also catches NaN.
        if !(self.price >= MIN_PRICE) {
            self.price = MIN_PRICE;
        }
    }

    /// Derive bid/ask around the current price. Falls back to a fixed
    /// ±0.1% band if rounding ever crosses the book.
    pub fn update_quote_prices(&mut self) {
        let half = self.spread / 2.0;
        self.bid = self.price * (1.0 - half);
        self.ask = self.price * (1.0 + half);
        if self.bid >= self.ask {
            self.bid = self.price * 0.999;
            self.ask = self.price * 1.001;
        }
    }

    /// Pre-increment and return the sequence number for the next message.
    #[inline]
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    #[inline]
    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    #[inline]
    pub fn symbol_id(&self) -> u16 {
        self.symbol_id
    }

    #[inline]
    pub fn price(&self) -> f64 {
        self.price
    }

    #[inline]
    pub fn bid(&self) -> f64 {
        self.bid
    }

    #[inline]
    pub fn ask(&self) -> f64 {
        self.ask
    }

    #[inline]
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    #[inline]
    pub fn spread(&self) -> f64 {
        self.spread
    }

    /// Last sequence number handed out (0 before the first message).
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_draws_fall_in_configured_ranges() {
        let market = MarketConfig::default();
        for id in 1..=50u16 {
            let sym = SymbolData::new(id, 12345, &market);
            assert!((market.price_min..=market.price_max).contains(&sym.price()));
            assert!((market.volatility_min..=market.volatility_max).contains(&sym.sigma()));
            assert!((market.spread_min..=market.spread_max).contains(&sym.spread()));
            assert!(sym.bid() < sym.price() && sym.price() < sym.ask());
            assert_eq!(sym.sequence(), 0);
        }
    }

    #[test]
    fn same_seed_same_symbol_is_reproducible() {
        let market = MarketConfig::default();
        let mut a = SymbolData::new(42, 7, &market);
        let mut b = SymbolData::new(42, 7, &market);
        for _ in 0..100 {
            a.evolve_price(0.001);
            b.evolve_price(0.001);
        }
        assert_eq!(a.price(), b.price());

        let c = SymbolData::new(43, 7, &market);
        assert_ne!(SymbolData::new(42, 7, &market).price(), c.price());
    }

    #[test]
    fn price_is_floored() {
        let market = MarketConfig {
            volatility_min: 4.0,
            volatility_max: 5.0,
            drift: -0.05,
            ..MarketConfig::default()
        };
        let mut sym = SymbolData::new(1, 1, &market);
        for _ in 0..2_000 {
            sym.evolve_price(1.0);
            sym.update_quote_prices();
            assert!(sym.price() >= MIN_PRICE);
            assert!(sym.bid() < sym.ask());
        }
    }

    #[test]
    fn crossed_book_falls_back_to_fixed_band() {
        let mut sym = SymbolData::new(1, 1, &MarketConfig::default());
        // Negative spread crosses the book.
        sym.spread = -0.5;
        sym.update_quote_prices();
        assert_eq!(sym.bid(), sym.price() * 0.999);
        assert_eq!(sym.ask(), sym.price() * 1.001);
    }

    #[test]
    fn sequence_pre_increments() {
        let mut sym = SymbolData::new(5, 1, &MarketConfig::default());
        assert_eq!(sym.next_sequence(), 1);
        assert_eq!(sym.next_sequence(), 2);
        assert_eq!(sym.sequence(), 2);
    }
}
