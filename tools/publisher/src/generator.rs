//! Quote generator
//!
//! Produces plausible bid/ask updates for a fixed universe of tickers.
//! Each symbol carries a last price that random-walks by up to five cents
//! per update and is held inside `[MIN_PRICE, MAX_PRICE]` so adjustments
//! stay proportionally small.
//!
//! Seeded with `ChaCha8Rng`: the same seed always yields the same stream.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use grid_types::value::Value;

/// Ticker universe.
pub const SYMBOLS: [&str; 49] = [
    "MMM", "ABBV", "ALV", "GOOGL", "AMZN", "AMGN", "ABI", "APPL", "BHP", "BA", "BP",
    "BATS", "CVX", "CSCO", "C", "KO", "DD", "XOM", "FB", "GE", "GSK", "HSBA", "INTC",
    "IBM", "JNJ", "JPM", "MA", "MCD", "MRK", "MSFT", "NESN", "NOVN", "NVDA", "ORCL",
    "PEP", "PFE", "PM", "PG", "ROG", "RY", "RDSA", "SMSN", "SAN", "SIE", "TSM", "TOT",
    "V", "WMT", "DIS",
];

pub const MIN_PRICE: i64 = 100;
pub const MAX_PRICE: i64 = 1200;

/// Largest per-update move, in cents.
const MAX_BUMP_CENTS: i64 = 5;

/// One published market data update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    /// Message fields as published on the bus.
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("symbol", Value::from(self.symbol.as_str())),
            ("bid", Value::from(self.bid)),
            ("ask", Value::from(self.ask)),
        ]
    }
}

/// Round half away from zero to cents.
fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Random-walk quote source.
pub struct QuoteGenerator {
    /// Last price per symbol, indexed like `SYMBOLS`.
    pricing: Vec<Decimal>,
    rng: ChaCha8Rng,
    generated: u64,
}

impl QuoteGenerator {
    /// Create a generator with uniformly drawn integer starting prices.
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let pricing = SYMBOLS
            .iter()
            .map(|_| Decimal::from(rng.gen_range(MIN_PRICE..=MAX_PRICE)))
            .collect();
        Self {
            pricing,
            rng,
            generated: 0,
        }
    }

    /// Produce the next update for a uniformly chosen symbol.
    ///
    /// Bid and ask straddle the last price by half a unit; the last price
    /// is then clamped into range and nudged for the next update.
    pub fn next_quote(&mut self) -> Quote {
        let idx = self.rng.gen_range(0..SYMBOLS.len());
        let last = self.pricing[idx];
        let half = Decimal::new(5, 1);
        let bid = round_cents(last - half);
        let ask = round_cents(last + half);

        let clamped = last
            .max(Decimal::from(MIN_PRICE))
            .min(Decimal::from(MAX_PRICE));
        let bump = Decimal::new(self.rng.gen_range(-MAX_BUMP_CENTS..=MAX_BUMP_CENTS), 2);
        self.pricing[idx] = round_cents(clamped + bump);
        self.generated += 1;

        Quote {
            symbol: SYMBOLS[idx].to_string(),
            bid,
            ask,
        }
    }

    /// Current last price for a symbol.
    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        SYMBOLS
            .iter()
            .position(|s| *s == symbol)
            .map(|idx| self.pricing[idx])
    }

    /// Quotes produced so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }
}
