//! Top-of-book state and the rolling price/ratio windows derived from it.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::trade::execution::gateway::{Price, Volume};

pub const PRICE_WINDOW_CAPACITY: usize = 50;
pub const BOOK_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    /// The instrument we quote and trade.
    Primary,
    /// The instrument used to offset primary fills.
    Hedge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub best_ask: Price,
    pub best_bid: Price,
}

impl Quote {
    /// Mid-price in currency units (prices arrive in cents).
    pub fn mid(&self) -> f64 {
        let cents = Decimal::from(self.best_ask + self.best_bid) / Decimal::TWO;
        (cents / Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub instrument: Instrument,
    pub sequence: u64,
    pub ask_prices: [Price; BOOK_DEPTH],
    pub ask_volumes: [Volume; BOOK_DEPTH],
    pub bid_prices: [Price; BOOK_DEPTH],
    pub bid_volumes: [Volume; BOOK_DEPTH],
}

impl BookSnapshot {
    pub fn top(instrument: Instrument, sequence: u64, best_ask: Price, best_bid: Price) -> Self {
        let mut ask_prices = [0; BOOK_DEPTH];
        let mut bid_prices = [0; BOOK_DEPTH];
        ask_prices[0] = best_ask;
        bid_prices[0] = best_bid;
        Self {
            instrument,
            sequence,
            ask_prices,
            ask_volumes: [0; BOOK_DEPTH],
            bid_prices,
            bid_volumes: [0; BOOK_DEPTH],
        }
    }

    pub fn best_ask(&self) -> Price {
        self.ask_prices[0]
    }

    pub fn best_bid(&self) -> Price {
        self.bid_prices[0]
    }
}

/// Fixed-capacity FIFO of samples; the oldest value falls off when full.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Appends `value`, returning the evicted sample if the window was full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        self.values.push_back(value);
        if self.values.len() > self.capacity {
            self.values.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn values(&self) -> &VecDeque<f64> {
        &self.values
    }
}

#[derive(Debug)]
pub struct RollingStore {
    primary_quote: Quote,
    hedge_quote: Quote,
    primary_mids: RollingWindow,
    hedge_mids: RollingWindow,
    ratios: RollingWindow,
    samples: u64,
}

impl Default for RollingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingStore {
    pub fn new() -> Self {
        Self {
            primary_quote: Quote::default(),
            hedge_quote: Quote::default(),
            primary_mids: RollingWindow::new(PRICE_WINDOW_CAPACITY),
            hedge_mids: RollingWindow::new(PRICE_WINDOW_CAPACITY),
            ratios: RollingWindow::new(PRICE_WINDOW_CAPACITY),
            samples: 0,
        }
    }

    pub fn update_quote(&mut self, instrument: Instrument, best_ask: Price, best_bid: Price) {
        let quote = match instrument {
            Instrument::Primary => &mut self.primary_quote,
            Instrument::Hedge => &mut self.hedge_quote,
        };
        quote.best_ask = best_ask;
        quote.best_bid = best_bid;
    }

    pub fn quote(&self, instrument: Instrument) -> Quote {
        match instrument {
            Instrument::Primary => self.primary_quote,
            Instrument::Hedge => self.hedge_quote,
        }
    }

    /// Both books have shown an ask at least once.
    pub fn ready(&self) -> bool {
        self.primary_quote.best_ask != 0 && self.hedge_quote.best_ask != 0
    }

    /// Records one mid per instrument and their ratio. Returns the new ratio,
    /// or `None` when the books are not ready or either mid is zero.
    pub fn sample(&mut self) -> Option<f64> {
        if !self.ready() {
            return None;
        }
        let primary_mid = self.primary_quote.mid();
        let hedge_mid = self.hedge_quote.mid();
        if primary_mid == 0.0 || hedge_mid == 0.0 {
            log::debug!(
                "[SIGNAL] skipping sample: primary_mid={} hedge_mid={}",
                primary_mid,
                hedge_mid
            );
            return None;
        }
        let ratio = primary_mid / hedge_mid;
        self.primary_mids.push(primary_mid);
        self.hedge_mids.push(hedge_mid);
        self.ratios.push(ratio);
        self.samples += 1;
        Some(ratio)
    }

    pub fn primary_mids(&self) -> &RollingWindow {
        &self.primary_mids
    }

    pub fn hedge_mids(&self) -> &RollingWindow {
        &self.hedge_mids
    }

    pub fn ratios(&self) -> &RollingWindow {
        &self.ratios
    }

    /// Samples taken since start, not capped by the window size.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_is_scaled_to_currency_units() {
        let quote = Quote {
            best_ask: 10_100,
            best_bid: 9_900,
        };
        assert_eq!(quote.mid(), 100.0);
        let odd = Quote {
            best_ask: 10_100,
            best_bid: 10_000,
        };
        assert_eq!(odd.mid(), 100.5);
    }

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let mut window = RollingWindow::new(3);
        assert_eq!(window.push(1.0), None);
        assert_eq!(window.push(2.0), None);
        assert_eq!(window.push(3.0), None);
        assert!(window.is_full());
        assert_eq!(window.push(4.0), Some(1.0));
        assert_eq!(window.len(), 3);
        assert_eq!(window.values().iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn sample_waits_for_both_asks() {
        let mut store = RollingStore::new();
        store.update_quote(Instrument::Primary, 10_100, 9_900);
        assert_eq!(store.sample(), None);
        store.update_quote(Instrument::Hedge, 5_100, 4_900);
        assert_eq!(store.sample(), Some(2.0));
        assert_eq!(store.samples(), 1);
        assert_eq!(store.primary_mids().last(), Some(100.0));
        assert_eq!(store.hedge_mids().last(), Some(50.0));
    }

    #[test]
    fn zero_hedge_mid_contributes_no_sample() {
        let mut store = RollingStore::new();
        store.update_quote(Instrument::Primary, 10_100, 9_900);
        // crossed-through-zero book: ask present but mid collapses to zero
        store.update_quote(Instrument::Hedge, 100, -100);
        assert_eq!(store.sample(), None);
        assert!(store.ratios().is_empty());
        assert!(store.primary_mids().is_empty());
        assert_eq!(store.samples(), 0);
    }

    #[test]
    fn windows_never_exceed_capacity() {
        let mut store = RollingStore::new();
        for i in 0..(PRICE_WINDOW_CAPACITY as i64 * 3) {
            store.update_quote(Instrument::Primary, 10_000 + i * 100, 9_900 + i * 100);
            store.update_quote(Instrument::Hedge, 5_000, 4_900);
            store.sample();
            assert!(store.primary_mids().len() <= PRICE_WINDOW_CAPACITY);
            assert!(store.hedge_mids().len() <= PRICE_WINDOW_CAPACITY);
            assert!(store.ratios().len() <= PRICE_WINDOW_CAPACITY);
        }
        assert_eq!(store.samples(), PRICE_WINDOW_CAPACITY as u64 * 3);
        assert!(store.ratios().is_full());
    }

    #[test]
    fn snapshot_top_of_book_accessors() {
        let snap = BookSnapshot::top(Instrument::Hedge, 7, 5_100, 4_900);
        assert_eq!(snap.best_ask(), 5_100);
        assert_eq!(snap.best_bid(), 4_900);
        assert_eq!(snap.sequence, 7);
    }
}
