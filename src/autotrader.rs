//! Per-event orchestration.
//!
//! Every inbound message is an [`Event`] handled to completion before the next
//! one. A market snapshot is the tick: it refreshes the rolling store, updates
//! the signal, lets the hedge reconciler act on drift, and finally lets the
//! order tracker sweep, unwind or trade on the signal.

use std::collections::HashMap;
use std::time::Instant;

use crate::hedge::{HedgeReconciler, Inventory};
use crate::market::{BookSnapshot, Instrument, RollingStore};
use crate::orders::OrderTracker;
use crate::signal::SignalEngine;
use crate::trade::execution::gateway::{ExecutionGateway, OrderId, OrderRouter, Price, Volume};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MarketSnapshot(BookSnapshot),
    TradeTicks(BookSnapshot),
    OrderFilled {
        order_id: OrderId,
        price: Price,
        volume: Volume,
    },
    HedgeFilled {
        order_id: OrderId,
        price: Price,
        volume: Volume,
    },
    OrderStatus {
        order_id: OrderId,
        fill_volume: Volume,
        remaining_volume: Volume,
        fees: i64,
    },
    /// `order_id == 0` means the error is not about a specific order.
    Error { order_id: OrderId, message: String },
}

pub struct AutoTrader<G> {
    router: OrderRouter<G>,
    store: RollingStore,
    signal: SignalEngine,
    hedger: HedgeReconciler,
    orders: OrderTracker,
    last_sequence: HashMap<Instrument, u64>,
    ticks: u64,
}

impl<G: ExecutionGateway> AutoTrader<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            router: OrderRouter::new(gateway),
            store: RollingStore::new(),
            signal: SignalEngine::new(),
            hedger: HedgeReconciler::new(),
            orders: OrderTracker::new(),
            last_sequence: HashMap::new(),
            ticks: 0,
        }
    }

    pub fn handle_event(&mut self, event: Event, now: Instant) {
        self.router.set_clock(now);
        match event {
            Event::MarketSnapshot(snapshot) => self.on_market_snapshot_at(&snapshot, now),
            Event::TradeTicks(snapshot) => self.on_trade_ticks(&snapshot),
            Event::OrderFilled {
                order_id,
                price,
                volume,
            } => self.on_order_filled(order_id, price, volume),
            Event::HedgeFilled {
                order_id,
                price,
                volume,
            } => self.on_hedge_filled(order_id, price, volume),
            Event::OrderStatus {
                order_id,
                fill_volume,
                remaining_volume,
                fees,
            } => self.on_order_status(order_id, fill_volume, remaining_volume, fees),
            Event::Error { order_id, message } => self.on_error(order_id, &message),
        }
    }

    pub fn on_market_snapshot(&mut self, snapshot: &BookSnapshot) {
        self.on_market_snapshot_at(snapshot, Instant::now());
    }

    pub fn on_market_snapshot_at(&mut self, snapshot: &BookSnapshot, now: Instant) {
        self.router.set_clock(now);
        if !self.accept_sequence(snapshot) {
            return;
        }
        self.store
            .update_quote(snapshot.instrument, snapshot.best_ask(), snapshot.best_bid());

        let signal = match self.store.sample() {
            Some(_) => self.signal.update(&self.store),
            None => None,
        };

        self.hedger.on_tick(now, &mut self.router);

        let inventory = self.hedger.inventory();
        self.orders.on_tick(
            inventory.primary,
            self.store.quote(Instrument::Primary),
            signal,
            &mut self.router,
        );

        self.ticks += 1;
        log::debug!(
            "[TICK] #{} {:?} seq={} primary={} hedge={} drift={} pending={}",
            self.ticks,
            snapshot.instrument,
            snapshot.sequence,
            inventory.primary,
            inventory.hedge,
            inventory.drift(),
            self.orders.pending().len()
        );
    }

    pub fn on_trade_ticks(&mut self, snapshot: &BookSnapshot) {
        log::debug!(
            "[TICK] trade ticks for {:?} seq={}",
            snapshot.instrument,
            snapshot.sequence
        );
    }

    pub fn on_order_filled(&mut self, order_id: OrderId, price: Price, volume: Volume) {
        if self.orders.order(order_id).is_none() {
            log::warn!(
                "[ORDER] fill for unknown id={} {}@{}",
                order_id,
                volume,
                price
            );
            return;
        }
        if let Some((side, booked)) = self.orders.on_fill(order_id, price, volume) {
            let hedge_ratio = self.signal.hedge_ratio();
            self.hedger
                .on_primary_fill(side, booked, hedge_ratio, &mut self.router);
        }
    }

    pub fn on_hedge_filled(&mut self, order_id: OrderId, price: Price, volume: Volume) {
        self.hedger.on_hedge_filled(order_id, price, volume);
    }

    pub fn on_order_status(
        &mut self,
        order_id: OrderId,
        fill_volume: Volume,
        remaining_volume: Volume,
        fees: i64,
    ) {
        self.orders
            .on_status(order_id, fill_volume, remaining_volume, fees);
    }

    pub fn on_error(&mut self, order_id: OrderId, message: &str) {
        log::warn!("[ORDER] error with order {}: {}", order_id, message);
        if order_id == 0 {
            return;
        }
        if !self.orders.on_error(order_id, message) && !self.hedger.on_hedge_error(order_id, message)
        {
            log::debug!("[ORDER] error for id={} matches nothing tracked", order_id);
        }
    }

    pub fn inventory(&self) -> Inventory {
        self.hedger.inventory()
    }

    pub fn pending_orders(&self) -> &[OrderId] {
        self.orders.pending()
    }

    pub fn orders(&self) -> &OrderTracker {
        &self.orders
    }

    pub fn hedge_ratio(&self) -> f64 {
        self.signal.hedge_ratio()
    }

    pub fn last_score(&self) -> Option<f64> {
        self.signal.last_score()
    }

    pub fn drift_timer_active(&self) -> bool {
        self.hedger.drift_since().is_some()
    }

    pub fn outstanding_hedges(&self) -> usize {
        self.hedger.outstanding_hedges()
    }

    pub fn store(&self) -> &RollingStore {
        &self.store
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn gateway(&self) -> &G {
        self.router.gateway()
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        self.router.gateway_mut()
    }

    fn accept_sequence(&mut self, snapshot: &BookSnapshot) -> bool {
        match self.last_sequence.get(&snapshot.instrument) {
            Some(&last) if snapshot.sequence <= last => {
                log::debug!(
                    "[TICK] dropping stale {:?} snapshot seq={} (last={})",
                    snapshot.instrument,
                    snapshot.sequence,
                    last
                );
                return false;
            }
            Some(&last) if snapshot.sequence > last + 1 => {
                log::warn!(
                    "[TICK] {:?} sequence gap: {} -> {}",
                    snapshot.instrument,
                    last,
                    snapshot.sequence
                );
            }
            _ => {}
        }
        self.last_sequence
            .insert(snapshot.instrument, snapshot.sequence);
        true
    }
}
