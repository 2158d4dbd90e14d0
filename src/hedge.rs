//! Keeps the hedge leg offsetting the primary leg.
//!
//! Three mechanisms act on the hedge position: an immediate hedge for every
//! primary fill, a delayed one-shot correction when the two legs drift apart for
//! too long, and a fixed-size trim whenever the hedge leg itself is over the
//! trade limit. Hedge position is updated when the order is sent, not when it
//! fills, and is not unwound if the exchange later rejects the hedge.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::trade::execution::gateway::{ExecutionGateway, OrderId, OrderRouter, Price, Side, Volume};
use crate::{LOT_SIZE, TRADE_LIMIT};

pub const DRIFT_THRESHOLD_LOTS: i64 = 10;
pub const DRIFT_ESCALATION_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub primary: i64,
    pub hedge: i64,
}

impl Inventory {
    /// Gap between the two legs' magnitudes, i.e. unhedged lots.
    pub fn drift(&self) -> i64 {
        (self.primary.abs() - self.hedge.abs()).abs()
    }
}

#[derive(Debug, Clone, Copy)]
struct HedgeOrder {
    side: Side,
    volume: Volume,
    filled: Volume,
}

#[derive(Debug, Default)]
pub struct HedgeReconciler {
    inventory: Inventory,
    drift_since: Option<Instant>,
    hedges: HashMap<OrderId, HedgeOrder>,
}

impl HedgeReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inventory(&self) -> Inventory {
        self.inventory
    }

    pub fn drift_since(&self) -> Option<Instant> {
        self.drift_since
    }

    pub fn outstanding_hedges(&self) -> usize {
        self.hedges.len()
    }

    /// Books a primary fill and immediately offsets it in the hedge leg.
    pub fn on_primary_fill<G: ExecutionGateway>(
        &mut self,
        side: Side,
        volume: Volume,
        hedge_ratio: f64,
        router: &mut OrderRouter<G>,
    ) {
        self.inventory.primary += side.sign() * volume as i64;
        let hedge_volume = per_fill_hedge_volume(volume, hedge_ratio);
        log::debug!(
            "[HEDGE] primary {} {} lots (ratio={:.4}) -> hedge {} {}",
            side,
            volume,
            hedge_ratio,
            side.opposite(),
            hedge_volume
        );
        self.send_hedge(side.opposite(), hedge_volume, "fill", router);
    }

    pub fn on_tick<G: ExecutionGateway>(&mut self, now: Instant, router: &mut OrderRouter<G>) {
        self.check_drift(now, router);
        self.trim_hedge_excess(router);
    }

    pub fn on_hedge_filled(&mut self, order_id: OrderId, price: Price, volume: Volume) {
        match self.hedges.get_mut(&order_id) {
            Some(order) => {
                order.filled = order.filled.saturating_add(volume);
                log::info!(
                    "[HEDGE] filled id={} {} {}@{} ({}/{})",
                    order_id,
                    order.side,
                    volume,
                    price,
                    order.filled,
                    order.volume
                );
                if order.filled >= order.volume {
                    self.hedges.remove(&order_id);
                }
            }
            None => log::warn!(
                "[HEDGE] fill for unknown hedge id={} {}@{}",
                order_id,
                volume,
                price
            ),
        }
    }

    /// Returns true if `order_id` was one of our hedges.
    pub fn on_hedge_error(&mut self, order_id: OrderId, message: &str) -> bool {
        match self.hedges.remove(&order_id) {
            Some(order) => {
                log::warn!(
                    "[HEDGE] hedge id={} {} {} rejected: {}; hedge position {} is not reversed",
                    order_id,
                    order.side,
                    order.volume - order.filled,
                    message,
                    self.inventory.hedge
                );
                true
            }
            None => false,
        }
    }

    fn check_drift<G: ExecutionGateway>(&mut self, now: Instant, router: &mut OrderRouter<G>) {
        let drift = self.inventory.drift();
        if drift <= DRIFT_THRESHOLD_LOTS {
            if self.drift_since.take().is_some() {
                log::info!("[DRIFT] back within threshold (drift={})", drift);
            }
            return;
        }

        let since = *self.drift_since.get_or_insert(now);
        let unhedged_for = now.saturating_duration_since(since);
        log::debug!(
            "[DRIFT] {} unhedged lots for {:.1}s (primary={} hedge={})",
            drift,
            unhedged_for.as_secs_f64(),
            self.inventory.primary,
            self.inventory.hedge
        );
        if unhedged_for <= DRIFT_ESCALATION_DELAY {
            return;
        }

        match drift_correction(self.inventory) {
            Some((side, volume)) => {
                log::warn!(
                    "[DRIFT] {} lots unhedged for {}s; correcting with {} {}",
                    drift,
                    unhedged_for.as_secs(),
                    side,
                    volume
                );
                // a send that never left the process keeps the timer armed
                if self.send_hedge(side, volume, "drift", router) {
                    self.drift_since = None;
                }
            }
            None => self.drift_since = None,
        }
    }

    fn trim_hedge_excess<G: ExecutionGateway>(&mut self, router: &mut OrderRouter<G>) {
        if self.inventory.hedge > TRADE_LIMIT {
            self.send_hedge(Side::Sell, LOT_SIZE, "limit", router);
        } else if self.inventory.hedge < -TRADE_LIMIT {
            self.send_hedge(Side::Buy, LOT_SIZE, "limit", router);
        }
    }

    fn send_hedge<G: ExecutionGateway>(
        &mut self,
        side: Side,
        volume: Volume,
        reason: &str,
        router: &mut OrderRouter<G>,
    ) -> bool {
        match router.send_hedge_order(side, volume) {
            Ok(order_id) => {
                self.inventory.hedge += side.sign() * volume as i64;
                self.hedges.insert(
                    order_id,
                    HedgeOrder {
                        side,
                        volume,
                        filled: 0,
                    },
                );
                log::info!(
                    "[HEDGE] {} hedge id={} {} {} (primary={} hedge={})",
                    reason,
                    order_id,
                    side,
                    volume,
                    self.inventory.primary,
                    self.inventory.hedge
                );
                true
            }
            Err(err) => {
                log::error!(
                    "[HEDGE] failed to send {} hedge {} {}: {}",
                    reason,
                    side,
                    volume,
                    err
                );
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_inventory(&mut self, primary: i64, hedge: i64) {
        self.inventory = Inventory { primary, hedge };
    }
}

/// Hedge lots for a primary fill: volume scaled by |ratio|, at least one lot.
pub fn per_fill_hedge_volume(volume: Volume, hedge_ratio: f64) -> Volume {
    let scaled = (volume as f64 * hedge_ratio.abs()).round();
    if scaled.is_finite() && scaled >= 1.0 {
        scaled.min(Volume::MAX as f64) as Volume
    } else {
        1
    }
}

/// Order that moves the hedge leg to exactly `-primary`.
///
/// Same-signed legs close |P|+|H|; opposite legs close the magnitude gap in
/// whichever direction shrinks it. A flat primary gets no correction; only the
/// trade-limit trim acts on a lone hedge leg.
pub fn drift_correction(inventory: Inventory) -> Option<(Side, Volume)> {
    if inventory.primary == 0 {
        return None;
    }
    let delta = -(inventory.primary + inventory.hedge);
    if delta == 0 {
        return None;
    }
    let side = if delta > 0 { Side::Buy } else { Side::Sell };
    let volume = Volume::try_from(delta.unsigned_abs()).unwrap_or(Volume::MAX);
    Some((side, volume))
}
