//! Primary-instrument order bookkeeping and the rules that place or pull orders.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::market::Quote;
use crate::signal::Signal;
use crate::trade::execution::gateway::{
    ExecutionGateway, Lifespan, OrderId, OrderRouter, Price, Side, Volume,
};
use crate::{LOT_SIZE, POSITION_LIMIT, TRADE_LIMIT};

pub const MAX_PENDING_ORDERS: usize = 5;
pub const MAX_EXCURSION_ORDERS: u32 = 3;
/// Cancelled orders kept around so a fill racing the cancel still books.
pub const MAX_RETIRED_ORDERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderState {
    Working,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub price: Price,
    pub volume: Volume,
    pub filled: Volume,
    pub state: OrderState,
    pub cancel_requested: bool,
}

impl Order {
    pub fn remaining(&self) -> Volume {
        self.volume.saturating_sub(self.filled)
    }
}

/// Tracks every primary order sent this session.
///
/// `bids`/`asks` hold orders that may still trade. `pending` is the subset
/// that has not been swept by housekeeping; it is what the pending-order cap
/// counts. An order leaves all three the moment it is known to be done.
/// Fully filled orders are dropped from `orders`; cancelled ones are kept for
/// the last `MAX_RETIRED_ORDERS` cancels.
#[derive(Debug)]
pub struct OrderTracker {
    orders: HashMap<OrderId, Order>,
    bids: HashSet<OrderId>,
    asks: HashSet<OrderId>,
    pending: Vec<OrderId>,
    failed_cancels: Vec<OrderId>,
    retired: VecDeque<OrderId>,
    bid_id: Option<OrderId>,
    ask_id: Option<OrderId>,
    excursion_orders: u32,
    was_within_limits: bool,
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderTracker {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            bids: HashSet::new(),
            asks: HashSet::new(),
            pending: Vec::new(),
            failed_cancels: Vec::new(),
            retired: VecDeque::new(),
            bid_id: None,
            ask_id: None,
            excursion_orders: 0,
            was_within_limits: true,
        }
    }

    pub fn pending(&self) -> &[OrderId] {
        &self.pending
    }

    pub fn is_tracked(&self, order_id: OrderId) -> bool {
        self.bids.contains(&order_id) || self.asks.contains(&order_id)
    }

    pub fn order(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn bid_id(&self) -> Option<OrderId> {
        self.bid_id
    }

    pub fn ask_id(&self) -> Option<OrderId> {
        self.ask_id
    }

    pub fn excursion_orders(&self) -> u32 {
        self.excursion_orders
    }

    /// Per-tick pass: sweep if needed, then act on the signal if there is one.
    pub fn on_tick<G: ExecutionGateway>(
        &mut self,
        position: i64,
        quote: Quote,
        signal: Option<Signal>,
        router: &mut OrderRouter<G>,
    ) {
        self.housekeeping(position, router);

        let signal = match signal {
            Some(signal) => signal,
            None => return,
        };
        self.enforce_trade_limit(position, quote, router);

        match signal.direction() {
            Some(Side::Sell) if position > -TRADE_LIMIT => {
                if self.submit(Side::Sell, quote.best_ask, position, router) {
                    log::info!(
                        "[SIGNAL] sell {} primary (score={:.3} slope={:.3})",
                        LOT_SIZE,
                        signal.score,
                        signal.slope
                    );
                }
            }
            Some(Side::Buy) if position < TRADE_LIMIT => {
                if self.submit(Side::Buy, quote.best_bid, position, router) {
                    log::info!(
                        "[SIGNAL] buy {} primary (score={:.3} slope={:.3})",
                        LOT_SIZE,
                        signal.score,
                        signal.slope
                    );
                }
            }
            _ => {}
        }
    }

    /// Applies a fill. Returns the side and the volume actually booked, or
    /// `None` for unknown orders and fills beyond the order's size.
    pub fn on_fill(&mut self, order_id: OrderId, price: Price, volume: Volume) -> Option<(Side, Volume)> {
        let order = self.orders.get_mut(&order_id)?;
        let accepted = volume.min(order.remaining());
        if accepted == 0 {
            log::warn!(
                "[ORDER] ignoring fill id={} {}@{}: order already fully filled",
                order_id,
                volume,
                price
            );
            return None;
        }
        if accepted < volume {
            log::warn!(
                "[ORDER] fill id={} of {} exceeds remaining {}; booking {}",
                order_id,
                volume,
                order.remaining(),
                accepted
            );
        }
        order.filled += accepted;
        if order.state.is_terminal() {
            log::warn!(
                "[ORDER] late fill id={} {} after {:?}",
                order_id,
                accepted,
                order.state
            );
        } else if order.filled >= order.volume {
            order.state = OrderState::Filled;
        } else {
            order.state = OrderState::PartiallyFilled;
        }
        let side = order.side;
        let done = order.filled >= order.volume;
        log::info!(
            "[ORDER] filled id={} {} {}@{} ({}/{})",
            order_id,
            side,
            accepted,
            price,
            order.filled,
            order.volume
        );
        if done {
            self.untrack(order_id);
            self.orders.remove(&order_id);
        }
        Some((side, accepted))
    }

    /// `remaining_volume == 0` is terminal (filled or cancelled).
    pub fn on_status(&mut self, order_id: OrderId, fill_volume: Volume, remaining_volume: Volume, fees: i64) {
        let order = match self.orders.get_mut(&order_id) {
            Some(order) => order,
            None => {
                log::debug!("[ORDER] status for unknown id={}", order_id);
                return;
            }
        };
        log::debug!(
            "[ORDER] status id={} filled={} remaining={} fees={}",
            order_id,
            fill_volume,
            remaining_volume,
            fees
        );
        if remaining_volume == 0 {
            if !order.state.is_terminal() {
                order.state = if order.filled >= order.volume || fill_volume >= order.volume {
                    OrderState::Filled
                } else {
                    OrderState::Cancelled
                };
            }
            let fully_booked = order.filled >= order.volume;
            self.untrack(order_id);
            if fully_booked {
                self.orders.remove(&order_id);
            } else {
                self.retire(order_id);
            }
        } else if fill_volume > 0 && !order.state.is_terminal() {
            order.state = OrderState::PartiallyFilled;
        }
    }

    /// Exchange error for `order_id`; a tracked order is treated as done with
    /// nothing left. Returns whether the id was ours.
    pub fn on_error(&mut self, order_id: OrderId, message: &str) -> bool {
        if order_id == 0 || !self.is_tracked(order_id) {
            return false;
        }
        log::warn!("[ORDER] id={} rejected: {}", order_id, message);
        self.on_status(order_id, 0, 0, 0);
        true
    }

    fn housekeeping<G: ExecutionGateway>(&mut self, position: i64, router: &mut OrderRouter<G>) {
        self.retry_failed_cancels(router);

        let within = (-TRADE_LIMIT..=TRADE_LIMIT).contains(&position);
        let left_limits = self.was_within_limits && !within;
        self.was_within_limits = within;
        if within {
            self.excursion_orders = 0;
        }
        if self.pending.len() > MAX_PENDING_ORDERS || left_limits {
            log::info!(
                "[ORDER] cancelling {} pending orders (position={})",
                self.pending.len(),
                position
            );
            self.cancel_all_pending(router);
            self.excursion_orders = 0;
        }
    }

    fn enforce_trade_limit<G: ExecutionGateway>(&mut self, position: i64, quote: Quote, router: &mut OrderRouter<G>) {
        if self.excursion_orders >= MAX_EXCURSION_ORDERS {
            return;
        }
        let placed = if position > TRADE_LIMIT {
            self.submit(Side::Sell, quote.best_ask, position, router)
        } else if position < -TRADE_LIMIT {
            self.submit(Side::Buy, quote.best_bid, position, router)
        } else {
            false
        };
        if placed {
            self.excursion_orders += 1;
            log::info!(
                "[ORDER] position {} beyond trade limit; unwind order {}/{}",
                position,
                self.excursion_orders,
                MAX_EXCURSION_ORDERS
            );
        }
    }

    fn cancel_all_pending<G: ExecutionGateway>(&mut self, router: &mut OrderRouter<G>) {
        let ids = std::mem::take(&mut self.pending);
        self.send_cancels(ids, router);
    }

    fn retry_failed_cancels<G: ExecutionGateway>(&mut self, router: &mut OrderRouter<G>) {
        if self.failed_cancels.is_empty() {
            return;
        }
        let ids: Vec<OrderId> = std::mem::take(&mut self.failed_cancels)
            .into_iter()
            .filter(|id| self.is_tracked(*id))
            .collect();
        if !ids.is_empty() {
            log::info!("[ORDER] retrying {} failed cancels", ids.len());
        }
        self.send_cancels(ids, router);
    }

    /// An id whose cancel could not be sent stays pending and is retried on
    /// the next tick.
    fn send_cancels<G: ExecutionGateway>(&mut self, ids: Vec<OrderId>, router: &mut OrderRouter<G>) {
        for order_id in ids {
            match router.cancel_order(order_id) {
                Ok(()) => {
                    self.pending.retain(|id| *id != order_id);
                    if let Some(order) = self.orders.get_mut(&order_id) {
                        order.cancel_requested = true;
                    }
                }
                Err(err) => {
                    log::error!("[ORDER] failed to cancel id={}: {}", order_id, err);
                    if !self.pending.contains(&order_id) {
                        self.pending.push(order_id);
                    }
                    if !self.failed_cancels.contains(&order_id) {
                        self.failed_cancels.push(order_id);
                    }
                }
            }
        }
    }

    fn retire(&mut self, order_id: OrderId) {
        if self.retired.contains(&order_id) {
            return;
        }
        self.retired.push_back(order_id);
        while self.retired.len() > MAX_RETIRED_ORDERS {
            if let Some(oldest) = self.retired.pop_front() {
                self.orders.remove(&oldest);
            }
        }
    }

    fn submit<G: ExecutionGateway>(
        &mut self,
        side: Side,
        price: Price,
        position: i64,
        router: &mut OrderRouter<G>,
    ) -> bool {
        if price <= 0 {
            log::debug!("[ORDER] no {} price on the book; skipping", side);
            return false;
        }
        let worst_case = position + side.sign() * (self.working_volume(side) + LOT_SIZE as i64);
        if worst_case.abs() > POSITION_LIMIT {
            log::debug!(
                "[ORDER] {} would risk position {} beyond limit {}; skipping",
                side,
                worst_case,
                POSITION_LIMIT
            );
            return false;
        }
        match router.insert_order(side, price, LOT_SIZE, Lifespan::GoodForDay) {
            Ok(order_id) => {
                self.orders.insert(
                    order_id,
                    Order {
                        id: order_id,
                        side,
                        price,
                        volume: LOT_SIZE,
                        filled: 0,
                        state: OrderState::Working,
                        cancel_requested: false,
                    },
                );
                match side {
                    Side::Buy => {
                        self.bids.insert(order_id);
                        self.bid_id = Some(order_id);
                    }
                    Side::Sell => {
                        self.asks.insert(order_id);
                        self.ask_id = Some(order_id);
                    }
                }
                self.pending.push(order_id);
                true
            }
            Err(err) => {
                log::warn!("[ORDER] failed to insert {} {}@{}: {}", side, LOT_SIZE, price, err);
                false
            }
        }
    }

    fn working_volume(&self, side: Side) -> i64 {
        let ids = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        ids.iter()
            .filter_map(|id| self.orders.get(id))
            .map(|order| order.remaining() as i64)
            .sum()
    }

    fn untrack(&mut self, order_id: OrderId) {
        self.bids.remove(&order_id);
        self.asks.remove(&order_id);
        self.pending.retain(|id| *id != order_id);
        if self.bid_id == Some(order_id) {
            self.bid_id = None;
        }
        if self.ask_id == Some(order_id) {
            self.ask_id = None;
        }
    }
}
