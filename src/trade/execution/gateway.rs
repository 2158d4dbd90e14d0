//! Outbound order plumbing.
//!
//! [`ExecutionGateway`] is the seam to whatever actually talks to the exchange.
//! Every call the strategy makes goes through [`OrderRouter`], which hands out
//! client order ids and keeps the outbound message rate under the exchange limit.

use lazy_static::lazy_static;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

pub type OrderId = u64;
pub type Price = i64;
pub type Volume = u32;

pub const TICK_SIZE_IN_CENTS: Price = 100;
pub const MINIMUM_BID: Price = 1;
pub const MAXIMUM_ASK: Price = i32::MAX as Price;
pub const MESSAGE_LIMIT_PER_SECOND: usize = 50;

lazy_static! {
    /// Lowest legal price on the tick grid; selling here is effectively a market order.
    pub static ref MIN_BID_NEAREST_TICK: Price =
        round_price_by_tick(MINIMUM_BID, RoundingStrategy::ToPositiveInfinity);
    /// Highest legal price on the tick grid; buying here is effectively a market order.
    pub static ref MAX_ASK_NEAREST_TICK: Price =
        round_price_by_tick(MAXIMUM_ASK, RoundingStrategy::ToNegativeInfinity);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifespan {
    GoodForDay,
    FillAndKill,
}

/// Price at the legal extreme in `side`'s direction so the order crosses immediately.
pub fn marketable_price(side: Side) -> Price {
    match side {
        Side::Buy => *MAX_ASK_NEAREST_TICK,
        Side::Sell => *MIN_BID_NEAREST_TICK,
    }
}

pub fn is_legal_price(price: Price) -> bool {
    (MINIMUM_BID..=MAXIMUM_ASK).contains(&price) && price % TICK_SIZE_IN_CENTS == 0
}

/// Round `price` onto the tick grid using `rounding`, never below one tick.
fn round_price_by_tick(price: Price, rounding: RoundingStrategy) -> Price {
    let step = Decimal::from(TICK_SIZE_IN_CENTS);
    let mut multiples = (Decimal::from(price) / step).round_dp_with_strategy(0, rounding);
    if multiples < Decimal::ONE {
        multiples = Decimal::ONE;
    }
    (multiples * step).to_i64().unwrap_or(price)
}

/// Synchronous failure to hand a message to the exchange. Exchange-side
/// rejections arrive later as error events instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    Throttled { sent: usize, limit: usize },
    Rejected(String),
    Disconnected,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GatewayError::Throttled { sent, limit } => {
                write!(f, "message rate limit hit ({} of {} per second)", sent, limit)
            }
            GatewayError::Rejected(reason) => write!(f, "rejected: {}", reason),
            GatewayError::Disconnected => write!(f, "gateway disconnected"),
        }
    }
}

impl std::error::Error for GatewayError {}

pub trait ExecutionGateway {
    fn insert_order(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: Price,
        volume: Volume,
        lifespan: Lifespan,
    ) -> Result<(), GatewayError>;

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), GatewayError>;

    fn send_hedge_order(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: Price,
        volume: Volume,
    ) -> Result<(), GatewayError>;
}

pub struct OrderRouter<G> {
    gateway: G,
    next_id: OrderId,
    now: Instant,
    recent_messages: VecDeque<Instant>,
}

impl<G: ExecutionGateway> OrderRouter<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            next_id: 1,
            now: Instant::now(),
            recent_messages: VecDeque::new(),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// Time of the event currently being handled; the rate window is measured against it.
    pub fn set_clock(&mut self, now: Instant) {
        self.now = now;
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn insert_order(
        &mut self,
        side: Side,
        price: Price,
        volume: Volume,
        lifespan: Lifespan,
    ) -> Result<OrderId, GatewayError> {
        self.admit()?;
        let order_id = self.next_order_id();
        self.gateway
            .insert_order(order_id, side, price, volume, lifespan)?;
        self.record_sent();
        log::info!(
            "[ORDER] insert id={} {} {}@{} {:?}",
            order_id,
            side,
            volume,
            price,
            lifespan
        );
        Ok(order_id)
    }

    pub fn cancel_order(&mut self, order_id: OrderId) -> Result<(), GatewayError> {
        self.admit()?;
        self.gateway.cancel_order(order_id)?;
        self.record_sent();
        log::info!("[ORDER] cancel id={}", order_id);
        Ok(())
    }

    pub fn send_hedge_order(&mut self, side: Side, volume: Volume) -> Result<OrderId, GatewayError> {
        self.admit()?;
        let order_id = self.next_order_id();
        let price = marketable_price(side);
        self.gateway
            .send_hedge_order(order_id, side, price, volume)?;
        self.record_sent();
        log::info!("[HEDGE] send id={} {} {}@{}", order_id, side, volume, price);
        Ok(order_id)
    }

    fn next_order_id(&mut self) -> OrderId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Checks the rate window; the slot is only taken by `record_sent`.
    fn admit(&mut self) -> Result<(), GatewayError> {
        let window_start = self.now.checked_sub(Duration::from_secs(1));
        while let Some(&front) = self.recent_messages.front() {
            match window_start {
                Some(start) if front <= start => {
                    self.recent_messages.pop_front();
                }
                _ => break,
            }
        }
        if self.recent_messages.len() >= MESSAGE_LIMIT_PER_SECOND {
            return Err(GatewayError::Throttled {
                sent: self.recent_messages.len(),
                limit: MESSAGE_LIMIT_PER_SECOND,
            });
        }
        Ok(())
    }

    fn record_sent(&mut self) {
        self.recent_messages.push_back(self.now);
    }
}
