use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{HashMap, VecDeque};
use std::env;

use super::gateway::{
    is_legal_price, ExecutionGateway, GatewayError, Lifespan, OrderId, Price, Side, Volume,
};
use crate::autotrader::Event;
use crate::market::{BookSnapshot, Instrument, Quote};

lazy_static! {
    static ref FILLED_PROBABILITY_IN_EMULATION: Decimal = {
        match env::var("FILLED_PROBABILITY_IN_EMULATION") {
            Ok(val) => val.parse::<Decimal>().unwrap_or(Decimal::new(1, 0)),
            Err(_) => Decimal::new(1, 0),
        }
    };
}

const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, Copy)]
struct RestingOrder {
    side: Side,
    price: Price,
    volume: Volume,
}

/// In-process exchange stand-in. Every call is accepted synchronously and the
/// exchange's answers are queued as events for the session to drain.
#[derive(Debug)]
pub struct PaperGateway {
    resting: HashMap<OrderId, RestingOrder>,
    events: VecDeque<Event>,
    primary: Quote,
    hedge: Quote,
    maker_fee_bps: i64,
    taker_fee_bps: i64,
    fill_probability: f64,
    rng: StdRng,
}

impl PaperGateway {
    pub fn new(maker_fee_bps: i64, taker_fee_bps: i64) -> Self {
        let fill_probability = FILLED_PROBABILITY_IN_EMULATION
            .to_f64()
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        log::info!(
            "[PAPER] maker_fee_bps={} taker_fee_bps={} fill_probability={}",
            maker_fee_bps,
            taker_fee_bps,
            fill_probability
        );
        Self {
            resting: HashMap::new(),
            events: VecDeque::new(),
            primary: Quote::default(),
            hedge: Quote::default(),
            maker_fee_bps,
            taker_fee_bps,
            fill_probability,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_fill_probability(mut self, probability: f64) -> Self {
        self.fill_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn resting_orders(&self) -> usize {
        self.resting.len()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Updates the paper book and fills resting orders the new primary
    /// book trades through.
    pub fn on_market(&mut self, snapshot: &BookSnapshot) {
        let quote = Quote {
            best_ask: snapshot.best_ask(),
            best_bid: snapshot.best_bid(),
        };
        match snapshot.instrument {
            Instrument::Hedge => {
                self.hedge = quote;
                return;
            }
            Instrument::Primary => self.primary = quote,
        }

        let mut crossed: Vec<OrderId> = self
            .resting
            .iter()
            .filter(|(_, order)| crosses(order.side, order.price, quote))
            .map(|(id, _)| *id)
            .collect();
        crossed.sort_unstable();
        for order_id in crossed {
            if let Some(order) = self.resting.remove(&order_id) {
                self.fill(order_id, order.price, order.volume, self.maker_fee_bps);
            }
        }
    }

    fn fill(&mut self, order_id: OrderId, price: Price, volume: Volume, fee_bps: i64) {
        let fees = fee(price, volume, fee_bps);
        log::debug!(
            "[PAPER] fill id={} {}@{} fees={}",
            order_id,
            volume,
            price,
            fees
        );
        self.events.push_back(Event::OrderFilled {
            order_id,
            price,
            volume,
        });
        self.events.push_back(Event::OrderStatus {
            order_id,
            fill_volume: volume,
            remaining_volume: 0,
            fees,
        });
    }

    fn reject(&mut self, order_id: OrderId, message: &str) {
        log::debug!("[PAPER] reject id={}: {}", order_id, message);
        self.events.push_back(Event::Error {
            order_id,
            message: message.to_string(),
        });
    }
}

fn crosses(side: Side, price: Price, quote: Quote) -> bool {
    match side {
        Side::Buy => quote.best_ask > 0 && price >= quote.best_ask,
        Side::Sell => quote.best_bid > 0 && price <= quote.best_bid,
    }
}

/// Fee in cents for `volume` lots at `price`; negative for a rebate.
pub fn fee(price: Price, volume: Volume, fee_bps: i64) -> i64 {
    let notional = Decimal::from(price) * Decimal::from(volume);
    (notional * Decimal::from(fee_bps) / Decimal::from(BPS_DENOMINATOR))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

impl ExecutionGateway for PaperGateway {
    fn insert_order(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: Price,
        volume: Volume,
        lifespan: Lifespan,
    ) -> Result<(), GatewayError> {
        if volume == 0 {
            self.reject(order_id, "invalid volume");
            return Ok(());
        }
        if !is_legal_price(price) {
            self.reject(order_id, "invalid price");
            return Ok(());
        }

        if crosses(side, price, self.primary) {
            self.fill(order_id, price, volume, self.taker_fee_bps);
            return Ok(());
        }
        if self.rng.gen_bool(self.fill_probability) {
            self.fill(order_id, price, volume, self.maker_fee_bps);
            return Ok(());
        }
        match lifespan {
            Lifespan::FillAndKill => {
                self.events.push_back(Event::OrderStatus {
                    order_id,
                    fill_volume: 0,
                    remaining_volume: 0,
                    fees: 0,
                });
            }
            Lifespan::GoodForDay => {
                self.resting.insert(
                    order_id,
                    RestingOrder {
                        side,
                        price,
                        volume,
                    },
                );
                self.events.push_back(Event::OrderStatus {
                    order_id,
                    fill_volume: 0,
                    remaining_volume: volume,
                    fees: 0,
                });
            }
        }
        Ok(())
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), GatewayError> {
        match self.resting.remove(&order_id) {
            Some(_) => self.events.push_back(Event::OrderStatus {
                order_id,
                fill_volume: 0,
                remaining_volume: 0,
                fees: 0,
            }),
            // already filled; the exchange ignores it
            None => log::debug!("[PAPER] cancel for inactive id={}", order_id),
        }
        Ok(())
    }

    fn send_hedge_order(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: Price,
        volume: Volume,
    ) -> Result<(), GatewayError> {
        if volume == 0 {
            self.reject(order_id, "invalid volume");
            return Ok(());
        }
        if !is_legal_price(price) {
            self.reject(order_id, "invalid price");
            return Ok(());
        }
        let touch = match side {
            Side::Buy => self.hedge.best_ask,
            Side::Sell => self.hedge.best_bid,
        };
        let fill_price = if touch > 0 { touch } else { price };
        self.events.push_back(Event::HedgeFilled {
            order_id,
            price: fill_price,
            volume,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(probability: f64) -> PaperGateway {
        PaperGateway::new(-1, 2)
            .with_fill_probability(probability)
            .with_seed(7)
    }

    #[test]
    fn fees_use_basis_points_of_notional() {
        assert_eq!(fee(10_000, 10, 2), 20);
        assert_eq!(fee(10_000, 10, -1), -10);
        assert_eq!(fee(10_100, 3, 0), 0);
        // 10_100 * 1 * 2 / 10_000 = 2.02
        assert_eq!(fee(10_100, 1, 2), 2);
    }

    #[test]
    fn certain_fill_reports_fill_then_status() {
        let mut gw = gateway(1.0);
        gw.insert_order(1, Side::Buy, 9_900, 10, Lifespan::GoodForDay)
            .unwrap();
        assert_eq!(
            gw.drain_events(),
            vec![
                Event::OrderFilled {
                    order_id: 1,
                    price: 9_900,
                    volume: 10
                },
                Event::OrderStatus {
                    order_id: 1,
                    fill_volume: 10,
                    remaining_volume: 0,
                    fees: -10
                },
            ]
        );
        assert!(gw.drain_events().is_empty());
        assert_eq!(gw.resting_orders(), 0);
    }

    #[test]
    fn resting_order_fills_when_book_crosses() {
        let mut gw = gateway(0.0);
        gw.on_market(&BookSnapshot::top(Instrument::Primary, 1, 10_100, 9_900));
        gw.insert_order(1, Side::Sell, 10_100, 10, Lifespan::GoodForDay)
            .unwrap();
        assert_eq!(gw.resting_orders(), 1);
        assert_eq!(
            gw.drain_events(),
            vec![Event::OrderStatus {
                order_id: 1,
                fill_volume: 0,
                remaining_volume: 10,
                fees: 0
            }]
        );

        gw.on_market(&BookSnapshot::top(Instrument::Primary, 2, 10_200, 10_000));
        assert!(gw.drain_events().is_empty());

        gw.on_market(&BookSnapshot::top(Instrument::Primary, 3, 10_300, 10_100));
        let events = gw.drain_events();
        assert_eq!(
            events[0],
            Event::OrderFilled {
                order_id: 1,
                price: 10_100,
                volume: 10
            }
        );
        assert_eq!(gw.resting_orders(), 0);
    }

    #[test]
    fn marketable_insert_takes_liquidity() {
        let mut gw = gateway(0.0);
        gw.on_market(&BookSnapshot::top(Instrument::Primary, 1, 10_100, 9_900));
        gw.insert_order(3, Side::Buy, 10_100, 10, Lifespan::GoodForDay)
            .unwrap();
        let events = gw.drain_events();
        assert_eq!(
            events[1],
            Event::OrderStatus {
                order_id: 3,
                fill_volume: 10,
                remaining_volume: 0,
                fees: 20
            }
        );
    }

    #[test]
    fn cancel_emits_terminal_status_once() {
        let mut gw = gateway(0.0);
        gw.insert_order(1, Side::Buy, 9_900, 10, Lifespan::GoodForDay)
            .unwrap();
        gw.drain_events();
        gw.cancel_order(1).unwrap();
        gw.cancel_order(1).unwrap();
        assert_eq!(
            gw.drain_events(),
            vec![Event::OrderStatus {
                order_id: 1,
                fill_volume: 0,
                remaining_volume: 0,
                fees: 0
            }]
        );
    }

    #[test]
    fn fill_and_kill_never_rests() {
        let mut gw = gateway(0.0);
        gw.insert_order(1, Side::Buy, 9_900, 10, Lifespan::FillAndKill)
            .unwrap();
        assert_eq!(gw.resting_orders(), 0);
        assert_eq!(gw.drain_events().len(), 1);
    }

    #[test]
    fn invalid_orders_come_back_as_errors() {
        let mut gw = gateway(1.0);
        gw.insert_order(1, Side::Buy, 9_950, 10, Lifespan::GoodForDay)
            .unwrap();
        gw.insert_order(2, Side::Buy, 9_900, 0, Lifespan::GoodForDay)
            .unwrap();
        gw.send_hedge_order(3, Side::Sell, 0, 10).unwrap();
        let events = gw.drain_events();
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|event| matches!(event, Event::Error { .. })));
    }

    #[test]
    fn hedges_fill_at_the_hedge_touch() {
        let mut gw = gateway(0.0);
        gw.send_hedge_order(1, Side::Buy, 100, 5).unwrap();
        gw.on_market(&BookSnapshot::top(Instrument::Hedge, 1, 5_100, 4_900));
        gw.send_hedge_order(2, Side::Sell, 100, 5).unwrap();
        assert_eq!(
            gw.drain_events(),
            vec![
                Event::HedgeFilled {
                    order_id: 1,
                    price: 100,
                    volume: 5
                },
                Event::HedgeFilled {
                    order_id: 2,
                    price: 4_900,
                    volume: 5
                },
            ]
        );
    }
}
