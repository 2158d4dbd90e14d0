//! Drives a trader from an event source through the paper gateway.

use anyhow::Result;
use std::time::Instant;
use tokio::time::{sleep, Duration};

use crate::autotrader::{AutoTrader, Event};
use crate::config::TraderConfig;
use crate::ports::replay_feed::EventSource;
use crate::status::StatusReporter;
use crate::trade::execution::paper_gateway::PaperGateway;

// Each paper event can trigger at most a hedge, which fills in the next round.
const MAX_DRAIN_ROUNDS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub snapshots: u64,
    pub ticks: u64,
    pub primary_position: i64,
    pub hedge_position: i64,
    pub pending_orders: usize,
}

pub struct TradingSession<S> {
    cfg: TraderConfig,
    feed: S,
    trader: AutoTrader<PaperGateway>,
    status: Option<StatusReporter>,
    epoch: Instant,
    first_ts: Option<i64>,
    last_now: Instant,
}

impl<S: EventSource> TradingSession<S> {
    pub fn new(cfg: TraderConfig, feed: S, gateway: PaperGateway) -> Self {
        let status = StatusReporter::from_config(&cfg);
        let epoch = Instant::now();
        Self {
            cfg,
            feed,
            trader: AutoTrader::new(gateway),
            status,
            epoch,
            first_ts: None,
            last_now: epoch,
        }
    }

    pub fn trader(&self) -> &AutoTrader<PaperGateway> {
        &self.trader
    }

    pub async fn run(&mut self) -> Result<SessionSummary> {
        log::info!(
            "[SESSION] starting replay for team {} (pace {} ms)",
            self.cfg.team_name,
            self.cfg.replay_pace_ms
        );
        let mut snapshots = 0u64;
        while let Some(timed) = self.feed.next_snapshot().await? {
            snapshots += 1;
            let now = self.replay_clock(timed.ts_ms);

            self.trader.gateway_mut().on_market(&timed.snapshot);
            self.drain(now);
            self.trader
                .handle_event(Event::MarketSnapshot(timed.snapshot), now);
            self.drain(now);

            if let Some(status) = self.status.as_mut() {
                if let Err(e) = status.write_snapshot_if_due(&self.trader) {
                    log::warn!("[STATUS] failed to write {}: {}", status.path().display(), e);
                }
            }
            if self.cfg.replay_pace_ms > 0 {
                sleep(Duration::from_millis(self.cfg.replay_pace_ms)).await;
            }
        }

        if let Some(status) = self.status.as_mut() {
            if let Err(e) = status.write_snapshot(&self.trader) {
                log::warn!("[STATUS] failed to write {}: {}", status.path().display(), e);
            }
        }

        let inventory = self.trader.inventory();
        let summary = SessionSummary {
            snapshots,
            ticks: self.trader.ticks(),
            primary_position: inventory.primary,
            hedge_position: inventory.hedge,
            pending_orders: self.trader.pending_orders().len(),
        };
        log::info!(
            "[SESSION] replay finished: snapshots={} ticks={} primary={} hedge={} pending={}",
            summary.snapshots,
            summary.ticks,
            summary.primary_position,
            summary.hedge_position,
            summary.pending_orders
        );
        Ok(summary)
    }

    /// Maps exchange milliseconds onto a monotonic instant anchored at the
    /// first snapshot, so time-based rules run in replay time.
    fn replay_clock(&mut self, ts_ms: i64) -> Instant {
        let first = *self.first_ts.get_or_insert(ts_ms);
        let offset = Duration::from_millis(ts_ms.saturating_sub(first).max(0) as u64);
        let now = (self.epoch + offset).max(self.last_now);
        self.last_now = now;
        now
    }

    fn drain(&mut self, now: Instant) {
        for _ in 0..MAX_DRAIN_ROUNDS {
            let events = self.trader.gateway_mut().drain_events();
            if events.is_empty() {
                return;
            }
            for event in events {
                self.trader.handle_event(event, now);
            }
        }
        log::warn!("[SESSION] paper events still queued after {} rounds", MAX_DRAIN_ROUNDS);
    }
}
