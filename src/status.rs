use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::autotrader::AutoTrader;
use crate::config::TraderConfig;
use crate::trade::execution::gateway::{ExecutionGateway, OrderId};

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub ts: i64,
    pub updated_at: String,
    pub team: String,
    pub ticks: u64,
    pub primary_position: i64,
    pub hedge_position: i64,
    pub drift: i64,
    pub pending_orders: Vec<OrderId>,
    pub outstanding_hedges: usize,
    pub hedge_ratio: f64,
    pub last_score: Option<f64>,
    pub drift_timer_active: bool,
}

impl StatusSnapshot {
    pub fn capture<G: ExecutionGateway>(team: &str, trader: &AutoTrader<G>) -> Self {
        let inventory = trader.inventory();
        let now = Utc::now();
        Self {
            ts: now.timestamp(),
            updated_at: now.to_rfc3339(),
            team: team.to_string(),
            ticks: trader.ticks(),
            primary_position: inventory.primary,
            hedge_position: inventory.hedge,
            drift: inventory.drift(),
            pending_orders: trader.pending_orders().to_vec(),
            outstanding_hedges: trader.outstanding_hedges(),
            hedge_ratio: trader.hedge_ratio(),
            last_score: trader.last_score(),
            drift_timer_active: trader.drift_timer_active(),
        }
    }
}

#[derive(Debug)]
pub struct StatusReporter {
    path: PathBuf,
    team: String,
    every_ticks: u64,
    last_written_tick: Option<u64>,
}

impl StatusReporter {
    pub fn new<P: AsRef<Path>>(path: P, team: &str, every_ticks: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            team: team.to_string(),
            every_ticks: every_ticks.max(1),
            last_written_tick: None,
        }
    }

    pub fn from_config(cfg: &TraderConfig) -> Option<Self> {
        let path = cfg.status_file.as_ref()?;
        log::info!("[STATUS] writing snapshots to {}", path);
        Some(Self::new(path, &cfg.team_name, cfg.status_every_ticks))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_snapshot<G: ExecutionGateway>(
        &mut self,
        trader: &AutoTrader<G>,
    ) -> std::io::Result<()> {
        let snapshot = StatusSnapshot::capture(&self.team, trader);
        let payload = serde_json::to_string(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(tmp_path, &self.path)?;
        self.last_written_tick = Some(snapshot.ticks);
        Ok(())
    }

    /// Writes when at least `every_ticks` ticks passed since the last write.
    pub fn write_snapshot_if_due<G: ExecutionGateway>(
        &mut self,
        trader: &AutoTrader<G>,
    ) -> std::io::Result<bool> {
        let due = self
            .last_written_tick
            .map(|last| trader.ticks().saturating_sub(last) >= self.every_ticks)
            .unwrap_or(true);
        if !due {
            return Ok(false);
        }
        self.write_snapshot(trader)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{BookSnapshot, Instrument};
    use crate::trade::execution::gateway::recording::RecordingGateway;
    use std::time::Instant;

    #[test]
    fn snapshot_is_written_as_json_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status").join("trader.json");
        let mut reporter = StatusReporter::new(&path, "ratio-hedge", 2);
        let mut trader = AutoTrader::new(RecordingGateway::default());

        assert!(reporter.write_snapshot_if_due(&trader).unwrap());
        assert!(!reporter.write_snapshot_if_due(&trader).unwrap());

        let now = Instant::now();
        trader.on_market_snapshot_at(&BookSnapshot::top(Instrument::Primary, 1, 10_100, 9_900), now);
        assert!(!reporter.write_snapshot_if_due(&trader).unwrap());
        trader.on_market_snapshot_at(&BookSnapshot::top(Instrument::Hedge, 1, 5_100, 4_900), now);
        assert!(reporter.write_snapshot_if_due(&trader).unwrap());

        let payload = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["team"], "ratio-hedge");
        assert_eq!(value["ticks"], 2);
        assert_eq!(value["primary_position"], 0);
        assert_eq!(value["drift_timer_active"], false);
        assert!(value["last_score"].is_null());
        assert!(value["pending_orders"].as_array().unwrap().is_empty());
    }

    #[test]
    fn disabled_without_status_file() {
        let cfg = TraderConfig::default();
        assert!(StatusReporter::from_config(&cfg).is_none());
    }
}
