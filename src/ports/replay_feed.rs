use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::market::BookSnapshot;

/// A book snapshot stamped with the exchange time it was published at.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSnapshot {
    pub ts_ms: i64,
    pub snapshot: BookSnapshot,
}

#[derive(Debug, Deserialize)]
struct DumpedSnapshot {
    ts: i64,
    #[serde(flatten)]
    snapshot: BookSnapshot,
}

#[async_trait]
pub trait EventSource: Send {
    /// Next snapshot in publication order, or `None` once the source is exhausted.
    async fn next_snapshot(&mut self) -> Result<Option<TimedSnapshot>>;
}

/// Replays a JSONL dump of book snapshots, one object per line.
#[derive(Debug)]
pub struct ReplayFeed {
    data: Vec<TimedSnapshot>,
    cursor: usize,
}

impl ReplayFeed {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        let feed = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to load replay file {}", path.display()))?;
        log::info!(
            "[SESSION] loaded {} snapshots from {}",
            feed.len(),
            path.display()
        );
        Ok(feed)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut data = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read replay line {}", index + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: DumpedSnapshot = serde_json::from_str(&line).with_context(|| {
                format!("failed to parse replay entry on line {}: '{}'", index + 1, line)
            })?;
            data.push(TimedSnapshot {
                ts_ms: entry.ts,
                snapshot: entry.snapshot,
            });
        }

        if data.is_empty() {
            return Err(anyhow!("replay dump is empty"));
        }
        Ok(Self { data, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
}

#[async_trait]
impl EventSource for ReplayFeed {
    async fn next_snapshot(&mut self) -> Result<Option<TimedSnapshot>> {
        let next = self.data.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Instrument;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PRIMARY_LINE: &str = r#"{"ts": 1000, "instrument": "primary", "sequence": 1, "ask_prices": [10100, 10200, 0, 0, 0], "ask_volumes": [5, 3, 0, 0, 0], "bid_prices": [9900, 9800, 0, 0, 0], "bid_volumes": [4, 2, 0, 0, 0]}"#;
    const HEDGE_LINE: &str = r#"{"ts": 1250, "instrument": "hedge", "sequence": 1, "ask_prices": [5100, 0, 0, 0, 0], "ask_volumes": [9, 0, 0, 0, 0], "bid_prices": [4900, 0, 0, 0, 0], "bid_volumes": [9, 0, 0, 0, 0]}"#;

    #[tokio::test]
    async fn replays_lines_in_order_and_skips_blanks() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", PRIMARY_LINE).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", HEDGE_LINE).unwrap();

        let mut feed = ReplayFeed::new(file.path()).unwrap();
        assert_eq!(feed.len(), 2);

        let first = feed.next_snapshot().await.unwrap().unwrap();
        assert_eq!(first.ts_ms, 1000);
        assert_eq!(first.snapshot.instrument, Instrument::Primary);
        assert_eq!(first.snapshot.best_ask(), 10_100);
        assert_eq!(first.snapshot.bid_volumes[1], 2);

        let second = feed.next_snapshot().await.unwrap().unwrap();
        assert_eq!(second.snapshot.instrument, Instrument::Hedge);
        assert_eq!(second.snapshot.best_bid(), 4_900);

        assert!(feed.next_snapshot().await.unwrap().is_none());
        assert_eq!(feed.remaining(), 0);
    }

    #[test]
    fn empty_dump_is_an_error() {
        let file = NamedTempFile::new().unwrap();
        assert!(ReplayFeed::new(file.path()).is_err());
        assert!(ReplayFeed::from_reader("\n\n".as_bytes()).is_err());
    }

    #[test]
    fn malformed_line_names_its_position() {
        let input = format!("{}\nnot json\n", PRIMARY_LINE);
        let err = ReplayFeed::from_reader(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
