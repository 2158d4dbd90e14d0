//! Mean-reversion signal on the primary/hedge price ratio.
//!
//! After warm-up every fresh sample yields a z-score of the latest ratio against
//! the rolling ratio window. The last ten scores are fitted with a straight line
//! and the slope tells us whether the deviation is still widening.

use std::collections::VecDeque;

use crate::market::{RollingStore, RollingWindow};
use crate::trade::execution::gateway::Side;

pub const SCORE_WINDOW_CAPACITY: usize = 10;
pub const WARMUP_SAMPLES: u64 = 31;
pub const ENTRY_SCORE: f64 = 1.0;
const STD_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub score: f64,
    pub slope: f64,
}

impl Signal {
    /// Side to trade the primary instrument on, if the signal calls for it.
    pub fn direction(&self) -> Option<Side> {
        if self.slope > 0.0 && self.score > ENTRY_SCORE {
            Some(Side::Sell)
        } else if self.slope < 0.0 && self.score < -ENTRY_SCORE {
            Some(Side::Buy)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct SignalEngine {
    scores: RollingWindow,
    hedge_ratio: f64,
    last_score: Option<f64>,
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalEngine {
    pub fn new() -> Self {
        Self {
            scores: RollingWindow::new(SCORE_WINDOW_CAPACITY),
            hedge_ratio: 1.0,
            last_score: None,
        }
    }

    /// Hedge lots per primary lot. Stays at 1 until the first post-warm-up sample.
    pub fn hedge_ratio(&self) -> f64 {
        self.hedge_ratio
    }

    pub fn last_score(&self) -> Option<f64> {
        self.last_score
    }

    pub fn scores(&self) -> &RollingWindow {
        &self.scores
    }

    /// Call once per fresh sample in `store`. Returns a signal only on ticks
    /// where the score window rolls over, i.e. a full ten-point slope exists.
    pub fn update(&mut self, store: &RollingStore) -> Option<Signal> {
        if store.samples() < WARMUP_SAMPLES {
            return None;
        }
        self.hedge_ratio = hedge_ratio(store.primary_mids().values(), store.hedge_mids().values());

        let current = store.ratios().last()?;
        let score = match z_score(current, store.ratios().values()) {
            Some(score) => score,
            None => {
                log::debug!("[SIGNAL] ratio variance is zero; no score this tick");
                return None;
            }
        };
        self.last_score = Some(score);
        if self.scores.push(score).is_none() {
            // window has not rolled over yet
            return None;
        }

        let slope = ols_slope(self.scores.values())?;
        log::debug!(
            "[SIGNAL] ratio={:.6} score={:.4} slope={:.4} hedge_ratio={:.4}",
            current,
            score,
            slope,
            self.hedge_ratio
        );
        Some(Signal { score, slope })
    }
}

/// Population mean and standard deviation.
pub fn mean_std(window: &VecDeque<f64>) -> Option<(f64, f64)> {
    if window.is_empty() {
        return None;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some((mean, var.sqrt()))
}

/// Pearson correlation over the overlapping tail of both series.
pub fn correlation(xs: &VecDeque<f64>, ys: &VecDeque<f64>) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let xs: Vec<f64> = xs.iter().skip(xs.len() - n).copied().collect();
    let ys: Vec<f64> = ys.iter().skip(ys.len() - n).copied().collect();
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x < STD_EPSILON || var_y < STD_EPSILON {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// corr(primary, hedge) * std(primary) / std(hedge), falling back to 1 when
/// either leg has not moved.
pub fn hedge_ratio(primary: &VecDeque<f64>, hedge: &VecDeque<f64>) -> f64 {
    let (std_p, std_h) = match (mean_std(primary), mean_std(hedge)) {
        (Some((_, p)), Some((_, h))) => (p, h),
        _ => return 1.0,
    };
    if std_p < STD_EPSILON || std_h < STD_EPSILON {
        return 1.0;
    }
    correlation(primary, hedge)
        .map(|corr| corr * (std_p / std_h))
        .unwrap_or(1.0)
}

pub fn z_score(current: f64, window: &VecDeque<f64>) -> Option<f64> {
    let (mean, std) = mean_std(window)?;
    if std < STD_EPSILON {
        return None;
    }
    Some((current - mean) / std)
}

/// Least-squares slope of `ys` against the indices 0..n.
pub fn ols_slope(ys: &VecDeque<f64>) -> Option<f64> {
    let n = ys.len();
    if n < 2 {
        return None;
    }
    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_x) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var_x += dx * dx;
    }
    Some(cov / var_x)
}
