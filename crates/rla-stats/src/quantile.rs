//! Summaries of repeated trials.

use serde::{Deserialize, Serialize};

/// Nearest-rank quantile of `data`: the smallest value with at least
/// `q * len` values at or below it. Returns 0 for empty data.
pub fn find_quantile(data: &[usize], q: f64) -> usize {
    if data.is_empty() {
        return 0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_unstable();
    let q = q.clamp(0.0, 1.0);
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Histogram of `value / n` in ten bins of width 0.1; the last bin includes 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deciles {
    pub bins: [usize; 10],
    pub n: usize,
}

impl Deciles {
    /// An empty histogram over fractions of `n`.
    pub fn new(n: usize) -> Self {
        Self { bins: [0; 10], n }
    }

    /// Bins `value / n`. Ignored when `n` is 0.
    pub fn add(&mut self, value: usize) {
        if self.n == 0 {
            return;
        }
        let frac = value as f64 / self.n as f64;
        let bin = ((frac * 10.0).floor() as usize).min(9);
        self.bins[bin] += 1;
    }

    pub fn total(&self) -> usize {
        self.bins.iter().sum()
    }

    /// Cumulative percentages, one per bin.
    pub fn cumulative_pct(&self) -> [f64; 10] {
        let total = self.total();
        let mut out = [0.0; 10];
        if total == 0 {
            return out;
        }
        let mut running = 0;
        for (i, b) in self.bins.iter().enumerate() {
            running += b;
            out[i] = 100.0 * running as f64 / total as f64;
        }
        out
    }
}
