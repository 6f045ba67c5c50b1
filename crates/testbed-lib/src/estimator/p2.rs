//! P-square quantile estimation (Jain and Chlamtac, 1985)
//!
//! Tracks five markers whose heights approximate the minimum, the p/2, p,
//! (1+p)/2 quantiles and the maximum. Marker heights are adjusted with a
//! piecewise-parabolic formula, falling back to linear interpolation when the
//! parabolic prediction would break marker ordering. No raw data is kept
//! beyond the first five values.

use super::quantile::{quantile, sort_values};
use super::Estimator;
use crate::error::Result;

const MARKERS: usize = 5;

#[derive(Debug)]
pub struct P2Estimator {
    probability: f64,
    heights: [f64; MARKERS],
    positions: [f64; MARKERS],
    desired: [f64; MARKERS],
    increments: [f64; MARKERS],
    warmup: Vec<f64>,
    values: u64,
    count: u64,
}

impl P2Estimator {
    pub fn new(probability: f64) -> Self {
        let p = probability;
        Self {
            probability,
            heights: [0.0; MARKERS],
            positions: [1.0, 2.0, 3.0, 4.0, 5.0],
            desired: [1.0, 1.0 + 2.0 * p, 1.0 + 4.0 * p, 3.0 + 2.0 * p, 5.0],
            increments: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
            warmup: Vec::with_capacity(MARKERS),
            values: 0,
            count: 0,
        }
    }

    fn add(&mut self, x: f64) {
        self.values += 1;

        if self.warmup.len() < MARKERS {
            self.warmup.push(x);
            if self.warmup.len() == MARKERS {
                sort_values(&mut self.warmup);
                self.heights.copy_from_slice(&self.warmup);
            }
            return;
        }

        let q = &mut self.heights;
        // Cell holding x, extending the extremes when needed
        let k = if x < q[0] {
            q[0] = x;
            0
        } else if x >= q[4] {
            q[4] = x;
            3
        } else {
            (1..MARKERS).find(|&i| x < q[i]).map(|i| i - 1).unwrap_or(3)
        };

        for i in (k + 1)..MARKERS {
            self.positions[i] += 1.0;
        }
        for i in 0..MARKERS {
            self.desired[i] += self.increments[i];
        }

        for i in 1..(MARKERS - 1) {
            let d = self.desired[i] - self.positions[i];
            let n = &self.positions;
            if (d >= 1.0 && n[i + 1] - n[i] > 1.0) || (d <= -1.0 && n[i - 1] - n[i] < -1.0) {
                let d = d.signum();
                let candidate = self.parabolic(i, d);
                self.heights[i] = if self.heights[i - 1] < candidate && candidate < self.heights[i + 1] {
                    candidate
                } else {
                    self.linear(i, d)
                };
                self.positions[i] += d;
            }
        }
    }

    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let q = &self.heights;
        let n = &self.positions;
        q[i] + d / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + d) * (q[i + 1] - q[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - d) * (q[i] - q[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let j = if d > 0.0 { i + 1 } else { i - 1 };
        let q = &self.heights;
        let n = &self.positions;
        q[i] + d * (q[j] - q[i]) / (n[j] - n[i])
    }
}

impl Estimator for P2Estimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        for &x in values {
            self.add(x);
        }
        self.count += 1;
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        if self.values == 0 {
            return f64::NAN;
        }
        if self.warmup.len() < MARKERS {
            // Too few values for the markers: exact answer on what we have
            return quantile(&self.warmup, self.probability);
        }
        self.heights[2]
    }

    fn reset(&mut self) {
        *self = Self::new(self.probability);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "p2"
    }
}
