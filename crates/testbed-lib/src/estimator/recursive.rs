use super::quantile::quantiles;
use super::Estimator;
use crate::error::Result;

/// Sign-based recursive quantile tracker
///
/// The first folded batch seeds the quantile and the median with their sample
/// values. Afterwards each value nudges the median by `w` toward itself and
/// the quantile by a step proportional to the running absolute deviation,
/// biased so that a fraction `p` of the data falls below it.
#[derive(Debug)]
pub struct RecursiveEstimator {
    probability: f64,
    w: f64,
    pending: Vec<f64>,
    folded: u64,
    cumulative_deviation: f64,
    median: f64,
    quantile: f64,
    initialized: bool,
    count: u64,
}

impl RecursiveEstimator {
    pub fn new(probability: f64, w: f64) -> Self {
        Self {
            probability,
            w,
            pending: Vec::new(),
            folded: 0,
            cumulative_deviation: 0.0,
            median: f64::NAN,
            quantile: f64::NAN,
            initialized: false,
            count: 0,
        }
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl Estimator for RecursiveEstimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.pending.extend_from_slice(values);
        self.count += 1;
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        if self.pending.is_empty() {
            return self.quantile;
        }

        if !self.initialized {
            let q = quantiles(&self.pending, &[self.probability, 0.5]);
            self.quantile = q[0];
            self.median = q[1];
            self.folded += self.pending.len() as u64;
            self.initialized = true;
        } else {
            for &x in &self.pending {
                self.folded += 1;
                self.median += self.w * sign(x - self.median);
                self.cumulative_deviation += (x - self.median).abs();
                let k = self.folded as f64;
                let step = 1.5 * self.cumulative_deviation / (k * k);
                self.quantile += step * (sign(x - self.quantile) + 2.0 * self.probability - 1.0);
            }
        }
        self.pending.clear();
        self.quantile
    }

    fn reset(&mut self) {
        *self = Self::new(self.probability, self.w);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "recursive"
    }
}
