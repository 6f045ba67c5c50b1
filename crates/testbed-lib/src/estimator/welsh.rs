use super::quantile::{nearest_rank_sorted, quantile_sorted, sort_values};
use super::Estimator;
use crate::error::Result;

/// EWMA of per-batch quantiles (Welsh and Culler, 2003)
///
/// Each batch contributes its nearest-rank quantile, or the interpolated one
/// when `extended` is set. Note the weight convention: `alpha` multiplies
/// the previous estimate.
#[derive(Debug)]
pub struct WelshEwmaEstimator {
    probability: f64,
    alpha: f64,
    extended: bool,
    pending: Vec<f64>,
    ewma: Option<f64>,
    count: u64,
}

impl WelshEwmaEstimator {
    pub fn new(probability: f64, alpha: f64, extended: bool) -> Self {
        Self {
            probability,
            alpha,
            extended,
            pending: Vec::new(),
            ewma: None,
            count: 0,
        }
    }
}

impl Estimator for WelshEwmaEstimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.pending.extend_from_slice(values);
        self.count += 1;
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        if !self.pending.is_empty() {
            sort_values(&mut self.pending);
            let q = if self.extended {
                quantile_sorted(&self.pending, self.probability)
            } else {
                nearest_rank_sorted(&self.pending, self.probability)
            };
            self.ewma = Some(match self.ewma {
                None => q,
                Some(prev) => self.alpha * prev + (1.0 - self.alpha) * q,
            });
            self.pending.clear();
        }
        self.ewma.unwrap_or(f64::NAN)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.ewma = None;
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "welsh_ewma"
    }
}
