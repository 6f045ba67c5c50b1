use super::quantile::quantile;
use super::Estimator;
use crate::error::Result;

/// Exact sample quantile over every value since reset
///
/// Keeps all values; intended as the reference the incremental
/// estimators are compared against.
#[derive(Debug)]
pub struct TrueQuantileEstimator {
    probability: f64,
    values: Vec<f64>,
    count: u64,
}

impl TrueQuantileEstimator {
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            values: Vec::new(),
            count: 0,
        }
    }
}

impl Estimator for TrueQuantileEstimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.values.extend_from_slice(values);
        self.count += 1;
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        quantile(&self.values, self.probability)
    }

    fn reset(&mut self) {
        self.values.clear();
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "true_quantile"
    }
}
