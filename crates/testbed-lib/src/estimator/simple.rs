use super::Estimator;
use crate::error::Result;

/// Running arithmetic mean of every collected value
#[derive(Debug, Default)]
pub struct MeanEstimator {
    mean: f64,
    values: u64,
    count: u64,
}

impl MeanEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Estimator for MeanEstimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        for &x in values {
            self.values += 1;
            self.mean += (x - self.mean) / self.values as f64;
        }
        self.count += 1;
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        if self.values == 0 {
            return f64::NAN;
        }
        self.mean
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "mean"
    }
}

/// Last value seen
#[derive(Debug, Default)]
pub struct MostRecentlyObservedEstimator {
    last: Option<f64>,
    count: u64,
}

impl MostRecentlyObservedEstimator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Estimator for MostRecentlyObservedEstimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if let Some(&last) = values.last() {
            self.last = Some(last);
            self.count += 1;
        }
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        self.last.unwrap_or(f64::NAN)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "most_recently_observed"
    }
}
