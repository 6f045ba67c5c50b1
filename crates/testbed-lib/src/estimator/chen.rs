//! Incremental quantile estimators from Chen, Lambert and Pinheiro (2000)
//!
//! All three fold the batch staged since the previous `estimate()`:
//!
//! - EWMA smooths the exact quantile of each batch.
//! - SA runs a stochastic-approximation recursion with a `1/n` gain, using a
//!   local density estimate over a shrinking neighborhood.
//! - EWSA is the same recursion with a constant gain `w`, so it keeps
//!   tracking a drifting distribution.

use super::quantile::{interquartile_range, quantile, quantiles};
use super::Estimator;
use crate::error::{Result, TestbedError};

fn count_where(values: &[f64], pred: impl Fn(f64) -> bool) -> usize {
    values.iter().filter(|&&x| pred(x)).count()
}

/// EWMA of exact per-batch quantiles
///
/// With `clamp` set, the estimate never leaves the range of the values
/// collected since reset, and non-finite values are refused.
#[derive(Debug)]
pub struct ChenEwmaEstimator {
    probability: f64,
    w: f64,
    clamp: bool,
    pending: Vec<f64>,
    ewma: Option<f64>,
    min: f64,
    max: f64,
    count: u64,
}

impl ChenEwmaEstimator {
    pub fn new(probability: f64, w: f64) -> Self {
        Self {
            probability,
            w,
            clamp: false,
            pending: Vec::new(),
            ewma: None,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }

    pub fn with_clamp(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }
}

impl Estimator for ChenEwmaEstimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        if self.clamp {
            if let Some(bad) = values.iter().find(|x| !x.is_finite()) {
                return Err(TestbedError::InvalidState(format!(
                    "clamped estimator cannot track non-finite value {}",
                    bad
                )));
            }
            for &x in values {
                self.min = self.min.min(x);
                self.max = self.max.max(x);
            }
        }
        self.pending.extend_from_slice(values);
        self.count += 1;
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        if !self.pending.is_empty() {
            let q = quantile(&self.pending, self.probability);
            self.ewma = Some(match self.ewma {
                None => q,
                Some(prev) => (1.0 - self.w) * prev + self.w * q,
            });
            self.pending.clear();
        }

        match self.ewma {
            Some(ewma) if self.clamp => ewma.max(self.min).min(self.max),
            Some(ewma) => ewma,
            None => f64::NAN,
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.probability, self.w).with_clamp(self.clamp);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "chen_ewma"
    }
}

/// Stochastic-approximation quantile estimator
///
/// The first batch seeds the estimate with its sample quantile and the
/// density scale `f0` with its interquartile range (1 for a single value).
/// When that range is zero the step bound `max(fn, f0 * cn)` may be zero as
/// well; such steps are skipped rather than dividing by zero.
#[derive(Debug)]
pub struct ChenSaEstimator {
    probability: f64,
    pending: Vec<f64>,
    sn: f64,
    fn_: f64,
    f0: f64,
    steps: u64,
    initialized: bool,
    count: u64,
}

impl ChenSaEstimator {
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            pending: Vec::new(),
            sn: f64::NAN,
            fn_: f64::NAN,
            f0: f64::NAN,
            steps: 0,
            initialized: false,
            count: 0,
        }
    }

    fn fold(&mut self) {
        let data = std::mem::take(&mut self.pending);
        let m = data.len() as f64;

        if !self.initialized {
            let scale = if data.len() > 1 {
                interquartile_range(&data)
            } else {
                1.0
            };
            self.f0 = scale;
            self.fn_ = scale;
            self.sn = quantile(&data, self.probability);
            self.initialized = true;
            return;
        }

        self.steps += 1;
        let wn = 1.0 / self.steps as f64;
        let cn = wn.sqrt();

        let near = count_where(&data, |x| (x - self.sn).abs() <= cn);
        self.fn_ = (1.0 - wn) * self.fn_ + wn * near as f64 / (2.0 * cn * m);

        let en = self.fn_.max(self.f0 * cn);
        if en <= 0.0 {
            return;
        }
        let below = count_where(&data, |x| x <= self.sn);
        self.sn += (wn / en) * (self.probability - below as f64 / m);
    }
}

impl Estimator for ChenSaEstimator {
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
            self.fold();
        }
        self.sn
    }

    fn reset(&mut self) {
        *self = Self::new(self.probability);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "chen_sa"
    }
}

/// Exponentially weighted stochastic-approximation quantile estimator
///
/// The neighborhood width `cn` is rescaled after every batch by the batch's
/// interquartile range; a zero range falls back to the unscaled constant.
#[derive(Debug)]
pub struct ChenEwsaEstimator {
    probability: f64,
    w: f64,
    pending: Vec<f64>,
    sn: f64,
    fn_: f64,
    cn: f64,
    initialized: bool,
    count: u64,
}

impl ChenEwsaEstimator {
    pub fn new(probability: f64, w: f64) -> Self {
        Self {
            probability,
            w,
            pending: Vec::new(),
            sn: f64::NAN,
            fn_: f64::NAN,
            cn: f64::NAN,
            initialized: false,
            count: 0,
        }
    }

    fn fold(&mut self) {
        let data = std::mem::take(&mut self.pending);
        let m = data.len();
        let mf = m as f64;
        let q = quantiles(&data, &[0.25, 0.75, self.probability]);
        let range = q[1] - q[0];

        if !self.initialized {
            self.sn = q[2];
            let c: f64 = (1..=m).map(|i| 1.0 / (i as f64).sqrt()).sum();
            self.cn = if range > 0.0 { range * c / mf } else { c / mf };
            let near = count_where(&data, |x| (x - self.sn).abs() <= self.cn).max(1);
            self.fn_ = near as f64 / (2.0 * self.cn * mf);
            self.initialized = true;
            return;
        }

        let below = count_where(&data, |x| x <= self.sn);
        let near = count_where(&data, |x| (x - self.sn).abs() <= self.cn);
        self.sn += (self.w / self.fn_) * (self.probability - below as f64 / mf);
        self.fn_ = (1.0 - self.w) * self.fn_ + (self.w / (2.0 * self.cn * mf)) * near as f64;

        let c: f64 = ((m + 1)..=(2 * m)).map(|i| 1.0 / (i as f64).sqrt()).sum::<f64>() / mf;
        self.cn = if range > 0.0 { range * c } else { c };
    }
}

impl Estimator for ChenEwsaEstimator {
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
            self.fold();
        }
        self.sn
    }

    fn reset(&mut self) {
        *self = Self::new(self.probability, self.w);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "chen_ewsa"
    }
}
