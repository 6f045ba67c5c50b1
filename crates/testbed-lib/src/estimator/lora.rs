//! LORA quantile estimation (Bakshi and Hoeflin, 2006)
//!
//! Tracks a high quantile from the fraction of recent values exceeding the
//! current estimate. A window of the last `M` values stands in for batches
//! smaller than the window.

use super::quantile::{quantile, sample_stdev};
use super::Estimator;
use crate::error::{Result, TestbedError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Tuning of a [`LoraEstimator`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoraParams {
    /// Treat the process as stationary (gain `1/sqrt(i)`) or not (gain `gain * (1 - beta)`)
    pub stationary: bool,
    pub beta: f64,
    /// Smoothing of the standard deviation estimate
    pub omega: f64,
    pub gain: f64,
    /// Size `M` of the sample window
    pub window: usize,
}

impl Default for LoraParams {
    fn default() -> Self {
        Self {
            stationary: true,
            beta: 0.95,
            omega: 0.95,
            gain: 10.0,
            window: 40,
        }
    }
}

impl LoraParams {
    pub fn validate(&self) -> Result<()> {
        if self.window < 2 {
            return Err(TestbedError::InvalidArgument(format!(
                "LORA window must hold at least 2 values, got {}",
                self.window
            )));
        }
        for (name, value) in [("beta", self.beta), ("omega", self.omega)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TestbedError::InvalidArgument(format!(
                    "LORA {} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Until the window fills up, the estimate is the window's sample quantile
/// (no random perturbation of the starting point). Afterwards, with `nt`
/// values above the estimate out of `M`:
///
/// `T += s * q * ln((q_i / p_i) * (p / q)) * g`, where
/// `p_i = (M - nt + 0.5) / (M + 1)` and `s` is the smoothed standard deviation.
#[derive(Debug)]
pub struct LoraEstimator {
    probability: f64,
    params: LoraParams,
    pending: Vec<f64>,
    window: VecDeque<f64>,
    tn: f64,
    sn: f64,
    updates: u64,
    initialized: bool,
    count: u64,
}

impl LoraEstimator {
    pub fn new(probability: f64, params: LoraParams) -> Self {
        Self {
            probability,
            params,
            pending: Vec::new(),
            window: VecDeque::with_capacity(params.window),
            tn: f64::NAN,
            sn: f64::NAN,
            updates: 0,
            initialized: false,
            count: 0,
        }
    }

    fn fold(&mut self) {
        let data = std::mem::take(&mut self.pending);
        let m = data.len();
        let use_batch = m > self.window.len();

        if !self.initialized {
            if self.window.len() == self.params.window {
                self.initialized = true;
            }
            if use_batch {
                self.tn = quantile(&data, self.probability);
                self.sn = sample_stdev(&data);
            } else {
                let window: Vec<f64> = self.window.iter().copied().collect();
                self.tn = quantile(&window, self.probability);
                self.sn = sample_stdev(&window);
            }
            return;
        }

        let (exceeding, size, stdev) = if use_batch {
            (
                data.iter().filter(|&&x| x > self.tn).count(),
                m,
                sample_stdev(&data),
            )
        } else {
            (
                self.window.iter().filter(|&&x| x > self.tn).count(),
                self.window.len(),
                sample_stdev(&self.window),
            )
        };

        let size = size as f64;
        let q = 1.0 - self.probability;
        let pi = (size - exceeding as f64 + 0.5) / (size + 1.0);
        let qi = 1.0 - pi;
        let gain = if self.params.stationary {
            1.0 / ((self.updates + 1) as f64).sqrt()
        } else {
            self.params.gain * (1.0 - self.params.beta)
        };

        self.sn = self.params.omega * self.sn + (1.0 - self.params.omega) * stdev;
        self.tn += self.sn * q * ((qi / pi) * (self.probability / q)).ln() * gain;
        self.updates += 1;
    }
}

impl Estimator for LoraEstimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        for &x in values {
            if self.window.len() == self.params.window {
                self.window.pop_front();
            }
            self.window.push_back(x);
        }
        self.pending.extend_from_slice(values);
        self.count += 1;
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        if !self.pending.is_empty() {
            self.fold();
        }
        self.tn
    }

    fn reset(&mut self) {
        *self = Self::new(self.probability, self.params);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "bakshi_lora"
    }
}
