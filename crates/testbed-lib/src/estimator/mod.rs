//! Streaming estimators of a summary statistic (mean or quantile)
//!
//! Estimators are pull style: `collect` only stages values, and the batch
//! quantile variants fold everything staged since the previous call when
//! `estimate()` is invoked. Every estimator returns NaN until it has data.

mod chambers;
mod chen;
mod lora;
mod p2;
pub mod quantile;
mod recursive;
mod simple;
mod true_quantile;
mod welsh;

#[cfg(test)]
mod tests;

pub use chambers::ChambersEstimator;
pub use chen::{ChenEwmaEstimator, ChenEwsaEstimator, ChenSaEstimator};
pub use lora::{LoraParams, LoraEstimator};
pub use p2::P2Estimator;
pub use recursive::RecursiveEstimator;
pub use simple::{MeanEstimator, MostRecentlyObservedEstimator};
pub use true_quantile::TrueQuantileEstimator;
pub use welsh::WelshEwmaEstimator;

use crate::error::{Result, TestbedError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Incremental summary statistic over a stream of observations
pub trait Estimator: Send + Sync + fmt::Debug {
    /// Collect a single value
    fn collect(&mut self, value: f64) -> Result<()> {
        self.collect_batch(&[value])
    }

    /// Collect a batch of values as one collection
    ///
    /// An empty batch is ignored and does not count as a collection.
    fn collect_batch(&mut self, values: &[f64]) -> Result<()>;

    /// Current value of the statistic, NaN before any collection
    fn estimate(&mut self) -> f64;

    /// Forget everything collected so far
    fn reset(&mut self);

    /// Number of `collect`/`collect_batch` calls since the last reset
    fn count(&self) -> u64;

    fn name(&self) -> &'static str;
}

fn default_chen_w() -> f64 {
    0.05
}

fn default_welsh_alpha() -> f64 {
    0.7
}

fn default_lora_stationary() -> bool {
    true
}

fn default_lora_smoothing() -> f64 {
    0.95
}

fn default_lora_gain() -> f64 {
    10.0
}

fn default_lora_window() -> usize {
    40
}

/// Which estimator to build, and with what parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorConfig {
    #[default]
    Mean,
    MostRecentlyObserved,
    TrueQuantile {
        probability: f64,
    },
    P2 {
        probability: f64,
    },
    ChenEwma {
        probability: f64,
        #[serde(default = "default_chen_w")]
        w: f64,
        #[serde(default)]
        clamp: bool,
    },
    ChenSa {
        probability: f64,
    },
    ChenEwsa {
        probability: f64,
        #[serde(default = "default_chen_w")]
        w: f64,
    },
    WelshEwma {
        probability: f64,
        #[serde(default = "default_welsh_alpha")]
        alpha: f64,
        #[serde(default)]
        extended: bool,
    },
    Recursive {
        probability: f64,
        #[serde(default = "default_chen_w")]
        w: f64,
    },
    Chambers {
        probability: f64,
    },
    BakshiLora {
        probability: f64,
        #[serde(default = "default_lora_stationary")]
        stationary: bool,
        #[serde(default = "default_lora_smoothing")]
        beta: f64,
        #[serde(default = "default_lora_smoothing")]
        omega: f64,
        #[serde(default = "default_lora_gain")]
        gain: f64,
        #[serde(default = "default_lora_window")]
        window: usize,
    },
}

fn check_probability(p: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&p) {
        return Err(TestbedError::InvalidArgument(format!(
            "quantile probability must be in [0, 1], got {}",
            p
        )));
    }
    Ok(p)
}

fn check_factor(name: &str, value: f64) -> Result<f64> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(TestbedError::InvalidArgument(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )));
    }
    Ok(value)
}

impl EstimatorConfig {
    /// Build a fresh estimator, validating parameters
    pub fn build(&self) -> Result<Box<dyn Estimator>> {
        let estimator: Box<dyn Estimator> = match *self {
            EstimatorConfig::Mean => Box::new(MeanEstimator::new()),
            EstimatorConfig::MostRecentlyObserved => Box::new(MostRecentlyObservedEstimator::new()),
            EstimatorConfig::TrueQuantile { probability } => {
                Box::new(TrueQuantileEstimator::new(check_probability(probability)?))
            }
            EstimatorConfig::P2 { probability } => {
                Box::new(P2Estimator::new(check_probability(probability)?))
            }
            EstimatorConfig::ChenEwma { probability, w, clamp } => Box::new(
                ChenEwmaEstimator::new(check_probability(probability)?, check_factor("w", w)?)
                    .with_clamp(clamp),
            ),
            EstimatorConfig::ChenSa { probability } => {
                Box::new(ChenSaEstimator::new(check_probability(probability)?))
            }
            EstimatorConfig::ChenEwsa { probability, w } => Box::new(ChenEwsaEstimator::new(
                check_probability(probability)?,
                check_factor("w", w)?,
            )),
            EstimatorConfig::WelshEwma {
                probability,
                alpha,
                extended,
            } => {
                if !(0.0..=1.0).contains(&alpha) {
                    return Err(TestbedError::InvalidArgument(format!(
                        "alpha must be in [0, 1], got {}",
                        alpha
                    )));
                }
                Box::new(WelshEwmaEstimator::new(
                    check_probability(probability)?,
                    alpha,
                    extended,
                ))
            }
            EstimatorConfig::Recursive { probability, w } => Box::new(RecursiveEstimator::new(
                check_probability(probability)?,
                check_factor("w", w)?,
            )),
            EstimatorConfig::Chambers { probability } => {
                Box::new(ChambersEstimator::new(check_probability(probability)?))
            }
            EstimatorConfig::BakshiLora {
                probability,
                stationary,
                beta,
                omega,
                gain,
                window,
            } => {
                let probability = check_probability(probability)?;
                let params = LoraParams {
                    stationary,
                    beta,
                    omega,
                    gain,
                    window,
                };
                if probability <= 0.0 || probability >= 1.0 {
                    return Err(TestbedError::InvalidArgument(
                        "LORA needs a probability strictly inside (0, 1)".into(),
                    ));
                }
                params.validate()?;
                Box::new(LoraEstimator::new(probability, params))
            }
        };
        Ok(estimator)
    }
}
