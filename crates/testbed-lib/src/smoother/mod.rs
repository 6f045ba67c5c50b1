//! Exponential-smoothing forecasters
//!
//! Every smoother exposes the same contract so the control loop never needs
//! to know which one is installed. Forecasts are NaN until a value is seen.

mod exponential;

pub use exponential::{BrownDoubleSmoother, BrownSingleSmoother, DummySmoother, HoltWintersSmoother};

use crate::error::{Result, TestbedError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub trait Smoother: Send + Sync + fmt::Debug {
    /// Ingest one value, returning the updated level
    fn smooth(&mut self, value: f64) -> f64;

    /// Ingest values in order, returning the level after the last one
    fn smooth_all(&mut self, values: &[f64]) -> f64 {
        values
            .iter()
            .fold(self.forecast(0), |_, &value| self.smooth(value))
    }

    /// Prediction `horizon` steps past the last value (0 is the nowcast)
    fn forecast(&self, horizon: u32) -> f64;

    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

fn default_alpha() -> f64 {
    0.7
}

/// Which smoother to build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmootherConfig {
    #[default]
    Dummy,
    BrownSingle {
        #[serde(default = "default_alpha")]
        alpha: f64,
    },
    BrownDouble {
        #[serde(default = "default_alpha")]
        alpha: f64,
    },
    HoltWinters {
        alpha: f64,
        beta: f64,
    },
    HoltWintersDamped {
        delta: f64,
    },
}

fn check_range(name: &str, value: f64, allow_one: bool) -> Result<()> {
    let ok = value > 0.0 && (value < 1.0 || (allow_one && value == 1.0));
    if !ok {
        let upper = if allow_one { "1]" } else { "1)" };
        return Err(TestbedError::InvalidArgument(format!(
            "{} must be in (0, {}, got {}",
            name, upper, value
        )));
    }
    Ok(())
}

impl SmootherConfig {
    pub fn build(&self) -> Result<Box<dyn Smoother>> {
        let smoother: Box<dyn Smoother> = match *self {
            SmootherConfig::Dummy => Box::new(DummySmoother::new()),
            SmootherConfig::BrownSingle { alpha } => {
                check_range("alpha", alpha, true)?;
                Box::new(BrownSingleSmoother::new(alpha))
            }
            SmootherConfig::BrownDouble { alpha } => {
                check_range("alpha", alpha, false)?;
                Box::new(BrownDoubleSmoother::new(alpha))
            }
            SmootherConfig::HoltWinters { alpha, beta } => {
                check_range("alpha", alpha, true)?;
                check_range("beta", beta, true)?;
                Box::new(HoltWintersSmoother::new(alpha, beta))
            }
            SmootherConfig::HoltWintersDamped { delta } => {
                check_range("delta", delta, true)?;
                Box::new(HoltWintersSmoother::from_delta(delta))
            }
        };
        Ok(smoother)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_configs() -> Vec<SmootherConfig> {
        vec![
            SmootherConfig::Dummy,
            SmootherConfig::BrownSingle { alpha: 0.7 },
            SmootherConfig::BrownDouble { alpha: 0.5 },
            SmootherConfig::HoltWinters {
                alpha: 0.8,
                beta: 0.3,
            },
            SmootherConfig::HoltWintersDamped { delta: 0.5 },
        ]
    }

    #[test]
    fn test_forecast_nan_until_data_and_after_reset() {
        for config in all_configs() {
            let mut smoother = config.build().unwrap();
            assert!(smoother.forecast(0).is_nan(), "{}", smoother.name());

            smoother.smooth_all(&[1.0, 2.0, 3.0]);
            assert!(smoother.forecast(1).is_finite(), "{}", smoother.name());

            smoother.reset();
            assert!(smoother.forecast(0).is_nan(), "{}", smoother.name());
        }
    }

    #[test]
    fn test_dummy_forecasts_last_value() {
        let mut smoother = DummySmoother::new();
        smoother.smooth_all(&[3.0, 9.0]);
        assert_eq!(smoother.forecast(0), 9.0);
        assert_eq!(smoother.forecast(10), 9.0);
    }

    #[test]
    fn test_brown_single() {
        let mut smoother = BrownSingleSmoother::new(0.5);
        assert_eq!(smoother.smooth(2.0), 2.0);
        assert_eq!(smoother.smooth(4.0), 3.0);
        assert_eq!(smoother.forecast(5), 3.0);
    }

    #[test]
    fn test_brown_double_follows_linear_trend() {
        let mut smoother = BrownDoubleSmoother::new(0.5);
        let series: Vec<f64> = (0..200).map(|i| 2.0 * i as f64 + 1.0).collect();
        smoother.smooth_all(&series);

        // Level and slope of the line after the lag settles
        assert!((smoother.forecast(0) - 399.0).abs() < 1e-6);
        assert!((smoother.forecast(1) - 401.0).abs() < 1e-6);
    }

    #[test]
    fn test_holt_winters_initialization() {
        let mut smoother = HoltWintersSmoother::new(0.5, 0.5);
        assert_eq!(smoother.smooth(10.0), 10.0);
        assert_eq!(smoother.forecast(3), 10.0);

        // Second value only sets the trend
        assert_eq!(smoother.smooth(12.0), 10.0);
        assert_eq!(smoother.forecast(1), 12.0);

        // s = 0.5 * 14 + 0.5 * (10 + 2) = 13, b = 0.5 * 3 + 0.5 * 2 = 2.5
        assert_eq!(smoother.smooth(14.0), 13.0);
        assert_eq!(smoother.forecast(2), 18.0);
    }

    #[test]
    fn test_holt_winters_from_delta() {
        let smoother = HoltWintersSmoother::from_delta(0.5);
        assert!((smoother.alpha() - 0.75).abs() < 1e-12);
        assert!((smoother.beta() - 0.25 / 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        assert!(SmootherConfig::BrownDouble { alpha: 1.0 }.build().is_err());
        assert!(SmootherConfig::BrownSingle { alpha: 1.0 }.build().is_ok());
        assert!(SmootherConfig::HoltWintersDamped { delta: 0.0 }.build().is_err());

        let config: SmootherConfig =
            serde_json::from_str(r#"{"kind":"brown_single"}"#).unwrap();
        assert_eq!(config, SmootherConfig::BrownSingle { alpha: 0.7 });
    }
}
