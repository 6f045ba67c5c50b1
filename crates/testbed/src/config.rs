//! Testbed configuration

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::time::Duration;
use testbed_lib::estimator::EstimatorConfig;
use testbed_lib::smoother::SmootherConfig;
use testbed_lib::AppMetric;

/// Testbed configuration, read from `TESTBED_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct TestbedConfig {
    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Sampling period in seconds
    #[serde(default = "default_sampling_time")]
    pub sampling_time_secs: f64,

    /// Control period in seconds (default: three sampling periods)
    #[serde(default)]
    pub control_time_secs: Option<f64>,

    /// Driver readiness/completion poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// SLO metric: "rt" or "tput"
    #[serde(default = "default_slo_metric")]
    pub slo_metric: String,

    #[serde(default = "default_slo_value")]
    pub slo_value: f64,

    /// Estimator kind (mean, mro, true_quantile, p2, chen_ewma, chen_sa,
    /// chen_ewsa, welsh_ewma, recursive, chambers, bakshi_lora)
    #[serde(default = "default_estimator")]
    pub estimator: String,

    #[serde(default = "default_quantile_probability")]
    pub quantile_probability: f64,

    #[serde(default = "default_chen_w")]
    pub chen_w: f64,

    #[serde(default = "default_welsh_alpha")]
    pub welsh_alpha: f64,

    /// Smoother kind (dummy, brown_single, brown_double, holt_winters)
    #[serde(default = "default_smoother")]
    pub smoother: String,

    #[serde(default = "default_smoother_alpha")]
    pub smoother_alpha: f64,

    #[serde(default = "default_smoother_beta")]
    pub smoother_beta: f64,

    /// Holt-Winters damping factor; overrides alpha/beta when set
    #[serde(default)]
    pub smoother_delta: Option<f64>,

    /// Control strategy: "hold" or "proportional_share"
    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(default = "default_true")]
    pub restore_vms: bool,

    /// CSV control report path
    #[serde(default)]
    pub report_path: Option<String>,

    /// Number of simulated VMs
    #[serde(default = "default_num_vms")]
    pub num_vms: usize,

    #[serde(default = "default_sim_ramp_up")]
    pub sim_ramp_up_secs: f64,

    #[serde(default = "default_sim_duration")]
    pub sim_duration_secs: f64,

    /// Offered load as a fraction of one CPU
    #[serde(default = "default_sim_load")]
    pub sim_load: f64,
}

fn default_api_port() -> u16 {
    8080
}

fn default_sampling_time() -> f64 {
    10.0
}

fn default_poll_interval() -> f64 {
    5.0
}

fn default_slo_metric() -> String {
    "rt".to_string()
}

fn default_slo_value() -> f64 {
    0.3
}

fn default_estimator() -> String {
    "mean".to_string()
}

fn default_quantile_probability() -> f64 {
    0.99
}

fn default_chen_w() -> f64 {
    0.05
}

fn default_welsh_alpha() -> f64 {
    0.7
}

fn default_smoother() -> String {
    "dummy".to_string()
}

fn default_smoother_alpha() -> f64 {
    0.7
}

fn default_smoother_beta() -> f64 {
    0.3
}

fn default_strategy() -> String {
    "proportional_share".to_string()
}

fn default_true() -> bool {
    true
}

fn default_num_vms() -> usize {
    1
}

fn default_sim_ramp_up() -> f64 {
    5.0
}

fn default_sim_duration() -> f64 {
    120.0
}

fn default_sim_load() -> f64 {
    0.5
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        bail!("{} must be a positive number of seconds, got {}", name, secs);
    }
    Ok(Duration::from_secs_f64(secs))
}

impl TestbedConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("TESTBED"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn sampling_time(&self) -> Result<Duration> {
        seconds("sampling time", self.sampling_time_secs)
    }

    pub fn control_time(&self) -> Result<Duration> {
        match self.control_time_secs {
            Some(secs) => seconds("control time", secs),
            None => Ok(self.sampling_time()? * 3),
        }
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        seconds("poll interval", self.poll_interval_secs)
    }

    pub fn sim_ramp_up(&self) -> Result<Duration> {
        seconds("simulated ramp-up", self.sim_ramp_up_secs)
    }

    pub fn sim_duration(&self) -> Result<Duration> {
        seconds("simulated duration", self.sim_duration_secs)
    }

    pub fn slo_metric(&self) -> Result<AppMetric> {
        match self.slo_metric.as_str() {
            "rt" | "response_time" => Ok(AppMetric::ResponseTime),
            "tput" | "throughput" => Ok(AppMetric::Throughput),
            other => Err(anyhow!("unknown SLO metric {:?}", other)),
        }
    }

    pub fn estimator_config(&self) -> Result<EstimatorConfig> {
        let probability = self.quantile_probability;
        let config = match self.estimator.as_str() {
            "mean" => EstimatorConfig::Mean,
            "mro" | "most_recently_observed" => EstimatorConfig::MostRecentlyObserved,
            "true_quantile" => EstimatorConfig::TrueQuantile { probability },
            "p2" => EstimatorConfig::P2 { probability },
            "chen_ewma" => EstimatorConfig::ChenEwma {
                probability,
                w: self.chen_w,
                clamp: false,
            },
            "chen_sa" => EstimatorConfig::ChenSa { probability },
            "chen_ewsa" => EstimatorConfig::ChenEwsa {
                probability,
                w: self.chen_w,
            },
            "welsh_ewma" => EstimatorConfig::WelshEwma {
                probability,
                alpha: self.welsh_alpha,
                extended: false,
            },
            "welsh_ewma_ext" => EstimatorConfig::WelshEwma {
                probability,
                alpha: self.welsh_alpha,
                extended: true,
            },
            "recursive" => EstimatorConfig::Recursive {
                probability,
                w: self.chen_w,
            },
            "chambers" => EstimatorConfig::Chambers { probability },
            "bakshi_lora" => serde_json::from_value(serde_json::json!({
                "kind": "bakshi_lora",
                "probability": probability,
            }))?,
            other => bail!("unknown estimator {:?}", other),
        };
        // Surface bad parameters at startup
        config.build()?;
        Ok(config)
    }

    pub fn smoother_config(&self) -> Result<SmootherConfig> {
        let alpha = self.smoother_alpha;
        let config = match (self.smoother.as_str(), self.smoother_delta) {
            ("dummy", _) => SmootherConfig::Dummy,
            ("brown_single", _) => SmootherConfig::BrownSingle { alpha },
            ("brown_double", _) => SmootherConfig::BrownDouble { alpha },
            ("holt_winters", Some(delta)) => SmootherConfig::HoltWintersDamped { delta },
            ("holt_winters", None) => SmootherConfig::HoltWinters {
                alpha,
                beta: self.smoother_beta,
            },
            (other, _) => bail!("unknown smoother {:?}", other),
        };
        config.build()?;
        Ok(config)
    }
}
