//! Core data models for the control-loop testbed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a virtual machine as reported by its driver
pub type VmId = String;

/// Identifier of an application
pub type AppId = String;

/// Identifier of an application experiment
pub type ExperimentId = u64;

/// A single value produced by a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub value: f64,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, label: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            label: label.into(),
            value,
        }
    }

    /// Observation stamped with the current time
    pub fn now(label: impl Into<String>, value: f64) -> Self {
        Self::new(Utc::now(), label, value)
    }
}

/// Application-level performance metrics (the SLO side of the loop)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMetric {
    ResponseTime,
    Throughput,
}

impl AppMetric {
    /// Relative deviation of `estimate` from `target`, positive when the
    /// application has slack with respect to its objective.
    pub fn relative_error(&self, estimate: f64, target: f64) -> f64 {
        match self {
            AppMetric::ResponseTime => (target - estimate) / target,
            AppMetric::Throughput => (estimate - target) / target,
        }
    }
}

impl fmt::Display for AppMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMetric::ResponseTime => write!(f, "rt"),
            AppMetric::Throughput => write!(f, "tput"),
        }
    }
}

/// Resource-level metrics exposed by every VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmMetric {
    CpuUtil,
    MemoryUtil,
}

impl fmt::Display for VmMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmMetric::CpuUtil => write!(f, "cpu_util"),
            VmMetric::MemoryUtil => write!(f, "mem_util"),
        }
    }
}

/// Saved resource allocation of one VM
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceShares {
    pub cpu_share: f64,
    pub memory_share: f64,
}

/// Control-cycle counters of an application manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCounters {
    /// Number of times `control()` has been invoked
    pub control_count: u64,
    /// Number of control cycles skipped for lack of observations
    pub control_skip_count: u64,
    /// Number of control cycles where the strategy produced no valid decision
    pub control_fail_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_error_sign() {
        // Response time below target means slack
        assert!(AppMetric::ResponseTime.relative_error(0.2, 0.3) > 0.0);
        assert!(AppMetric::ResponseTime.relative_error(0.4, 0.3) < 0.0);
        // Throughput above target means slack
        assert!(AppMetric::Throughput.relative_error(120.0, 100.0) > 0.0);
        assert!((AppMetric::Throughput.relative_error(80.0, 100.0) + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_metric_serde_names() {
        let json = serde_json::to_string(&AppMetric::ResponseTime).unwrap();
        assert_eq!(json, "\"response_time\"");
        let metric: VmMetric = serde_json::from_str("\"memory_util\"").unwrap();
        assert_eq!(metric, VmMetric::MemoryUtil);
    }
}
