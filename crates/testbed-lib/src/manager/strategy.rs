//! Pluggable control strategies
//!
//! A strategy only computes: it receives a snapshot of estimates, targets and
//! current shares, and returns the shares it wants. The manager validates and
//! applies the decision, and turns any strategy error into a counted failure.

use crate::models::{AppMetric, ResourceShares, VmId};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// One target metric as seen by a control cycle
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub metric: AppMetric,
    pub estimate: f64,
    pub target: f64,
    /// Smoother nowcast
    pub forecast: f64,
    /// Positive when the application has slack
    pub relative_error: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmReading {
    pub vm_id: VmId,
    pub cpu_cap: f64,
    pub shares: ResourceShares,
}

#[derive(Debug, Clone, Default)]
pub struct ControlInput {
    pub metrics: Vec<MetricReading>,
    pub vms: Vec<VmReading>,
}

impl ControlInput {
    pub fn metric(&self, metric: AppMetric) -> Option<&MetricReading> {
        self.metrics.iter().find(|r| r.metric == metric)
    }
}

/// Shares to apply; VMs not listed keep their allocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlDecision {
    pub shares: BTreeMap<VmId, ResourceShares>,
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("infeasible decision: {0}")]
    Infeasible(String),

    #[error("strategy error: {0}")]
    Internal(String),
}

pub trait ControlStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Forget any state carried between control cycles
    fn reset(&mut self) {}

    fn decide(&mut self, input: &ControlInput) -> Result<ControlDecision, StrategyError>;
}

/// Check a decision before it reaches the VMs
pub fn validate_decision(
    decision: &ControlDecision,
    input: &ControlInput,
) -> Result<(), StrategyError> {
    for (vm_id, shares) in &decision.shares {
        if !input.vms.iter().any(|vm| &vm.vm_id == vm_id) {
            return Err(StrategyError::Internal(format!(
                "decision targets unknown VM {}",
                vm_id
            )));
        }
        for (name, value) in [("cpu", shares.cpu_share), ("memory", shares.memory_share)] {
            if !value.is_finite() {
                return Err(StrategyError::Numerical(format!(
                    "{} share of VM {} is {}",
                    name, vm_id, value
                )));
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(StrategyError::Infeasible(format!(
                    "{} share of VM {} is {} (outside [0, 1])",
                    name, vm_id, value
                )));
            }
        }
    }
    Ok(())
}

/// Observe only: never changes any share
#[derive(Debug, Default)]
pub struct HoldStrategy;

impl ControlStrategy for HoldStrategy {
    fn name(&self) -> &'static str {
        "hold"
    }

    fn decide(&mut self, _input: &ControlInput) -> Result<ControlDecision, StrategyError> {
        Ok(ControlDecision::default())
    }
}

/// Moves every VM's CPU share against the relative error of one metric
///
/// `share' = clamp(share - gain * relative_error, min_share, max_share)`:
/// slack (positive error) releases CPU, a violated objective claims more.
#[derive(Debug, Clone)]
pub struct ProportionalShareStrategy {
    metric: AppMetric,
    gain: f64,
    min_share: f64,
    max_share: f64,
}

impl ProportionalShareStrategy {
    pub fn new(metric: AppMetric) -> Self {
        Self {
            metric,
            gain: 0.5,
            min_share: 0.1,
            max_share: 1.0,
        }
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_bounds(mut self, min_share: f64, max_share: f64) -> Self {
        self.min_share = min_share;
        self.max_share = max_share;
        self
    }
}

impl ControlStrategy for ProportionalShareStrategy {
    fn name(&self) -> &'static str {
        "proportional_share"
    }

    fn decide(&mut self, input: &ControlInput) -> Result<ControlDecision, StrategyError> {
        let reading = input.metric(self.metric).ok_or_else(|| {
            StrategyError::Internal(format!("no reading for {}", self.metric))
        })?;
        if !reading.relative_error.is_finite() {
            return Err(StrategyError::Numerical(format!(
                "relative error of {} is {}",
                self.metric, reading.relative_error
            )));
        }
        if self.min_share > self.max_share {
            return Err(StrategyError::Infeasible(format!(
                "share bounds [{}, {}] are empty",
                self.min_share, self.max_share
            )));
        }

        let mut decision = ControlDecision::default();
        for vm in &input.vms {
            let cpu_share = vm.shares.cpu_share - self.gain * reading.relative_error;
            if !cpu_share.is_finite() {
                return Err(StrategyError::Numerical(format!(
                    "CPU share of VM {} diverged",
                    vm.vm_id
                )));
            }
            decision.shares.insert(
                vm.vm_id.clone(),
                ResourceShares {
                    cpu_share: cpu_share.clamp(self.min_share, self.max_share),
                    memory_share: vm.shares.memory_share,
                },
            );
        }
        Ok(decision)
    }
}
