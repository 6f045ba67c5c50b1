//! Keyed registries of targets, estimators and smoothers of one manager
//!
//! Configuration (targets and estimator/smoother specs) is registered once
//! per experiment setup. Live instances are rebuilt from it at every
//! manager reset and owned outright by the state.

use crate::error::{Result, TestbedError};
use crate::estimator::{Estimator, EstimatorConfig};
use crate::models::{AppMetric, VmId, VmMetric};
use crate::smoother::{Smoother, SmootherConfig};
use std::collections::BTreeMap;

/// Registration key of a VM-level spec: `None` applies to every VM
type VmSpecKey = (VmMetric, Option<VmId>);

/// Key of a live VM-level instance
pub type VmKey = (VmMetric, VmId);

#[derive(Debug, Default)]
pub struct ManagerState {
    targets: BTreeMap<AppMetric, f64>,
    estimator_specs: BTreeMap<AppMetric, EstimatorConfig>,
    smoother_specs: BTreeMap<AppMetric, SmootherConfig>,
    vm_estimator_specs: BTreeMap<VmSpecKey, EstimatorConfig>,
    vm_smoother_specs: BTreeMap<VmSpecKey, SmootherConfig>,
    estimators: BTreeMap<AppMetric, Box<dyn Estimator>>,
    smoothers: BTreeMap<AppMetric, Box<dyn Smoother>>,
    vm_estimators: BTreeMap<VmKey, Box<dyn Estimator>>,
    vm_smoothers: BTreeMap<VmKey, Box<dyn Smoother>>,
}

fn duplicate(what: &str, key: impl std::fmt::Display) -> TestbedError {
    TestbedError::InvalidArgument(format!("{} already registered for {}", what, key))
}

fn vm_spec_label(metric: VmMetric, vm: &Option<VmId>) -> String {
    match vm {
        Some(id) => format!("{} of VM {}", metric, id),
        None => format!("{} of every VM", metric),
    }
}

impl ManagerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the objective for `metric`; must be finite and positive
    pub fn set_target_value(&mut self, metric: AppMetric, value: f64) -> Result<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(TestbedError::InvalidArgument(format!(
                "target value for {} must be finite and positive, got {}",
                metric, value
            )));
        }
        self.targets.insert(metric, value);
        Ok(())
    }

    pub fn target_value(&self, metric: AppMetric) -> Result<f64> {
        self.targets
            .get(&metric)
            .copied()
            .ok_or_else(|| TestbedError::NotFound(format!("no target value for {}", metric)))
    }

    pub fn target_values(&self) -> &BTreeMap<AppMetric, f64> {
        &self.targets
    }

    pub fn set_data_estimator(&mut self, metric: AppMetric, config: EstimatorConfig) -> Result<()> {
        if self.estimator_specs.contains_key(&metric) {
            return Err(duplicate("estimator", metric));
        }
        config.build()?;
        self.estimator_specs.insert(metric, config);
        Ok(())
    }

    pub fn set_data_smoother(&mut self, metric: AppMetric, config: SmootherConfig) -> Result<()> {
        if self.smoother_specs.contains_key(&metric) {
            return Err(duplicate("smoother", metric));
        }
        config.build()?;
        self.smoother_specs.insert(metric, config);
        Ok(())
    }

    /// Register a VM-level estimator, for one VM or (with `None`) for all
    ///
    /// A per-VM registration overrides the all-VM one for that VM.
    pub fn set_vm_data_estimator(
        &mut self,
        metric: VmMetric,
        vm: Option<VmId>,
        config: EstimatorConfig,
    ) -> Result<()> {
        let key = (metric, vm);
        if self.vm_estimator_specs.contains_key(&key) {
            return Err(duplicate("estimator", vm_spec_label(metric, &key.1)));
        }
        config.build()?;
        self.vm_estimator_specs.insert(key, config);
        Ok(())
    }

    pub fn set_vm_data_smoother(
        &mut self,
        metric: VmMetric,
        vm: Option<VmId>,
        config: SmootherConfig,
    ) -> Result<()> {
        let key = (metric, vm);
        if self.vm_smoother_specs.contains_key(&key) {
            return Err(duplicate("smoother", vm_spec_label(metric, &key.1)));
        }
        config.build()?;
        self.vm_smoother_specs.insert(key, config);
        Ok(())
    }

    pub fn data_estimator(&self, metric: AppMetric) -> Result<&dyn Estimator> {
        self.estimators
            .get(&metric)
            .map(|e| e.as_ref())
            .ok_or_else(|| TestbedError::NotFound(format!("no estimator for {}", metric)))
    }

    pub fn data_estimator_mut(&mut self, metric: AppMetric) -> Result<&mut (dyn Estimator + 'static)> {
        self.estimators
            .get_mut(&metric)
            .map(|e| e.as_mut())
            .ok_or_else(|| TestbedError::NotFound(format!("no estimator for {}", metric)))
    }

    pub fn data_smoother(&self, metric: AppMetric) -> Result<&dyn Smoother> {
        self.smoothers
            .get(&metric)
            .map(|s| s.as_ref())
            .ok_or_else(|| TestbedError::NotFound(format!("no smoother for {}", metric)))
    }

    pub fn vm_data_estimator(&self, metric: VmMetric, vm_id: &str) -> Result<&dyn Estimator> {
        self.vm_estimators
            .get(&(metric, vm_id.to_string()))
            .map(|e| e.as_ref())
            .ok_or_else(|| {
                TestbedError::NotFound(format!("no estimator for {} of VM {}", metric, vm_id))
            })
    }

    pub fn vm_data_estimator_mut(
        &mut self,
        metric: VmMetric,
        vm_id: &str,
    ) -> Result<&mut (dyn Estimator + 'static)> {
        self.vm_estimators
            .get_mut(&(metric, vm_id.to_string()))
            .map(|e| e.as_mut())
            .ok_or_else(|| {
                TestbedError::NotFound(format!("no estimator for {} of VM {}", metric, vm_id))
            })
    }

    pub fn vm_data_smoother(&self, metric: VmMetric, vm_id: &str) -> Result<&dyn Smoother> {
        self.vm_smoothers
            .get(&(metric, vm_id.to_string()))
            .map(|s| s.as_ref())
            .ok_or_else(|| {
                TestbedError::NotFound(format!("no smoother for {} of VM {}", metric, vm_id))
            })
    }

    /// Application metrics that have a live estimator
    pub fn sampled_metrics(&self) -> Vec<AppMetric> {
        self.estimators.keys().copied().collect()
    }

    /// (metric, VM) pairs that have a live estimator
    pub fn sampled_vm_metrics(&self) -> Vec<VmKey> {
        self.vm_estimators.keys().cloned().collect()
    }

    /// Fold a batch of observed values into the instances of `metric`
    ///
    /// The smoother only sees batches the estimator accepted.
    pub(crate) fn fold(&mut self, metric: AppMetric, values: &[f64]) -> Result<()> {
        if let Some(estimator) = self.estimators.get_mut(&metric) {
            estimator.collect_batch(values)?;
        }
        if let Some(smoother) = self.smoothers.get_mut(&metric) {
            smoother.smooth_all(values);
        }
        Ok(())
    }

    pub(crate) fn fold_vm(&mut self, key: &VmKey, values: &[f64]) -> Result<()> {
        if let Some(estimator) = self.vm_estimators.get_mut(key) {
            estimator.collect_batch(values)?;
        }
        if let Some(smoother) = self.vm_smoothers.get_mut(key) {
            smoother.smooth_all(values);
        }
        Ok(())
    }

    /// Reset the estimators of every target metric
    pub(crate) fn reset_target_estimators(&mut self) {
        for metric in self.targets.keys() {
            if let Some(estimator) = self.estimators.get_mut(metric) {
                estimator.reset();
            }
        }
    }

    /// Throw away live instances and build fresh ones from the registered specs
    ///
    /// Fails with `NotConfigured` when a target metric lacks an estimator or
    /// a smoother.
    pub(crate) fn rebuild(&mut self, vm_ids: &[VmId]) -> Result<()> {
        for metric in self.targets.keys() {
            if !self.estimator_specs.contains_key(metric) {
                return Err(TestbedError::NotConfigured(format!(
                    "no estimator registered for target metric {}",
                    metric
                )));
            }
            if !self.smoother_specs.contains_key(metric) {
                return Err(TestbedError::NotConfigured(format!(
                    "no smoother registered for target metric {}",
                    metric
                )));
            }
        }

        let mut estimators = BTreeMap::new();
        for (metric, spec) in &self.estimator_specs {
            estimators.insert(*metric, spec.build()?);
        }
        let mut smoothers = BTreeMap::new();
        for (metric, spec) in &self.smoother_specs {
            smoothers.insert(*metric, spec.build()?);
        }

        let mut vm_estimators = BTreeMap::new();
        let mut vm_smoothers = BTreeMap::new();
        for vm_id in vm_ids {
            for metric in [VmMetric::CpuUtil, VmMetric::MemoryUtil] {
                if let Some(spec) = resolve(&self.vm_estimator_specs, metric, vm_id) {
                    vm_estimators.insert((metric, vm_id.clone()), spec.build()?);
                }
                if let Some(spec) = resolve(&self.vm_smoother_specs, metric, vm_id) {
                    vm_smoothers.insert((metric, vm_id.clone()), spec.build()?);
                }
            }
        }

        self.estimators = estimators;
        self.smoothers = smoothers;
        self.vm_estimators = vm_estimators;
        self.vm_smoothers = vm_smoothers;
        Ok(())
    }
}

fn resolve<'a, T>(specs: &'a BTreeMap<VmSpecKey, T>, metric: VmMetric, vm_id: &VmId) -> Option<&'a T> {
    specs
        .get(&(metric, Some(vm_id.clone())))
        .or_else(|| specs.get(&(metric, None)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> ManagerState {
        let mut state = ManagerState::new();
        state.set_target_value(AppMetric::ResponseTime, 0.3).unwrap();
        state
            .set_data_estimator(AppMetric::ResponseTime, EstimatorConfig::Mean)
            .unwrap();
        state
            .set_data_smoother(AppMetric::ResponseTime, SmootherConfig::Dummy)
            .unwrap();
        state
    }

    #[test]
    fn test_missing_smoother_is_not_configured() {
        let mut state = ManagerState::new();
        state.set_target_value(AppMetric::ResponseTime, 0.3).unwrap();
        state
            .set_data_estimator(AppMetric::ResponseTime, EstimatorConfig::Mean)
            .unwrap();

        let err = state.rebuild(&[]).unwrap_err();
        assert!(matches!(err, TestbedError::NotConfigured(_)));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut state = configured();
        let err = state
            .set_data_estimator(AppMetric::ResponseTime, EstimatorConfig::MostRecentlyObserved)
            .unwrap_err();
        assert!(matches!(err, TestbedError::InvalidArgument(_)));

        state
            .set_vm_data_estimator(VmMetric::CpuUtil, None, EstimatorConfig::Mean)
            .unwrap();
        assert!(state
            .set_vm_data_estimator(VmMetric::CpuUtil, None, EstimatorConfig::Mean)
            .is_err());
        // A per-VM override is a different key
        assert!(state
            .set_vm_data_estimator(
                VmMetric::CpuUtil,
                Some("vm1".into()),
                EstimatorConfig::MostRecentlyObserved
            )
            .is_ok());
    }

    #[test]
    fn test_lookups_before_rebuild_not_found() {
        let state = configured();
        assert!(matches!(
            state.data_estimator(AppMetric::ResponseTime).unwrap_err(),
            TestbedError::NotFound(_)
        ));
        assert!(matches!(
            state.target_value(AppMetric::Throughput).unwrap_err(),
            TestbedError::NotFound(_)
        ));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let mut state = ManagerState::new();
        for bad in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                state.set_target_value(AppMetric::ResponseTime, bad).unwrap_err(),
                TestbedError::InvalidArgument(_)
            ));
        }
    }

    #[test]
    fn test_rebuild_applies_vm_overrides() {
        let mut state = configured();
        state
            .set_vm_data_estimator(VmMetric::CpuUtil, None, EstimatorConfig::Mean)
            .unwrap();
        state
            .set_vm_data_estimator(
                VmMetric::CpuUtil,
                Some("vm2".into()),
                EstimatorConfig::MostRecentlyObserved,
            )
            .unwrap();

        state.rebuild(&["vm1".to_string(), "vm2".to_string()]).unwrap();

        assert_eq!(state.vm_data_estimator(VmMetric::CpuUtil, "vm1").unwrap().name(), "mean");
        assert_eq!(
            state.vm_data_estimator(VmMetric::CpuUtil, "vm2").unwrap().name(),
            "most_recently_observed"
        );
        assert!(state.vm_data_estimator(VmMetric::MemoryUtil, "vm1").is_err());
        assert_eq!(state.sampled_vm_metrics().len(), 2);
    }

    #[test]
    fn test_rejected_batch_leaves_smoother_untouched() {
        let mut state = ManagerState::new();
        state.set_target_value(AppMetric::ResponseTime, 0.3).unwrap();
        state
            .set_data_estimator(
                AppMetric::ResponseTime,
                EstimatorConfig::ChenEwma {
                    probability: 0.5,
                    w: 0.05,
                    clamp: true,
                },
            )
            .unwrap();
        state
            .set_data_smoother(AppMetric::ResponseTime, SmootherConfig::BrownSingle { alpha: 0.5 })
            .unwrap();
        state.rebuild(&[]).unwrap();

        let err = state
            .fold(AppMetric::ResponseTime, &[0.2, f64::NAN])
            .unwrap_err();
        assert!(matches!(err, TestbedError::InvalidState(_)));
        assert!(state.data_smoother(AppMetric::ResponseTime).unwrap().forecast(0).is_nan());

        state.fold(AppMetric::ResponseTime, &[0.2, 0.3]).unwrap();
        assert_eq!(state.data_estimator(AppMetric::ResponseTime).unwrap().count(), 1);
        let forecast = state.data_smoother(AppMetric::ResponseTime).unwrap().forecast(0);
        assert!(forecast.is_finite());
        assert!((0.2..=0.3).contains(&forecast));
    }

    #[test]
    fn test_rebuild_discards_collected_data() {
        let mut state = configured();
        state.rebuild(&[]).unwrap();
        state.fold(AppMetric::ResponseTime, &[0.1, 0.2]).unwrap();
        assert_eq!(state.data_estimator(AppMetric::ResponseTime).unwrap().count(), 1);

        state.rebuild(&[]).unwrap();
        assert_eq!(state.data_estimator(AppMetric::ResponseTime).unwrap().count(), 0);
        assert!(state.data_smoother(AppMetric::ResponseTime).unwrap().forecast(0).is_nan());
    }
}
