//! Application manager: the reset/sample/control state machine
//!
//! The manager owns its registries, counters and control report, reads
//! sensors and writes shares through the collaborator traits, and delegates
//! the actual decision to a [`ControlStrategy`]. Missing data and failed
//! decisions are counted outcomes, never errors.

mod report;
mod state;
mod strategy;

pub use report::{ControlReport, ReportRow};
pub use state::{ManagerState, VmKey};
pub use strategy::{
    validate_decision, ControlDecision, ControlInput, ControlStrategy, HoldStrategy,
    MetricReading, ProportionalShareStrategy, StrategyError, VmReading,
};

use crate::collaborator::{Application, Sensor, VirtualMachine};
use crate::error::{Result, TestbedError};
use crate::estimator::EstimatorConfig;
use crate::events::{ControlOutcome, ControlSnapshot, EventBus, EventKind};
use crate::models::{AppMetric, ControlCounters, ExperimentId, ResourceShares, VmId, VmMetric};
use crate::observability::{ExperimentLogger, TestbedMetrics};
use crate::smoother::SmootherConfig;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default sampling period
pub const DEFAULT_SAMPLING_TIME: Duration = Duration::from_secs(10);

/// Default control period
pub const DEFAULT_CONTROL_TIME: Duration = Duration::from_secs(30);

pub struct ApplicationManager {
    app: Option<Arc<dyn Application>>,
    strategy: Box<dyn ControlStrategy>,
    state: ManagerState,
    counters: ControlCounters,
    sampling_time: Duration,
    control_time: Duration,
    reset_estimators_every_control: bool,
    report_path: Option<PathBuf>,
    report: Option<ControlReport>,
    app_sensors: Vec<(AppMetric, Arc<dyn Sensor>)>,
    vm_sensors: Vec<(VmKey, Arc<dyn Sensor>)>,
    events: Option<EventBus>,
    experiment_id: Option<ExperimentId>,
    logger: ExperimentLogger,
    metrics: TestbedMetrics,
    ready: bool,
}

impl Default for ApplicationManager {
    fn default() -> Self {
        Self::new(Box::new(HoldStrategy))
    }
}

impl ApplicationManager {
    pub fn new(strategy: Box<dyn ControlStrategy>) -> Self {
        Self {
            app: None,
            strategy,
            state: ManagerState::new(),
            counters: ControlCounters::default(),
            sampling_time: DEFAULT_SAMPLING_TIME,
            control_time: DEFAULT_CONTROL_TIME,
            reset_estimators_every_control: false,
            report_path: None,
            report: None,
            app_sensors: Vec::new(),
            vm_sensors: Vec::new(),
            events: None,
            experiment_id: None,
            logger: ExperimentLogger::new("unbound"),
            metrics: TestbedMetrics::new(),
            ready: false,
        }
    }

    pub fn set_app(&mut self, app: Arc<dyn Application>) {
        self.app = Some(app);
        self.ready = false;
    }

    pub fn app(&self) -> Result<&Arc<dyn Application>> {
        self.app
            .as_ref()
            .ok_or_else(|| TestbedError::NotConfigured("no application attached".into()))
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn set_sampling_time(&mut self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(TestbedError::InvalidArgument(
                "sampling time must be positive".into(),
            ));
        }
        self.sampling_time = period;
        Ok(())
    }

    pub fn sampling_time(&self) -> Duration {
        self.sampling_time
    }

    pub fn set_control_time(&mut self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(TestbedError::InvalidArgument(
                "control time must be positive".into(),
            ));
        }
        self.control_time = period;
        Ok(())
    }

    pub fn control_time(&self) -> Duration {
        self.control_time
    }

    /// Reset target estimators after every non-skipped control cycle, so that
    /// each control interval only sees its own observations
    pub fn set_reset_estimators_every_control(&mut self, enabled: bool) {
        self.reset_estimators_every_control = enabled;
    }

    /// Write one CSV row per control cycle to `path` (created at reset)
    pub fn export_data_to(&mut self, path: impl Into<PathBuf>) {
        self.report_path = Some(path.into());
    }

    pub fn set_target_value(&mut self, metric: AppMetric, value: f64) -> Result<()> {
        self.state.set_target_value(metric, value)
    }

    pub fn target_value(&self, metric: AppMetric) -> Result<f64> {
        self.state.target_value(metric)
    }

    pub fn set_data_estimator(&mut self, metric: AppMetric, config: EstimatorConfig) -> Result<()> {
        self.state.set_data_estimator(metric, config)
    }

    pub fn set_data_smoother(&mut self, metric: AppMetric, config: SmootherConfig) -> Result<()> {
        self.state.set_data_smoother(metric, config)
    }

    pub fn set_vm_data_estimator(
        &mut self,
        metric: VmMetric,
        vm: Option<VmId>,
        config: EstimatorConfig,
    ) -> Result<()> {
        self.state.set_vm_data_estimator(metric, vm, config)
    }

    pub fn set_vm_data_smoother(
        &mut self,
        metric: VmMetric,
        vm: Option<VmId>,
        config: SmootherConfig,
    ) -> Result<()> {
        self.state.set_vm_data_smoother(metric, vm, config)
    }

    pub fn state(&self) -> &ManagerState {
        &self.state
    }

    pub fn counters(&self) -> ControlCounters {
        self.counters
    }

    /// Attach the manager to an experiment's event stream
    pub fn bind_events(&mut self, experiment_id: ExperimentId, name: &str, events: EventBus) {
        self.experiment_id = Some(experiment_id);
        self.logger = ExperimentLogger::new(name);
        self.events = Some(events);
    }

    fn emit(&self, kind: EventKind) {
        if let Some(events) = &self.events {
            events.emit(self.experiment_id, kind, self.counters);
        }
    }

    fn ensure_ready(&self) -> Result<Arc<dyn Application>> {
        if !self.ready {
            return Err(TestbedError::InvalidState(
                "manager must be reset before sampling or control".into(),
            ));
        }
        self.app().cloned()
    }

    /// Rebuild estimators and smoothers, zero the counters and re-acquire sensors
    pub async fn reset(&mut self) -> Result<()> {
        let app = self.app()?.clone();
        self.ready = false;

        let vms = app.vms();
        let vm_ids: Vec<VmId> = vms.iter().map(|vm| vm.id()).collect();
        self.state.rebuild(&vm_ids)?;
        self.counters = ControlCounters::default();

        let mut app_sensors = Vec::new();
        for metric in self.state.sampled_metrics() {
            let sensor = app.sensor(metric)?;
            sensor.reset().await?;
            app_sensors.push((metric, sensor));
        }

        let mut vm_sensors = Vec::new();
        for (metric, vm_id) in self.state.sampled_vm_metrics() {
            let Some(vm) = vms.iter().find(|vm| vm.id() == vm_id) else {
                continue;
            };
            let sensor = vm.sensor(metric)?;
            sensor.reset().await?;
            vm_sensors.push(((metric, vm_id), sensor));
        }
        self.app_sensors = app_sensors;
        self.vm_sensors = vm_sensors;

        self.strategy.reset();

        let targets: Vec<AppMetric> = self.state.target_values().keys().copied().collect();
        self.report = match &self.report_path {
            Some(path) => Some(ControlReport::create(path, vms.len(), &targets)?),
            None => None,
        };

        self.ready = true;
        info!(
            app_id = %app.id(),
            vms = vms.len(),
            app_sensors = self.app_sensors.len(),
            vm_sensors = self.vm_sensors.len(),
            strategy = self.strategy.name(),
            "Application manager reset"
        );
        self.emit(EventKind::Reset);
        Ok(())
    }

    /// Pull available observations from every sensor into the estimators and smoothers
    pub async fn sample(&mut self) -> Result<()> {
        self.ensure_ready()?;

        for (metric, sensor) in self.app_sensors.clone() {
            let Some(values) = probe(sensor.as_ref()).await? else {
                continue;
            };
            debug!(metric = %metric, observations = values.len(), "Sampled application metric");
            if let Err(e) = self.state.fold(metric, &values) {
                self.metrics.inc_sensor_errors();
                warn!(metric = %metric, error = %e, "Estimator refused observations");
            }
        }

        for (key, sensor) in self.vm_sensors.clone() {
            let Some(values) = probe(sensor.as_ref()).await? else {
                continue;
            };
            if let Err(e) = self.state.fold_vm(&key, &values) {
                self.metrics.inc_sensor_errors();
                warn!(metric = %key.0, vm_id = %key.1, error = %e, "Estimator refused observations");
            }
        }

        self.emit(EventKind::Sample);
        Ok(())
    }

    /// Run one control cycle
    ///
    /// Returns the cycle's outcome. Errors are reserved for collaborator
    /// failures while reading or writing VM shares, and for report I/O.
    pub async fn control(&mut self) -> Result<ControlOutcome> {
        let app = self.ensure_ready()?;
        let vms = app.vms();

        self.counters.control_count += 1;

        let missing = self
            .state
            .target_values()
            .keys()
            .copied()
            .find(|metric| {
                self.state
                    .data_estimator(*metric)
                    .map(|e| e.count() == 0)
                    .unwrap_or(true)
            });

        let outcome = match missing {
            Some(metric) => {
                self.counters.control_skip_count += 1;
                self.logger.log_control_skipped(metric, &self.counters);
                ControlOutcome::Skipped
            }
            None => {
                let input = ControlInput {
                    metrics: self.readings()?,
                    vms: read_vms(&vms).await?,
                };
                let decision = self
                    .strategy
                    .decide(&input)
                    .and_then(|d| validate_decision(&d, &input).map(|_| d));
                match decision {
                    Ok(decision) => {
                        apply(&vms, &decision).await?;
                        debug!(
                            strategy = self.strategy.name(),
                            changed = decision.shares.len(),
                            "Control decision applied"
                        );
                        ControlOutcome::Applied
                    }
                    Err(e) => {
                        self.counters.control_fail_count += 1;
                        self.logger.log_control_failed(
                            self.strategy.name(),
                            &e.to_string(),
                            &self.counters,
                        );
                        ControlOutcome::Failed
                    }
                }
            }
        };
        self.metrics.inc_control_outcome(outcome.as_str());

        let snapshot = self.snapshot(&vms).await;
        self.write_report(&vms, &snapshot).await?;

        if outcome != ControlOutcome::Skipped && self.reset_estimators_every_control {
            self.state.reset_target_estimators();
        }

        self.emit(EventKind::Control { outcome, snapshot });
        Ok(outcome)
    }

    fn readings(&mut self) -> Result<Vec<MetricReading>> {
        let targets: Vec<(AppMetric, f64)> =
            self.state.target_values().iter().map(|(m, t)| (*m, *t)).collect();

        let mut readings = Vec::with_capacity(targets.len());
        for (metric, target) in targets {
            let estimate = self.state.data_estimator_mut(metric)?.estimate();
            let forecast = self.state.data_smoother(metric)?.forecast(0);
            readings.push(MetricReading {
                metric,
                estimate,
                target,
                forecast,
                relative_error: metric.relative_error(estimate, target),
            });
        }
        Ok(readings)
    }

    async fn snapshot(&mut self, vms: &[Arc<dyn VirtualMachine>]) -> ControlSnapshot {
        let mut snapshot = ControlSnapshot::default();
        let targets: Vec<AppMetric> = self.state.target_values().keys().copied().collect();
        for metric in targets {
            if let Ok(estimator) = self.state.data_estimator_mut(metric) {
                snapshot.estimates.insert(metric, estimator.estimate());
            }
        }
        for vm in vms {
            if let Ok(share) = vm.cpu_share().await {
                snapshot.cpu_shares.insert(vm.id(), share);
            }
        }
        snapshot
    }

    async fn write_report(
        &mut self,
        vms: &[Arc<dyn VirtualMachine>],
        snapshot: &ControlSnapshot,
    ) -> Result<()> {
        if self.report.is_none() {
            return Ok(());
        }

        let mut row = ReportRow {
            timestamp: Utc::now().timestamp(),
            counters: self.counters,
            ..Default::default()
        };
        for vm in vms {
            let cap = vm.cpu_cap().await.unwrap_or(f64::NAN);
            let share = snapshot
                .cpu_shares
                .get(&vm.id())
                .copied()
                .unwrap_or(f64::NAN);
            row.vms.push((cap, share));
        }
        for (metric, target) in self.state.target_values() {
            let estimate = snapshot.estimates.get(metric).copied().unwrap_or(f64::NAN);
            row.metrics
                .push((estimate, *target, metric.relative_error(estimate, *target)));
        }

        match self.report.as_mut() {
            Some(report) => report.write_row(&row),
            None => Ok(()),
        }
    }
}

/// Probe a sensor, returning the values it produced (None when nothing new)
async fn probe(sensor: &dyn Sensor) -> Result<Option<Vec<f64>>> {
    sensor.sense().await?;
    if !sensor.has_observations() {
        return Ok(None);
    }
    let values: Vec<f64> = sensor.observations().into_iter().map(|o| o.value).collect();
    if values.is_empty() {
        return Ok(None);
    }
    Ok(Some(values))
}

async fn read_vms(vms: &[Arc<dyn VirtualMachine>]) -> Result<Vec<VmReading>> {
    let mut readings = Vec::with_capacity(vms.len());
    for vm in vms {
        readings.push(VmReading {
            vm_id: vm.id(),
            cpu_cap: vm.cpu_cap().await?,
            shares: ResourceShares {
                cpu_share: vm.cpu_share().await?,
                memory_share: vm.memory_share().await?,
            },
        });
    }
    Ok(readings)
}

async fn apply(vms: &[Arc<dyn VirtualMachine>], decision: &ControlDecision) -> Result<()> {
    for vm in vms {
        if let Some(shares) = decision.shares.get(&vm.id()) {
            vm.set_cpu_share(shares.cpu_share).await?;
            vm.set_memory_share(shares.memory_share).await?;
        }
    }
    Ok(())
}
