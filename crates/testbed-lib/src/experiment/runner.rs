//! One application's experiment lifecycle

use super::ids::ExperimentIdGenerator;
use super::periodic::{Activity, PeriodicTask};
use crate::collaborator::{Application, VirtualMachine, WorkloadDriver};
use crate::error::{Result, TestbedError};
use crate::events::{EventBus, EventKind};
use crate::health::{components, HealthRegistry};
use crate::manager::ApplicationManager;
use crate::models::{ControlCounters, ExperimentId, ResourceShares};
use crate::observability::{ExperimentLogger, TestbedMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Default interval between driver readiness/completion checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

type VmSnapshot = Vec<(Arc<dyn VirtualMachine>, ResourceShares)>;

#[derive(Debug, Clone, Copy)]
enum DriverPhase {
    Ready,
    Done,
}

/// How a driver poll ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Reached,
    /// The workload completed before becoming ready
    Finished,
    Cancelled,
}

/// Runs one application under one workload driver and one manager
///
/// The manager is shared with the sampler and controller tasks behind a
/// single async mutex; [`ApplicationExperiment::manager`] exposes it for
/// inspection once `run()` returned.
pub struct ApplicationExperiment {
    id: ExperimentId,
    name: String,
    app: Option<Arc<dyn Application>>,
    driver: Option<Arc<dyn WorkloadDriver>>,
    manager: Option<Arc<Mutex<ApplicationManager>>>,
    restore_state: bool,
    poll_interval: Duration,
    events: EventBus,
    health: Option<HealthRegistry>,
    cancel: watch::Sender<bool>,
    logger: ExperimentLogger,
    metrics: TestbedMetrics,
}

impl ApplicationExperiment {
    pub fn new(ids: &ExperimentIdGenerator) -> Self {
        let id = ids.next_id();
        let name = format!("app-experiment-{}", id);
        Self {
            id,
            logger: ExperimentLogger::new(name.clone()),
            name,
            app: None,
            driver: None,
            manager: None,
            restore_state: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            events: EventBus::default(),
            health: None,
            cancel: watch::channel(false).0,
            metrics: TestbedMetrics::new(),
        }
    }

    pub fn id(&self) -> ExperimentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_app(mut self, app: Arc<dyn Application>) -> Self {
        self.app = Some(app);
        self
    }

    pub fn with_driver(mut self, driver: Arc<dyn WorkloadDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_manager(mut self, manager: ApplicationManager) -> Self {
        self.manager = Some(Arc::new(Mutex::new(manager)));
        self
    }

    /// Write the VM shares captured at start back when the run ends (default: on)
    pub fn with_restore_state(mut self, restore: bool) -> Self {
        self.restore_state = restore;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(TestbedError::InvalidArgument(
                "driver poll interval must be positive".into(),
            ));
        }
        self.poll_interval = interval;
        Ok(self)
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn app(&self) -> Option<&Arc<dyn Application>> {
        self.app.as_ref()
    }

    pub fn manager(&self) -> Option<&Arc<Mutex<ApplicationManager>>> {
        self.manager.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Ask a running (or future) `run()` to wind down early
    ///
    /// The run stops both periodic tasks, stops the driver and restores VM
    /// state as if the workload had completed. Cancellation is sticky.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub(crate) fn set_events(&mut self, events: EventBus) {
        self.events = events;
    }

    fn parts(
        &self,
    ) -> Result<(
        Arc<dyn Application>,
        Arc<dyn WorkloadDriver>,
        Arc<Mutex<ApplicationManager>>,
    )> {
        let app = self
            .app
            .clone()
            .ok_or_else(|| TestbedError::NotConfigured("application not set".into()))?;
        let driver = self
            .driver
            .clone()
            .ok_or_else(|| TestbedError::NotConfigured("workload driver not set".into()))?;
        let manager = self
            .manager
            .clone()
            .ok_or_else(|| TestbedError::NotConfigured("application manager not set".into()))?;
        Ok((app, driver, manager))
    }

    fn emit(&self, kind: EventKind, counters: ControlCounters) {
        self.events.emit(Some(self.id), kind, counters);
    }

    /// Run the experiment to completion
    ///
    /// Returns once the driver reported completion, both periodic tasks have
    /// exited and the driver was stopped. VM shares are restored (when
    /// enabled) even if the run fails after they were captured.
    pub async fn run(&self) -> Result<()> {
        let (app, driver, manager) = self.parts()?;

        let saved = if self.restore_state {
            Some(capture_shares(&app).await?)
        } else {
            None
        };

        self.metrics.experiment_started();
        let result = self.execute(&app, &driver, &manager).await;

        if let Some(saved) = saved {
            self.restore_shares(saved).await;
        }
        self.metrics.experiment_finished();

        let counters = manager.lock().await.counters();
        match &result {
            Ok(()) => self.logger.log_stopped(self.id, &counters),
            Err(e) => warn!(
                experiment = %self.name,
                experiment_id = self.id,
                error = %e,
                "Application experiment aborted"
            ),
        }
        self.emit(EventKind::Stop, counters);
        result
    }

    async fn execute(
        &self,
        app: &Arc<dyn Application>,
        driver: &Arc<dyn WorkloadDriver>,
        manager: &Arc<Mutex<ApplicationManager>>,
    ) -> Result<()> {
        let counters = {
            let mut manager = manager.lock().await;
            manager.set_app(app.clone());
            manager.bind_events(self.id, &self.name, self.events.clone());
            manager.reset().await?;
            manager.counters()
        };
        driver.reset().await?;

        self.logger
            .log_started(self.id, &app.id(), self.restore_state);
        self.emit(EventKind::Start, counters);

        let outcome = match driver.start().await {
            Ok(()) => self.drive(driver, manager).await,
            Err(e) => Err(e.into()),
        };

        let stopped = driver.stop().await;
        match (outcome, stopped) {
            (Err(e), Err(stop_err)) => {
                self.logger.log_cleanup_failed("driver_stop", &stop_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(stop_err)) => Err(stop_err.into()),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Wait for the driver, run sampler and controller until it is done
    async fn drive(
        &self,
        driver: &Arc<dyn WorkloadDriver>,
        manager: &Arc<Mutex<ApplicationManager>>,
    ) -> Result<()> {
        if let Some(health) = &self.health {
            health.register(components::DRIVER).await;
        }
        match self.poll_driver(driver, DriverPhase::Ready).await? {
            PollOutcome::Reached => {}
            PollOutcome::Finished => {
                warn!(experiment = %self.name, "Workload finished before becoming ready");
                return Ok(());
            }
            PollOutcome::Cancelled => {
                info!(experiment = %self.name, "Experiment cancelled before workload was ready");
                return Ok(());
            }
        }

        let (sampling_time, control_time) = {
            let manager = manager.lock().await;
            (manager.sampling_time(), manager.control_time())
        };
        info!(
            experiment = %self.name,
            sampling_ms = sampling_time.as_millis() as u64,
            control_ms = control_time.as_millis() as u64,
            "Workload ready, starting sampler and controller"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = [
            (Activity::Sample, sampling_time),
            (Activity::Control, control_time),
        ]
        .map(|(activity, period)| {
            let handle = PeriodicTask::new(activity, period, manager.clone(), stop_rx.clone())
                .with_health(self.health.clone())
                .with_experiment(self.name.clone())
                .spawn();
            (activity, handle)
        });

        let waited = self.poll_driver(driver, DriverPhase::Done).await;
        if let Ok(PollOutcome::Cancelled) = waited {
            info!(experiment = %self.name, "Experiment cancelled, stopping periodic tasks");
        }

        let _ = stop_tx.send(true);
        for (activity, handle) in tasks {
            match handle.await {
                Ok(cycles) => debug!(
                    experiment = %self.name,
                    task = activity.as_str(),
                    cycles,
                    "Periodic task joined"
                ),
                Err(e) => self.logger.log_cleanup_failed(activity.as_str(), &e),
            }
        }
        waited.map(|_| ())
    }

    /// Poll the driver until `ready` or `done` reports true
    ///
    /// Completion is checked on every readiness poll too, so a driver that
    /// finishes without ever being ready still ends the run.
    async fn poll_driver(
        &self,
        driver: &Arc<dyn WorkloadDriver>,
        phase: DriverPhase,
    ) -> Result<PollOutcome> {
        let mut cancel = self.cancel.subscribe();
        loop {
            if *cancel.borrow_and_update() {
                return Ok(PollOutcome::Cancelled);
            }
            let outcome = match self.driver_phase(driver, phase).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(health) = &self.health {
                        health.set_unhealthy(components::DRIVER, e.to_string()).await;
                    }
                    return Err(e.into());
                }
            };
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
            tokio::select! {
                _ = cancel.changed() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn driver_phase(
        &self,
        driver: &Arc<dyn WorkloadDriver>,
        phase: DriverPhase,
    ) -> anyhow::Result<Option<PollOutcome>> {
        let done = driver.done().await?;
        let outcome = match phase {
            DriverPhase::Ready if done => Some(PollOutcome::Finished),
            DriverPhase::Ready => driver.ready().await?.then_some(PollOutcome::Reached),
            DriverPhase::Done => done.then_some(PollOutcome::Reached),
        };
        Ok(outcome)
    }

    async fn restore_shares(&self, saved: VmSnapshot) {
        for (vm, shares) in saved {
            let restored = async {
                vm.set_cpu_share(shares.cpu_share).await?;
                vm.set_memory_share(shares.memory_share).await?;
                Ok::<(), anyhow::Error>(())
            }
            .await;
            match restored {
                Ok(()) => self.logger.log_vm_state_restored(&vm.id(), &shares),
                Err(e) => self.logger.log_cleanup_failed("restore_vm_state", &e),
            }
        }
    }
}

async fn capture_shares(app: &Arc<dyn Application>) -> Result<VmSnapshot> {
    let mut saved = Vec::new();
    for vm in app.vms() {
        let shares = ResourceShares {
            cpu_share: vm.cpu_share().await?,
            memory_share: vm.memory_share().await?,
        };
        saved.push((vm, shares));
    }
    Ok(saved)
}
