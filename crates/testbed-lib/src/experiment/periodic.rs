//! Sampler and controller periodic tasks
//!
//! Each task owns its own interval and takes the shared manager lock for
//! exactly one `sample()` or `control()` call per tick. A failed cycle is
//! logged and counted; the task keeps running until the stop signal.

use crate::health::{components, HealthRegistry};
use crate::manager::ApplicationManager;
use crate::observability::TestbedMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Sample,
    Control,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Sample => components::SAMPLER,
            Activity::Control => components::CONTROLLER,
        }
    }
}

pub(crate) struct PeriodicTask {
    activity: Activity,
    period: Duration,
    manager: Arc<Mutex<ApplicationManager>>,
    stop: watch::Receiver<bool>,
    health: Option<HealthRegistry>,
    metrics: TestbedMetrics,
    experiment: String,
}

impl PeriodicTask {
    pub(crate) fn new(
        activity: Activity,
        period: Duration,
        manager: Arc<Mutex<ApplicationManager>>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            activity,
            period,
            manager,
            stop,
            health: None,
            metrics: TestbedMetrics::new(),
            experiment: String::new(),
        }
    }

    pub(crate) fn with_health(mut self, health: Option<HealthRegistry>) -> Self {
        self.health = health;
        self
    }

    pub(crate) fn with_experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = experiment.into();
        self
    }

    pub(crate) fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Run until stopped, returning the number of cycles executed
    async fn run(mut self) -> u64 {
        let task = self.activity.as_str();
        info!(
            experiment = %self.experiment,
            task,
            period_ms = self.period.as_millis() as u64,
            "Starting periodic task"
        );
        if let Some(health) = &self.health {
            health.register(task).await;
        }

        // First activation one period after start
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => break,
                _ = ticker.tick() => {}
            }
            if self.stopped() {
                break;
            }

            let mut manager = self.manager.lock().await;
            // Stop may have been requested while waiting for the lock
            if self.stopped() {
                break;
            }
            let start = Instant::now();
            let result = match self.activity {
                Activity::Sample => manager.sample().await,
                Activity::Control => manager.control().await.map(|_| ()),
            };
            drop(manager);

            let elapsed = start.elapsed().as_secs_f64();
            match self.activity {
                Activity::Sample => self.metrics.observe_sample_latency(elapsed),
                Activity::Control => self.metrics.observe_control_latency(elapsed),
            }
            cycles += 1;

            match result {
                Ok(()) => {
                    if let Some(health) = &self.health {
                        health.set_healthy(task).await;
                    }
                }
                Err(e) => {
                    self.metrics.inc_task_errors(task);
                    warn!(
                        experiment = %self.experiment,
                        task,
                        cycle = cycles,
                        error = %e,
                        "Periodic cycle failed"
                    );
                    if let Some(health) = &self.health {
                        health.set_degraded(task, e.to_string()).await;
                    }
                }
            }
        }

        debug!(experiment = %self.experiment, task, cycles, "Periodic task stopped");
        cycles
    }
}
