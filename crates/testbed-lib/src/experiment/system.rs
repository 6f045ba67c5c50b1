//! Several application experiments run side by side

use super::runner::ApplicationExperiment;
use crate::error::{Result, TestbedError};
use crate::events::{EventBus, EventKind};
use crate::models::ControlCounters;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Runs its application experiments concurrently on one event stream
pub struct SystemExperiment {
    experiments: Vec<Arc<ApplicationExperiment>>,
    events: EventBus,
}

impl Default for SystemExperiment {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}

impl SystemExperiment {
    pub fn new(events: EventBus) -> Self {
        Self {
            experiments: Vec::new(),
            events,
        }
    }

    /// Add an experiment; its events are redirected to this system's stream
    pub fn add(&mut self, mut experiment: ApplicationExperiment) {
        experiment.set_events(self.events.clone());
        self.experiments.push(Arc::new(experiment));
    }

    pub fn experiments(&self) -> &[Arc<ApplicationExperiment>] {
        &self.experiments
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Cancel every application experiment; `run()` still performs teardown
    pub fn cancel(&self) {
        for experiment in &self.experiments {
            experiment.cancel();
        }
    }

    /// Run every experiment to completion
    ///
    /// All experiments run to their end even if one fails; the first failure
    /// (in completion order) is returned.
    pub async fn run(&self) -> Result<()> {
        if self.experiments.is_empty() {
            return Err(TestbedError::NotConfigured(
                "system experiment has no application experiments".into(),
            ));
        }

        info!(experiments = self.experiments.len(), "System experiment started");
        self.events
            .emit(None, EventKind::SystemStart, ControlCounters::default());

        let mut set = JoinSet::new();
        for experiment in &self.experiments {
            let experiment = experiment.clone();
            set.spawn(async move {
                let name = experiment.name().to_string();
                (name, experiment.run().await)
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok((_, Ok(()))) => None,
                Ok((name, Err(e))) => {
                    error!(experiment = %name, error = %e, "Application experiment failed");
                    Some(e)
                }
                Err(e) => Some(TestbedError::InvalidState(format!(
                    "application experiment task failed: {}",
                    e
                ))),
            };
            if first_error.is_none() {
                first_error = failure;
            }
        }

        self.events
            .emit(None, EventKind::SystemStop, ControlCounters::default());
        info!(failed = first_error.is_some(), "System experiment stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
