//! Observers of the experiment event stream
//!
//! A tracker is fed from its own task, so a slow tracker only ever loses
//! events; it never delays a sampler or controller.

mod stats;

pub use stats::{Series, SeriesReport, StatsGatherer, Summary, EXTENDED_QUANTILES};

use crate::events::{ControlOutcome, ControlSnapshot, EventKind, ExperimentEvent};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Hooks called for each event kind; all default to doing nothing
pub trait ExperimentTracker: Send + Sync {
    fn on_system_start(&self, _event: &ExperimentEvent) {}

    fn on_start(&self, _event: &ExperimentEvent) {}

    fn on_reset(&self, _event: &ExperimentEvent) {}

    fn on_sample(&self, _event: &ExperimentEvent) {}

    fn on_control(
        &self,
        _event: &ExperimentEvent,
        _outcome: ControlOutcome,
        _snapshot: &ControlSnapshot,
    ) {
    }

    fn on_stop(&self, _event: &ExperimentEvent) {}

    fn on_system_stop(&self, _event: &ExperimentEvent) {}
}

/// Route one event to the matching hook
pub fn dispatch(tracker: &dyn ExperimentTracker, event: &ExperimentEvent) {
    match &event.kind {
        EventKind::SystemStart => tracker.on_system_start(event),
        EventKind::Start => tracker.on_start(event),
        EventKind::Reset => tracker.on_reset(event),
        EventKind::Sample => tracker.on_sample(event),
        EventKind::Control { outcome, snapshot } => tracker.on_control(event, *outcome, snapshot),
        EventKind::Stop => tracker.on_stop(event),
        EventKind::SystemStop => tracker.on_system_stop(event),
    }
}

/// Feed `tracker` from `events` until every sender is gone
///
/// The handle resolves to the number of events the tracker missed because
/// it fell behind.
pub fn spawn_tracker(
    tracker: Arc<dyn ExperimentTracker>,
    mut events: broadcast::Receiver<ExperimentEvent>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut missed = 0u64;
        loop {
            match events.recv().await {
                Ok(event) => dispatch(tracker.as_ref(), &event),
                Err(RecvError::Lagged(n)) => {
                    missed += n;
                    warn!(missed = n, "Experiment tracker fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(missed, "Experiment tracker finished");
        missed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::models::ControlCounters;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTracker {
        starts: AtomicUsize,
        controls: AtomicUsize,
        skipped: AtomicUsize,
    }

    impl ExperimentTracker for CountingTracker {
        fn on_start(&self, _event: &ExperimentEvent) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_control(
            &self,
            _event: &ExperimentEvent,
            outcome: ControlOutcome,
            _snapshot: &ControlSnapshot,
        ) {
            self.controls.fetch_add(1, Ordering::SeqCst);
            if outcome == ControlOutcome::Skipped {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_tracker_receives_until_closed() {
        let bus = EventBus::new(64);
        let tracker = Arc::new(CountingTracker::default());
        let handle = spawn_tracker(tracker.clone(), bus.subscribe());

        bus.emit(Some(1), EventKind::Start, ControlCounters::default());
        bus.emit(Some(1), EventKind::Sample, ControlCounters::default());
        for outcome in [ControlOutcome::Skipped, ControlOutcome::Applied] {
            bus.emit(
                Some(1),
                EventKind::Control {
                    outcome,
                    snapshot: ControlSnapshot::default(),
                },
                ControlCounters::default(),
            );
        }
        drop(bus);

        assert_eq!(handle.await.unwrap(), 0);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.controls.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lagging_tracker_counts_missed_events() {
        let bus = EventBus::new(2);
        let tracker = Arc::new(CountingTracker::default());
        let rx = bus.subscribe();

        // Overflow the buffer before the tracker starts reading
        for _ in 0..5 {
            bus.emit(Some(1), EventKind::Start, ControlCounters::default());
        }
        let handle = spawn_tracker(tracker.clone(), rx);
        drop(bus);

        assert_eq!(handle.await.unwrap(), 3);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
    }
}
