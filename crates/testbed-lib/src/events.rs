//! Experiment event stream
//!
//! Managers and experiments publish lifecycle, sample and control events on
//! a broadcast channel. Subscribers that fall behind lose the oldest events;
//! publishing never blocks the control loop.

use crate::models::{AppMetric, ControlCounters, ExperimentId, VmId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOutcome {
    /// New shares were computed and written to the VMs
    Applied,
    /// No observation for some target metric since the last reset
    Skipped,
    /// Data was available but the strategy produced no valid decision
    Failed,
}

impl ControlOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOutcome::Applied => "applied",
            ControlOutcome::Skipped => "skipped",
            ControlOutcome::Failed => "failed",
        }
    }
}

/// What the manager saw at the end of a control cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControlSnapshot {
    /// Current estimate per target metric (NaN when no data yet)
    pub estimates: BTreeMap<AppMetric, f64>,
    /// CPU share per VM, for VMs that could be read
    pub cpu_shares: BTreeMap<VmId, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    SystemStart,
    Start,
    Reset,
    Sample,
    Control {
        outcome: ControlOutcome,
        snapshot: ControlSnapshot,
    },
    Stop,
    SystemStop,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentEvent {
    /// None for system-wide events
    pub experiment_id: Option<ExperimentId>,
    #[serde(flatten)]
    pub kind: EventKind,
    pub counters: ControlCounters,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out of experiment events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExperimentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExperimentEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish(&self, event: ExperimentEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    pub fn emit(&self, experiment_id: Option<ExperimentId>, kind: EventKind, counters: ControlCounters) {
        self.publish(ExperimentEvent {
            experiment_id,
            kind,
            counters,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(Some(1), EventKind::Start, ControlCounters::default());
    }

    #[tokio::test]
    async fn test_fan_out() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(Some(3), EventKind::Sample, ControlCounters::default());

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.experiment_id, Some(3));
        assert_eq!(ea.kind, EventKind::Sample);
        assert_eq!(eb.kind, EventKind::Sample);
    }

    #[test]
    fn test_late_subscriber_sees_only_new_events() {
        let bus = EventBus::new(16);
        bus.emit(Some(1), EventKind::Start, ControlCounters::default());

        let mut rx = bus.subscribe();
        let mut recv = tokio_test::task::spawn(rx.recv());
        tokio_test::assert_pending!(recv.poll());

        bus.emit(Some(1), EventKind::Stop, ControlCounters::default());
        assert!(recv.is_woken());
        let event = tokio_test::assert_ready_ok!(recv.poll());
        assert_eq!(event.kind, EventKind::Stop);
    }

    #[test]
    fn test_event_json_shape() {
        let event = ExperimentEvent {
            experiment_id: Some(2),
            kind: EventKind::Control {
                outcome: ControlOutcome::Skipped,
                snapshot: ControlSnapshot::default(),
            },
            counters: ControlCounters {
                control_count: 1,
                control_skip_count: 1,
                control_fail_count: 0,
            },
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "control");
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["counters"]["control_skip_count"], 1);
    }
}
