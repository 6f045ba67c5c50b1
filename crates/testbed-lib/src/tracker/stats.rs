//! Summary and quantile statistics gathered from control events

use super::ExperimentTracker;
use crate::estimator::{Estimator, P2Estimator};
use crate::events::{ControlOutcome, ControlSnapshot, ExperimentEvent};
use crate::models::{AppMetric, ExperimentId, VmId};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;

/// Probabilities of the extended quantiles reported per series
pub const EXTENDED_QUANTILES: [f64; 6] = [0.25, 0.50, 0.75, 0.90, 0.95, 0.99];

/// A tracked quantity of one experiment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "series", content = "key", rename_all = "snake_case")]
pub enum Series {
    /// Estimate of an application metric, one value per control cycle
    Metric(AppMetric),
    /// CPU share of a VM after each control cycle
    CpuShare(VmId),
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Series::Metric(metric) => write!(f, "{}", metric),
            Series::CpuShare(vm_id) => write!(f, "cpu_share[{}]", vm_id),
        }
    }
}

/// Running count, mean, variance and range (Welford)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub mean: f64,
    #[serde(skip)]
    m2: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for Summary {
    fn default() -> Self {
        Self {
            count: 0,
            mean: f64::NAN,
            m2: 0.0,
            min: f64::NAN,
            max: f64::NAN,
        }
    }
}

impl Summary {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = x;
            self.min = x;
            self.max = x;
            return;
        }
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    /// Sample variance; zero below two values
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

#[derive(Debug)]
struct SeriesStats {
    summary: Summary,
    quantiles: Vec<P2Estimator>,
}

impl SeriesStats {
    fn new() -> Self {
        Self {
            summary: Summary::default(),
            quantiles: EXTENDED_QUANTILES.iter().map(|&p| P2Estimator::new(p)).collect(),
        }
    }

    fn push(&mut self, x: f64) {
        self.summary.push(x);
        for estimator in &mut self.quantiles {
            // P2 accepts every real value
            let _ = estimator.collect(x);
        }
    }

    fn report(&mut self) -> SeriesReport {
        SeriesReport {
            summary: self.summary,
            variance: self.summary.variance(),
            quantiles: EXTENDED_QUANTILES
                .iter()
                .zip(self.quantiles.iter_mut())
                .map(|(&p, estimator)| (p, estimator.estimate()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesReport {
    pub summary: Summary,
    pub variance: f64,
    /// (probability, estimated quantile) pairs
    pub quantiles: Vec<(f64, f64)>,
}

impl SeriesReport {
    pub fn quantile(&self, probability: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .find(|(p, _)| *p == probability)
            .map(|(_, q)| *q)
    }
}

/// Tracker accumulating per-experiment statistics of estimates and shares
///
/// Statistics are cleared when a system experiment starts and when an
/// application experiment (re)starts. Skipped cycles and NaN estimates are
/// not counted.
#[derive(Debug, Default)]
pub struct StatsGatherer {
    series: DashMap<(ExperimentId, Series), SeriesStats>,
}

impl StatsGatherer {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, id: ExperimentId, series: Series, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.series
            .entry((id, series))
            .or_insert_with(SeriesStats::new)
            .push(x);
    }

    pub fn report(&self, id: ExperimentId, series: &Series) -> Option<SeriesReport> {
        self.series
            .get_mut(&(id, series.clone()))
            .map(|mut stats| stats.report())
    }

    /// Reports of every series, ordered by experiment and series
    pub fn reports(&self) -> Vec<(ExperimentId, Series, SeriesReport)> {
        let mut reports: Vec<_> = self
            .series
            .iter_mut()
            .map(|mut entry| {
                let (id, series) = entry.key().clone();
                (id, series, entry.value_mut().report())
            })
            .collect();
        reports.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        reports
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }
}

impl ExperimentTracker for StatsGatherer {
    fn on_system_start(&self, _event: &ExperimentEvent) {
        self.series.clear();
    }

    fn on_start(&self, event: &ExperimentEvent) {
        if let Some(id) = event.experiment_id {
            self.series.retain(|(owner, _), _| *owner != id);
        }
    }

    fn on_control(&self, event: &ExperimentEvent, outcome: ControlOutcome, snapshot: &ControlSnapshot) {
        let Some(id) = event.experiment_id else {
            return;
        };
        if outcome == ControlOutcome::Skipped {
            return;
        }
        for (metric, estimate) in &snapshot.estimates {
            self.push(id, Series::Metric(*metric), *estimate);
        }
        for (vm_id, share) in &snapshot.cpu_shares {
            self.push(id, Series::CpuShare(vm_id.clone()), *share);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::models::ControlCounters;
    use chrono::Utc;

    fn event(id: Option<ExperimentId>, kind: EventKind) -> ExperimentEvent {
        ExperimentEvent {
            experiment_id: id,
            kind,
            counters: ControlCounters::default(),
            timestamp: Utc::now(),
        }
    }

    fn control(gatherer: &StatsGatherer, id: ExperimentId, outcome: ControlOutcome, rt: f64, share: f64) {
        let mut snapshot = ControlSnapshot::default();
        snapshot.estimates.insert(AppMetric::ResponseTime, rt);
        snapshot.cpu_shares.insert("vm1".into(), share);
        let ev = event(
            Some(id),
            EventKind::Control {
                outcome,
                snapshot: snapshot.clone(),
            },
        );
        gatherer.on_control(&ev, outcome, &snapshot);
    }

    #[test]
    fn test_summary_welford() {
        let mut summary = Summary::default();
        assert!(summary.mean.is_nan());
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            summary.push(x);
        }
        assert_eq!(summary.count, 8);
        assert!((summary.mean - 5.0).abs() < 1e-12);
        assert!((summary.variance() - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
    }

    #[test]
    fn test_gathers_control_snapshots() {
        let gatherer = StatsGatherer::new();
        // 1..=100 in scrambled order
        for i in 1..=100u64 {
            control(&gatherer, 1, ControlOutcome::Applied, (i * 37 % 101) as f64, 0.5);
        }
        control(&gatherer, 1, ControlOutcome::Skipped, 1000.0, 0.1);
        control(&gatherer, 1, ControlOutcome::Failed, f64::NAN, 0.5);

        let rt = gatherer.report(1, &Series::Metric(AppMetric::ResponseTime)).unwrap();
        assert_eq!(rt.summary.count, 100);
        assert!((rt.summary.mean - 50.5).abs() < 1e-12);
        assert_eq!(rt.summary.max, 100.0);
        let median = rt.quantile(0.5).unwrap();
        assert!((median - 50.5).abs() < 5.0, "median {}", median);

        let share = gatherer.report(1, &Series::CpuShare("vm1".into())).unwrap();
        assert_eq!(share.summary.count, 101);
        assert_eq!(share.variance, 0.0);
    }

    #[test]
    fn test_start_clears_only_that_experiment() {
        let gatherer = StatsGatherer::new();
        control(&gatherer, 1, ControlOutcome::Applied, 0.2, 0.5);
        control(&gatherer, 2, ControlOutcome::Applied, 0.3, 0.5);
        assert_eq!(gatherer.series_count(), 4);

        gatherer.on_start(&event(Some(1), EventKind::Start));
        assert_eq!(gatherer.series_count(), 2);
        assert!(gatherer
            .report(2, &Series::Metric(AppMetric::ResponseTime))
            .is_some());

        gatherer.on_system_start(&event(None, EventKind::SystemStart));
        assert_eq!(gatherer.series_count(), 0);
    }

    #[test]
    fn test_reports_sorted() {
        let gatherer = StatsGatherer::new();
        control(&gatherer, 2, ControlOutcome::Applied, 0.2, 0.5);
        control(&gatherer, 1, ControlOutcome::Applied, 0.3, 0.5);

        let reports = gatherer.reports();
        let ids: Vec<_> = reports.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![1, 1, 2, 2]);
        assert_eq!(reports[0].1, Series::Metric(AppMetric::ResponseTime));
        assert_eq!(reports[0].2.quantiles.len(), EXTENDED_QUANTILES.len());
    }
}
