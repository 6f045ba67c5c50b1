//! Incremental quantile estimation (Chambers, James, Lambert and Vander Wiel, 2006)
//!
//! Keeps an explicit estimate of the CDF as 251 (probability, value) knots.
//! Each pending batch is merged into the knots by walking the union of the
//! old piecewise-linear CDF and the batch's empirical CDF, then the requested
//! quantile is read off by linear interpolation.

use super::quantile::sort_values;
use super::Estimator;
use crate::error::Result;

const KNOTS: usize = 251;

#[derive(Debug)]
pub struct ChambersEstimator {
    probability: f64,
    pending: Vec<f64>,
    pvals: Vec<f64>,
    qiles: Vec<f64>,
    min: f64,
    max: f64,
    folded: u64,
    estimate: f64,
    count: u64,
}

/// Probability ladder: 0.10..=0.90 in steps of 0.01 in the centre, with
/// geometric tails toward 0 and 1.
fn initial_pvals() -> Vec<f64> {
    let mut pvals = vec![0.0; KNOTS];
    for (j, pval) in pvals.iter_mut().enumerate().take(166).skip(85) {
        *pval = (j as f64 - 75.0) / 100.0;
    }
    for j in (1..=85).rev() {
        pvals[j - 1] = 0.87191909 * pvals[j];
        pvals[KNOTS - j] = 1.0 - pvals[j - 1];
    }
    pvals
}

impl ChambersEstimator {
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            pending: Vec::new(),
            pvals: initial_pvals(),
            qiles: vec![0.0; KNOTS],
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            folded: 0,
            estimate: f64::NAN,
            count: 0,
        }
    }

    fn merge(&mut self) {
        let mut data = std::mem::take(&mut self.pending);
        sort_values(&mut data);

        let nd = data.len();
        let nt = self.folded as f64;
        let total = nt + nd as f64;
        let last = KNOTS - 1;

        let mut fresh = vec![0.0; KNOTS];
        self.qiles[0] = self.min;
        self.qiles[last] = self.max;
        fresh[0] = self.min;
        fresh[last] = self.max;
        self.pvals[0] = (0.5 / total).min(0.5 * self.pvals[1]);
        self.pvals[last] = (1.0 - 0.5 / total).max(0.5 * (1.0 + self.pvals[last - 1]));

        let (pvals, qiles) = (&self.pvals, &self.qiles);
        let mut jd = 0usize;
        let mut jq = 1usize;
        let mut qold = self.min;
        let mut qnew = self.min;
        let mut told = 0.0;
        let mut tnew = 0.0;

        for iq in 1..last {
            let target = total * pvals[iq];
            if tnew < target {
                loop {
                    if jq < KNOTS && (jd >= nd || qiles[jq] < data[jd]) {
                        // Slope change of the old CDF
                        qnew = qiles[jq];
                        tnew = jd as f64 + nt * pvals[jq];
                        jq += 1;
                        if tnew >= target {
                            break;
                        }
                    } else if jd < nd {
                        // Jump of the batch CDF
                        qnew = data[jd];
                        tnew = told;
                        if jq < KNOTS && qiles[jq] > qiles[jq - 1] {
                            tnew += nt * (pvals[jq] - pvals[jq - 1]) * (qnew - qold)
                                / (qiles[jq] - qiles[jq - 1]);
                        }
                        jd += 1;
                        if tnew >= target {
                            break;
                        }
                        told = tnew;
                        tnew += 1.0;
                        qold = qnew;
                        if tnew >= target {
                            break;
                        }
                    } else {
                        break;
                    }
                    told = tnew;
                    qold = qnew;
                }
            }

            fresh[iq] = if tnew == told {
                0.5 * (qold + qnew)
            } else {
                qold + (qnew - qold) * (target - told) / (tnew - told)
            };
            told = tnew;
            qold = qnew;
        }

        self.qiles = fresh;
        self.folded += nd as u64;
    }

    fn lookup(&self) -> f64 {
        let p = self.probability;
        let mut lo = 0usize;
        let mut hi = KNOTS - 1;
        while hi - lo > 1 {
            let mid = (hi + lo) / 2;
            if p > self.pvals[mid] {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let (p0, p1) = (self.pvals[lo], self.pvals[lo + 1]);
        let (q0, q1) = (self.qiles[lo], self.qiles[lo + 1]);
        let q = if p1 > p0 {
            q0 + (q1 - q0) * (p - p0) / (p1 - p0)
        } else {
            q0
        };
        q.max(self.qiles[0]).min(self.qiles[KNOTS - 1])
    }
}

impl Estimator for ChambersEstimator {
    fn collect_batch(&mut self, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        for &x in values {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.pending.extend_from_slice(values);
        self.count += 1;
        Ok(())
    }

    fn estimate(&mut self) -> f64 {
        if !self.pending.is_empty() {
            self.merge();
            self.estimate = self.lookup();
        }
        self.estimate
    }

    fn reset(&mut self) {
        *self = Self::new(self.probability);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn name(&self) -> &'static str {
        "chambers"
    }
}
