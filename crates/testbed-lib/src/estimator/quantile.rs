//! Sample quantile helpers shared by the batch estimators

/// Sort in place, ordering NaN after every number
pub fn sort_values(values: &mut [f64]) {
    values.sort_by(|a, b| a.total_cmp(b));
}

/// Type-7 sample quantile of unsorted data; NaN when empty
pub fn quantile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sort_values(&mut sorted);
    quantile_sorted(&sorted, p)
}

/// Type-7 sample quantile of already sorted data; NaN when empty
///
/// With `h = (n - 1) * p`, interpolates linearly between the order
/// statistics at `floor(h)` and `ceil(h)` (zero based).
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }

    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (h.ceil() as usize).min(n - 1);
    if lo == hi {
        return sorted[lo];
    }
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Several type-7 quantiles of the same data, sorting once
pub fn quantiles(values: &[f64], probabilities: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sort_values(&mut sorted);
    probabilities
        .iter()
        .map(|&p| quantile_sorted(&sorted, p))
        .collect()
}

/// Nearest-rank quantile of sorted data: the `ceil(p * n)`-th smallest value
pub fn nearest_rank_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let rank = ((p.clamp(0.0, 1.0) * n as f64).ceil() as usize).clamp(1, n);
    sorted[rank - 1]
}

/// Interquartile range (q75 - q25) of unsorted data
pub fn interquartile_range(values: &[f64]) -> f64 {
    let q = quantiles(values, &[0.25, 0.75]);
    q[1] - q[0]
}

/// Sample standard deviation (Bessel corrected); zero below two values
pub fn sample_stdev<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    let mut n = 0u64;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for &x in values {
        n += 1;
        let delta = x - mean;
        mean += delta / n as f64;
        m2 += delta * (x - mean);
    }
    if n < 2 {
        return 0.0;
    }
    (m2 / (n - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type7_interpolates_between_order_statistics() {
        assert_eq!(quantile(&[4.0, 1.0, 3.0, 2.0], 0.5), 2.5);
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.0), 1.0);
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 1.0), 4.0);
        assert!((quantile(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.9) - 4.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_quantile_is_nan() {
        assert!(quantile(&[], 0.5).is_nan());
        assert!(nearest_rank_sorted(&[], 0.5).is_nan());
    }

    #[test]
    fn test_nearest_rank() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(nearest_rank_sorted(&sorted, 0.5), 2.0);
        assert_eq!(nearest_rank_sorted(&sorted, 0.51), 3.0);
        assert_eq!(nearest_rank_sorted(&sorted, 0.0), 1.0);
    }

    #[test]
    fn test_sample_stdev() {
        assert_eq!(sample_stdev(&[5.0]), 0.0);
        let s = sample_stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s - 2.138089935299395).abs() < 1e-12);
    }
}
