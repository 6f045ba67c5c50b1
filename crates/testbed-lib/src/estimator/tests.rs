use super::*;

/// Deterministic uniform [0, 1) source
struct XorShift(u64);

impl XorShift {
    fn next_f64(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }

    fn batch(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.next_f64()).collect()
    }
}

fn all_configs() -> Vec<EstimatorConfig> {
    let p = 0.9;
    vec![
        EstimatorConfig::Mean,
        EstimatorConfig::MostRecentlyObserved,
        EstimatorConfig::TrueQuantile { probability: p },
        EstimatorConfig::P2 { probability: p },
        EstimatorConfig::ChenEwma {
            probability: p,
            w: 0.05,
            clamp: true,
        },
        EstimatorConfig::ChenSa { probability: p },
        EstimatorConfig::ChenEwsa {
            probability: p,
            w: 0.05,
        },
        EstimatorConfig::WelshEwma {
            probability: p,
            alpha: 0.7,
            extended: false,
        },
        EstimatorConfig::Recursive {
            probability: p,
            w: 0.05,
        },
        EstimatorConfig::Chambers { probability: p },
        EstimatorConfig::BakshiLora {
            probability: p,
            stationary: true,
            beta: 0.95,
            omega: 0.95,
            gain: 10.0,
            window: 40,
        },
    ]
}

#[test]
fn test_true_quantile_median_of_four() {
    let mut est = TrueQuantileEstimator::new(0.5);
    est.collect_batch(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    assert_eq!(est.estimate(), 2.5);
}

#[test]
fn test_every_estimator_is_nan_before_data() {
    for config in all_configs() {
        let mut est = config.build().unwrap();
        assert!(est.estimate().is_nan(), "{} not NaN when fresh", est.name());
        assert_eq!(est.count(), 0);
    }
}

#[test]
fn test_every_estimator_is_nan_after_reset() {
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    for config in all_configs() {
        let mut est = config.build().unwrap();
        for _ in 0..5 {
            est.collect_batch(&rng.batch(50)).unwrap();
            assert!(est.estimate().is_finite(), "{} not finite with data", est.name());
        }

        est.reset();
        assert!(est.estimate().is_nan(), "{} not NaN after reset", est.name());
        assert_eq!(est.count(), 0);

        // Idempotent
        est.reset();
        assert!(est.estimate().is_nan());
        assert_eq!(est.count(), 0);
    }
}

#[test]
fn test_count_tracks_collect_calls() {
    for config in all_configs() {
        let mut est = config.build().unwrap();
        est.collect_batch(&[0.1, 0.4, 0.2]).unwrap();
        est.collect(0.3).unwrap();
        est.collect_batch(&[]).unwrap();
        assert_eq!(est.count(), 2, "{}", est.name());
    }
}

#[test]
fn test_mean_of_batch() {
    let mut est = MeanEstimator::new();
    est.collect_batch(&[0.1, 0.4, 0.2]).unwrap();
    assert!((est.estimate() - 0.7 / 3.0).abs() < 1e-12);
}

#[test]
fn test_most_recently_observed() {
    let mut est = MostRecentlyObservedEstimator::new();
    est.collect_batch(&[3.0, 1.0, 2.0]).unwrap();
    assert_eq!(est.estimate(), 2.0);
    est.collect(7.0).unwrap();
    assert_eq!(est.estimate(), 7.0);
}

#[test]
fn test_chen_ewma_first_batch_then_smoothing() {
    let w = 0.05;
    let mut est = ChenEwmaEstimator::new(0.5, w);

    est.collect_batch(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    let first = est.estimate();
    assert_eq!(first, 2.5);

    est.collect_batch(&[10.0, 20.0, 30.0]).unwrap();
    let second = est.estimate();
    assert!((second - ((1.0 - w) * 2.5 + w * 20.0)).abs() < 1e-12);

    // Nothing new staged: estimate unchanged
    assert_eq!(est.estimate(), second);
}

#[test]
fn test_chen_ewma_clamp() {
    let mut est = ChenEwmaEstimator::new(0.5, 0.5).with_clamp(true);

    let err = est.collect(f64::NAN).unwrap_err();
    assert!(matches!(err, TestbedError::InvalidState(_)));
    assert_eq!(est.count(), 0);

    est.collect_batch(&[1.0, 2.0, 3.0]).unwrap();
    let q = est.estimate();
    assert!((1.0..=3.0).contains(&q));

    // Unclamped variants tolerate anything
    let mut loose = ChenEwmaEstimator::new(0.5, 0.5);
    assert!(loose.collect(f64::INFINITY).is_ok());
}

#[test]
fn test_welsh_nearest_rank_and_weighting() {
    let mut est = WelshEwmaEstimator::new(0.5, 0.7, false);
    est.collect_batch(&[4.0, 3.0, 2.0, 1.0]).unwrap();
    assert_eq!(est.estimate(), 2.0);

    est.collect_batch(&[5.0, 6.0, 7.0, 8.0]).unwrap();
    assert!((est.estimate() - (0.7 * 2.0 + 0.3 * 6.0)).abs() < 1e-12);

    let mut extended = WelshEwmaEstimator::new(0.5, 0.7, true);
    extended.collect_batch(&[4.0, 3.0, 2.0, 1.0]).unwrap();
    assert_eq!(extended.estimate(), 2.5);
}

#[test]
fn test_p2_converges_on_uniform_stream() {
    let mut rng = XorShift(88172645463325252);
    let mut est = P2Estimator::new(0.9);
    for _ in 0..10_000 {
        est.collect(rng.next_f64()).unwrap();
    }
    let q = est.estimate();
    assert!(((q - 0.9) / 0.9).abs() < 1e-2, "p2 estimate {}", q);
}

#[test]
fn test_p2_short_stream_uses_exact_quantile() {
    let mut est = P2Estimator::new(0.5);
    est.collect_batch(&[4.0, 1.0, 3.0, 2.0]).unwrap();
    assert_eq!(est.estimate(), 2.5);

    est.collect(5.0).unwrap();
    assert_eq!(est.estimate(), 3.0);
}

#[test]
fn test_chen_sa_single_value_seed() {
    let mut est = ChenSaEstimator::new(0.9);
    est.collect(4.2).unwrap();
    assert_eq!(est.estimate(), 4.2);
}

#[test]
fn test_chen_sa_zero_iqr_skips_degenerate_step() {
    let mut est = ChenSaEstimator::new(0.5);
    est.collect_batch(&[5.0, 5.0, 5.0]).unwrap();
    assert_eq!(est.estimate(), 5.0);

    // No value near the estimate and a zero density scale: no step taken
    est.collect_batch(&[100.0, 100.0, 100.0]).unwrap();
    assert_eq!(est.estimate(), 5.0);
}

#[test]
fn test_stochastic_approximation_tracks_median() {
    let mut rng = XorShift(0x2545_F491_4F6C_DD1D);
    let mut sa = ChenSaEstimator::new(0.5);
    let mut ewsa = ChenEwsaEstimator::new(0.5, 0.05);
    let mut rec = RecursiveEstimator::new(0.5, 0.05);

    for _ in 0..200 {
        let batch = rng.batch(50);
        for est in [
            &mut sa as &mut dyn Estimator,
            &mut ewsa as &mut dyn Estimator,
            &mut rec as &mut dyn Estimator,
        ] {
            est.collect_batch(&batch).unwrap();
            est.estimate();
        }
    }

    assert!((sa.estimate() - 0.5).abs() < 0.15, "sa {}", sa.estimate());
    assert!((ewsa.estimate() - 0.5).abs() < 0.1, "ewsa {}", ewsa.estimate());
    assert!((rec.estimate() - 0.5).abs() < 0.1, "recursive {}", rec.estimate());
}

#[test]
fn test_chambers_tracks_high_quantile() {
    let mut rng = XorShift(0xDEAD_BEEF_CAFE_F00D);
    let mut est = ChambersEstimator::new(0.9);
    for _ in 0..20 {
        est.collect_batch(&rng.batch(500)).unwrap();
        est.estimate();
    }
    let q = est.estimate();
    assert!((q - 0.9).abs() < 0.05, "chambers {}", q);
}

#[test]
fn test_chambers_first_batch_matches_sample() {
    let mut est = ChambersEstimator::new(0.5);
    let data: Vec<f64> = (1..=1000).map(f64::from).collect();
    est.collect_batch(&data).unwrap();
    let q = est.estimate();
    assert!((q - 500.0).abs() / 500.0 < 0.02, "chambers {}", q);
}

#[test]
fn test_lora_stays_near_quantile() {
    let mut rng = XorShift(0x1234_5678_9ABC_DEF1);
    let mut est = LoraEstimator::new(0.95, LoraParams::default());
    for _ in 0..2000 {
        est.collect(rng.next_f64()).unwrap();
        est.estimate();
    }
    let q = est.estimate();
    assert!((q - 0.95).abs() < 0.1, "lora {}", q);
}

#[test]
fn test_config_defaults_from_json() {
    let config: EstimatorConfig =
        serde_json::from_str(r#"{"kind":"chen_ewma","probability":0.99}"#).unwrap();
    assert_eq!(
        config,
        EstimatorConfig::ChenEwma {
            probability: 0.99,
            w: 0.05,
            clamp: false
        }
    );

    let config: EstimatorConfig = serde_json::from_str(r#"{"kind":"mean"}"#).unwrap();
    assert_eq!(config.build().unwrap().name(), "mean");
}

#[test]
fn test_config_rejects_bad_parameters() {
    let bad = [
        EstimatorConfig::TrueQuantile { probability: 1.5 },
        EstimatorConfig::ChenEwma {
            probability: 0.5,
            w: 0.0,
            clamp: false,
        },
        EstimatorConfig::BakshiLora {
            probability: 0.9,
            stationary: true,
            beta: 0.95,
            omega: 0.95,
            gain: 10.0,
            window: 1,
        },
    ];
    for config in bad {
        assert!(matches!(
            config.build().unwrap_err(),
            TestbedError::InvalidArgument(_)
        ));
    }
}
