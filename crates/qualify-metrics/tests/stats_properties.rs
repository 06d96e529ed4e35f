use proptest::prelude::*;
use qualify_core::model::MeasurementType;
use qualify_metrics::outliers::{detect_outliers, OutlierMethod};
use qualify_metrics::stats::{coefficient_of_variation, linear_regression, median};
use qualify_metrics::{analyze_degradation, DegradationPoint};

fn methods() -> impl Strategy<Value = OutlierMethod> {
    prop_oneof![
        (0.5f64..4.0).prop_map(|k| OutlierMethod::Iqr { k }),
        (0.5f64..4.0).prop_map(|k| OutlierMethod::ZScore { k }),
        (0.5f64..5.0).prop_map(|k| OutlierMethod::Mad { k }),
    ]
}

proptest! {
    #[test]
    fn outlier_indices_are_sorted_unique_and_in_range(
        values in prop::collection::vec(-1.0e6f64..1.0e6, 0..40),
        method in methods(),
    ) {
        let idx = detect_outliers(&values, method);
        prop_assert!(idx.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(idx.iter().all(|&i| i < values.len()));
        prop_assert_eq!(&idx, &detect_outliers(&values, method));
    }

    #[test]
    fn constant_series_never_has_outliers(
        value in (-100_000i32..100_000).prop_map(f64::from),
        len in 1usize..30,
        method in methods(),
    ) {
        prop_assert!(detect_outliers(&vec![value; len], method).is_empty());
    }

    #[test]
    fn outlier_set_is_order_independent(
        values in prop::collection::vec(-1.0e3f64..1.0e3, 1..30),
        k in 0.5f64..4.0,
        use_mad in any::<bool>(),
    ) {
        // rank-based methods only; z-score sums depend on order in the last bit
        let method = if use_mad { OutlierMethod::Mad { k } } else { OutlierMethod::Iqr { k } };
        let mut reversed = values.clone();
        reversed.reverse();
        let mut a: Vec<f64> = detect_outliers(&values, method).iter().map(|&i| values[i]).collect();
        let mut b: Vec<f64> = detect_outliers(&reversed, method)
            .iter()
            .map(|&i| reversed[i])
            .collect();
        a.sort_by(f64::total_cmp);
        b.sort_by(f64::total_cmp);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn cv_is_scale_invariant(
        values in prop::collection::vec(1.0f64..1000.0, 2..20),
        scale in 0.1f64..100.0,
    ) {
        let scaled: Vec<f64> = values.iter().map(|v| v * scale).collect();
        let a = coefficient_of_variation(&values).unwrap();
        let b = coefficient_of_variation(&scaled).unwrap();
        prop_assert!((a - b).abs() <= 1e-6 * a.max(1.0));
    }

    #[test]
    fn median_lies_within_range(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..40)) {
        let m = median(&values).unwrap();
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(lo <= m && m <= hi);
    }

    #[test]
    fn regression_recovers_exact_lines(
        magnitude in 0.01f64..10.0,
        negative in any::<bool>(),
        intercept in -100.0f64..100.0,
        n in 2usize..20,
    ) {
        let slope = if negative { -magnitude } else { magnitude };
        let xs: Vec<f64> = (0..n).map(|i| i as f64 * 24.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| slope * x + intercept).collect();
        let fit = linear_regression(&xs, &ys);
        prop_assert!((fit.slope - slope).abs() < 1e-6);
        prop_assert!(fit.r_squared > 1.0 - 1e-6);
    }

    #[test]
    fn degradation_is_zero_at_baseline_and_bounded_by_max(
        baseline in 100.0f64..500.0,
        losses in prop::collection::vec(0.0f64..0.2, 1..15),
    ) {
        let mut points = vec![DegradationPoint::new(0.0, baseline, MeasurementType::Initial)];
        for (i, loss) in losses.iter().enumerate() {
            points.push(DegradationPoint::new(
                (i + 1) as f64 * 50.0,
                baseline * (1.0 - loss),
                MeasurementType::DuringTest,
            ));
        }
        let report = analyze_degradation(&points, None).unwrap();
        prop_assert!(report.points[0].degradation_pct.abs() < 1e-9);
        prop_assert!(report.points.iter().all(|p| p.degradation_pct <= report.max_degradation_pct));
        prop_assert!(report.final_degradation_pct <= report.max_degradation_pct);
        prop_assert!(report.max_degradation_pct >= 0.0);
    }
}
