//! Descriptive statistics over `f64` slices. Empty input yields `None`, never NaN.

use serde::{Deserialize, Serialize};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with Bessel's correction (n − 1). Needs at least 2 values.
pub fn sample_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Population standard deviation (divides by n).
pub fn population_stdev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
    Some((ss / values.len() as f64).sqrt())
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        Some((v[mid - 1] + v[mid]) / 2.0)
    } else {
        Some(v[mid])
    }
}

/// Percentile of already sorted data, `q` in `[0, 1]`, with linear interpolation
/// between closest ranks.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Coefficient of variation in percent: `100 * sample_stdev / mean`.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let sd = sample_stdev(values)?;
    if m == 0.0 {
        return None;
    }
    Some(100.0 * sd / m.abs())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Ordinary least squares `y = slope * x + intercept`.
///
/// Fewer than 2 points or no spread in `x` gives a zero fit. When `y` has no spread the
/// fit is exact and `r_squared` is 1.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Regression {
    let zero = Regression {
        slope: 0.0,
        intercept: 0.0,
        r_squared: 0.0,
    };
    let n = xs.len().min(ys.len());
    if n < 2 {
        return zero;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let (Some(mx), Some(my)) = (mean(xs), mean(ys)) else {
        return zero;
    };

    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    if sxx == 0.0 {
        return zero;
    }
    let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let slope = sxy / sxx;
    let intercept = my - slope * mx;

    let ss_tot: f64 = ys.iter().map(|y| (y - my).powi(2)).sum();
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    let r_squared = if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    };

    Regression {
        slope,
        intercept,
        r_squared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn sample_vs_population_stdev() {
        let v = [300.0, 301.0, 299.0];
        assert_eq!(mean(&v), Some(300.0));
        assert!(close(sample_stdev(&v).unwrap(), 1.0));
        assert!(close(population_stdev(&v).unwrap(), (2.0f64 / 3.0).sqrt()));
        assert!(close(coefficient_of_variation(&v).unwrap(), 100.0 / 300.0));
    }

    #[test]
    fn empty_and_single_inputs() {
        assert_eq!(mean(&[]), None);
        assert_eq!(median(&[]), None);
        assert_eq!(sample_stdev(&[1.0]), None);
        assert_eq!(population_stdev(&[1.0]), Some(0.0));
        assert_eq!(coefficient_of_variation(&[0.0, 0.0]), None);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn percentile_interpolates() {
        let v = sorted(&[1.0, 1.1, 1.2, 1.1, 1.0, 5.0, 1.1, 1.2]);
        assert!(close(percentile_sorted(&v, 0.25).unwrap(), 1.075));
        assert!(close(percentile_sorted(&v, 0.75).unwrap(), 1.2));
        assert_eq!(percentile_sorted(&v, 0.0), Some(1.0));
        assert_eq!(percentile_sorted(&v, 1.0), Some(5.0));
        assert_eq!(percentile_sorted(&v, 1.5), None);
    }

    #[test]
    fn regression_exact_line() {
        let r = linear_regression(&[0.0, 10.0, 20.0], &[0.0, 1.0, 2.0]);
        assert!(close(r.slope, 0.1));
        assert!(close(r.intercept, 0.0));
        assert!(close(r.r_squared, 1.0));
    }

    #[test]
    fn regression_degenerate_inputs() {
        assert_eq!(linear_regression(&[1.0], &[2.0]).slope, 0.0);
        let same_x = linear_regression(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]);
        assert_eq!((same_x.slope, same_x.r_squared), (0.0, 0.0));
        let flat = linear_regression(&[0.0, 1.0, 2.0], &[4.0, 4.0, 4.0]);
        assert_eq!((flat.slope, flat.r_squared), (0.0, 1.0));
    }
}
