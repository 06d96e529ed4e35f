//! Power degradation over an exposure sequence: baseline, per-point loss, trend,
//! stabilization and recovery.

use crate::stats::{linear_regression, mean};
use qualify_core::model::{Measurement, MeasurementType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured so reports and dashboards can render the reason instead of a bare failure.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum AnalysisError {
    #[error("no baseline: {reason}")]
    NoBaseline { reason: String },

    #[error("insufficient data: {reason}")]
    InsufficientData { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationPoint {
    pub elapsed_hours: f64,
    pub pmax: f64,
    pub measurement_type: MeasurementType,
}

impl DegradationPoint {
    pub fn new(elapsed_hours: f64, pmax: f64, measurement_type: MeasurementType) -> Self {
        Self {
            elapsed_hours,
            pmax,
            measurement_type,
        }
    }
}

/// Build the series for `parameter` from ledger entries.
///
/// BAD and non-numeric readings are skipped. `elapsed_hours` comes from the reading's
/// metadata when present, otherwise from its timestamp relative to the earliest reading.
/// The result is ordered by elapsed time; readings at the same time keep ledger order.
pub fn degradation_points<'a>(
    measurements: impl IntoIterator<Item = &'a Measurement>,
    parameter: &str,
) -> Vec<DegradationPoint> {
    let readings: Vec<(&Measurement, f64)> = measurements
        .into_iter()
        .filter(|m| m.parameter == parameter && m.is_usable())
        .filter_map(|m| m.numeric().map(|v| (m, v)))
        .collect();
    let Some(t0) = readings.iter().map(|(m, _)| m.timestamp).min() else {
        return Vec::new();
    };

    let mut points: Vec<DegradationPoint> = readings
        .into_iter()
        .map(|(m, pmax)| {
            let elapsed_hours = m
                .metadata
                .get("elapsed_hours")
                .and_then(|v| v.as_f64())
                .unwrap_or_else(|| {
                    (m.timestamp - t0).num_milliseconds() as f64 / 3_600_000.0
                });
            DegradationPoint::new(elapsed_hours, pmax, m.measurement_type)
        })
        .collect();
    points.sort_by(|a, b| a.elapsed_hours.total_cmp(&b.elapsed_hours));
    points
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilizationOptions {
    /// Number of most recent points examined.
    pub window: usize,
    /// Largest consecutive change (percentage points) still counted as stable.
    pub threshold: f64,
}

impl Default for StabilizationOptions {
    fn default() -> Self {
        Self {
            window: 3,
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DegradationOptions {
    /// Overrides the mean of the `initial` points.
    pub baseline: Option<f64>,
    pub stabilization: StabilizationOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    Initial,
    Provided,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointDegradation {
    pub elapsed_hours: f64,
    pub pmax: f64,
    pub measurement_type: MeasurementType,
    pub degradation_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stabilization {
    pub is_stabilized: bool,
    /// Largest consecutive change inside the most recent window; `None` when there are
    /// fewer points than the window.
    pub max_recent_change: Option<f64>,
    /// Elapsed time at which the stable regime began; only set when stabilized.
    pub onset_hours: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    pub recovery_measured: bool,
    pub power_loss: f64,
    pub power_recovered: f64,
    pub recovery_pct: f64,
}

impl Recovery {
    fn not_measured() -> Self {
        Self {
            recovery_measured: false,
            power_loss: 0.0,
            power_recovered: 0.0,
            recovery_pct: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationReport {
    pub baseline: f64,
    pub baseline_source: BaselineSource,
    pub points: Vec<PointDegradation>,
    pub max_degradation_pct: f64,
    pub final_degradation_pct: f64,
    /// Least-squares slope of degradation against elapsed time, in %/hour.
    pub degradation_rate: f64,
    pub rate_r_squared: f64,
    pub stabilization: Stabilization,
    pub recovery: Recovery,
}

pub fn analyze_degradation(
    points: &[DegradationPoint],
    baseline: Option<f64>,
) -> Result<DegradationReport, AnalysisError> {
    analyze_degradation_with(
        points,
        &DegradationOptions {
            baseline,
            ..Default::default()
        },
    )
}

pub fn analyze_degradation_with(
    points: &[DegradationPoint],
    options: &DegradationOptions,
) -> Result<DegradationReport, AnalysisError> {
    if points.is_empty() {
        return Err(AnalysisError::InsufficientData {
            reason: "no points".to_string(),
        });
    }
    if let Some(bad) = points
        .iter()
        .find(|p| !p.pmax.is_finite() || !p.elapsed_hours.is_finite())
    {
        return Err(AnalysisError::InsufficientData {
            reason: format!("non-finite point at {} h", bad.elapsed_hours),
        });
    }

    let (baseline, baseline_source) = resolve_baseline(points, options.baseline)?;
    let degradation = |pmax: f64| 100.0 * (baseline - pmax) / baseline;

    let per_point: Vec<PointDegradation> = points
        .iter()
        .map(|p| PointDegradation {
            elapsed_hours: p.elapsed_hours,
            pmax: p.pmax,
            measurement_type: p.measurement_type,
            degradation_pct: degradation(p.pmax),
        })
        .collect();

    let max_degradation_pct = per_point
        .iter()
        .map(|p| p.degradation_pct)
        .fold(f64::NEG_INFINITY, f64::max);
    let final_degradation_pct = per_point
        .iter()
        .rev()
        .find(|p| p.measurement_type != MeasurementType::Initial)
        .map_or(0.0, |p| p.degradation_pct);

    let xs: Vec<f64> = per_point.iter().map(|p| p.elapsed_hours).collect();
    let ys: Vec<f64> = per_point.iter().map(|p| p.degradation_pct).collect();
    let fit = linear_regression(&xs, &ys);

    let stabilization = detect_stabilization(&xs, &ys, options.stabilization);
    let recovery = recovery(points, baseline);

    tracing::debug!(
        points = points.len(),
        baseline,
        max_degradation_pct,
        final_degradation_pct,
        stabilized = stabilization.is_stabilized,
        "degradation analyzed"
    );

    Ok(DegradationReport {
        baseline,
        baseline_source,
        points: per_point,
        max_degradation_pct,
        final_degradation_pct,
        degradation_rate: fit.slope,
        rate_r_squared: fit.r_squared,
        stabilization,
        recovery,
    })
}

fn resolve_baseline(
    points: &[DegradationPoint],
    provided: Option<f64>,
) -> Result<(f64, BaselineSource), AnalysisError> {
    if let Some(b) = provided {
        if b == 0.0 || !b.is_finite() {
            return Err(AnalysisError::NoBaseline {
                reason: format!("provided baseline {} is unusable", b),
            });
        }
        return Ok((b, BaselineSource::Provided));
    }

    let initial: Vec<f64> = points
        .iter()
        .filter(|p| p.measurement_type == MeasurementType::Initial)
        .map(|p| p.pmax)
        .collect();
    match mean(&initial) {
        None => Err(AnalysisError::NoBaseline {
            reason: "no initial measurements".to_string(),
        }),
        Some(b) if b == 0.0 => Err(AnalysisError::NoBaseline {
            reason: "initial measurements average to zero".to_string(),
        }),
        Some(b) => Ok((b, BaselineSource::Initial)),
    }
}

fn max_step(values: &[f64]) -> f64 {
    values
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0, f64::max)
}

/// Stability of the most recent `window` degradation values, plus the onset of the stable
/// regime.
///
/// Onset is found by walking non-overlapping windows backward from the end. The first
/// window whose internal change reaches the threshold marks the boundary and onset is the
/// point right after it. The last window is clamped at index 0 and may be shorter. When no
/// window reaches the threshold the run was stable from the first point.
fn detect_stabilization(
    hours: &[f64],
    values: &[f64],
    options: StabilizationOptions,
) -> Stabilization {
    let n = options.window.max(2);
    if values.len() < n {
        return Stabilization {
            is_stabilized: false,
            max_recent_change: None,
            onset_hours: None,
        };
    }

    let recent = max_step(&values[values.len() - n..]);
    let is_stabilized = recent < options.threshold;
    let onset_hours = is_stabilized.then(|| {
        let mut end = values.len();
        while end > 0 {
            let start = end.saturating_sub(n);
            if max_step(&values[start..end]) >= options.threshold {
                return hours[end];
            }
            end = start;
        }
        hours[0]
    });

    Stabilization {
        is_stabilized,
        max_recent_change: Some(recent),
        onset_hours,
    }
}

fn recovery(points: &[DegradationPoint], baseline: f64) -> Recovery {
    let last_of = |kind: MeasurementType| points.iter().rev().find(|p| p.measurement_type == kind);
    let (Some(during), Some(post)) = (
        last_of(MeasurementType::DuringExposure),
        last_of(MeasurementType::PostExposure),
    ) else {
        return Recovery::not_measured();
    };

    let power_loss = baseline - during.pmax;
    let power_recovered = post.pmax - during.pmax;
    let recovery_pct = if power_loss > 0.0 {
        100.0 * power_recovered / power_loss
    } else {
        0.0
    };
    Recovery {
        recovery_measured: true,
        power_loss,
        power_recovered,
        recovery_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MeasurementType::{DuringExposure, DuringTest, Initial, PostExposure};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn series(values: &[(f64, f64, MeasurementType)]) -> Vec<DegradationPoint> {
        values
            .iter()
            .map(|&(h, p, t)| DegradationPoint::new(h, p, t))
            .collect()
    }

    #[test]
    fn three_percent_from_initial_baseline() {
        let pts = series(&[(0.0, 300.0, Initial), (100.0, 291.0, DuringTest)]);
        let r = analyze_degradation(&pts, None).unwrap();
        assert_eq!(r.baseline, 300.0);
        assert_eq!(r.baseline_source, BaselineSource::Initial);
        assert!(close(r.final_degradation_pct, 3.0));
        assert!(close(r.max_degradation_pct, 3.0));
        assert!(close(r.degradation_rate, 0.03));
        assert!(close(r.rate_r_squared, 1.0));
    }

    #[test]
    fn baseline_errors() {
        let no_initial = series(&[(0.0, 290.0, DuringTest)]);
        assert!(matches!(
            analyze_degradation(&no_initial, None),
            Err(AnalysisError::NoBaseline { .. })
        ));
        assert!(matches!(
            analyze_degradation(&no_initial, Some(0.0)),
            Err(AnalysisError::NoBaseline { .. })
        ));
        let r = analyze_degradation(&no_initial, Some(300.0)).unwrap();
        assert_eq!(r.baseline_source, BaselineSource::Provided);

        let zero = series(&[(0.0, 0.0, Initial)]);
        assert!(matches!(
            analyze_degradation(&zero, None),
            Err(AnalysisError::NoBaseline { .. })
        ));
        assert!(matches!(
            analyze_degradation(&[], Some(300.0)),
            Err(AnalysisError::InsufficientData { .. })
        ));
    }

    #[test]
    fn analysis_error_serializes_with_tag() {
        let err = AnalysisError::NoBaseline {
            reason: "no initial measurements".into(),
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["error"], "no_baseline");
        assert_eq!(v["reason"], "no initial measurements");
    }

    #[test]
    fn final_ignores_trailing_initial_and_defaults_to_zero() {
        let only_initial = series(&[(0.0, 300.0, Initial), (0.0, 300.0, Initial)]);
        let r = analyze_degradation(&only_initial, None).unwrap();
        assert_eq!(r.final_degradation_pct, 0.0);
        assert_eq!((r.degradation_rate, r.rate_r_squared), (0.0, 0.0));
    }

    #[test]
    fn recent_window_stable() {
        // degradation 3.0, 3.1, 3.05 against a 100 W baseline
        let pts = series(&[
            (0.0, 100.0, Initial),
            (10.0, 97.0, DuringTest),
            (20.0, 96.9, DuringTest),
            (30.0, 96.95, DuringTest),
        ]);
        let r = analyze_degradation(&pts, None).unwrap();
        assert!(r.stabilization.is_stabilized);
        let change = r.stabilization.max_recent_change.unwrap();
        assert!((change - 0.1).abs() < 1e-6, "{change}");
    }

    #[test]
    fn too_few_points_for_window() {
        let pts = series(&[(0.0, 100.0, Initial), (10.0, 97.0, DuringTest)]);
        let s = analyze_degradation(&pts, None).unwrap().stabilization;
        assert!(!s.is_stabilized);
        assert_eq!(s.max_recent_change, None);
        assert_eq!(s.onset_hours, None);
    }

    #[test]
    fn onset_is_point_after_unstable_window() {
        // windows from the end: [3..6) stable, [0..3) holds the 0 -> 5 jump
        let hours = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let values = [0.0, 0.0, 5.0, 5.1, 5.2, 5.25];
        let s = detect_stabilization(&hours, &values, StabilizationOptions::default());
        assert!(s.is_stabilized);
        assert_eq!(s.onset_hours, Some(3.0));
    }

    #[test]
    fn onset_defaults_to_first_point_when_never_unstable() {
        // last window is clamped to [0..1) and holds no change
        let hours = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let values = [0.0, 0.2, 0.3, 0.4, 0.5, 0.6, 0.62];
        let s = detect_stabilization(&hours, &values, StabilizationOptions::default());
        assert!(s.is_stabilized);
        assert_eq!(s.onset_hours, Some(0.0));
    }

    #[test]
    fn unstable_run_has_no_onset() {
        let hours = [0.0, 1.0, 2.0];
        let values = [0.0, 1.0, 2.0];
        let s = detect_stabilization(&hours, &values, StabilizationOptions::default());
        assert!(!s.is_stabilized);
        assert_eq!(s.max_recent_change, Some(1.0));
        assert_eq!(s.onset_hours, None);
    }

    #[test]
    fn recovery_after_dark_storage() {
        let pts = series(&[
            (0.0, 300.0, Initial),
            (50.0, 292.0, DuringExposure),
            (60.0, 297.0, PostExposure),
        ]);
        let rec = analyze_degradation(&pts, None).unwrap().recovery;
        assert!(rec.recovery_measured);
        assert!(close(rec.power_loss, 8.0));
        assert!(close(rec.power_recovered, 5.0));
        assert!(close(rec.recovery_pct, 62.5));
    }

    #[test]
    fn recovery_needs_both_phases() {
        let pts = series(&[(0.0, 300.0, Initial), (50.0, 292.0, DuringExposure)]);
        let rec = analyze_degradation(&pts, None).unwrap().recovery;
        assert!(!rec.recovery_measured);
        assert_eq!(rec.recovery_pct, 0.0);

        let gained = series(&[
            (0.0, 300.0, Initial),
            (50.0, 301.0, DuringExposure),
            (60.0, 302.0, PostExposure),
        ]);
        let rec = analyze_degradation(&gained, None).unwrap().recovery;
        assert!(rec.recovery_measured);
        assert_eq!(rec.recovery_pct, 0.0);
    }
}
