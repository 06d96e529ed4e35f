//! Quality-control checks over a run's measurement ledger.
//!
//! Each check is a pure function producing a [`QcCheckResult`]. [`run_qc_checks`] composes
//! them from the protocol's `qc` block (or the configured fallback) and is always
//! recomputed from the current ledger.

use crate::outliers::{detect_outliers, OutlierMethod};
use crate::stats::{coefficient_of_variation, mean, sample_stdev};
use chrono::{DateTime, Utc};
use qualify_core::errors::EngineError;
use qualify_core::model::{
    IrradianceTolerance, ProtocolDefinition, QcCategory, QcCheckResult, QcSettings, Severity,
    TemperatureTolerance, TestRun,
};
use serde_json::json;

pub fn check_completeness(actual: usize, expected: usize, min_rate: f64) -> QcCheckResult {
    let rate = if expected == 0 {
        100.0
    } else {
        100.0 * actual as f64 / expected as f64
    };
    let passed = rate >= min_rate;
    QcCheckResult::new(
        "completeness",
        QcCategory::Completeness,
        passed,
        if passed { Severity::Info } else { Severity::Error },
    )
    .with_expected(json!({ "count": expected, "min_rate": min_rate }))
    .with_actual(json!({ "count": actual, "rate": rate }))
    .with_message(format!(
        "{}/{} measurements recorded ({:.1}%, minimum {:.1}%)",
        actual, expected, rate, min_rate
    ))
}

/// Coefficient of variation of replicate readings against `max_cv` (percent).
pub fn check_repeatability(name: &str, values: &[f64], max_cv: f64) -> QcCheckResult {
    let base = |passed: bool, severity: Severity| {
        QcCheckResult::new(name, QcCategory::Repeatability, passed, severity)
            .with_expected(json!({ "max_cv": max_cv }))
    };

    if values.len() < 2 {
        return base(false, Severity::Error)
            .with_actual(json!({ "count": values.len() }))
            .with_message("insufficient measurements");
    }
    let Some(cv) = coefficient_of_variation(values) else {
        return base(false, Severity::Error)
            .with_actual(json!({ "count": values.len(), "mean": 0.0 }))
            .with_message("mean is zero");
    };

    let passed = cv <= max_cv;
    base(passed, if passed { Severity::Info } else { Severity::Warning })
        .with_actual(json!({
            "count": values.len(),
            "mean": mean(values),
            "stdev": sample_stdev(values),
            "cv": cv,
        }))
        .with_message(format!("CV {:.3}% (maximum {:.3}%)", cv, max_cv))
}

pub fn check_chronological_order(timestamps: &[DateTime<Utc>]) -> QcCheckResult {
    let first_break = timestamps.windows(2).position(|w| w[1] < w[0]);
    let passed = first_break.is_none();
    let check = QcCheckResult::new(
        "chronological_order",
        QcCategory::Chronology,
        passed,
        if passed { Severity::Info } else { Severity::Error },
    )
    .with_expected("non-decreasing timestamps");
    match first_break {
        None => check
            .with_actual(json!({ "count": timestamps.len() }))
            .with_message(format!("{} timestamps in order", timestamps.len())),
        Some(i) => check
            .with_actual(json!({ "index": i + 1 }))
            .with_message(format!(
                "timestamp at position {} ({}) precedes the previous one ({})",
                i + 1,
                timestamps[i + 1],
                timestamps[i]
            )),
    }
}

/// Check readings against `[low, high]` and report the reading furthest outside it (or
/// furthest from nominal when all pass).
fn check_band(
    name: &str,
    readings: &[f64],
    nominal: f64,
    low: f64,
    high: f64,
) -> QcCheckResult {
    let expected = json!({ "nominal": nominal, "min": low, "max": high });
    let Some(worst) = readings
        .iter()
        .copied()
        .max_by(|a, b| (a - nominal).abs().total_cmp(&(b - nominal).abs()))
    else {
        return QcCheckResult::new(name, QcCategory::Environment, false, Severity::Warning)
            .with_expected(expected)
            .with_actual(json!({ "count": 0 }))
            .with_message("no readings recorded");
    };

    let violations = readings.iter().filter(|&&x| x < low || x > high).count();
    let passed = violations == 0;
    QcCheckResult::new(
        name,
        QcCategory::Environment,
        passed,
        if passed { Severity::Info } else { Severity::Warning },
    )
    .with_expected(expected)
    .with_actual(json!({ "worst": worst, "count": readings.len(), "violations": violations }))
    .with_message(if passed {
        format!("all {} readings within [{}, {}]", readings.len(), low, high)
    } else {
        format!(
            "{} of {} readings outside [{}, {}], worst {}",
            violations,
            readings.len(),
            low,
            high,
            worst
        )
    })
}

pub fn check_irradiance(readings: &[f64], tolerance: &IrradianceTolerance) -> QcCheckResult {
    let span = tolerance.nominal * tolerance.tolerance_pct / 100.0;
    check_band(
        &format!("environment:{}", tolerance.parameter),
        readings,
        tolerance.nominal,
        tolerance.nominal - span,
        tolerance.nominal + span,
    )
}

pub fn check_temperature(readings: &[f64], tolerance: &TemperatureTolerance) -> QcCheckResult {
    check_band(
        &format!("environment:{}", tolerance.parameter),
        readings,
        tolerance.nominal,
        tolerance.nominal - tolerance.tolerance,
        tolerance.nominal + tolerance.tolerance,
    )
}

pub fn check_outliers(parameter: &str, values: &[f64], method: OutlierMethod) -> QcCheckResult {
    let indices = detect_outliers(values, method);
    let passed = indices.is_empty();
    let flagged: Vec<f64> = indices.iter().map(|&i| values[i]).collect();
    QcCheckResult::new(
        format!("outliers:{}", parameter),
        QcCategory::Outlier,
        passed,
        if passed { Severity::Info } else { Severity::Warning },
    )
    .with_expected(json!({ "method": method.name(), "k": method.k() }))
    .with_actual(json!({ "indices": indices, "values": flagged, "count": values.len() }))
    .with_message(format!(
        "{} outlier(s) among {} readings ({} k={})",
        indices.len(),
        values.len(),
        method.name(),
        method.k()
    ))
}

/// All QC checks for a run. The protocol's own `qc` block wins over `fallback`.
pub fn run_qc_checks(
    run: &TestRun,
    protocol: &ProtocolDefinition,
    fallback: &QcSettings,
) -> Result<Vec<QcCheckResult>, EngineError> {
    if run.protocol_id != protocol.id || run.protocol_version != protocol.version {
        return Err(EngineError::ProtocolMismatch {
            run_id: run.run_id.clone(),
            expected: format!("{}@{}", run.protocol_id, run.protocol_version),
            actual: protocol.key().to_string(),
        });
    }
    let settings = protocol.qc.as_ref().unwrap_or(fallback);
    let ledger = &run.ledger;
    let mut results = Vec::new();

    let mut expected = 0usize;
    let mut actual = 0usize;
    for spec in &protocol.measurement_specs {
        let want = spec.expected_count as usize;
        let have = ledger
            .usable(&spec.parameter)
            .filter(|m| spec.measurement_type.map_or(true, |t| m.measurement_type == t))
            .count();
        expected += want;
        actual += have.min(want);
    }
    results.push(check_completeness(actual, expected, settings.min_completion_rate));

    for spec in protocol.measurement_specs.iter().filter(|s| s.expected_count >= 2) {
        let values: Vec<f64> = ledger
            .usable(&spec.parameter)
            .filter(|m| spec.measurement_type.map_or(true, |t| m.measurement_type == t))
            .filter_map(|m| m.numeric())
            .collect();
        results.push(check_repeatability(
            &format!("repeatability:{}", spec.id),
            &values,
            settings.max_cv,
        ));
    }

    results.push(check_chronological_order(&ledger.timestamps()));

    if let Some(tol) = &settings.irradiance {
        results.push(check_irradiance(&ledger.numeric_values(&tol.parameter), tol));
    }
    if let Some(tol) = &settings.temperature {
        results.push(check_temperature(&ledger.numeric_values(&tol.parameter), tol));
    }

    match OutlierMethod::from_settings(&settings.outlier) {
        Some(method) => {
            for parameter in ledger.parameters() {
                let values = ledger.numeric_values(parameter);
                if values.len() >= settings.outlier.min_points {
                    results.push(check_outliers(parameter, &values, method));
                }
            }
        }
        None => tracing::warn!(
            run_id = %run.run_id,
            "outlier screening skipped: zscore method has no threshold"
        ),
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    tracing::info!(
        run_id = %run.run_id,
        protocol_id = %protocol.id,
        checks = results.len(),
        failed,
        "qc evaluated"
    );
    Ok(results)
}

/// Highest severity among failed checks, if any failed.
pub fn worst_failure(results: &[QcCheckResult]) -> Option<Severity> {
    results.iter().filter(|r| !r.passed).map(|r| r.severity).max()
}
