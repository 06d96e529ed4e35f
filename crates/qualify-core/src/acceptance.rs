//! Acceptance-criteria evaluation.
//!
//! Criteria are structured comparisons (`parameter operator value`), never expressions.
//! Each criterion is evaluated in isolation: a malformed criterion or a non-numeric
//! comparand produces a FAIL verdict carrying a reason and evaluation moves on.
//!
//! Aggregation into a run-level [`TestResult`]:
//!
//! | evaluations contain                              | result        |
//! |--------------------------------------------------|---------------|
//! | a determined failure at `error`/`critical`       | FAIL          |
//! | otherwise, any undetermined criterion            | CONDITIONAL   |
//! | otherwise, a failure at `warning`/`info`         | CONDITIONAL   |
//! | every criterion passed                           | PASS          |
//! | no criteria at all                               | NOT_EVALUATED |

use crate::ledger::MeasurementLedger;
use crate::model::{
    AcceptanceCriterion, MeasurementValue, Operator, ScalarValue, Severity, TestResult,
    ThresholdValue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceEvaluation {
    pub criterion_id: String,
    pub parameter: String,
    pub severity: Severity,

    /// `None` when the criterion could not be determined (no value recorded yet).
    pub passed: Option<bool>,

    pub evaluated_value: Option<MeasurementValue>,
    pub failure_reason: Option<String>,
}

impl AcceptanceEvaluation {
    pub fn is_undetermined(&self) -> bool {
        self.passed.is_none()
    }

    pub fn is_failure(&self) -> bool {
        self.passed == Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComparisonError {
    #[error("not numeric")]
    NotNumeric,

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),
}

/// `actual <operator> expected`.
///
/// Ordering operators and `between` coerce `actual` to a number; `==`/`!=` compare raw
/// values of the same kind, and values of different kinds are never equal.
pub fn compare(
    actual: &MeasurementValue,
    operator: Operator,
    expected: &ThresholdValue,
) -> Result<bool, ComparisonError> {
    match (operator, expected) {
        (Operator::Between, ThresholdValue::Range(range)) => {
            let [low, high] = range.as_slice() else {
                return Err(ComparisonError::InvalidThreshold(format!(
                    "between needs [low, high], got {} values",
                    range.len()
                )));
            };
            if low > high {
                return Err(ComparisonError::InvalidThreshold(format!(
                    "range [{}, {}] is not ordered",
                    low, high
                )));
            }
            let x = actual.as_f64().ok_or(ComparisonError::NotNumeric)?;
            Ok(*low <= x && x <= *high)
        }
        (Operator::Between, ThresholdValue::Scalar(_)) => Err(ComparisonError::InvalidThreshold(
            "between needs a [low, high] range".into(),
        )),
        (op, ThresholdValue::Range(_)) => Err(ComparisonError::InvalidThreshold(format!(
            "operator {} needs a single value",
            op
        ))),
        (op, ThresholdValue::Scalar(expected)) if op.is_ordering() => {
            let ScalarValue::Number(limit) = expected else {
                return Err(ComparisonError::InvalidThreshold(format!(
                    "operator {} needs a numeric value, got {}",
                    op, expected
                )));
            };
            let x = actual.as_f64().ok_or(ComparisonError::NotNumeric)?;
            Ok(match op {
                Operator::Gt => x > *limit,
                Operator::Ge => x >= *limit,
                Operator::Lt => x < *limit,
                _ => x <= *limit,
            })
        }
        (Operator::Eq, ThresholdValue::Scalar(expected)) => Ok(raw_equals(actual, expected)),
        (_, ThresholdValue::Scalar(expected)) => Ok(!raw_equals(actual, expected)),
    }
}

fn raw_equals(actual: &MeasurementValue, expected: &ScalarValue) -> bool {
    match (actual, expected) {
        (MeasurementValue::Numeric(a), ScalarValue::Number(b)) => a == b,
        (MeasurementValue::Text(a), ScalarValue::Text(b)) => a == b,
        (MeasurementValue::Boolean(a), ScalarValue::Bool(b)) => a == b,
        (MeasurementValue::Json(v), ScalarValue::Number(b)) => v.as_f64() == Some(*b),
        (MeasurementValue::Json(v), ScalarValue::Text(b)) => v.as_str() == Some(b.as_str()),
        (MeasurementValue::Json(v), ScalarValue::Bool(b)) => v.as_bool() == Some(*b),
        _ => false,
    }
}

/// Evaluate every criterion against the ledger and run parameters.
///
/// The actual value of a criterion is the most recent usable measurement of its
/// parameter, falling back to a run parameter of the same name.
pub fn evaluate(
    criteria: &[AcceptanceCriterion],
    ledger: &MeasurementLedger,
    parameters: &BTreeMap<String, serde_json::Value>,
) -> Vec<AcceptanceEvaluation> {
    criteria
        .iter()
        .map(|criterion| evaluate_one(criterion, ledger, parameters))
        .collect()
}

fn evaluate_one(
    criterion: &AcceptanceCriterion,
    ledger: &MeasurementLedger,
    parameters: &BTreeMap<String, serde_json::Value>,
) -> AcceptanceEvaluation {
    let threshold = &criterion.threshold;
    let mut eval = AcceptanceEvaluation {
        criterion_id: criterion.id.clone(),
        parameter: threshold.parameter.clone(),
        severity: criterion.severity,
        passed: None,
        evaluated_value: None,
        failure_reason: None,
    };

    let actual = ledger
        .latest(&threshold.parameter)
        .map(|m| m.value.clone())
        .or_else(|| {
            parameters
                .get(&threshold.parameter)
                .map(MeasurementValue::from_json)
        });

    let Some(actual) = actual else {
        eval.failure_reason = Some(format!(
            "no measurement recorded for parameter '{}'",
            threshold.parameter
        ));
        return eval;
    };

    match compare(&actual, threshold.operator, &threshold.value) {
        Ok(true) => eval.passed = Some(true),
        Ok(false) => {
            eval.passed = Some(false);
            eval.failure_reason = Some(format!(
                "{} = {} does not satisfy {} {}",
                threshold.parameter, actual, threshold.operator, threshold.value
            ));
        }
        Err(e) => {
            tracing::debug!(
                criterion = %criterion.id,
                error = %e,
                "criterion could not be compared"
            );
            eval.passed = Some(false);
            eval.failure_reason = Some(e.to_string());
        }
    }
    eval.evaluated_value = Some(actual);
    eval
}

pub fn aggregate(evaluations: &[AcceptanceEvaluation]) -> TestResult {
    if evaluations.is_empty() {
        return TestResult::NotEvaluated;
    }
    if evaluations
        .iter()
        .any(|e| e.is_failure() && e.severity.is_blocking())
    {
        return TestResult::Fail;
    }
    if evaluations
        .iter()
        .any(|e| e.is_undetermined() || e.is_failure())
    {
        return TestResult::Conditional;
    }
    TestResult::Pass
}
