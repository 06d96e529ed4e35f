use crate::model::{
    Measurement, MeasurementType, MeasurementValue, PhaseRecord, PhaseStatus, QcCheckResult,
    QualityFlag, RunStatus, StepRecord, StepStatus, TestResult,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// One line of `list_runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub protocol_id: String,
    pub protocol_version: String,
    pub specimen_id: String,
    pub operator: String,
    pub status: RunStatus,
    pub result: TestResult,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn fmt_opt_ts(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(fmt_ts)
}

fn conversion(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub(crate) fn ts_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, format!("bad timestamp '{}': {}", raw, e)))
}

pub(crate) fn opt_ts_at(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => ts_at(row, idx).map(Some),
    }
}

pub(crate) fn json_at<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion(idx, e.to_string()))
}

/// Column label of a unit enum, as serde writes it.
pub(crate) fn label<T: Serialize>(value: &T) -> anyhow::Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => anyhow::bail!("expected a string label, got {}", other),
    }
}

pub(crate) fn label_at<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_value(serde_json::Value::String(raw.clone()))
        .map_err(|_| conversion(idx, format!("unknown label '{}'", raw)))
}

fn parsed_at<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion(idx, format!("unknown value '{}'", raw)))
}

pub(crate) fn run_status_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<RunStatus> {
    parsed_at(row, idx, RunStatus::parse)
}

pub(crate) fn test_result_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<TestResult> {
    parsed_at(row, idx, TestResult::parse)
}

/// Tagged value columns: `(kind, numeric, text, boolean, json)`.
pub(crate) type ValueColumns = (
    &'static str,
    Option<f64>,
    Option<String>,
    Option<bool>,
    Option<String>,
);

pub(crate) fn value_columns(value: &MeasurementValue) -> anyhow::Result<ValueColumns> {
    let kind = value.kind();
    Ok(match value {
        MeasurementValue::Numeric(n) => (kind, Some(*n), None, None, None),
        MeasurementValue::Text(s) => (kind, None, Some(s.clone()), None, None),
        MeasurementValue::Boolean(b) => (kind, None, None, Some(*b), None),
        MeasurementValue::Json(v) => (kind, None, None, None, Some(serde_json::to_string(v)?)),
    })
}

// SELECT order used by `row_to_phase`.
pub(crate) const PHASE_COLUMNS: &str = "phase_id, status, started_at, completed_at";

pub(crate) fn row_to_phase(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhaseRecord> {
    Ok(PhaseRecord {
        phase_id: row.get(0)?,
        status: parsed_at(row, 1, PhaseStatus::parse)?,
        started_at: opt_ts_at(row, 2)?,
        completed_at: opt_ts_at(row, 3)?,
    })
}

pub(crate) const STEP_COLUMNS: &str =
    "step_id, phase_id, sequence, action, status, pass_fail, observations, started_at, completed_at";

pub(crate) fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepRecord> {
    Ok(StepRecord {
        step_id: row.get(0)?,
        phase_id: row.get(1)?,
        sequence: row.get(2)?,
        action: row.get(3)?,
        status: parsed_at(row, 4, StepStatus::parse)?,
        pass_fail: row.get(5)?,
        observations: row.get(6)?,
        started_at: opt_ts_at(row, 7)?,
        completed_at: opt_ts_at(row, 8)?,
    })
}

pub(crate) const MEASUREMENT_COLUMNS: &str = "measurement_id, run_id, parameter, value_kind, \
     value_numeric, value_text, value_boolean, value_json, unit, timestamp, phase_id, step_id, \
     measurement_type, quality_flag, notes, metadata_json";

pub(crate) fn row_to_measurement(row: &rusqlite::Row<'_>) -> rusqlite::Result<Measurement> {
    let kind: String = row.get(3)?;
    let value = match kind.as_str() {
        "numeric" => MeasurementValue::Numeric(row.get(4)?),
        "text" => MeasurementValue::Text(row.get(5)?),
        "boolean" => MeasurementValue::Boolean(row.get(6)?),
        "json" => MeasurementValue::Json(json_at(row, 7)?),
        other => return Err(conversion(3, format!("unknown value kind '{}'", other))),
    };

    Ok(Measurement {
        measurement_id: row.get(0)?,
        test_run_id: row.get(1)?,
        parameter: row.get(2)?,
        value,
        unit: row.get(8)?,
        timestamp: ts_at(row, 9)?,
        phase_id: row.get(10)?,
        step_id: row.get(11)?,
        measurement_type: parsed_at(row, 12, MeasurementType::parse)?,
        quality_flag: parsed_at(row, 13, QualityFlag::parse)?,
        notes: row.get(14)?,
        metadata: json_at(row, 15)?,
    })
}

pub(crate) const QC_COLUMNS: &str =
    "check_name, category, passed, severity, expected_json, actual_json, message";

pub(crate) fn row_to_qc(row: &rusqlite::Row<'_>) -> rusqlite::Result<QcCheckResult> {
    Ok(QcCheckResult {
        check_name: row.get(0)?,
        category: label_at(row, 1)?,
        passed: row.get(2)?,
        severity: label_at(row, 3)?,
        expected_value: json_at(row, 4)?,
        actual_value: json_at(row, 5)?,
        message: row.get(6)?,
    })
}

pub(crate) const SUMMARY_COLUMNS: &str = "run_id, protocol_id, protocol_version, specimen_id, \
     operator, status, result, created_at, completed_at";

pub(crate) fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunSummary> {
    Ok(RunSummary {
        run_id: row.get(0)?,
        protocol_id: row.get(1)?,
        protocol_version: row.get(2)?,
        specimen_id: row.get(3)?,
        operator: row.get(4)?,
        status: run_status_at(row, 5)?,
        result: test_result_at(row, 6)?,
        created_at: ts_at(row, 7)?,
        completed_at: opt_ts_at(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_keep_nanoseconds() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let text = fmt_ts(&ts);
        assert!(text.ends_with(".123456789Z"), "{text}");
        assert_eq!(DateTime::parse_from_rfc3339(&text).unwrap(), ts);
    }

    #[test]
    fn labels_follow_serde_names() {
        assert_eq!(label(&crate::model::QcCategory::Completeness).unwrap(), "completeness");
        assert_eq!(label(&crate::model::Severity::Warning).unwrap(), "warning");
    }
}
