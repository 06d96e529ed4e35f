use super::show::{print_run_text, run_json};
use crate::cli::args::{OutputFormat, RunArgs};
use crate::exit_codes;
use anyhow::Context;
use chrono::{DateTime, Utc};
use qualify_core::config::QualifyConfig;
use qualify_core::engine::{ActionRegistry, RunRegistry, StepInputs};
use qualify_core::model::{
    MeasurementType, MeasurementValue, NewMeasurement, QcCheckResult, RunStatus, TestResult,
    TestRun,
};
use qualify_core::protocol::ProtocolLoader;
use qualify_metrics::{run_qc_checks, worst_failure};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Session script: parameter overrides and the steps to execute, in order.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Session {
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
    steps: Vec<SessionStep>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionStep {
    step_id: String,
    #[serde(default)]
    readings: Vec<SessionReading>,
    #[serde(default)]
    observations: Option<String>,
    #[serde(default)]
    verdict: Option<bool>,
    #[serde(default)]
    skip: bool,
    #[serde(default)]
    elapsed_hours: Option<f64>,
}

/// A reading with a plain JSON value instead of the tagged ledger form.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionReading {
    parameter: String,
    value: serde_json::Value,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    measurement_type: MeasurementType,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl SessionStep {
    fn inputs(&self) -> StepInputs {
        StepInputs {
            readings: self
                .readings
                .iter()
                .map(|r| NewMeasurement {
                    parameter: r.parameter.clone(),
                    value: MeasurementValue::from_json(&r.value),
                    unit: r.unit.clone(),
                    measurement_type: r.measurement_type,
                    timestamp: r.timestamp,
                    step_id: None,
                    metadata: r.metadata.clone(),
                })
                .collect(),
            observations: self.observations.clone(),
            verdict: self.verdict,
            skip: self.skip,
            elapsed_hours: self.elapsed_hours,
        }
    }
}

fn read_session(path: &Path) -> anyhow::Result<Session> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read session {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid session {}", path.display()))
}

/// `name=value`; the value is parsed as JSON and falls back to a string.
fn parse_param(raw: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("parameter '{}' is not NAME=VALUE", raw))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((name.trim().to_string(), value))
}

pub fn run(args: RunArgs, cfg: &QualifyConfig) -> anyhow::Result<i32> {
    let mut loader = ProtocolLoader::new();
    let protocol = match loader.load_path(&args.protocol) {
        Ok(p) => p,
        Err(e) => return Ok(super::report_protocol_error(&e)),
    };

    let (session, overrides) = match read_session(&args.session).and_then(|session| {
        let mut overrides = session.parameters.clone();
        for raw in &args.params {
            let (name, value) = parse_param(raw)?;
            overrides.insert(name, value);
        }
        Ok((session, overrides))
    }) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let runs = RunRegistry::new();
    let run_id = match runs.create_test_run_with(
        protocol.clone(),
        &args.specimen,
        &args.operator,
        overrides,
    ) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    runs.start(&run_id)?;

    let actions = ActionRegistry::with_builtins();
    for step in &session.steps {
        match runs.execute_step(&run_id, &step.step_id, &step.inputs(), &actions) {
            Ok(status) => tracing::debug!(
                run_id = %run_id,
                step_id = %step.step_id,
                status = %status,
                "session step done"
            ),
            Err(e) => {
                tracing::error!(
                    run_id = %run_id,
                    step_id = %step.step_id,
                    error = %e,
                    "session step rejected"
                );
                let reason = format!("session step '{}' rejected: {}", step.step_id, e);
                abort_if_running(&runs, &run_id, &reason)?;
            }
        }
        if runs.snapshot(&run_id)?.is_terminal() {
            break;
        }
    }

    if runs.snapshot(&run_id)?.status == RunStatus::InProgress {
        if let Err(e) = runs.complete(&run_id) {
            abort_if_running(&runs, &run_id, &format!("session ended early: {}", e))?;
        }
    }

    let run = runs.snapshot(&run_id)?;
    let qc = run_qc_checks(&run, &protocol, &cfg.qc_defaults())?;

    let store = super::open_store(&args.db, cfg)?;
    store.save_run(&run)?;
    store.save_qc_results(&run.run_id, &qc)?;

    match args.format {
        OutputFormat::Json => super::print_json(&run_json(&run, &qc))?,
        OutputFormat::Text => print_run_text(&run, &qc),
    }
    Ok(run_exit_code(&run, &qc))
}

fn abort_if_running(runs: &RunRegistry, run_id: &str, reason: &str) -> anyhow::Result<()> {
    if runs.snapshot(run_id)?.status == RunStatus::InProgress {
        runs.abort(run_id, reason)?;
    }
    Ok(())
}

pub(crate) fn run_exit_code(run: &TestRun, qc: &[QcCheckResult]) -> i32 {
    let blocking_qc = worst_failure(qc).is_some_and(|s| s.is_blocking());
    if run.status != RunStatus::Completed || run.result == TestResult::Fail || blocking_qc {
        exit_codes::TEST_FAILED
    } else {
        exit_codes::OK
    }
}
