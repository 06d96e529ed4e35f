//! Action handlers: the code that actually performs a protocol step.
//!
//! Steps name an action; the [`ActionRegistry`] resolves it to a handler by exact name,
//! then by the step's declared capability. One generic engine runs every protocol.

use crate::errors::diagnostic::codes;
use crate::errors::{Diagnostic, EngineError};
use crate::model::{
    Capability, MeasurementType, MeasurementValue, NewMeasurement, ProtocolDefinition, RunStatus,
    StepDef, StepOutcome, StepStatus, TestRun,
};
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Caller-supplied data for one step execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInputs {
    #[serde(default)]
    pub readings: Vec<NewMeasurement>,

    #[serde(default)]
    pub observations: Option<String>,

    /// Pass/fail verdict for inspection steps.
    #[serde(default)]
    pub verdict: Option<bool>,

    /// Finish the step as SKIPPED without invoking a handler.
    #[serde(default)]
    pub skip: bool,

    /// Hours actually spent in a conditioning/exposure step.
    #[serde(default)]
    pub elapsed_hours: Option<f64>,
}

pub struct ActionContext<'a> {
    pub run_id: &'a str,
    pub step: &'a StepDef,
    pub parameters: &'a BTreeMap<String, serde_json::Value>,
    pub inputs: &'a StepInputs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub outcome: StepOutcome,
    pub observations: Option<String>,
    /// Readings to append to the ledger, tagged with the executing step.
    pub readings: Vec<NewMeasurement>,
}

impl ActionOutcome {
    pub fn completed() -> Self {
        Self {
            outcome: StepOutcome::Completed,
            observations: None,
            readings: Vec::new(),
        }
    }

    pub fn with_outcome(mut self, outcome: StepOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_observations(mut self, observations: Option<String>) -> Self {
        self.observations = observations;
        self
    }

    pub fn with_readings(mut self, readings: Vec<NewMeasurement>) -> Self {
        self.readings = readings;
        self
    }
}

pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> &'static [Capability];
    fn execute(&self, ctx: &ActionContext<'_>) -> anyhow::Result<ActionOutcome>;
}

fn check_readings(readings: &[NewMeasurement]) -> anyhow::Result<()> {
    for r in readings {
        if let MeasurementValue::Numeric(n) = r.value {
            if !n.is_finite() {
                bail!("reading for '{}' is not a finite number: {}", r.parameter, n);
            }
        }
    }
    Ok(())
}

/// Records the supplied readings. A measurement step without readings fails.
pub struct MeasureAction;

impl ActionHandler for MeasureAction {
    fn name(&self) -> &'static str {
        "measure"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Measure]
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> anyhow::Result<ActionOutcome> {
        let inputs = ctx.inputs;
        if inputs.readings.is_empty() {
            return Ok(ActionOutcome::completed()
                .with_outcome(StepOutcome::Failed)
                .with_observations(Some("no readings supplied".into())));
        }
        check_readings(&inputs.readings)?;
        Ok(ActionOutcome::completed()
            .with_observations(inputs.observations.clone())
            .with_readings(inputs.readings.clone()))
    }
}

/// Conditioning or exposure. When the step declares a duration the elapsed time must be
/// reported; a short exposure fails the step.
pub struct ExposureAction;

impl ActionHandler for ExposureAction {
    fn name(&self) -> &'static str {
        "expose"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Condition]
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> anyhow::Result<ActionOutcome> {
        let inputs = ctx.inputs;
        check_readings(&inputs.readings)?;
        let readings = inputs
            .readings
            .iter()
            .cloned()
            .map(|mut r| {
                if r.measurement_type == MeasurementType::DuringTest {
                    r.measurement_type = MeasurementType::DuringExposure;
                }
                r
            })
            .collect();
        let outcome = ActionOutcome::completed()
            .with_observations(inputs.observations.clone())
            .with_readings(readings);

        let Some(required) = ctx.step.duration_hours else {
            return Ok(outcome);
        };
        let Some(elapsed) = inputs.elapsed_hours else {
            bail!(
                "step '{}' requires {} h of exposure but no elapsed_hours was reported",
                ctx.step.id,
                required
            );
        };
        if elapsed < required {
            return Ok(outcome
                .with_outcome(StepOutcome::Failed)
                .with_observations(Some(format!(
                    "exposure ended after {} h, {} h required",
                    elapsed, required
                ))));
        }
        Ok(outcome)
    }
}

/// Visual or electrical inspection with an explicit verdict.
pub struct InspectionAction;

impl ActionHandler for InspectionAction {
    fn name(&self) -> &'static str {
        "inspect"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Inspect]
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> anyhow::Result<ActionOutcome> {
        let inputs = ctx.inputs;
        let outcome = match inputs.verdict {
            Some(true) => StepOutcome::Passed,
            Some(false) => StepOutcome::Failed,
            None => bail!("inspection step '{}' needs a verdict", ctx.step.id),
        };
        check_readings(&inputs.readings)?;
        Ok(ActionOutcome::completed()
            .with_outcome(outcome)
            .with_observations(inputs.observations.clone())
            .with_readings(inputs.readings.clone()))
    }
}

pub struct WaitAction;

impl ActionHandler for WaitAction {
    fn name(&self) -> &'static str {
        "wait"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Wait]
    }

    fn execute(&self, ctx: &ActionContext<'_>) -> anyhow::Result<ActionOutcome> {
        Ok(ActionOutcome::completed().with_observations(ctx.inputs.observations.clone()))
    }
}

#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: Vec<Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MeasureAction));
        registry.register(Arc::new(ExposureAction));
        registry.register(Arc::new(InspectionAction));
        registry.register(Arc::new(WaitAction));
        registry
    }

    /// Register a handler, replacing any handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.retain(|h| h.name() != handler.name());
        self.handlers.push(handler);
    }

    pub fn resolve(&self, step: &StepDef) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .iter()
            .find(|h| h.name() == step.action)
            .or_else(|| {
                let cap = step.capability?;
                self.handlers.iter().find(|h| h.capabilities().contains(&cap))
            })
            .cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

/// Steps whose action no registered handler can execute.
pub fn lint_actions(protocol: &ProtocolDefinition, registry: &ActionRegistry) -> Vec<Diagnostic> {
    protocol
        .phases
        .iter()
        .flat_map(|phase| phase.steps.iter())
        .filter(|step| registry.resolve(step).is_none())
        .map(|step| {
            Diagnostic::new(
                codes::W_PROTO_UNRESOLVED_ACTION,
                format!(
                    "step '{}' uses action '{}' which has no handler",
                    step.id, step.action
                ),
            )
            .with_severity("warn")
            .with_source("protocol")
            .with_fix_step(format!("use one of: {}", registry.names().join(", ")))
            .with_fix_step("or declare a capability on the step")
        })
        .collect()
}

impl TestRun {
    /// Run one step through its action handler: start it, execute the handler, record
    /// the readings and finish it with the handler's outcome.
    ///
    /// A handler error, or a reading the ledger rejects, aborts the run with the error
    /// text as reason. Returns the final status of the step.
    pub fn execute_step(
        &mut self,
        protocol: &ProtocolDefinition,
        step_id: &str,
        inputs: &StepInputs,
        registry: &ActionRegistry,
    ) -> Result<StepStatus, EngineError> {
        self.check_protocol(protocol)?;
        let (_, step) = protocol
            .find_step(step_id)
            .ok_or_else(|| EngineError::UnknownStep {
                run_id: self.run_id.clone(),
                step_id: step_id.to_string(),
            })?;
        let handler = registry
            .resolve(step)
            .ok_or_else(|| EngineError::UnknownAction {
                step_id: step_id.to_string(),
                action: step.action.clone(),
            })?;

        self.start_step(step_id)?;
        if inputs.skip {
            self.finish_step(step_id, StepOutcome::Skipped, inputs.observations.clone())?;
            return Ok(StepStatus::Skipped);
        }

        let ctx = ActionContext {
            run_id: &self.run_id,
            step,
            parameters: &self.parameters,
            inputs,
        };
        let result = handler.execute(&ctx);
        tracing::debug!(
            run_id = %self.run_id,
            step_id,
            handler = handler.name(),
            ok = result.is_ok(),
            "action executed"
        );

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!(
                    "action '{}' failed on step '{}': {:#}",
                    step.action, step_id, e
                );
                self.abort(reason)?;
                return Ok(self.step_status(step_id));
            }
        };

        for reading in outcome.readings {
            let reading = NewMeasurement {
                step_id: Some(step_id.to_string()),
                ..reading
            };
            if let Err(e) = self.record_measurement(protocol, reading) {
                self.abort(format!("reading rejected on step '{}': {}", step_id, e))?;
                return Ok(self.step_status(step_id));
            }
            if self.status != RunStatus::InProgress {
                return Ok(self.step_status(step_id));
            }
        }

        self.finish_step(step_id, outcome.outcome, outcome.observations)?;
        Ok(self.step_status(step_id))
    }

    fn step_status(&self, step_id: &str) -> StepStatus {
        self.step(step_id).map(|s| s.status).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QualityFlag, TestResult};
    use crate::protocol::{parse, ProtocolFormat};

    const PROTOCOL: &str = r#"
id: UV-15
version: 1.2.0
name: UV preconditioning
category: environmental
phases:
  - id: initial
    steps:
      - { id: i-1, sequence: 1, action: measure }
  - id: exposure
    steps:
      - { id: e-1, sequence: 1, action: expose, duration_hours: 48 }
      - { id: e-2, sequence: 2, action: visual_check, capability: inspect }
      - { id: e-3, sequence: 3, action: rest, capability: wait }
acceptance_criteria:
  - id: AC-PMAX
    severity: critical
    threshold: { parameter: pmax, operator: ">=", value: 285 }
safety_limits:
  module_temperature: { value: 85, action: abort }
"#;

    fn setup() -> (ProtocolDefinition, TestRun, ActionRegistry) {
        let p = parse(PROTOCOL, ProtocolFormat::Yaml).unwrap();
        let mut run = TestRun::new(&p, "MOD-7", "bob").unwrap();
        run.start().unwrap();
        (p, run, ActionRegistry::with_builtins())
    }

    fn readings(pmax: f64) -> StepInputs {
        StepInputs {
            readings: vec![NewMeasurement::numeric("pmax", pmax).unit("W")],
            ..Default::default()
        }
    }

    #[test]
    fn resolves_by_name_then_capability() {
        let (p, _, reg) = setup();
        let (_, e2) = p.find_step("e-2").unwrap();
        assert_eq!(reg.resolve(e2).unwrap().name(), "inspect");
        let (_, e1) = p.find_step("e-1").unwrap();
        assert_eq!(reg.resolve(e1).unwrap().name(), "expose");
        assert!(lint_actions(&p, &reg).is_empty());
        assert_eq!(lint_actions(&p, &ActionRegistry::new()).len(), 4);
    }

    #[test]
    fn full_run_through_handlers() {
        let (p, mut run, reg) = setup();
        let status = run.execute_step(&p, "i-1", &readings(300.0), &reg).unwrap();
        assert_eq!(status, StepStatus::Completed);
        assert_eq!(run.ledger.len(), 1);
        assert_eq!(run.ledger.as_slice()[0].step_id.as_deref(), Some("i-1"));

        let exposure = StepInputs {
            elapsed_hours: Some(48.0),
            ..readings(295.0)
        };
        run.execute_step(&p, "e-1", &exposure, &reg).unwrap();
        assert_eq!(
            run.ledger.as_slice()[1].measurement_type,
            MeasurementType::DuringExposure
        );

        let inspect = StepInputs {
            verdict: Some(true),
            observations: Some("no delamination".into()),
            ..Default::default()
        };
        assert_eq!(
            run.execute_step(&p, "e-2", &inspect, &reg).unwrap(),
            StepStatus::Completed
        );
        assert_eq!(run.step("e-2").unwrap().pass_fail, Some(true));
        run.execute_step(&p, "e-3", &StepInputs::default(), &reg)
            .unwrap();

        assert_eq!(run.complete(&p).unwrap(), TestResult::Pass);
    }

    #[test]
    fn handler_error_aborts_run_with_reason() {
        let (p, mut run, reg) = setup();
        run.execute_step(&p, "i-1", &readings(300.0), &reg).unwrap();
        let status = run
            .execute_step(&p, "e-1", &StepInputs::default(), &reg)
            .unwrap();
        assert_eq!(status, StepStatus::Failed);
        assert_eq!(run.status, RunStatus::Aborted);
        let reason = run.status_reason.as_deref().unwrap();
        assert!(reason.contains("elapsed_hours"), "{reason}");
        assert_eq!(run.ledger.len(), 1);
    }

    #[test]
    fn short_exposure_fails_step_without_aborting() {
        let (p, mut run, reg) = setup();
        run.execute_step(&p, "i-1", &readings(300.0), &reg).unwrap();
        let short = StepInputs {
            elapsed_hours: Some(12.0),
            ..Default::default()
        };
        assert_eq!(
            run.execute_step(&p, "e-1", &short, &reg).unwrap(),
            StepStatus::Failed
        );
        assert_eq!(run.status, RunStatus::InProgress);
    }

    #[test]
    fn measure_without_readings_fails_step() {
        let (p, mut run, reg) = setup();
        let status = run
            .execute_step(&p, "i-1", &StepInputs::default(), &reg)
            .unwrap();
        assert_eq!(status, StepStatus::Failed);
        assert_eq!(run.step("i-1").unwrap().pass_fail, Some(false));
    }

    #[test]
    fn skip_finishes_skipped() {
        let (p, mut run, reg) = setup();
        let skip = StepInputs {
            skip: true,
            ..Default::default()
        };
        assert_eq!(
            run.execute_step(&p, "i-1", &skip, &reg).unwrap(),
            StepStatus::Skipped
        );
        assert_eq!(run.phase("initial").unwrap().status, crate::model::PhaseStatus::Completed);
    }

    #[test]
    fn safety_abort_from_reading_stops_step() {
        let (p, mut run, reg) = setup();
        let hot = StepInputs {
            readings: vec![
                NewMeasurement::numeric("module_temperature", 91.0),
                NewMeasurement::numeric("pmax", 300.0),
            ],
            ..Default::default()
        };
        assert_eq!(
            run.execute_step(&p, "i-1", &hot, &reg).unwrap(),
            StepStatus::Failed
        );
        assert_eq!(run.status, RunStatus::Aborted);
        assert_eq!(run.ledger.len(), 1);
        assert_eq!(run.ledger.as_slice()[0].quality_flag, QualityFlag::Good);
    }

    #[test]
    fn unknown_action_leaves_run_untouched() {
        let (p, mut run, _) = setup();
        let err = run
            .execute_step(&p, "i-1", &readings(1.0), &ActionRegistry::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownAction { .. }));
        assert_eq!(run.step("i-1").unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn inputs_deserialize_from_json() {
        let inputs: StepInputs = serde_json::from_value(serde_json::json!({
            "readings": [{
                "parameter": "pmax",
                "value": { "kind": "numeric", "value": 301.2 },
                "unit": "W"
            }],
            "verdict": true
        }))
        .unwrap();
        assert_eq!(inputs.readings[0].value, MeasurementValue::Numeric(301.2));
        assert!(!inputs.skip);
    }
}
