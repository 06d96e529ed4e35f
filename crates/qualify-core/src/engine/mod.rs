//! Execution state machine.
//!
//! Transitions are methods on [`TestRun`]; every one of them checks its precondition and
//! returns [`EngineError::InvalidTransition`] instead of silently doing nothing.
//!
//! ```text
//! run:   PENDING --start--> IN_PROGRESS --complete--> COMPLETED
//!                           IN_PROGRESS --fail-----> FAILED
//!                           IN_PROGRESS --abort----> ABORTED
//! phase: PENDING --enter--> IN_PROGRESS --exit--> COMPLETED
//! step:  PENDING --start--> IN_PROGRESS --finish--> COMPLETED | FAILED | SKIPPED
//! ```
//!
//! [`RunRegistry`] wraps the same operations for concurrent callers addressing runs by id.

pub mod actions;
pub mod registry;

pub use actions::{
    lint_actions, ActionContext, ActionHandler, ActionOutcome, ActionRegistry, ExposureAction,
    InspectionAction, MeasureAction, StepInputs, WaitAction,
};
pub use registry::RunRegistry;

use crate::acceptance::{self, AcceptanceEvaluation};
use crate::errors::EngineError;
use crate::ledger::MeasurementLedger;
use crate::model::{
    Measurement, MeasurementValue, NewMeasurement, PhaseRecord, PhaseStatus, ProtocolDefinition,
    QualityFlag, RunStatus, SafetyAction, StepOutcome, StepRecord, StepStatus, TestResult,
    TestRun,
};
use chrono::Utc;
use std::collections::BTreeMap;

impl TestRun {
    /// New PENDING run bound to `protocol`, with parameters resolved from defaults.
    pub fn new(
        protocol: &ProtocolDefinition,
        specimen_id: impl Into<String>,
        operator: impl Into<String>,
    ) -> Result<Self, EngineError> {
        Self::with_parameters(protocol, specimen_id, operator, BTreeMap::new())
    }

    /// New PENDING run; `overrides` replace protocol defaults and are checked against
    /// the declared type and bounds.
    pub fn with_parameters(
        protocol: &ProtocolDefinition,
        specimen_id: impl Into<String>,
        operator: impl Into<String>,
        overrides: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, EngineError> {
        let parameters = resolve_parameters(protocol, overrides)?;

        let phases = protocol
            .phases
            .iter()
            .map(|p| PhaseRecord {
                phase_id: p.id.clone(),
                status: PhaseStatus::Pending,
                started_at: None,
                completed_at: None,
            })
            .collect();

        let mut steps = Vec::with_capacity(protocol.step_count());
        for phase in &protocol.phases {
            let mut defs: Vec<_> = phase.steps.iter().collect();
            defs.sort_by_key(|s| s.sequence);
            steps.extend(defs.into_iter().map(|s| StepRecord {
                step_id: s.id.clone(),
                phase_id: phase.id.clone(),
                sequence: s.sequence,
                action: s.action.clone(),
                status: StepStatus::Pending,
                pass_fail: None,
                observations: None,
                started_at: None,
                completed_at: None,
            }));
        }

        let run = TestRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            protocol_id: protocol.id.clone(),
            protocol_version: protocol.version.clone(),
            specimen_id: specimen_id.into(),
            operator: operator.into(),
            parameters,
            status: RunStatus::Pending,
            result: TestResult::NotEvaluated,
            status_reason: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            phases,
            steps,
            ledger: MeasurementLedger::new(),
            acceptance: Vec::new(),
        };
        tracing::debug!(
            run_id = %run.run_id,
            protocol_id = %run.protocol_id,
            specimen_id = %run.specimen_id,
            "test run created"
        );
        Ok(run)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.status != RunStatus::Pending {
            return Err(EngineError::transition(
                "run",
                &self.run_id,
                self.status,
                "start",
                "only a PENDING run can be started",
            ));
        }
        self.status = RunStatus::InProgress;
        self.started_at = Some(Utc::now());
        tracing::info!(run_id = %self.run_id, protocol_id = %self.protocol_id, "test run started");
        Ok(())
    }

    /// Terminate the run as ABORTED. Recorded measurements are kept.
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), EngineError> {
        self.require_in_progress("abort")?;
        self.terminate(RunStatus::Aborted, reason.into());
        Ok(())
    }

    /// Terminate the run as FAILED. Recorded measurements are kept.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), EngineError> {
        self.require_in_progress("fail")?;
        self.terminate(RunStatus::Failed, reason.into());
        Ok(())
    }

    fn terminate(&mut self, status: RunStatus, reason: String) {
        let now = Utc::now();
        for phase in &mut self.phases {
            if phase.status == PhaseStatus::InProgress {
                phase.status = PhaseStatus::Failed;
                phase.completed_at = Some(now);
            }
        }
        for step in &mut self.steps {
            if step.status == StepStatus::InProgress {
                step.status = StepStatus::Failed;
                step.completed_at = Some(now);
            }
        }
        self.status = status;
        self.completed_at = Some(now);
        tracing::warn!(
            run_id = %self.run_id,
            status = %status,
            reason = %reason,
            "test run terminated"
        );
        self.status_reason = Some(reason);
    }

    /// Close the run: every phase must be closed. Acceptance criteria are evaluated and
    /// the aggregated result stored on the run.
    pub fn complete(&mut self, protocol: &ProtocolDefinition) -> Result<TestResult, EngineError> {
        self.check_protocol(protocol)?;
        self.require_in_progress("complete")?;
        if let Some(open) = self.phases.iter().find(|p| !p.status.is_closed()) {
            return Err(EngineError::transition(
                "run",
                &self.run_id,
                self.status,
                "complete",
                format!("phase '{}' is still {}", open.phase_id, open.status),
            ));
        }

        self.acceptance = acceptance::evaluate(
            &protocol.acceptance_criteria,
            &self.ledger,
            &self.parameters,
        );
        self.result = acceptance::aggregate(&self.acceptance);
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        tracing::info!(
            run_id = %self.run_id,
            result = %self.result,
            criteria = self.acceptance.len(),
            measurements = self.ledger.len(),
            "test run completed"
        );
        Ok(self.result)
    }

    /// Enter a phase. Phases are entered in declaration order.
    pub fn enter_phase(&mut self, phase_id: &str) -> Result<(), EngineError> {
        self.require_in_progress("enter_phase")?;
        let idx = self.phase_index(phase_id)?;
        let phase = &self.phases[idx];
        if phase.status != PhaseStatus::Pending {
            return Err(EngineError::transition(
                "phase",
                phase_id,
                phase.status,
                "enter",
                "only a PENDING phase can be entered",
            ));
        }
        if let Some(open) = self.phases[..idx].iter().find(|p| !p.status.is_closed()) {
            return Err(EngineError::transition(
                "phase",
                phase_id,
                phase.status,
                "enter",
                format!("earlier phase '{}' is still {}", open.phase_id, open.status),
            ));
        }

        let phase = &mut self.phases[idx];
        phase.status = PhaseStatus::InProgress;
        phase.started_at = Some(Utc::now());
        tracing::debug!(run_id = %self.run_id, phase_id, "phase entered");
        Ok(())
    }

    /// Exit a phase once all of its steps reached a terminal state.
    pub fn exit_phase(&mut self, phase_id: &str) -> Result<(), EngineError> {
        self.require_in_progress("exit_phase")?;
        let idx = self.phase_index(phase_id)?;
        let status = self.phases[idx].status;
        if status != PhaseStatus::InProgress {
            return Err(EngineError::transition(
                "phase",
                phase_id,
                status,
                "exit",
                "only an IN_PROGRESS phase can be exited",
            ));
        }
        if let Some(open) = self
            .steps_in_phase(phase_id)
            .find(|s| !s.status.is_terminal())
        {
            return Err(EngineError::transition(
                "phase",
                phase_id,
                status,
                "exit",
                format!("step '{}' is still {}", open.step_id, open.status),
            ));
        }

        let phase = &mut self.phases[idx];
        phase.status = PhaseStatus::Completed;
        phase.completed_at = Some(Utc::now());
        tracing::debug!(run_id = %self.run_id, phase_id, "phase completed");
        Ok(())
    }

    /// Start a step. Enters its phase when that phase is still PENDING.
    pub fn start_step(&mut self, step_id: &str) -> Result<(), EngineError> {
        self.require_in_progress("start_step")?;
        let idx = self.step_index(step_id)?;
        let step = &self.steps[idx];
        if step.status != StepStatus::Pending {
            return Err(EngineError::transition(
                "step",
                step_id,
                step.status,
                "start",
                "only a PENDING step can be started",
            ));
        }
        if let Some(active) = self.active_step() {
            return Err(EngineError::transition(
                "step",
                step_id,
                step.status,
                "start",
                format!("step '{}' is already in progress", active.step_id),
            ));
        }
        if let Some(before) = self
            .steps_in_phase(&step.phase_id)
            .find(|s| s.sequence < step.sequence && !s.status.is_terminal())
        {
            return Err(EngineError::transition(
                "step",
                step_id,
                step.status,
                "start",
                format!(
                    "step '{}' (sequence {}) has not finished",
                    before.step_id, before.sequence
                ),
            ));
        }

        let phase_id = step.phase_id.clone();
        match self.phase(&phase_id).map(|p| p.status) {
            Some(PhaseStatus::Pending) => self.enter_phase(&phase_id)?,
            Some(PhaseStatus::InProgress) => {}
            Some(closed) => {
                return Err(EngineError::transition(
                    "step",
                    step_id,
                    StepStatus::Pending,
                    "start",
                    format!("phase '{}' is already {}", phase_id, closed),
                ))
            }
            None => {
                return Err(EngineError::UnknownPhase {
                    run_id: self.run_id.clone(),
                    phase_id,
                })
            }
        }

        let step = &mut self.steps[idx];
        step.status = StepStatus::InProgress;
        step.started_at = Some(Utc::now());
        tracing::info!(run_id = %self.run_id, step_id, phase_id = %step.phase_id, "step started");
        Ok(())
    }

    /// Finish the step in progress. Exits its phase once every step of the phase is
    /// terminal.
    pub fn finish_step(
        &mut self,
        step_id: &str,
        outcome: StepOutcome,
        observations: Option<String>,
    ) -> Result<(), EngineError> {
        self.require_in_progress("finish_step")?;
        let idx = self.step_index(step_id)?;
        let step = &mut self.steps[idx];
        if step.status != StepStatus::InProgress {
            return Err(EngineError::transition(
                "step",
                step_id,
                step.status,
                "finish",
                "only an IN_PROGRESS step can be finished",
            ));
        }
        step.status = outcome.status();
        step.pass_fail = outcome.pass_fail();
        step.observations = observations;
        step.completed_at = Some(Utc::now());
        tracing::info!(run_id = %self.run_id, step_id, status = %step.status, "step finished");

        let phase_id = step.phase_id.clone();
        if self.steps_in_phase(&phase_id).all(|s| s.status.is_terminal()) {
            self.exit_phase(&phase_id)?;
        }
        Ok(())
    }

    /// Append a measurement to the ledger.
    ///
    /// The measurement is tagged with the explicit step, or the step in progress, and
    /// its phase. A numeric reading on a parameter with a safety limit is checked: a
    /// `warn` limit flags it SUSPECT, an `abort` limit keeps it and aborts the run.
    pub fn record_measurement(
        &mut self,
        protocol: &ProtocolDefinition,
        new: NewMeasurement,
    ) -> Result<Measurement, EngineError> {
        self.check_protocol(protocol)?;
        self.require_in_progress("record_measurement")?;

        if new.parameter.trim().is_empty() {
            return Err(EngineError::InvalidMeasurement {
                parameter: new.parameter,
                reason: "parameter name is empty".into(),
            });
        }
        if let MeasurementValue::Numeric(n) = new.value {
            if !n.is_finite() {
                return Err(EngineError::InvalidMeasurement {
                    parameter: new.parameter,
                    reason: format!("{} is not a finite number", n),
                });
            }
        }

        let step = match &new.step_id {
            Some(id) => Some(&self.steps[self.step_index(id)?]),
            None => self.active_step(),
        };
        let (step_id, phase_id) = match step {
            Some(s) => (Some(s.step_id.clone()), Some(s.phase_id.clone())),
            None => (None, None),
        };

        let mut measurement = Measurement {
            measurement_id: uuid::Uuid::new_v4().to_string(),
            test_run_id: self.run_id.clone(),
            parameter: new.parameter,
            value: new.value,
            unit: new.unit,
            timestamp: new.timestamp.unwrap_or_else(Utc::now),
            phase_id,
            step_id,
            measurement_type: new.measurement_type,
            quality_flag: QualityFlag::Good,
            notes: None,
            metadata: new.metadata,
        };

        let mut abort_reason = None;
        if let (Some(limit), Some(reading)) = (
            protocol.safety_limits.get(&measurement.parameter),
            measurement.numeric(),
        ) {
            if limit.is_exceeded_by(reading) {
                let message = format!(
                    "safety limit '{}' exceeded: {} (limit {}, {:?})",
                    measurement.parameter, reading, limit.value, limit.direction
                );
                tracing::warn!(
                    run_id = %self.run_id,
                    parameter = %measurement.parameter,
                    reading,
                    limit = limit.value,
                    action = ?limit.action,
                    "safety limit exceeded"
                );
                match limit.action {
                    SafetyAction::Warn => {
                        measurement.quality_flag = QualityFlag::Suspect;
                        measurement.notes = Some(message);
                    }
                    SafetyAction::Abort => abort_reason = Some(message),
                }
            }
        }

        let stored = self.ledger.append(measurement).clone();
        tracing::debug!(
            run_id = %self.run_id,
            measurement_id = %stored.measurement_id,
            parameter = %stored.parameter,
            "measurement recorded"
        );
        if let Some(reason) = abort_reason {
            self.terminate(RunStatus::Aborted, reason);
        }
        Ok(stored)
    }

    /// Change the quality flag (and optionally the notes) of a recorded measurement.
    /// Allowed on terminal runs: review happens after the test.
    pub fn flag_measurement(
        &mut self,
        measurement_id: &str,
        flag: QualityFlag,
        notes: Option<String>,
    ) -> Result<Measurement, EngineError> {
        let run_id = self.run_id.clone();
        let flagged = self
            .ledger
            .flag(measurement_id, flag, notes)
            .cloned()
            .ok_or_else(|| EngineError::UnknownMeasurement {
                run_id: run_id.clone(),
                measurement_id: measurement_id.to_string(),
            })?;
        tracing::info!(
            run_id = %run_id,
            measurement_id,
            flag = flag.as_str(),
            "measurement flagged"
        );
        Ok(flagged)
    }

    /// Evaluate acceptance criteria against the current ledger and store the
    /// evaluations. On a COMPLETED run the stored result is refreshed as well.
    pub fn evaluate_acceptance(
        &mut self,
        protocol: &ProtocolDefinition,
    ) -> Result<Vec<AcceptanceEvaluation>, EngineError> {
        self.check_protocol(protocol)?;
        self.acceptance = acceptance::evaluate(
            &protocol.acceptance_criteria,
            &self.ledger,
            &self.parameters,
        );
        if self.status == RunStatus::Completed {
            self.result = acceptance::aggregate(&self.acceptance);
        }
        Ok(self.acceptance.clone())
    }

    fn require_in_progress(&self, action: &'static str) -> Result<(), EngineError> {
        if self.status == RunStatus::InProgress {
            return Ok(());
        }
        let reason = if self.status.is_terminal() {
            "run is terminal"
        } else {
            "run has not been started"
        };
        Err(EngineError::transition(
            "run",
            &self.run_id,
            self.status,
            action,
            reason,
        ))
    }

    fn check_protocol(&self, protocol: &ProtocolDefinition) -> Result<(), EngineError> {
        if protocol.id == self.protocol_id && protocol.version == self.protocol_version {
            return Ok(());
        }
        Err(EngineError::ProtocolMismatch {
            run_id: self.run_id.clone(),
            expected: format!("{}@{}", self.protocol_id, self.protocol_version),
            actual: protocol.key().to_string(),
        })
    }

    fn phase_index(&self, phase_id: &str) -> Result<usize, EngineError> {
        self.phases
            .iter()
            .position(|p| p.phase_id == phase_id)
            .ok_or_else(|| EngineError::UnknownPhase {
                run_id: self.run_id.clone(),
                phase_id: phase_id.to_string(),
            })
    }

    fn step_index(&self, step_id: &str) -> Result<usize, EngineError> {
        self.steps
            .iter()
            .position(|s| s.step_id == step_id)
            .ok_or_else(|| EngineError::UnknownStep {
                run_id: self.run_id.clone(),
                step_id: step_id.to_string(),
            })
    }
}

fn resolve_parameters(
    protocol: &ProtocolDefinition,
    mut overrides: BTreeMap<String, serde_json::Value>,
) -> Result<BTreeMap<String, serde_json::Value>, EngineError> {
    if let Some(name) = overrides.keys().find(|k| protocol.parameter(k).is_none()) {
        return Err(EngineError::InvalidParameter {
            name: name.clone(),
            reason: format!("not declared by protocol '{}'", protocol.id),
        });
    }

    let mut resolved = BTreeMap::new();
    for def in &protocol.parameters {
        let value = overrides.remove(&def.name).or_else(|| def.default.clone());
        if let Some(value) = value {
            def.check(&value)
                .map_err(|reason| EngineError::InvalidParameter {
                    name: def.name.clone(),
                    reason,
                })?;
            resolved.insert(def.name.clone(), value);
        }
    }
    Ok(resolved)
}
