//! Concurrent access to runs by id.
//!
//! Each run sits behind its own mutex, so operations on different runs never contend.
//! The outer map is only locked to insert or look up a slot. Readers work on a cloned
//! [`TestRun`] snapshot taken under the run lock.

use super::actions::{ActionRegistry, StepInputs};
use crate::acceptance::AcceptanceEvaluation;
use crate::errors::EngineError;
use crate::model::{
    Measurement, NewMeasurement, ProtocolDefinition, QualityFlag, StepOutcome, StepStatus,
    TestResult, TestRun,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

struct RunSlot {
    protocol: Arc<ProtocolDefinition>,
    run: Arc<Mutex<TestRun>>,
}

#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<String, RunSlot>>>,
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry")
            .field("runs", &self.run_ids().unwrap_or_default())
            .finish()
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_test_run(
        &self,
        protocol: Arc<ProtocolDefinition>,
        specimen_id: &str,
        operator: &str,
    ) -> Result<String, EngineError> {
        self.create_test_run_with(protocol, specimen_id, operator, BTreeMap::new())
    }

    pub fn create_test_run_with(
        &self,
        protocol: Arc<ProtocolDefinition>,
        specimen_id: &str,
        operator: &str,
        parameters: BTreeMap<String, serde_json::Value>,
    ) -> Result<String, EngineError> {
        let run = TestRun::with_parameters(&protocol, specimen_id, operator, parameters)?;
        self.insert(protocol, run)
    }

    /// Register an existing run, e.g. one loaded from storage.
    pub fn insert(
        &self,
        protocol: Arc<ProtocolDefinition>,
        run: TestRun,
    ) -> Result<String, EngineError> {
        if run.protocol_id != protocol.id || run.protocol_version != protocol.version {
            return Err(EngineError::ProtocolMismatch {
                run_id: run.run_id.clone(),
                expected: format!("{}@{}", run.protocol_id, run.protocol_version),
                actual: protocol.key().to_string(),
            });
        }
        let run_id = run.run_id.clone();
        let mut runs = self
            .runs
            .write()
            .map_err(|_| EngineError::LockPoisoned(run_id.clone()))?;
        if runs.contains_key(&run_id) {
            return Err(EngineError::DuplicateRun(run_id));
        }
        runs.insert(
            run_id.clone(),
            RunSlot {
                protocol,
                run: Arc::new(Mutex::new(run)),
            },
        );
        Ok(run_id)
    }

    fn slot(
        &self,
        run_id: &str,
    ) -> Result<(Arc<ProtocolDefinition>, Arc<Mutex<TestRun>>), EngineError> {
        let runs = self
            .runs
            .read()
            .map_err(|_| EngineError::LockPoisoned(run_id.to_string()))?;
        let slot = runs
            .get(run_id)
            .ok_or_else(|| EngineError::UnknownRun(run_id.to_string()))?;
        Ok((Arc::clone(&slot.protocol), Arc::clone(&slot.run)))
    }

    fn with_run<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut TestRun, &ProtocolDefinition) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let (protocol, run) = self.slot(run_id)?;
        let mut guard = run
            .lock()
            .map_err(|_| EngineError::LockPoisoned(run_id.to_string()))?;
        f(&mut *guard, protocol.as_ref())
    }

    pub fn start(&self, run_id: &str) -> Result<(), EngineError> {
        self.with_run(run_id, |run, _| run.start())
    }

    pub fn abort(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
        self.with_run(run_id, |run, _| run.abort(reason))
    }

    pub fn fail(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
        self.with_run(run_id, |run, _| run.fail(reason))
    }

    pub fn complete(&self, run_id: &str) -> Result<TestResult, EngineError> {
        self.with_run(run_id, |run, protocol| run.complete(protocol))
    }

    pub fn start_step(&self, run_id: &str, step_id: &str) -> Result<(), EngineError> {
        self.with_run(run_id, |run, _| run.start_step(step_id))
    }

    pub fn finish_step(
        &self,
        run_id: &str,
        step_id: &str,
        outcome: StepOutcome,
        observations: Option<String>,
    ) -> Result<(), EngineError> {
        self.with_run(run_id, |run, _| {
            run.finish_step(step_id, outcome, observations)
        })
    }

    pub fn record_measurement(
        &self,
        run_id: &str,
        measurement: NewMeasurement,
    ) -> Result<Measurement, EngineError> {
        self.with_run(run_id, |run, protocol| {
            run.record_measurement(protocol, measurement)
        })
    }

    pub fn flag_measurement(
        &self,
        run_id: &str,
        measurement_id: &str,
        flag: QualityFlag,
        notes: Option<String>,
    ) -> Result<Measurement, EngineError> {
        self.with_run(run_id, |run, _| {
            run.flag_measurement(measurement_id, flag, notes)
        })
    }

    pub fn evaluate_acceptance(
        &self,
        run_id: &str,
    ) -> Result<Vec<AcceptanceEvaluation>, EngineError> {
        self.with_run(run_id, |run, protocol| run.evaluate_acceptance(protocol))
    }

    pub fn execute_step(
        &self,
        run_id: &str,
        step_id: &str,
        inputs: &StepInputs,
        actions: &ActionRegistry,
    ) -> Result<StepStatus, EngineError> {
        self.with_run(run_id, |run, protocol| {
            run.execute_step(protocol, step_id, inputs, actions)
        })
    }

    /// Consistent copy of a run for evaluation or persistence.
    pub fn snapshot(&self, run_id: &str) -> Result<TestRun, EngineError> {
        self.with_run(run_id, |run, _| Ok(run.clone()))
    }

    pub fn protocol(&self, run_id: &str) -> Result<Arc<ProtocolDefinition>, EngineError> {
        self.slot(run_id).map(|(protocol, _)| protocol)
    }

    pub fn run_ids(&self) -> Result<Vec<String>, EngineError> {
        let runs = self
            .runs
            .read()
            .map_err(|_| EngineError::LockPoisoned("registry".into()))?;
        let mut ids: Vec<String> = runs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use crate::protocol::{parse, ProtocolFormat};
    use std::thread;

    fn protocol() -> Arc<ProtocolDefinition> {
        let json = r#"{
            "id": "DH-1000", "version": "1.0.0", "name": "Damp heat", "category": "environmental",
            "phases": [{ "id": "main", "steps": [
                { "id": "s1", "sequence": 1, "action": "measure" },
                { "id": "s2", "sequence": 2, "action": "wait" }
            ]}],
            "acceptance_criteria": [{
                "id": "AC-1", "severity": "critical",
                "threshold": { "parameter": "pmax", "operator": ">=", "value": 280 }
            }]
        }"#;
        Arc::new(parse(json, ProtocolFormat::Json).unwrap())
    }

    #[test]
    fn unknown_run() {
        let reg = RunRegistry::new();
        assert_eq!(
            reg.start("missing").unwrap_err(),
            EngineError::UnknownRun("missing".into())
        );
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let reg = RunRegistry::new();
        let p = protocol();
        let id = reg.create_test_run(Arc::clone(&p), "M1", "op").unwrap();
        let copy = reg.snapshot(&id).unwrap();
        assert_eq!(reg.insert(p, copy), Err(EngineError::DuplicateRun(id)));
    }

    #[test]
    fn drives_run_by_id() {
        let reg = RunRegistry::new();
        let actions = ActionRegistry::with_builtins();
        let id = reg.create_test_run(protocol(), "M1", "op").unwrap();
        reg.start(&id).unwrap();
        let inputs = StepInputs {
            readings: vec![NewMeasurement::numeric("pmax", 290.0)],
            ..Default::default()
        };
        reg.execute_step(&id, "s1", &inputs, &actions).unwrap();
        reg.start_step(&id, "s2").unwrap();
        reg.finish_step(&id, "s2", StepOutcome::Completed, None)
            .unwrap();
        assert_eq!(reg.complete(&id).unwrap(), TestResult::Pass);
        assert_eq!(reg.snapshot(&id).unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn runs_are_independent_across_threads() {
        let reg = RunRegistry::new();
        let p = protocol();
        let ids: Vec<String> = (0..8)
            .map(|i| {
                let id = reg
                    .create_test_run(Arc::clone(&p), &format!("M{i}"), "op")
                    .unwrap();
                reg.start(&id).unwrap();
                id
            })
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let reg = reg.clone();
                thread::spawn(move || {
                    for k in 0..25 {
                        let reading = NewMeasurement::numeric("pmax", 280.0 + k as f64);
                        reg.record_measurement(&id, reading).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for id in &ids {
            assert_eq!(reg.snapshot(id).unwrap().ledger.len(), 25);
        }
        assert_eq!(reg.run_ids().unwrap().len(), 8);
    }
}
