use crate::acceptance::AcceptanceEvaluation;
use crate::ledger::MeasurementLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Aborted => "ABORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => RunStatus::Pending,
            "IN_PROGRESS" => RunStatus::InProgress,
            "COMPLETED" => RunStatus::Completed,
            "FAILED" => RunStatus::Failed,
            "ABORTED" => RunStatus::Aborted,
            _ => return None,
        })
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResult {
    Pass,
    Fail,
    Conditional,
    #[default]
    NotEvaluated,
}

impl TestResult {
    pub fn as_str(self) -> &'static str {
        match self {
            TestResult::Pass => "PASS",
            TestResult::Fail => "FAIL",
            TestResult::Conditional => "CONDITIONAL",
            TestResult::NotEvaluated => "NOT_EVALUATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PASS" => TestResult::Pass,
            "FAIL" => TestResult::Fail,
            "CONDITIONAL" => TestResult::Conditional,
            "NOT_EVALUATED" => TestResult::NotEvaluated,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn is_closed(self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "PENDING",
            PhaseStatus::InProgress => "IN_PROGRESS",
            PhaseStatus::Completed => "COMPLETED",
            PhaseStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => PhaseStatus::Pending,
            "IN_PROGRESS" => PhaseStatus::InProgress,
            "COMPLETED" => PhaseStatus::Completed,
            "FAILED" => PhaseStatus::Failed,
            _ => return None,
        })
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::InProgress => "IN_PROGRESS",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => StepStatus::Pending,
            "IN_PROGRESS" => StepStatus::InProgress,
            "COMPLETED" => StepStatus::Completed,
            "FAILED" => StepStatus::Failed,
            "SKIPPED" => StepStatus::Skipped,
            _ => return None,
        })
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step finished. `Passed`/`Failed` also set the step's `pass_fail` verdict;
/// `Completed` finishes a step that carries no verdict of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed,
    Completed,
    Skipped,
}

impl StepOutcome {
    pub fn status(self) -> StepStatus {
        match self {
            StepOutcome::Passed | StepOutcome::Completed => StepStatus::Completed,
            StepOutcome::Failed => StepStatus::Failed,
            StepOutcome::Skipped => StepStatus::Skipped,
        }
    }

    pub fn pass_fail(self) -> Option<bool> {
        match self {
            StepOutcome::Passed => Some(true),
            StepOutcome::Failed => Some(false),
            StepOutcome::Completed | StepOutcome::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase_id: String,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub phase_id: String,
    pub sequence: u32,
    pub action: String,
    pub status: StepStatus,
    pub pass_fail: Option<bool>,
    pub observations: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One execution of a protocol against one specimen.
///
/// Only the engine mutates a run (see [`crate::engine`]); fields are public for
/// reporting and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub run_id: String,
    pub protocol_id: String,
    pub protocol_version: String,
    pub specimen_id: String,
    pub operator: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    pub status: RunStatus,
    pub result: TestResult,

    /// Reason recorded by `abort`/`fail`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub phases: Vec<PhaseRecord>,
    pub steps: Vec<StepRecord>,
    pub ledger: MeasurementLedger,

    /// Evaluations from the last `complete` (or explicit re-evaluation).
    #[serde(default)]
    pub acceptance: Vec<AcceptanceEvaluation>,
}

impl TestRun {
    pub fn phase(&self, phase_id: &str) -> Option<&PhaseRecord> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }

    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn steps_in_phase<'a>(&'a self, phase_id: &'a str) -> impl Iterator<Item = &'a StepRecord> {
        self.steps.iter().filter(move |s| s.phase_id == phase_id)
    }

    pub fn active_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.status == StepStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fraction of steps that reached a terminal state, in percent.
    pub fn progress_pct(&self) -> f64 {
        if self.steps.is_empty() {
            return 100.0;
        }
        let done = self.steps.iter().filter(|s| s.status.is_terminal()).count();
        100.0 * done as f64 / self.steps.len() as f64
    }
}
