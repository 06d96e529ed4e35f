pub mod measurement;
pub mod protocol;
pub mod qc;
pub mod run;

pub use measurement::{Measurement, MeasurementType, MeasurementValue, NewMeasurement, QualityFlag};
pub use protocol::{
    AcceptanceCriterion, Capability, LimitDirection, MeasurementSpec, Operator, ParameterDef,
    ParameterType, PhaseDef, ProtocolDefinition, ProtocolKey, SafetyAction, SafetyLimit,
    ScalarValue, StepDef, Threshold, ThresholdValue,
};
pub use qc::{
    IrradianceTolerance, OutlierMethodKind, OutlierSettings, QcCategory, QcCheckResult,
    QcSettings, TemperatureTolerance,
};
pub use run::{
    PhaseRecord, PhaseStatus, RunStatus, StepOutcome, StepRecord, StepStatus, TestResult, TestRun,
};

use serde::{Deserialize, Serialize};

/// Severity shared by acceptance criteria and QC findings.
///
/// Ordered from least to most severe so that `max()` over a set of findings yields the
/// worst one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[serde(alias = "minor", alias = "warn")]
    Warning,
    #[serde(alias = "major")]
    Error,
    Critical,
}

impl Severity {
    /// A failed criterion at this severity fails the whole run.
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
