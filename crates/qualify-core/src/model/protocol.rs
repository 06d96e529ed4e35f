//! Declarative protocol definitions.
//!
//! A protocol is pure data: phases and steps name *actions*, criteria carry a closed
//! comparison grammar ([`Threshold`]) and nothing in a definition is ever executed as
//! code. Definitions are validated by [`crate::protocol::validate`] before use.

use super::qc::QcSettings;
use super::{MeasurementType, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDefinition {
    pub id: String,
    pub version: String,
    pub name: String,
    pub category: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub parameters: Vec<ParameterDef>,

    pub phases: Vec<PhaseDef>,

    #[serde(default)]
    pub measurement_specs: Vec<MeasurementSpec>,

    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,

    #[serde(default)]
    pub safety_limits: BTreeMap<String, SafetyLimit>,

    /// QC thresholds; when absent the caller's configured defaults apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qc: Option<QcSettings>,
}

impl ProtocolDefinition {
    pub fn key(&self) -> ProtocolKey {
        ProtocolKey::new(&self.id, &self.version)
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseDef> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    /// Find a step and the phase that owns it.
    pub fn find_step(&self, step_id: &str) -> Option<(&PhaseDef, &StepDef)> {
        self.phases.iter().find_map(|phase| {
            phase
                .steps
                .iter()
                .find(|s| s.id == step_id)
                .map(|step| (phase, step))
        })
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }
}

/// Cache identity of a protocol: `(id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolKey {
    pub id: String,
    pub version: String,
}

impl ProtocolKey {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ProtocolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ParameterType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ParameterDef {
    /// Check a candidate value against the declared type and bounds.
    pub fn check(&self, value: &serde_json::Value) -> Result<(), String> {
        match self.kind {
            ParameterType::Float | ParameterType::Integer => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a number, got {}", value))?;
                if self.kind == ParameterType::Integer && n.fract() != 0.0 {
                    return Err(format!("expected an integer, got {}", n));
                }
                if let Some(min) = self.min {
                    if n < min {
                        return Err(format!("{} is below minimum {}", n, min));
                    }
                }
                if let Some(max) = self.max {
                    if n > max {
                        return Err(format!("{} is above maximum {}", n, max));
                    }
                }
                Ok(())
            }
            ParameterType::String if value.is_string() => Ok(()),
            ParameterType::Boolean if value.is_boolean() => Ok(()),
            ParameterType::String => Err(format!("expected a string, got {}", value)),
            ParameterType::Boolean => Err(format!("expected a boolean, got {}", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[serde(alias = "number")]
    Float,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "text")]
    String,
    #[serde(alias = "bool")]
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDef {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    pub id: String,
    pub sequence: u32,

    #[serde(default)]
    pub description: String,

    /// Name of the action handler that executes this step.
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,

    /// Capability used to pick a handler when no handler is registered under `action`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
}

/// What an action handler is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Measure,
    Condition,
    Inspect,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSpec {
    pub id: String,
    pub parameter: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<String>,

    /// Number of readings the protocol expects. Specs expecting two or more are
    /// replicate measurements and get a repeatability check.
    #[serde(default = "default_expected_count")]
    pub expected_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_type: Option<MeasurementType>,
}

fn default_expected_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub id: String,

    #[serde(default)]
    pub description: String,

    pub severity: Severity,
    pub threshold: Threshold,
}

/// `actual <operator> value`, evaluated against the latest measurement of `parameter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub parameter: String,
    pub operator: Operator,
    pub value: ThresholdValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "between")]
    Between,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Between => "between",
        }
    }

    /// Ordering operators need a numeric actual value.
    pub fn is_ordering(self) -> bool {
        matches!(self, Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    Scalar(ScalarValue),
    Range(Vec<f64>),
}

impl std::fmt::Display for ThresholdValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdValue::Scalar(v) => write!(f, "{}", v),
            ThresholdValue::Range(r) => {
                let parts: Vec<String> = r.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Number(n) => write!(f, "{}", n),
            ScalarValue::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimit {
    pub value: f64,
    pub action: SafetyAction,

    #[serde(default)]
    pub direction: LimitDirection,
}

impl SafetyLimit {
    pub fn is_exceeded_by(&self, reading: f64) -> bool {
        match self.direction {
            LimitDirection::Max => reading > self.value,
            LimitDirection::Min => reading < self.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyAction {
    #[serde(alias = "alarm")]
    Warn,
    #[serde(alias = "stop", alias = "shutdown")]
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitDirection {
    #[default]
    Max,
    Min,
}
