use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recorded value. Exactly one kind is ever set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MeasurementValue {
    Numeric(f64),
    Text(String),
    Boolean(bool),
    Json(serde_json::Value),
}

impl MeasurementValue {
    pub fn kind(&self) -> &'static str {
        match self {
            MeasurementValue::Numeric(_) => "numeric",
            MeasurementValue::Text(_) => "text",
            MeasurementValue::Boolean(_) => "boolean",
            MeasurementValue::Json(_) => "json",
        }
    }

    /// Numeric coercion used by ordering comparisons: numbers, numeric text and JSON
    /// numbers coerce; booleans and structured values do not.
    pub fn as_f64(&self) -> Option<f64> {
        let n = match self {
            MeasurementValue::Numeric(n) => Some(*n),
            MeasurementValue::Text(s) => s.trim().parse::<f64>().ok(),
            MeasurementValue::Json(v) => v.as_f64(),
            MeasurementValue::Boolean(_) => None,
        }?;
        n.is_finite().then_some(n)
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => MeasurementValue::Numeric(f),
                None => MeasurementValue::Json(value.clone()),
            },
            serde_json::Value::String(s) => MeasurementValue::Text(s.clone()),
            serde_json::Value::Bool(b) => MeasurementValue::Boolean(*b),
            other => MeasurementValue::Json(other.clone()),
        }
    }
}

impl std::fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasurementValue::Numeric(n) => write!(f, "{}", n),
            MeasurementValue::Text(s) => write!(f, "\"{}\"", s),
            MeasurementValue::Boolean(b) => write!(f, "{}", b),
            MeasurementValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for MeasurementValue {
    fn from(v: f64) -> Self {
        MeasurementValue::Numeric(v)
    }
}

impl From<bool> for MeasurementValue {
    fn from(v: bool) -> Self {
        MeasurementValue::Boolean(v)
    }
}

impl From<&str> for MeasurementValue {
    fn from(v: &str) -> Self {
        MeasurementValue::Text(v.to_string())
    }
}

impl From<String> for MeasurementValue {
    fn from(v: String) -> Self {
        MeasurementValue::Text(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    PreTest,
    #[default]
    DuringTest,
    PostTest,
    Initial,
    DuringExposure,
    PostExposure,
}

impl MeasurementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MeasurementType::PreTest => "pre_test",
            MeasurementType::DuringTest => "during_test",
            MeasurementType::PostTest => "post_test",
            MeasurementType::Initial => "initial",
            MeasurementType::DuringExposure => "during_exposure",
            MeasurementType::PostExposure => "post_exposure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pre_test" => MeasurementType::PreTest,
            "during_test" => MeasurementType::DuringTest,
            "post_test" => MeasurementType::PostTest,
            "initial" => MeasurementType::Initial,
            "during_exposure" => MeasurementType::DuringExposure,
            "post_exposure" => MeasurementType::PostExposure,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    #[default]
    Good,
    Suspect,
    Bad,
}

impl QualityFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityFlag::Good => "GOOD",
            QualityFlag::Suspect => "SUSPECT",
            QualityFlag::Bad => "BAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "GOOD" => QualityFlag::Good,
            "SUSPECT" => QualityFlag::Suspect,
            "BAD" => QualityFlag::Bad,
            _ => return None,
        })
    }

    /// BAD measurements are kept in the ledger but excluded from every evaluation.
    pub fn is_usable(self) -> bool {
        self != QualityFlag::Bad
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub measurement_id: String,
    pub test_run_id: String,
    pub parameter: String,
    pub value: MeasurementValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,

    pub measurement_type: MeasurementType,
    pub quality_flag: QualityFlag,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Measurement {
    pub fn numeric(&self) -> Option<f64> {
        match self.value {
            MeasurementValue::Numeric(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.quality_flag.is_usable()
    }
}

/// A measurement as submitted by a caller, before the engine assigns identity,
/// timestamp and phase/step tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeasurement {
    pub parameter: String,
    pub value: MeasurementValue,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub measurement_type: MeasurementType,

    /// Instrument-supplied timestamp; the engine clock is used when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Explicit step tag; defaults to the step currently in progress.
    #[serde(default)]
    pub step_id: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NewMeasurement {
    pub fn new(parameter: impl Into<String>, value: impl Into<MeasurementValue>) -> Self {
        Self {
            parameter: parameter.into(),
            value: value.into(),
            unit: None,
            measurement_type: MeasurementType::default(),
            timestamp: None,
            step_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn numeric(parameter: impl Into<String>, value: f64) -> Self {
        Self::new(parameter, MeasurementValue::Numeric(value))
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn kind(mut self, measurement_type: MeasurementType) -> Self {
        self.measurement_type = measurement_type;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
