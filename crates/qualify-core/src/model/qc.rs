use super::Severity;
use serde::{Deserialize, Serialize};

/// QC thresholds carried by a protocol (or supplied as configured defaults).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcSettings {
    #[serde(default = "default_min_completion_rate")]
    pub min_completion_rate: f64,

    #[serde(default = "default_max_cv")]
    pub max_cv: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irradiance: Option<IrradianceTolerance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<TemperatureTolerance>,

    #[serde(default)]
    pub outlier: OutlierSettings,
}

fn default_min_completion_rate() -> f64 {
    95.0
}

fn default_max_cv() -> f64 {
    2.0
}

impl Default for QcSettings {
    fn default() -> Self {
        Self {
            min_completion_rate: default_min_completion_rate(),
            max_cv: default_max_cv(),
            irradiance: None,
            temperature: None,
            outlier: OutlierSettings::default(),
        }
    }
}

/// Irradiance must lie within `nominal * (1 ± tolerance_pct / 100)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrradianceTolerance {
    #[serde(default = "default_irradiance_parameter")]
    pub parameter: String,
    pub nominal: f64,
    pub tolerance_pct: f64,
}

fn default_irradiance_parameter() -> String {
    "irradiance".to_string()
}

/// Temperature must lie within `nominal ± tolerance` (absolute, same unit as readings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureTolerance {
    #[serde(default = "default_temperature_parameter")]
    pub parameter: String,
    pub nominal: f64,
    pub tolerance: f64,
}

fn default_temperature_parameter() -> String {
    "temperature".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierSettings {
    #[serde(default)]
    pub method: OutlierMethodKind,

    /// Method multiplier. Required for `zscore`; IQR defaults to 1.5 and MAD to 3.5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Series shorter than this are not screened.
    #[serde(default = "default_min_points")]
    pub min_points: usize,
}

fn default_min_points() -> usize {
    4
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            method: OutlierMethodKind::default(),
            threshold: None,
            min_points: default_min_points(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethodKind {
    #[default]
    Iqr,
    #[serde(alias = "z_score")]
    Zscore,
    Mad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcCategory {
    Completeness,
    Repeatability,
    Chronology,
    Environment,
    Outlier,
}

/// One QC finding. Always recomputed from the current ledger, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcCheckResult {
    pub check_name: String,
    pub category: QcCategory,
    pub passed: bool,
    pub severity: Severity,
    pub expected_value: serde_json::Value,
    pub actual_value: serde_json::Value,
    pub message: String,
}

impl QcCheckResult {
    pub fn new(
        check_name: impl Into<String>,
        category: QcCategory,
        passed: bool,
        severity: Severity,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            category,
            passed,
            severity,
            expected_value: serde_json::Value::Null,
            actual_value: serde_json::Value::Null,
            message: String::new(),
        }
    }

    pub fn with_expected(mut self, expected: impl Into<serde_json::Value>) -> Self {
        self.expected_value = expected.into();
        self
    }

    pub fn with_actual(mut self, actual: impl Into<serde_json::Value>) -> Self {
        self.actual_value = actual.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
