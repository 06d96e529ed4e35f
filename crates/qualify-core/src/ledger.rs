//! Append-only measurement ledger of a single run.
//!
//! Entries are only ever appended; the quality flag and notes are the only fields that
//! may change afterwards. Appending and flagging are crate-private so every write goes
//! through the engine's state checks.

use crate::model::{Measurement, QualityFlag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementLedger {
    entries: Vec<Measurement>,
}

impl MeasurementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted entries, in their original order.
    pub fn from_entries(entries: Vec<Measurement>) -> Self {
        Self { entries }
    }

    pub(crate) fn append(&mut self, measurement: Measurement) -> &Measurement {
        self.entries.push(measurement);
        let last = self.entries.len() - 1;
        &self.entries[last]
    }

    pub(crate) fn flag(
        &mut self,
        measurement_id: &str,
        flag: QualityFlag,
        notes: Option<String>,
    ) -> Option<&Measurement> {
        let entry = self
            .entries
            .iter_mut()
            .find(|m| m.measurement_id == measurement_id)?;
        entry.quality_flag = flag;
        if notes.is_some() {
            entry.notes = notes;
        }
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[Measurement] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Measurement> {
        self.entries.iter()
    }

    pub fn get(&self, measurement_id: &str) -> Option<&Measurement> {
        self.entries
            .iter()
            .find(|m| m.measurement_id == measurement_id)
    }

    /// Usable (non-BAD) measurements of one parameter, in recording order.
    pub fn usable<'a>(&'a self, parameter: &'a str) -> impl Iterator<Item = &'a Measurement> {
        self.entries
            .iter()
            .filter(move |m| m.parameter == parameter && m.is_usable())
    }

    /// Most recently recorded usable measurement of `parameter`.
    pub fn latest<'a>(&'a self, parameter: &'a str) -> Option<&'a Measurement> {
        self.usable(parameter).last()
    }

    /// Usable numeric values of `parameter`, in recording order.
    pub fn numeric_values(&self, parameter: &str) -> Vec<f64> {
        self.usable(parameter).filter_map(|m| m.numeric()).collect()
    }

    /// Distinct parameters in first-seen order.
    pub fn parameters(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for m in &self.entries {
            if !seen.contains(&m.parameter.as_str()) {
                seen.push(&m.parameter);
            }
        }
        seen
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.entries.iter().map(|m| m.timestamp).collect()
    }
}

impl<'a> IntoIterator for &'a MeasurementLedger {
    type Item = &'a Measurement;
    type IntoIter = std::slice::Iter<'a, Measurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
