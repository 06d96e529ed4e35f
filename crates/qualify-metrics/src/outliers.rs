//! Outlier screening. All methods are pure functions of the data and the multiplier `k`
//! and return indices into the input, in ascending order.

use crate::stats::{mean, median, percentile_sorted, population_stdev, sorted};
use qualify_core::model::{OutlierMethodKind, OutlierSettings};
use serde::{Deserialize, Serialize};

/// Scales MAD to be consistent with the standard deviation of normal data.
const MAD_SCALE: f64 = 0.6745;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OutlierMethod {
    /// `x < Q1 - k*IQR` or `x > Q3 + k*IQR`.
    Iqr { k: f64 },
    /// `|x - mean| / stdev > k`.
    ZScore { k: f64 },
    /// `|0.6745 * (x - median) / MAD| > k`.
    Mad { k: f64 },
}

impl OutlierMethod {
    pub const DEFAULT_IQR_K: f64 = 1.5;
    pub const DEFAULT_MAD_K: f64 = 3.5;

    pub fn iqr() -> Self {
        OutlierMethod::Iqr {
            k: Self::DEFAULT_IQR_K,
        }
    }

    pub fn mad() -> Self {
        OutlierMethod::Mad {
            k: Self::DEFAULT_MAD_K,
        }
    }

    /// `None` for z-score without an explicit threshold.
    pub fn from_settings(settings: &OutlierSettings) -> Option<Self> {
        Some(match (settings.method, settings.threshold) {
            (OutlierMethodKind::Iqr, k) => OutlierMethod::Iqr {
                k: k.unwrap_or(Self::DEFAULT_IQR_K),
            },
            (OutlierMethodKind::Mad, k) => OutlierMethod::Mad {
                k: k.unwrap_or(Self::DEFAULT_MAD_K),
            },
            (OutlierMethodKind::Zscore, Some(k)) => OutlierMethod::ZScore { k },
            (OutlierMethodKind::Zscore, None) => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutlierMethod::Iqr { .. } => "iqr",
            OutlierMethod::ZScore { .. } => "zscore",
            OutlierMethod::Mad { .. } => "mad",
        }
    }

    pub fn k(&self) -> f64 {
        match *self {
            OutlierMethod::Iqr { k } | OutlierMethod::ZScore { k } | OutlierMethod::Mad { k } => k,
        }
    }
}

pub fn detect_outliers(values: &[f64], method: OutlierMethod) -> Vec<usize> {
    if values.is_empty() {
        return Vec::new();
    }
    match method {
        OutlierMethod::Iqr { k } => iqr_outliers(values, k),
        OutlierMethod::ZScore { k } => zscore_outliers(values, k),
        OutlierMethod::Mad { k } => mad_outliers(values, k),
    }
}

fn flag(values: &[f64], is_outlier: impl Fn(f64) -> bool) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, &x)| is_outlier(x))
        .map(|(i, _)| i)
        .collect()
}

fn iqr_outliers(values: &[f64], k: f64) -> Vec<usize> {
    let s = sorted(values);
    let (Some(q1), Some(q3)) = (percentile_sorted(&s, 0.25), percentile_sorted(&s, 0.75)) else {
        return Vec::new();
    };
    let iqr = q3 - q1;
    let (low, high) = (q1 - k * iqr, q3 + k * iqr);
    flag(values, |x| x < low || x > high)
}

fn zscore_outliers(values: &[f64], k: f64) -> Vec<usize> {
    let (Some(m), Some(sd)) = (mean(values), population_stdev(values)) else {
        return Vec::new();
    };
    if sd == 0.0 {
        return Vec::new();
    }
    flag(values, |x| (x - m).abs() / sd > k)
}

fn mad_outliers(values: &[f64], k: f64) -> Vec<usize> {
    let Some(med) = median(values) else {
        return Vec::new();
    };
    let deviations: Vec<f64> = values.iter().map(|x| (x - med).abs()).collect();
    let Some(mad) = median(&deviations) else {
        return Vec::new();
    };
    if mad == 0.0 {
        return Vec::new();
    }
    flag(values, |x| (MAD_SCALE * (x - med) / mad).abs() > k)
}
