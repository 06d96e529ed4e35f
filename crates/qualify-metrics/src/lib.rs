//! Statistical evaluation of test runs: QC checks over the measurement ledger and
//! degradation/stabilization analysis of power series.

pub mod degradation;
pub mod outliers;
pub mod qc;
pub mod stats;

pub use degradation::{
    analyze_degradation, analyze_degradation_with, degradation_points, AnalysisError,
    DegradationOptions, DegradationPoint, DegradationReport, StabilizationOptions,
};
pub use outliers::{detect_outliers, OutlierMethod};
pub use qc::{run_qc_checks, worst_failure};
