use crate::errors::ProtocolError;
use crate::model::{
    Operator, OutlierMethodKind, ParameterDef, ProtocolDefinition, QcSettings, ScalarValue,
    ThresholdValue,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn semver() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)$").expect("semver regex is valid")
    })
}

/// Structural validation of a parsed protocol. The first violation wins.
pub fn validate(p: &ProtocolDefinition) -> Result<(), ProtocolError> {
    require_non_empty("id", &p.id)?;
    require_non_empty("name", &p.name)?;
    require_non_empty("category", &p.category)?;
    if !semver().is_match(&p.version) {
        return Err(ProtocolError::schema(
            "version",
            format!("'{}' is not a MAJOR.MINOR.PATCH version", p.version),
        ));
    }

    let scope = format!("protocol '{}'", p.id);

    let mut names = HashSet::new();
    for (i, param) in p.parameters.iter().enumerate() {
        if !names.insert(param.name.as_str()) {
            return Err(ProtocolError::duplicate("parameter", &param.name, &scope));
        }
        validate_parameter(i, param)?;
    }

    validate_phases(p, &scope)?;

    let mut spec_ids = HashSet::new();
    for (i, spec) in p.measurement_specs.iter().enumerate() {
        if !spec_ids.insert(spec.id.as_str()) {
            return Err(ProtocolError::duplicate("measurement spec", &spec.id, &scope));
        }
        require_non_empty(&format!("measurement_specs[{}].parameter", i), &spec.parameter)?;
        if spec.expected_count == 0 {
            return Err(ProtocolError::schema(
                format!("measurement_specs[{}].expected_count", i),
                "must be at least 1",
            ));
        }
    }

    let mut criterion_ids = HashSet::new();
    for (i, c) in p.acceptance_criteria.iter().enumerate() {
        if !criterion_ids.insert(c.id.as_str()) {
            return Err(ProtocolError::duplicate("criterion", &c.id, &scope));
        }
        let loc = format!("acceptance_criteria[{}].threshold", i);
        require_non_empty(&format!("{}.parameter", loc), &c.threshold.parameter)?;
        validate_threshold(&loc, c.threshold.operator, &c.threshold.value)?;
    }

    for (name, limit) in &p.safety_limits {
        if !limit.value.is_finite() {
            return Err(ProtocolError::schema(
                format!("safety_limits.{}.value", name),
                "must be a finite number",
            ));
        }
    }

    if let Some(qc) = &p.qc {
        validate_qc("qc", qc)?;
    }

    Ok(())
}

fn require_non_empty(location: &str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::schema(location, "must not be empty"));
    }
    Ok(())
}

fn validate_parameter(i: usize, param: &ParameterDef) -> Result<(), ProtocolError> {
    let loc = format!("parameters[{}]", i);
    require_non_empty(&format!("{}.name", loc), &param.name)?;
    if let (Some(min), Some(max)) = (param.min, param.max) {
        if min > max {
            return Err(ProtocolError::schema(
                loc,
                format!("min {} is greater than max {}", min, max),
            ));
        }
    }
    if let Some(default) = &param.default {
        param
            .check(default)
            .map_err(|reason| ProtocolError::schema(format!("{}.default", loc), reason))?;
    }
    Ok(())
}

fn validate_phases(p: &ProtocolDefinition, scope: &str) -> Result<(), ProtocolError> {
    if p.phases.is_empty() {
        return Err(ProtocolError::schema("phases", "at least one phase is required"));
    }

    let mut phase_ids = HashSet::new();
    let mut step_ids = HashSet::new();
    for (pi, phase) in p.phases.iter().enumerate() {
        require_non_empty(&format!("phases[{}].id", pi), &phase.id)?;
        if !phase_ids.insert(phase.id.as_str()) {
            return Err(ProtocolError::duplicate("phase", &phase.id, scope));
        }
        if phase.steps.is_empty() {
            return Err(ProtocolError::schema(
                format!("phases[{}].steps", pi),
                "a phase needs at least one step",
            ));
        }

        let phase_scope = format!("phase '{}'", phase.id);
        let mut sequences = Vec::with_capacity(phase.steps.len());
        for (si, step) in phase.steps.iter().enumerate() {
            let loc = format!("phases[{}].steps[{}]", pi, si);
            require_non_empty(&format!("{}.id", loc), &step.id)?;
            require_non_empty(&format!("{}.action", loc), &step.action)?;
            if !step_ids.insert(step.id.as_str()) {
                return Err(ProtocolError::duplicate("step", &step.id, scope));
            }
            if sequences.contains(&step.sequence) {
                return Err(ProtocolError::duplicate(
                    "step sequence",
                    step.sequence.to_string(),
                    &phase_scope,
                ));
            }
            sequences.push(step.sequence);
            if let Some(d) = step.duration_hours {
                if !d.is_finite() || d < 0.0 {
                    return Err(ProtocolError::schema(
                        format!("{}.duration_hours", loc),
                        "must be a non-negative number",
                    ));
                }
            }
        }

        sequences.sort_unstable();
        let contiguous = sequences
            .iter()
            .enumerate()
            .all(|(i, &seq)| seq as usize == i + 1);
        if !contiguous {
            return Err(ProtocolError::schema(
                format!("phases[{}].steps", pi),
                format!(
                    "step sequence numbers must run 1..={} without gaps, found {:?}",
                    sequences.len(),
                    sequences
                ),
            ));
        }
    }
    Ok(())
}

fn validate_threshold(
    loc: &str,
    operator: Operator,
    value: &ThresholdValue,
) -> Result<(), ProtocolError> {
    match (operator, value) {
        (Operator::Between, ThresholdValue::Range(range)) => match range.as_slice() {
            [low, high] if low <= high => Ok(()),
            [low, high] => Err(ProtocolError::schema(
                format!("{}.value", loc),
                format!("between range [{}, {}] is not ordered", low, high),
            )),
            other => Err(ProtocolError::schema(
                format!("{}.value", loc),
                format!("between needs exactly 2 values, got {}", other.len()),
            )),
        },
        (Operator::Between, ThresholdValue::Scalar(_)) => Err(ProtocolError::schema(
            format!("{}.value", loc),
            "between needs a [low, high] range",
        )),
        (op, ThresholdValue::Range(_)) => Err(ProtocolError::schema(
            format!("{}.value", loc),
            format!("operator {} needs a single value", op),
        )),
        (op, ThresholdValue::Scalar(v)) if op.is_ordering() => match v {
            ScalarValue::Number(n) if n.is_finite() => Ok(()),
            other => Err(ProtocolError::schema(
                format!("{}.value", loc),
                format!("operator {} needs a finite number, got {}", op, other),
            )),
        },
        (_, ThresholdValue::Scalar(_)) => Ok(()),
    }
}

pub(crate) fn validate_qc(loc: &str, qc: &QcSettings) -> Result<(), ProtocolError> {
    if !(0.0..=100.0).contains(&qc.min_completion_rate) {
        return Err(ProtocolError::schema(
            format!("{}.min_completion_rate", loc),
            "must be between 0 and 100",
        ));
    }
    if !is_positive(qc.max_cv) {
        return Err(ProtocolError::schema(format!("{}.max_cv", loc), "must be positive"));
    }
    if let Some(irr) = &qc.irradiance {
        if !is_positive(irr.nominal) || !is_non_negative(irr.tolerance_pct) {
            return Err(ProtocolError::schema(
                format!("{}.irradiance", loc),
                "nominal must be positive and tolerance_pct non-negative",
            ));
        }
    }
    if let Some(t) = &qc.temperature {
        if !t.nominal.is_finite() || !is_non_negative(t.tolerance) {
            return Err(ProtocolError::schema(
                format!("{}.temperature", loc),
                "nominal must be finite and tolerance non-negative",
            ));
        }
    }
    match (qc.outlier.method, qc.outlier.threshold) {
        (OutlierMethodKind::Zscore, None) => Err(ProtocolError::schema(
            format!("{}.outlier.threshold", loc),
            "zscore outlier screening needs an explicit threshold",
        )),
        (_, Some(k)) if !is_positive(k) => Err(ProtocolError::schema(
            format!("{}.outlier.threshold", loc),
            "must be positive",
        )),
        _ => Ok(()),
    }
}

fn is_positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

fn is_non_negative(x: f64) -> bool {
    x.is_finite() && x >= 0.0
}
