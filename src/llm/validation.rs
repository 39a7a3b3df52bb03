use crate::models::{
    AuditStepDefinition, ControlPointResult, ControlPointStatus, StepAnalysisPayload, Timeline,
};

/// Configuration for output validation
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Require every citation to address an existing (recording, chunk)
    pub strict_citation_addressing: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_citation_addressing: true,
        }
    }
}

/// Validation result for a parsed model output
#[derive(Debug, Clone)]
pub struct OutputValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl OutputValidation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validate a step analysis against the rules
///
/// Scores above the step weight are accepted; the scorer caps them.
pub fn validate_step_payload(
    payload: &StepAnalysisPayload,
    step: &AuditStepDefinition,
    timeline: &Timeline,
    config: &ValidationConfig,
) -> OutputValidation {
    let mut errors = Vec::new();

    // 1. Score must be a usable number
    if !payload.score.is_finite() || payload.score < 0.0 {
        errors.push(format!("Score {} is not a non-negative number", payload.score));
    }

    // 2. Every configured control point must be answered
    if payload.points_controle.len() < step.control_points.len() {
        let missing: Vec<&str> = step
            .control_points
            .iter()
            .filter(|configured| {
                !payload
                    .points_controle
                    .iter()
                    .any(|p| p.point.trim().eq_ignore_ascii_case(configured.trim()))
            })
            .map(String::as_str)
            .collect();
        errors.push(format!(
            "Only {} of {} configured control points answered (missing: {})",
            payload.points_controle.len(),
            step.control_points.len(),
            missing.join(", ")
        ));
    }

    // 3. Citation rules per control point
    for point in &payload.points_controle {
        check_control_point(point, timeline, config, &mut errors);
    }

    OutputValidation::from_errors(errors)
}

/// Validate a single control point verdict
pub fn validate_control_point(
    point: &ControlPointResult,
    timeline: &Timeline,
    config: &ValidationConfig,
) -> OutputValidation {
    let mut errors = Vec::new();
    check_control_point(point, timeline, config, &mut errors);
    OutputValidation::from_errors(errors)
}

fn check_control_point(
    point: &ControlPointResult,
    timeline: &Timeline,
    config: &ValidationConfig,
    errors: &mut Vec<String>,
) {
    if !point.statut.allows_citations() && !point.citations.is_empty() {
        errors.push(format!(
            "Control point '{}' is {:?} but has {} citations",
            point.point,
            point.statut,
            point.citations.len()
        ));
    }

    if point.statut == ControlPointStatus::Present && point.citations.is_empty() {
        errors.push(format!(
            "Control point '{}' is PRESENT without any citation",
            point.point
        ));
    }

    if config.strict_citation_addressing {
        for citation in &point.citations {
            if !timeline.contains_chunk(citation.recording_index, citation.chunk_index) {
                errors.push(format!(
                    "Citation in '{}' references unknown chunk {}/{}",
                    point.point, citation.recording_index, citation.chunk_index
                ));
            }
        }
    }
}
