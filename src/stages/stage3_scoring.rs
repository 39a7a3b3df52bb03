use std::collections::HashMap;

use crate::models::{
    AuditStepDefinition, ComplianceScore, Conforme, NiveauConformite, StepAnalysisResult,
    StepOutcome,
};

/// Score thresholds for classification (inclusive lower bounds)
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub excellent: f64,
    pub bon: f64,
    pub acceptable: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            excellent: 90.0,
            bon: 75.0,
            acceptable: 60.0,
        }
    }
}

/// Compute the overall compliance score
///
/// The total weight covers every configured step, whether or not its analysis
/// succeeded. Each step contributes at most its own weight. Any critical step
/// that is not CONFORME forces REJET regardless of the numeric score.
pub fn compute_compliance(
    steps: &[AuditStepDefinition],
    outcomes: &[StepOutcome],
    config: &ScoringConfig,
) -> ComplianceScore {
    let results: HashMap<u32, &StepAnalysisResult> = outcomes
        .iter()
        .filter_map(StepOutcome::as_success)
        .map(|r| (r.step_metadata.position, r))
        .collect();

    let total_weight: u32 = steps.iter().map(|s| s.weight).sum();

    let earned_weight: f64 = steps
        .iter()
        .filter_map(|step| {
            results
                .get(&step.position)
                .filter(|r| r.score.is_finite())
                .map(|r| r.score.max(0.0).min(step.weight as f64))
        })
        .sum();

    let score = if total_weight > 0 {
        round2(earned_weight / total_weight as f64 * 100.0)
    } else {
        0.0
    };

    let critical_total = steps.iter().filter(|s| s.is_critical).count();
    let critical_passed = steps
        .iter()
        .filter(|s| s.is_critical)
        .filter(|s| {
            results
                .get(&s.position)
                .is_some_and(|r| r.conforme == Conforme::Conforme)
        })
        .count();

    let niveau = if critical_passed < critical_total {
        NiveauConformite::Rejet
    } else {
        classify(score, config)
    };

    ComplianceScore {
        score,
        niveau,
        points_critiques: format!("{}/{}", critical_passed, critical_total),
        poids_obtenu: round2(earned_weight),
        poids_total: total_weight,
    }
}

fn classify(score: f64, config: &ScoringConfig) -> NiveauConformite {
    if score >= config.excellent {
        NiveauConformite::Excellent
    } else if score >= config.bon {
        NiveauConformite::Bon
    } else if score >= config.acceptable {
        NiveauConformite::Acceptable
    } else {
        NiveauConformite::Insuffisant
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
