use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Conforme, ControlPointResult, ControlPointStatus, StepAnalysisResult, Usage};

/// Difference between a stored step result and its rerun
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunComparison {
    pub score_changed: bool,
    pub conforme_changed: bool,
    pub citations_changed: bool,
    pub original_score: f64,
    pub new_score: f64,
    pub original_conforme: Conforme,
    pub new_conforme: Conforme,
}

impl RerunComparison {
    pub fn between(original: &StepAnalysisResult, rerun: &StepAnalysisResult) -> Self {
        Self {
            score_changed: original.score != rerun.score,
            conforme_changed: original.conforme != rerun.conforme,
            citations_changed: original.citation_count() != rerun.citation_count(),
            original_score: original.score,
            new_score: rerun.score,
            original_conforme: original.conforme,
            new_conforme: rerun.conforme,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.score_changed || self.conforme_changed || self.citations_changed
    }
}

/// Difference between a stored control point verdict and its rerun
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPointComparison {
    pub statut_changed: bool,
    pub citations_changed: bool,
    pub original_statut: ControlPointStatus,
    pub new_statut: ControlPointStatus,
    pub original_citations: usize,
    pub new_citations: usize,
}

impl ControlPointComparison {
    pub fn between(original: &ControlPointResult, rerun: &ControlPointResult) -> Self {
        Self {
            statut_changed: original.statut != rerun.statut,
            citations_changed: original.citations.len() != rerun.citations.len(),
            original_statut: original.statut,
            new_statut: rerun.statut,
            original_citations: original.citations.len(),
            new_citations: rerun.citations.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRerunOutcome {
    pub audit_id: String,
    pub position: u32,
    pub original: StepAnalysisResult,
    pub rerun: StepAnalysisResult,
    pub comparison: RerunComparison,
    pub rerun_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPointRerunOutcome {
    pub audit_id: String,
    pub position: u32,
    pub point_index: usize,
    pub original: ControlPointResult,
    pub rerun: ControlPointResult,
    pub comparison: ControlPointComparison,
    pub usage: Usage,
    pub rerun_at: DateTime<Utc>,
}
