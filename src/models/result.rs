use serde::{Deserialize, Serialize};

use super::AuditStepDefinition;

/// Compliance verdict for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Conforme {
    Conforme,
    NonConforme,
    Partiel,
}

/// Verdict for a single control point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlPointStatus {
    Present,
    Absent,
    Partiel,
    NonApplicable,
}

impl ControlPointStatus {
    /// Whether citations may back this status
    pub fn allows_citations(self) -> bool {
        matches!(self, Self::Present | Self::Partiel)
    }
}

/// Classification bucket, used per step and for the overall audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NiveauConformite {
    Excellent,
    Bon,
    Acceptable,
    Insuffisant,
    Rejet,
}

impl NiveauConformite {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Bon => "BON",
            Self::Acceptable => "ACCEPTABLE",
            Self::Insuffisant => "INSUFFISANT",
            Self::Rejet => "REJET",
        }
    }
}

/// A transcript excerpt backing a control-point verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub texte: String,
    /// MM:SS within the recording
    pub minutage: String,
    pub minutage_secondes: f64,
    pub speaker: String,
    pub recording_index: usize,
    pub chunk_index: usize,
    #[serde(default)]
    pub recording_date: String,
    #[serde(default)]
    pub recording_time: String,
}

/// Format seconds as MM:SS, the citation timestamp format
pub fn format_minutage(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPointResult {
    pub point: String,
    pub statut: ControlPointStatus,
    #[serde(default)]
    pub commentaire: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub minutages: Vec<String>,
    #[serde(default)]
    pub erreur_transcription_notee: bool,
    #[serde(default)]
    pub variation_phonetique_utilisee: Option<String>,
}

/// API token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(self, other: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// Identity of the step a result belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub position: u32,
    pub name: String,
    pub severity: String,
    pub is_critical: bool,
    pub weight: u32,
}

impl From<&AuditStepDefinition> for StepMetadata {
    fn from(step: &AuditStepDefinition) -> Self {
        Self {
            position: step.position,
            name: step.name.clone(),
            severity: step.severity_level.clone(),
            is_critical: step.is_critical,
            weight: step.weight,
        }
    }
}

/// Step analysis exactly as the model returns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAnalysisPayload {
    pub score: f64,
    pub conforme: Conforme,
    pub niveau_conformite: NiveauConformite,
    #[serde(default)]
    pub points_controle: Vec<ControlPointResult>,
}

/// Enriched result of one step analysis. Reruns produce a new value rather
/// than editing an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAnalysisResult {
    pub score: f64,
    pub conforme: Conforme,
    pub niveau_conformite: NiveauConformite,
    pub points_controle: Vec<ControlPointResult>,
    pub usage: Usage,
    pub step_metadata: StepMetadata,
    #[serde(default)]
    pub total_citations: usize,
}

impl StepAnalysisResult {
    pub fn from_payload(payload: StepAnalysisPayload, step: &AuditStepDefinition, usage: Usage) -> Self {
        let total_citations = payload
            .points_controle
            .iter()
            .map(|p| p.citations.len())
            .sum();

        Self {
            score: payload.score,
            conforme: payload.conforme,
            niveau_conformite: payload.niveau_conformite,
            points_controle: payload.points_controle,
            usage,
            step_metadata: StepMetadata::from(step),
            total_citations,
        }
    }

    pub fn citation_count(&self) -> usize {
        self.points_controle.iter().map(|p| p.citations.len()).sum()
    }
}

/// A step whose analysis exhausted its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_metadata: StepMetadata,
    pub error: String,
}

/// Settled state of one step analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded(StepAnalysisResult),
    Failed(StepFailure),
}

impl StepOutcome {
    pub fn metadata(&self) -> &StepMetadata {
        match self {
            Self::Succeeded(r) => &r.step_metadata,
            Self::Failed(f) => &f.step_metadata,
        }
    }

    pub fn position(&self) -> u32 {
        self.metadata().position
    }

    pub fn as_success(&self) -> Option<&StepAnalysisResult> {
        match self {
            Self::Succeeded(r) => Some(r),
            Self::Failed(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}
