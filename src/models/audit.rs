use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ComplianceScore, RecordingMetadata, StepOutcome, TimelineWarning, TranscriptWord};

/// A recording as held by authoritative transcript storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredRecording {
    #[serde(flatten)]
    pub metadata: RecordingMetadata,
    /// Word-level transcript, when the provider returned one
    #[serde(default)]
    pub words: Option<Vec<TranscriptWord>>,
    /// Plain transcript text, used only when no word-level data exists
    #[serde(default)]
    pub transcript_text: Option<String>,
}

/// A previously persisted audit run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAudit {
    pub id: String,
    pub fiche_id: String,
    pub config_id: String,
    /// Messages per chunk the cited chunk indices refer to
    #[serde(default)]
    pub chunk_size: Option<usize>,
    pub steps: Vec<StepOutcome>,
}

impl StoredAudit {
    pub fn step(&self, position: u32) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.position() == position)
    }
}

/// Aggregate counters for one orchestrated run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_time_seconds: f64,
    /// Sum over successful steps only
    pub total_tokens: u64,
}

/// Final output of a full audit run, handed to the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub run_id: Uuid,
    pub fiche_id: String,
    pub config_id: String,
    pub generated_at: DateTime<Utc>,
    /// Messages per chunk used to build the timeline
    pub chunk_size: usize,
    #[serde(default)]
    pub timeline_warnings: Vec<TimelineWarning>,
    pub steps: Vec<StepOutcome>,
    pub compliance: ComplianceScore,
    pub statistics: RunStatistics,
}

impl AuditReport {
    /// View of the report as a stored audit, for later reruns
    pub fn to_stored(&self, audit_id: impl Into<String>) -> StoredAudit {
        StoredAudit {
            id: audit_id.into(),
            fiche_id: self.fiche_id.clone(),
            config_id: self.config_id.clone(),
            chunk_size: Some(self.chunk_size),
            steps: self.steps.clone(),
        }
    }
}
