use serde::{Deserialize, Serialize};

use super::ConversationChunk;

/// Sentinel rendered in place of unresolved recording metadata
pub const NOT_AVAILABLE: &str = "N/A";

/// Metadata for one recording of a case, as known before timeline assembly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub call_id: String,
    #[serde(default)]
    pub recording_url: Option<String>,
    /// Date of the call, as stored (e.g. "2024-03-12")
    #[serde(default)]
    pub recording_date: Option<String>,
    /// Time of day of the call, as stored (e.g. "14:05")
    #[serde(default)]
    pub recording_time: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub to_number: Option<String>,
}

/// One recording's place in the case timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRecording {
    /// 0-based position in the timeline
    pub recording_index: usize,
    pub call_id: String,
    pub recording_url: String,
    pub recording_date: String,
    pub recording_time: String,
    pub from_number: String,
    pub to_number: String,
    pub duration_seconds: f64,
    pub total_chunks: usize,
    pub chunks: Vec<ConversationChunk>,
}

impl TimelineRecording {
    pub fn chunk(&self, chunk_index: usize) -> Option<&ConversationChunk> {
        self.chunks.get(chunk_index)
    }
}

/// Recoverable problem found while building a timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineWarning {
    MissingRecordingUrl { recording_index: usize, call_id: String },
    IncompleteDateTime { recording_index: usize, call_id: String },
    EmptyTranscript { recording_index: usize, call_id: String },
    MissingDuration { recording_index: usize, call_id: String },
}

impl std::fmt::Display for TimelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRecordingUrl { recording_index, call_id } => write!(
                f,
                "recording {} ({}): no recording URL",
                recording_index, call_id
            ),
            Self::IncompleteDateTime { recording_index, call_id } => write!(
                f,
                "recording {} ({}): incomplete date/time",
                recording_index, call_id
            ),
            Self::EmptyTranscript { recording_index, call_id } => write!(
                f,
                "recording {} ({}): empty transcript",
                recording_index, call_id
            ),
            Self::MissingDuration { recording_index, call_id } => write!(
                f,
                "recording {} ({}): duration unknown, derived from transcript",
                recording_index, call_id
            ),
        }
    }
}

/// Ordered timeline plus the text rendering fed to the model
#[derive(Debug, Clone)]
pub struct Timeline {
    pub recordings: Vec<TimelineRecording>,
    pub text: String,
    pub warnings: Vec<TimelineWarning>,
}

impl Timeline {
    pub fn total_chunks(&self) -> usize {
        self.recordings.iter().map(|r| r.total_chunks).sum()
    }

    /// Check whether a citation address resolves to a chunk
    pub fn contains_chunk(&self, recording_index: usize, chunk_index: usize) -> bool {
        self.recordings
            .get(recording_index)
            .and_then(|r| r.chunk(chunk_index))
            .is_some()
    }

    /// Date and time of the recording a citation points at
    ///
    /// Both are N/A when the address does not resolve to a chunk.
    pub fn citation_date_time(&self, recording_index: usize, chunk_index: usize) -> (String, String) {
        match self.recordings.get(recording_index) {
            Some(recording) if recording.chunk(chunk_index).is_some() => (
                recording.recording_date.clone(),
                recording.recording_time.clone(),
            ),
            _ => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
        }
    }
}
