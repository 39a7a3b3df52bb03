use serde::{Deserialize, Serialize};

/// Speaker label used when a word carries no diarization info
pub const UNKNOWN_SPEAKER: &str = "unknown";

/// Kind of element in a word-level transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordType {
    Word,
    Spacing,
    /// Anything else the speech-to-text provider emits (audio events, punctuation)
    #[serde(other)]
    Other,
}

/// A single word from the upstream speech-to-text output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    /// The recognized text
    pub text: String,
    /// Start timestamp in seconds
    pub start: f64,
    /// End timestamp in seconds
    pub end: f64,
    #[serde(rename = "type")]
    pub word_type: WordType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprob: Option<f64>,
}

impl TranscriptWord {
    pub fn word(text: impl Into<String>, start: f64, end: f64, speaker_id: &str) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            word_type: WordType::Word,
            speaker_id: Some(speaker_id.to_string()),
            logprob: None,
        }
    }

    pub fn is_spacing(&self) -> bool {
        self.word_type == WordType::Spacing
    }

    /// Speaker label, falling back to [`UNKNOWN_SPEAKER`]
    pub fn speaker(&self) -> &str {
        self.speaker_id.as_deref().unwrap_or(UNKNOWN_SPEAKER)
    }
}

/// Contiguous words from one speaker. Intermediate only, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub speaker: String,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl ConversationMessage {
    pub fn line(&self) -> String {
        format!("{}: {}", self.speaker, self.text)
    }
}

/// A fixed-size group of consecutive messages, the addressable unit for citations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationChunk {
    /// 0-based, sequential within one recording
    pub chunk_index: usize,
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub message_count: usize,
    /// Distinct speakers in first-appearance order
    pub speakers: Vec<String>,
    pub full_text: String,
}

impl ConversationChunk {
    pub fn duration_seconds(&self) -> f64 {
        (self.end_timestamp - self.start_timestamp).max(0.0)
    }
}
