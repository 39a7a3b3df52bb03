use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::{AuditConfig, StepOutcome, StoredRecording, TranscriptWord, WordType};

/// How to fake word timing when only plain transcript text is stored
#[derive(Debug, Clone)]
pub struct TranscriptFallback {
    /// Speakers assigned to successive lines, in rotation
    pub speakers: Vec<String>,
    /// Per-word duration used when the recording duration is unknown
    pub seconds_per_word: f64,
}

impl Default for TranscriptFallback {
    fn default() -> Self {
        Self {
            speakers: vec!["speaker_0".to_string(), "speaker_1".to_string()],
            seconds_per_word: 0.4,
        }
    }
}

/// Word list for a stored recording
///
/// Word-level data wins. Otherwise words are synthesized from the plain text:
/// the duration is divided evenly across whitespace-separated tokens and each
/// line is attributed to the next default speaker in turn.
pub fn recording_words(recording: &StoredRecording, fallback: &TranscriptFallback) -> Vec<TranscriptWord> {
    if let Some(words) = recording.words.as_ref().filter(|w| !w.is_empty()) {
        return words.clone();
    }

    let Some(text) = recording.transcript_text.as_deref() else {
        warn!("Recording {} has no stored transcript", recording.metadata.call_id);
        return vec![];
    };

    let lines: Vec<Vec<&str>> = text
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|tokens| !tokens.is_empty())
        .collect();
    let token_count: usize = lines.iter().map(Vec::len).sum();
    if token_count == 0 {
        return vec![];
    }

    let duration = match recording.metadata.duration_seconds {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => token_count as f64 * fallback.seconds_per_word,
    };
    let per_word = duration / token_count as f64;

    debug!(
        "Synthesizing {} words over {:.1}s for recording {}",
        token_count, duration, recording.metadata.call_id
    );

    let mut words = Vec::with_capacity(token_count);
    for (line_index, tokens) in lines.iter().enumerate() {
        let speaker = fallback
            .speakers
            .get(line_index % fallback.speakers.len().max(1))
            .cloned();

        for token in tokens {
            let i = words.len() as f64;
            words.push(TranscriptWord {
                text: token.to_string(),
                start: i * per_word,
                end: (i + 1.0) * per_word,
                word_type: WordType::Word,
                speaker_id: speaker.clone(),
                logprob: None,
            });
        }
    }

    words
}

/// Parse an audit config file
pub fn parse_config_file(path: &Path) -> Result<AuditConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse audit config JSON")
}

/// Parse a recordings file (array of stored recordings, in timeline order)
pub fn parse_recordings_file(path: &Path) -> Result<Vec<StoredRecording>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse recordings JSON")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutcomesFile {
    Bare(Vec<StepOutcome>),
    Wrapped { steps: Vec<StepOutcome> },
}

/// Parse step outcomes, either a bare array or any object with a `steps` array
pub fn parse_outcomes_file(path: &Path) -> Result<Vec<StepOutcome>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    let file: OutcomesFile =
        serde_json::from_str(&content).context("Failed to parse step outcomes JSON")?;

    Ok(match file {
        OutcomesFile::Bare(steps) | OutcomesFile::Wrapped { steps } => steps,
    })
}
