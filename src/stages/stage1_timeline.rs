use std::fmt::Write;

use tracing::{debug, warn};

use crate::models::{
    format_minutage, ConversationChunk, RecordingMetadata, Timeline, TimelineRecording,
    TimelineWarning, NOT_AVAILABLE,
};

/// One recording's assembled chunks together with its metadata
#[derive(Debug, Clone)]
pub struct RecordingChunks {
    pub metadata: RecordingMetadata,
    pub chunks: Vec<ConversationChunk>,
}

/// Build the ordered case timeline and its prompt rendering
///
/// Input order is kept as timeline order. Missing metadata never aborts the
/// build: it is replaced with [`NOT_AVAILABLE`] and reported as a warning.
pub fn build_timeline(recordings: Vec<RecordingChunks>) -> Timeline {
    let mut warnings = Vec::new();

    let recordings: Vec<TimelineRecording> = recordings
        .into_iter()
        .enumerate()
        .map(|(recording_index, rec)| to_timeline_recording(recording_index, rec, &mut warnings))
        .collect();

    for warning in &warnings {
        warn!("Timeline: {}", warning);
    }

    let text = render_timeline(&recordings);
    debug!(
        recordings = recordings.len(),
        chars = text.len(),
        "Timeline rendered"
    );

    Timeline {
        recordings,
        text,
        warnings,
    }
}

fn to_timeline_recording(
    recording_index: usize,
    rec: RecordingChunks,
    warnings: &mut Vec<TimelineWarning>,
) -> TimelineRecording {
    let RecordingChunks { metadata, chunks } = rec;
    let call_id = metadata.call_id.clone();

    let recording_url = match non_empty(metadata.recording_url) {
        Some(url) => url,
        None => {
            warnings.push(TimelineWarning::MissingRecordingUrl {
                recording_index,
                call_id: call_id.clone(),
            });
            NOT_AVAILABLE.to_string()
        }
    };

    let date = non_empty(metadata.recording_date);
    let time = non_empty(metadata.recording_time);
    if date.is_none() || time.is_none() {
        warnings.push(TimelineWarning::IncompleteDateTime {
            recording_index,
            call_id: call_id.clone(),
        });
    }

    if chunks.is_empty() {
        warnings.push(TimelineWarning::EmptyTranscript {
            recording_index,
            call_id: call_id.clone(),
        });
    }

    let duration_seconds = match metadata.duration_seconds {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => {
            warnings.push(TimelineWarning::MissingDuration {
                recording_index,
                call_id: call_id.clone(),
            });
            chunks.last().map(|c| c.end_timestamp).unwrap_or(0.0)
        }
    };

    TimelineRecording {
        recording_index,
        call_id,
        recording_url,
        recording_date: date.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        recording_time: time.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        from_number: non_empty(metadata.from_number).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        to_number: non_empty(metadata.to_number).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        duration_seconds,
        total_chunks: chunks.len(),
        chunks,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Render the timeline as the text block sent to the model
pub fn render_timeline(recordings: &[TimelineRecording]) -> String {
    let mut out = String::new();
    let total_chunks: usize = recordings.iter().map(|r| r.total_chunks).sum();

    let _ = writeln!(out, "=== CHRONOLOGIE DES APPELS ===");
    let _ = writeln!(out, "Enregistrements: {}", recordings.len());
    let _ = writeln!(out, "Segments au total: {}", total_chunks);
    let _ = writeln!(
        out,
        "Citer chaque extrait avec son recording_index et son chunk_index."
    );

    for rec in recordings {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "--- ENREGISTREMENT {}/{} ---",
            rec.recording_index + 1,
            recordings.len()
        );
        let _ = writeln!(out, "recording_index: {}", rec.recording_index);
        let _ = writeln!(out, "Date: {}", rec.recording_date);
        let _ = writeln!(out, "Heure: {}", rec.recording_time);
        let _ = writeln!(out, "Call ID: {}", rec.call_id);
        let _ = writeln!(out, "De: {} -> Vers: {}", rec.from_number, rec.to_number);
        let _ = writeln!(
            out,
            "Durée: {} ({:.0}s)",
            format_minutage(rec.duration_seconds),
            rec.duration_seconds
        );
        let _ = writeln!(out, "Segments: {}", rec.total_chunks);

        for chunk in &rec.chunks {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "[chunk_index {}] {} - {} | Locuteurs: {}",
                chunk.chunk_index,
                format_minutage(chunk.start_timestamp),
                format_minutage(chunk.end_timestamp),
                chunk.speakers.join(", ")
            );
            let _ = writeln!(out, "{}", chunk.full_text);
        }
    }

    out
}
