use crate::models::{ConversationChunk, ConversationMessage, TranscriptWord};

/// Configuration for transcript assembly
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Number of messages per chunk
    pub chunk_size: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self { chunk_size: 10 }
    }
}

/// Merge consecutive same-speaker words into messages
///
/// Spacing elements are dropped. A message spans from its first word's start
/// to its last word's end.
pub fn build_messages(words: &[TranscriptWord]) -> Vec<ConversationMessage> {
    let mut messages: Vec<ConversationMessage> = Vec::new();

    for word in words.iter().filter(|w| !w.is_spacing()) {
        let text = word.text.trim();
        if text.is_empty() {
            continue;
        }

        match messages.last_mut() {
            Some(current) if current.speaker == word.speaker() => {
                current.text.push(' ');
                current.text.push_str(text);
                current.end = word.end;
            }
            _ => messages.push(ConversationMessage {
                speaker: word.speaker().to_string(),
                text: text.to_string(),
                start: word.start,
                end: word.end,
            }),
        }
    }

    messages
}

/// Partition messages into fixed-size chunks
///
/// Chunk indices are assigned by position only, so the same message list and
/// chunk size always produce the same addressing.
pub fn chunk_messages(messages: &[ConversationMessage], chunk_size: usize) -> Vec<ConversationChunk> {
    messages
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(chunk_index, group)| {
            let mut speakers: Vec<String> = Vec::new();
            for message in group {
                if !speakers.contains(&message.speaker) {
                    speakers.push(message.speaker.clone());
                }
            }

            let full_text = group
                .iter()
                .map(ConversationMessage::line)
                .collect::<Vec<_>>()
                .join("\n");

            ConversationChunk {
                chunk_index,
                start_timestamp: group.first().map(|m| m.start).unwrap_or(0.0),
                end_timestamp: group.last().map(|m| m.end).unwrap_or(0.0),
                message_count: group.len(),
                speakers,
                full_text,
            }
        })
        .collect()
}

/// Assemble one recording's words into addressable chunks
pub fn assemble_transcript(words: &[TranscriptWord], config: &AssemblerConfig) -> Vec<ConversationChunk> {
    let messages = build_messages(words);
    chunk_messages(&messages, config.chunk_size)
}
