//! Append-only transcript with near-duplicate suppression.

use serde::{Deserialize, Serialize};

/// Frames with identical text and speaker arriving within this window of the
/// previous chunk are treated as re-deliveries and dropped.
pub const DEDUP_WINDOW_MS: u64 = 1500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptChunk {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub speaker: Option<String>,
}

#[derive(Debug, Default)]
pub struct Transcript {
    chunks: Vec<TranscriptChunk>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Append a chunk unless it duplicates the previous one. Returns whether
    /// the chunk was kept.
    pub fn append(&mut self, chunk: TranscriptChunk) -> bool {
        if chunk.text.trim().is_empty() {
            return false;
        }
        if let Some(last) = self.chunks.last() {
            let delta = chunk.end_ms.abs_diff(last.end_ms);
            if last.text == chunk.text && delta < DEDUP_WINDOW_MS && last.speaker == chunk.speaker {
                return false;
            }
        }
        self.chunks.push(chunk);
        true
    }

    #[must_use]
    pub fn chunks(&self) -> &[TranscriptChunk] {
        &self.chunks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Plain-text rendering: one `[mm:ss] speaker: text` line per chunk.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            let total_secs = chunk.start_ms / 1000;
            let minutes = total_secs / 60;
            let seconds = total_secs % 60;
            out.push_str(&format!("[{minutes:02}:{seconds:02}] "));
            if let Some(speaker) = &chunk.speaker {
                out.push_str(speaker);
                out.push_str(": ");
            }
            out.push_str(&chunk.text);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start_ms: u64, end_ms: u64, text: &str, speaker: Option<&str>) -> TranscriptChunk {
        TranscriptChunk {
            start_ms,
            end_ms,
            text: text.to_string(),
            speaker: speaker.map(String::from),
        }
    }

    #[test]
    fn test_identical_frames_within_window_collapse() {
        let mut transcript = Transcript::new();
        assert!(transcript.append(chunk(0, 1000, "hello there", Some("a"))));
        assert!(!transcript.append(chunk(100, 2000, "hello there", Some("a"))));
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_identical_frames_outside_window_are_kept() {
        let mut transcript = Transcript::new();
        assert!(transcript.append(chunk(0, 1000, "hello there", Some("a"))));
        assert!(transcript.append(chunk(2000, 2600, "hello there", Some("a"))));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_speaker_change_defeats_dedup() {
        let mut transcript = Transcript::new();
        assert!(transcript.append(chunk(0, 1000, "hello there", Some("a"))));
        assert!(transcript.append(chunk(100, 1100, "hello there", Some("b"))));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_empty_text_is_dropped() {
        let mut transcript = Transcript::new();
        assert!(!transcript.append(chunk(0, 0, "   ", None)));
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_render_text_format() {
        let mut transcript = Transcript::new();
        transcript.append(chunk(65_000, 66_000, "first point", Some("alice")));
        transcript.append(chunk(70_000, 71_000, "noted", None));

        let text = transcript.render_text();
        assert_eq!(text, "[01:05] alice: first point\n[01:10] noted\n");
    }
}
