//! Summarization: a remote service when configured, a deterministic local
//! extractor otherwise or on failure.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use conclave_core::{Error, Result};

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

/// Remote summarization endpoint: `POST {url}` with a bearer token and a
/// JSON body `{"text": ...}`, answering `{"summary": ...}`.
pub struct RemoteSummarizer {
    client: reqwest::Client,
    url: String,
    token: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

impl RemoteSummarizer {
    #[must_use]
    pub fn new(url: String, token: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            token,
            timeout,
        }
    }
}

#[async_trait]
impl Summarizer for RemoteSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(&json!({ "text": transcript }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Transient(format!("Summarizer timed out: {e}"))
                } else {
                    Error::UpstreamUnavailable(format!("Summarizer request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "Summarizer returned {}",
                response.status()
            )));
        }

        let body: SummaryResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("Summarizer response: {e}")))?;
        Ok(body.summary)
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has", "have",
    "he", "her", "his", "i", "if", "in", "is", "it", "its", "just", "like", "me", "my", "no",
    "not", "of", "off", "on", "or", "our", "she", "so", "that", "the", "their", "them", "then",
    "there", "they", "this", "to", "up", "us", "was", "we", "were", "what", "when", "which",
    "will", "with", "yeah", "yes", "you", "your",
];

/// Words that mark a sentence as carrying an action item.
const ACTION_CUES: &[&str] = &[
    "action", "agree", "agreed", "assign", "assigned", "deadline", "decide", "decided",
    "decision", "due", "follow", "must", "need", "owner", "schedule", "todo", "will",
];

/// Weight added to a sentence per action cue hit.
const ACTION_BOOST: f64 = 2.5;

/// How many sentences the extract keeps.
const MAX_SENTENCES: usize = 8;

/// Deterministic extractive summary: sentences are scored by the frequency
/// of their non-stopword terms, boosted when they carry action cues, and
/// emitted in original order.
pub struct LocalSummarizer {
    max_sentences: usize,
}

impl LocalSummarizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_sentences: MAX_SENTENCES,
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .map(str::to_lowercase)
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .collect()
    }

    fn split_sentences(text: &str) -> Vec<String> {
        // Transcript lines are one utterance each; within a line, sentence
        // punctuation splits further.
        text.lines()
            .flat_map(|line| line.split_inclusive(['.', '!', '?']))
            .map(|s| s.trim().trim_end_matches(['.', '!', '?']).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Strip the `[mm:ss] speaker:` prefix a transcript line carries.
    fn strip_line_prefix(sentence: &str) -> String {
        let mut rest = sentence;
        if rest.starts_with('[') {
            if let Some(end) = rest.find(']') {
                rest = rest[end + 1..].trim_start();
            }
        }
        if let Some((head, tail)) = rest.split_once(": ") {
            if head.len() <= 40 && !head.contains(' ') {
                return tail.to_string();
            }
        }
        rest.to_string()
    }
}

impl Default for LocalSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for LocalSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let sentences = Self::split_sentences(transcript);
        if sentences.is_empty() {
            return Err(Error::InvalidInput("Transcript is empty".to_string()));
        }

        let mut frequencies: std::collections::HashMap<String, f64> =
            std::collections::HashMap::new();
        for sentence in &sentences {
            for word in Self::tokenize(sentence) {
                *frequencies.entry(word).or_insert(0.0) += 1.0;
            }
        }

        let mut scored: Vec<(usize, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(index, sentence)| {
                let words = Self::tokenize(sentence);
                let mut score: f64 = words
                    .iter()
                    .map(|w| frequencies.get(w).copied().unwrap_or(0.0))
                    .sum();
                let cues = words
                    .iter()
                    .filter(|w| ACTION_CUES.contains(&w.as_str()))
                    .count();
                score += cues as f64 * ACTION_BOOST;
                (index, score)
            })
            .collect();

        // Highest score wins; earlier position breaks ties, keeping the
        // result stable for identical input.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        let mut picked: Vec<usize> = scored
            .into_iter()
            .take(self.max_sentences)
            .map(|(index, _)| index)
            .collect();
        picked.sort_unstable();

        debug!(
            sentences = sentences.len(),
            picked = picked.len(),
            "Local summary extracted"
        );

        let summary = picked
            .into_iter()
            .map(|index| format!("- {}", Self::strip_line_prefix(&sentences[index])))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = "\
[00:05] alice: welcome everyone to the quarterly planning call\n\
[00:12] bob: thanks for joining\n\
[00:30] alice: we will ship the billing migration next sprint\n\
[00:45] bob: the deadline for the audit is friday and carol is assigned as owner\n\
[01:02] carol: small talk about the weather\n\
[01:10] alice: agreed, the decision is to freeze the schema on monday\n";

    #[tokio::test]
    async fn test_local_summary_is_deterministic() {
        let summarizer = LocalSummarizer::new();
        let first = summarizer.summarize(TRANSCRIPT).await.unwrap();
        let second = summarizer.summarize(TRANSCRIPT).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_action_items_are_boosted() {
        let summarizer = LocalSummarizer::new();
        let summary = summarizer.summarize(TRANSCRIPT).await.unwrap();
        assert!(summary.contains("deadline for the audit"));
        assert!(summary.contains("freeze the schema"));
    }

    #[tokio::test]
    async fn test_speaker_prefixes_are_stripped() {
        let summarizer = LocalSummarizer::new();
        let summary = summarizer.summarize(TRANSCRIPT).await.unwrap();
        assert!(!summary.contains("[00:"));
        assert!(!summary.contains("alice:"));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_invalid() {
        let summarizer = LocalSummarizer::new();
        assert!(summarizer.summarize("").await.is_err());
        assert!(summarizer.summarize("   \n  ").await.is_err());
    }

    #[test]
    fn test_sentence_split() {
        let sentences = LocalSummarizer::split_sentences("one. two! three?");
        assert_eq!(sentences, vec!["one", "two", "three"]);
    }
}
