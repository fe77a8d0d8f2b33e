//! Minutes generation: single-flight summarize-then-PDF per channel.
//!
//! Concurrent requests for the same channel join one in-flight generation
//! and observe the same bytes. The generation runs on a detached task, so a
//! joiner going away never cancels it for the others. Finished output is
//! cached per channel once the room is inactive.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::Shared;
use futures::{Future, FutureExt};
use parking_lot::Mutex;
use tracing::{info, warn};

use conclave_core::config::SummarizerConfig;
use conclave_core::models::id::{ChannelId, RoomId};
use conclave_core::Error;

use crate::pdf::render_minutes;
use crate::summarize::{LocalSummarizer, RemoteSummarizer, Summarizer};

type GenerationResult = Result<Bytes, Arc<Error>>;
type SharedGeneration = Shared<Pin<Box<dyn Future<Output = GenerationResult> + Send>>>;

struct GeneratorCore {
    summarizer: Option<Arc<dyn Summarizer>>,
    fallback: LocalSummarizer,
    inflight: Mutex<HashMap<ChannelId, SharedGeneration>>,
    pdf_cache: DashMap<ChannelId, Bytes>,
    transcript_cache: DashMap<ChannelId, String>,
}

pub struct MinutesGenerator {
    core: Arc<GeneratorCore>,
}

impl MinutesGenerator {
    #[must_use]
    pub fn new(config: &SummarizerConfig) -> Arc<Self> {
        let summarizer: Option<Arc<dyn Summarizer>> =
            if !config.url.is_empty() && !config.token.is_empty() {
                Some(Arc::new(RemoteSummarizer::new(
                    config.url.clone(),
                    config.token.clone(),
                    Duration::from_secs(config.timeout_seconds.max(1)),
                )))
            } else {
                // No token forces local summarization.
                None
            };
        Self::build(summarizer)
    }

    /// Build with an explicit summarizer; tests use this to count calls.
    #[must_use]
    pub fn with_summarizer(summarizer: Arc<dyn Summarizer>) -> Arc<Self> {
        Self::build(Some(summarizer))
    }

    fn build(summarizer: Option<Arc<dyn Summarizer>>) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::new(GeneratorCore {
                summarizer,
                fallback: LocalSummarizer::new(),
                inflight: Mutex::new(HashMap::new()),
                pdf_cache: DashMap::new(),
                transcript_cache: DashMap::new(),
            }),
        })
    }

    #[must_use]
    pub fn cached_pdf(&self, channel_id: &ChannelId) -> Option<Bytes> {
        self.core
            .pdf_cache
            .get(channel_id)
            .map(|b| b.value().clone())
    }

    #[must_use]
    pub fn cached_transcript(&self, channel_id: &ChannelId) -> Option<String> {
        self.core
            .transcript_cache
            .get(channel_id)
            .map(|t| t.value().clone())
    }

    /// Channels with a cached transcript or PDF.
    #[must_use]
    pub fn cached_channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self
            .core
            .pdf_cache
            .iter()
            .map(|e| e.key().clone())
            .chain(self.core.transcript_cache.iter().map(|e| e.key().clone()))
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }

    pub fn evict(&self, channel_id: &ChannelId) {
        self.core.pdf_cache.remove(channel_id);
        self.core.transcript_cache.remove(channel_id);
    }

    /// Seed the transcript cache directly, e.g. from a stopped pipeline.
    pub fn cache_transcript(&self, channel_id: &ChannelId, transcript: String) {
        self.core
            .transcript_cache
            .insert(channel_id.clone(), transcript);
    }

    /// Produce the minutes PDF for a channel.
    ///
    /// `live_transcript` is the transcript as captured by the caller (the
    /// running pipeline's snapshot when the room is active, the retained
    /// transcript of a stopped pipeline otherwise); the per-channel cache is
    /// the final fallback.
    pub async fn generate(
        &self,
        channel_id: &ChannelId,
        room_id: &RoomId,
        room_active: bool,
        live_transcript: Option<String>,
    ) -> Result<Bytes, Arc<Error>> {
        // Finalized rooms serve the cache without re-generating.
        if !room_active {
            if let Some(cached) = self.cached_pdf(channel_id) {
                return Ok(cached);
            }
        }

        let generation = {
            let mut inflight = self.core.inflight.lock();
            if let Some(existing) = inflight.get(channel_id) {
                existing.clone()
            } else {
                let task = tokio::spawn(run_generation(
                    Arc::clone(&self.core),
                    channel_id.clone(),
                    room_id.clone(),
                    room_active,
                    live_transcript,
                ));
                let shared: SharedGeneration = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(Arc::new(Error::Internal(format!(
                            "Minutes generation task failed: {e}"
                        )))),
                    }
                }
                .boxed()
                .shared();
                inflight.insert(channel_id.clone(), shared.clone());
                shared
            }
        };

        generation.await
    }
}

async fn run_generation(
    core: Arc<GeneratorCore>,
    channel_id: ChannelId,
    room_id: RoomId,
    room_active: bool,
    live_transcript: Option<String>,
) -> GenerationResult {
    let result = core
        .generate_inner(&channel_id, &room_id, room_active, live_transcript)
        .await;

    // The in-flight slot is removed exactly once, by the generation itself,
    // so late joiners either share this run or start a new one.
    core.inflight.lock().remove(&channel_id);

    match result {
        Ok(pdf) => Ok(pdf),
        Err(e) => {
            // A failed generation falls back to the prior cached PDF.
            if let Some(cached) = core.pdf_cache.get(&channel_id) {
                warn!(
                    channel_id = %channel_id,
                    error = %e,
                    "Minutes generation failed, serving cached PDF"
                );
                Ok(cached.value().clone())
            } else {
                Err(Arc::new(e))
            }
        }
    }
}

impl GeneratorCore {
    async fn generate_inner(
        &self,
        channel_id: &ChannelId,
        room_id: &RoomId,
        room_active: bool,
        live_transcript: Option<String>,
    ) -> Result<Bytes, Error> {
        let transcript = live_transcript
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                self.transcript_cache
                    .get(channel_id)
                    .map(|t| t.value().clone())
            })
            .ok_or_else(|| Error::NotFound(format!("No transcript available for {channel_id}")))?;

        let summary = self.summarize(&transcript).await?;
        let pdf = Bytes::from(render_minutes(room_id, &summary, &transcript)?);

        if !room_active {
            self.transcript_cache
                .insert(channel_id.clone(), transcript);
            self.pdf_cache.insert(channel_id.clone(), pdf.clone());
        }

        info!(
            channel_id = %channel_id,
            bytes = pdf.len(),
            cached = !room_active,
            "Minutes generated"
        );
        Ok(pdf)
    }

    /// Remote summarizer first, local extraction as fallback.
    async fn summarize(&self, transcript: &str) -> Result<String, Error> {
        if let Some(remote) = &self.summarizer {
            match remote.summarize(transcript).await {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    warn!(error = %e, "Remote summarizer failed, falling back to local");
                }
            }
        }
        self.fallback.summarize(transcript).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSummarizer {
        calls: AtomicUsize,
        delay_ms: u64,
        fail: bool,
    }

    impl CountingSummarizer {
        fn new(delay_ms: u64, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay_ms,
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, _transcript: &str) -> conclave_core::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(Error::UpstreamUnavailable("summarizer down".to_string()));
            }
            Ok("- the one decision".to_string())
        }
    }

    fn ids() -> (ChannelId, RoomId) {
        (
            ChannelId::from_string("t1:r1".to_string()),
            RoomId::from("r1"),
        )
    }

    const TRANSCRIPT: &str = "[00:01] alice: we decided to ship friday\n";

    #[tokio::test]
    async fn test_concurrent_requests_share_one_generation() {
        let summarizer = CountingSummarizer::new(50, false);
        let generator = MinutesGenerator::with_summarizer(summarizer.clone());
        let (channel, room) = ids();

        let a = generator.generate(&channel, &room, false, Some(TRANSCRIPT.to_string()));
        let b = generator.generate(&channel, &room, false, Some(TRANSCRIPT.to_string()));
        let (a, b) = tokio::join!(a, b);

        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a, b);
        assert_eq!(summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn test_inactive_room_serves_cache_without_regenerating() {
        let summarizer = CountingSummarizer::new(0, false);
        let generator = MinutesGenerator::with_summarizer(summarizer.clone());
        let (channel, room) = ids();

        let first = generator
            .generate(&channel, &room, false, Some(TRANSCRIPT.to_string()))
            .await
            .unwrap();
        let second = generator
            .generate(&channel, &room, false, None)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(summarizer.calls(), 1);
        assert!(generator.cached_transcript(&channel).is_some());
    }

    #[tokio::test]
    async fn test_active_room_does_not_cache() {
        let summarizer = CountingSummarizer::new(0, false);
        let generator = MinutesGenerator::with_summarizer(summarizer.clone());
        let (channel, room) = ids();

        generator
            .generate(&channel, &room, true, Some(TRANSCRIPT.to_string()))
            .await
            .unwrap();
        assert!(generator.cached_pdf(&channel).is_none());

        // A second active-room request generates again.
        generator
            .generate(&channel, &room, true, Some(TRANSCRIPT.to_string()))
            .await
            .unwrap();
        assert_eq!(summarizer.calls(), 2);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local_summary() {
        let summarizer = CountingSummarizer::new(0, true);
        let generator = MinutesGenerator::with_summarizer(summarizer.clone());
        let (channel, room) = ids();

        let pdf = generator
            .generate(&channel, &room, false, Some(TRANSCRIPT.to_string()))
            .await
            .unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert_eq!(summarizer.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_generation_serves_prior_cache() {
        let summarizer = CountingSummarizer::new(0, false);
        let generator = MinutesGenerator::with_summarizer(summarizer);
        let (channel, room) = ids();

        let cached = generator
            .generate(&channel, &room, false, Some(TRANSCRIPT.to_string()))
            .await
            .unwrap();

        // With no transcript and no caches the generation surfaces an error.
        generator.evict(&channel);
        let missing = generator.generate(&channel, &room, false, None).await;
        assert!(missing.is_err());

        // With a prior PDF in place the same failure falls back to it.
        generator.core.pdf_cache.insert(channel.clone(), cached.clone());
        let served = generator
            .generate(&channel, &room, true, None)
            .await
            .unwrap();
        assert_eq!(served, cached);
    }

    #[tokio::test]
    async fn test_no_transcript_surfaces_not_found() {
        let summarizer = CountingSummarizer::new(0, false);
        let generator = MinutesGenerator::with_summarizer(summarizer);
        let (channel, room) = ids();

        let result = generator.generate(&channel, &room, false, None).await;
        match result {
            Err(e) => assert!(matches!(*e, Error::NotFound(_))),
            Ok(_) => panic!("expected error"),
        }
    }
}
