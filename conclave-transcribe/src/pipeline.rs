//! Per-room transcription pipeline.
//!
//! One transcriber per room, created when the first audio producer is
//! published: plain RTP transport on loopback, a consumer for the source
//! producer, a decoder process turning RTP into PCM, and a streaming ASR
//! socket. The transcriber owns all four; nothing else touches them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conclave_core::config::AsrConfig;
use conclave_core::media::{MediaEvent, MediaPlane};
use conclave_core::models::id::{ChannelId, ProducerId, TransportId};
use conclave_core::service::room::Room;
use conclave_core::Result;

use crate::asr::{self, parse_frame, AsrFrame};
use crate::decoder::DecoderProcess;
use crate::transcript::{Transcript, TranscriptChunk};

/// PCM read buffer; roughly 100 ms of 16 kHz mono s16le.
const PCM_CHUNK_BYTES: usize = 3200;

pub struct Transcriber {
    pub channel_id: ChannelId,
    pub producer_id: ProducerId,
    transcript: Mutex<Transcript>,
    last_partial: Mutex<String>,
    transport_id: Mutex<Option<TransportId>>,
    started_at: Instant,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
    room: Weak<Room>,
}

impl Transcriber {
    fn new(channel_id: ChannelId, producer_id: ProducerId, room: &Arc<Room>) -> Self {
        Self {
            channel_id,
            producer_id,
            transcript: Mutex::new(Transcript::new()),
            last_partial: Mutex::new(String::new()),
            transport_id: Mutex::new(None),
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            stopped: AtomicBool::new(false),
            room: Arc::downgrade(room),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Map one ASR frame into transcript state.
    pub fn handle_frame(&self, frame: AsrFrame) {
        match frame {
            AsrFrame::Partial { text } => {
                *self.last_partial.lock() = text;
            }
            AsrFrame::Final {
                text,
                start,
                end,
                speaker,
            } => {
                let arrival = self.elapsed_ms();
                let to_ms = |secs: f64| -> u64 {
                    if secs.is_finite() && secs >= 0.0 {
                        (secs * 1000.0) as u64
                    } else {
                        arrival
                    }
                };
                let start_ms = start.map_or(arrival, to_ms);
                let end_ms = end.map_or(start_ms, to_ms);

                self.last_partial.lock().clear();
                self.transcript.lock().append(TranscriptChunk {
                    start_ms,
                    end_ms,
                    text,
                    speaker,
                });
            }
        }
    }

    /// Flush a dangling partial as a final chunk stamped with the current
    /// session time.
    fn flush_partial(&self) {
        let partial = std::mem::take(&mut *self.last_partial.lock());
        if partial.trim().is_empty() {
            return;
        }
        let now = self.elapsed_ms();
        self.transcript.lock().append(TranscriptChunk {
            start_ms: now,
            end_ms: now,
            text: partial,
            speaker: None,
        });
    }

    #[must_use]
    pub fn transcript_text(&self) -> String {
        self.transcript.lock().render_text()
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.transcript.lock().len()
    }

    fn matches_transport(&self, transport_id: &TransportId) -> bool {
        self.transport_id.lock().as_ref() == Some(transport_id)
    }

    async fn run(self: Arc<Self>, media: Arc<dyn MediaPlane>, config: AsrConfig) {
        let channel_id = self.channel_id.clone();

        let transport = match media.create_plain_transport(&channel_id).await {
            Ok(t) => t,
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "Audio tap transport failed");
                return;
            }
        };
        *self.transport_id.lock() = Some(transport.transport.id().clone());

        let consumer = match media
            .consume(
                &channel_id,
                transport.transport.id(),
                &self.producer_id,
                false,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "Audio tap consume failed");
                transport.transport.close();
                return;
            }
        };

        let (decoder, mut pcm) =
            match DecoderProcess::spawn(&config.decoder_path, &transport, config.sample_rate).await
            {
                Ok(d) => d,
                Err(e) => {
                    warn!(channel_id = %channel_id, error = %e, "Decoder spawn failed");
                    consumer.close();
                    transport.transport.close();
                    return;
                }
            };

        let (mut asr_tx, mut asr_rx) = match asr::connect(&config.url, config.sample_rate).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "ASR connect failed");
                decoder.terminate().await;
                consumer.close();
                transport.transport.close();
                return;
            }
        };

        info!(
            channel_id = %channel_id,
            producer_id = %self.producer_id,
            port = transport.local_port,
            "Transcription pipeline running"
        );

        let mut buf = vec![0u8; PCM_CHUNK_BYTES];
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                read = pcm.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = asr_tx.send_pcm(&buf[..n]).await {
                            // One failed frame does not end the session.
                            debug!(channel_id = %channel_id, error = %e, "PCM frame dropped");
                        }
                    }
                    Err(e) => {
                        warn!(channel_id = %channel_id, error = %e, "PCM stream error");
                        break;
                    }
                },
                line = asr_rx.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(frame) = parse_frame(&line) {
                            self.handle_frame(frame);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(channel_id = %channel_id, error = %e, "ASR frame failed");
                    }
                },
            }
        }

        self.flush_partial();
        asr_tx.finish().await;
        decoder.terminate().await;
        consumer.close();
        transport.transport.close();
        info!(
            channel_id = %channel_id,
            chunks = self.chunk_count(),
            "Transcription pipeline stopped"
        );
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        // A pipeline that never reached its run loop may still hold a partial.
        self.flush_partial();
        if let Some(room) = self.room.upgrade() {
            room.release();
        }
    }
}

/// One pipeline per room, plus the transcripts of stopped pipelines.
pub struct TranscriberRegistry {
    config: AsrConfig,
    media: Arc<dyn MediaPlane>,
    active: DashMap<ChannelId, Arc<Transcriber>>,
    stopped_transcripts: DashMap<ChannelId, String>,
}

impl TranscriberRegistry {
    #[must_use]
    pub fn new(config: AsrConfig, media: Arc<dyn MediaPlane>) -> Arc<Self> {
        Arc::new(Self {
            config,
            media,
            active: DashMap::new(),
            stopped_transcripts: DashMap::new(),
        })
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.config.url.is_empty()
    }

    /// Attach the pipeline to a freshly published audio producer.
    ///
    /// Idempotent per producer: re-entry while active is a no-op, and a
    /// second audio producer in the same room does not attach. Returns
    /// whether a new pipeline was started.
    pub async fn start(&self, room: &Arc<Room>, producer_id: &ProducerId) -> Result<bool> {
        if !self.enabled() {
            return Ok(false);
        }
        if let Some(existing) = self.active.get(&room.channel_id) {
            if &existing.producer_id == producer_id {
                debug!(channel_id = %room.channel_id, "Transcriber already active");
            } else {
                debug!(
                    channel_id = %room.channel_id,
                    producer_id = %producer_id,
                    "Room already has a transcriber; producer not attached"
                );
            }
            return Ok(false);
        }

        let transcriber = Arc::new(Transcriber::new(
            room.channel_id.clone(),
            producer_id.clone(),
            room,
        ));
        room.hold();

        let task = tokio::spawn(Arc::clone(&transcriber).run(
            Arc::clone(&self.media),
            self.config.clone(),
        ));
        *transcriber.task.lock() = Some(task);
        self.active
            .insert(room.channel_id.clone(), Arc::clone(&transcriber));

        info!(
            channel_id = %room.channel_id,
            producer_id = %producer_id,
            "Transcriber started"
        );
        Ok(true)
    }

    #[must_use]
    pub fn get(&self, channel_id: &ChannelId) -> Option<Arc<Transcriber>> {
        self.active.get(channel_id).map(|t| Arc::clone(t.value()))
    }

    /// Current transcript text: the live pipeline when active, otherwise the
    /// retained transcript of a stopped one.
    #[must_use]
    pub fn transcript_text(&self, channel_id: &ChannelId) -> Option<String> {
        if let Some(active) = self.active.get(channel_id) {
            return Some(active.transcript_text());
        }
        self.stopped_transcripts
            .get(channel_id)
            .map(|t| t.value().clone())
    }

    /// Channels whose pipeline has stopped but whose transcript is retained.
    #[must_use]
    pub fn stopped_channels(&self) -> Vec<ChannelId> {
        self.stopped_transcripts
            .iter()
            .map(|e| e.key().clone())
            .collect()
    }

    /// Stop and detach the room's pipeline; its transcript is retained for
    /// minutes generation. Returns the final transcript text.
    pub async fn stop(&self, channel_id: &ChannelId) -> Option<String> {
        let (_, transcriber) = self.active.remove(channel_id)?;
        transcriber.stop().await;
        let text = transcriber.transcript_text();
        self.stopped_transcripts
            .insert(channel_id.clone(), text.clone());
        info!(channel_id = %channel_id, "Transcriber stopped");
        Some(text)
    }

    /// Watch media-plane notifications and stop pipelines whose producer,
    /// transport or router went away.
    pub fn spawn_media_watch(self: Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(&self);
        let mut events = self.media.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    MediaEvent::ProducerClosed {
                        channel_id,
                        producer_id,
                    } => {
                        let matches = registry
                            .active
                            .get(&channel_id)
                            .map_or(false, |t| t.producer_id == producer_id);
                        if matches {
                            let _ = registry.stop(&channel_id).await;
                        }
                    }
                    MediaEvent::TransportClosed {
                        channel_id,
                        transport_id,
                    } => {
                        let matches = registry
                            .active
                            .get(&channel_id)
                            .map_or(false, |t| t.matches_transport(&transport_id));
                        if matches {
                            let _ = registry.stop(&channel_id).await;
                        }
                    }
                    MediaEvent::RouterClosed { channel_id } => {
                        let _ = registry.stop(&channel_id).await;
                    }
                }
            }
        })
    }
}
