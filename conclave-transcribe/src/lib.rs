//! Post-call transcription and minutes for the Conclave SFU control plane:
//! a per-room audio tap feeding a streaming ASR socket, an append-only
//! deduplicated transcript, and single-flight summarize-then-PDF minutes.

pub mod asr;
pub mod decoder;
pub mod minutes;
pub mod pdf;
pub mod pipeline;
pub mod summarize;
pub mod transcript;

pub use minutes::MinutesGenerator;
pub use pipeline::{Transcriber, TranscriberRegistry};
pub use transcript::{Transcript, TranscriptChunk, DEDUP_WINDOW_MS};
