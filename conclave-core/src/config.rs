use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub rooms: RoomsConfig,
    pub logging: LoggingConfig,
    pub asr: AsrConfig,
    pub summarizer: SummarizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the operator HTTP surface.
    pub bind: String,
    /// Shared secret expected in the `x-sfu-secret` header.
    pub secret: String,
    /// Instance id reported by `/health`; generated when empty.
    pub instance_id: String,
    /// Version string reported by `/health`; crate version when empty.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8443".to_string(),
            secret: String::new(),
            instance_id: String::new(),
            version: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Interval of the empty-room cleanup sweep, in seconds.
    pub cleanup_interval_seconds: u64,
    /// Maximum chat message length in code points.
    pub max_chat_length: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 60,
            max_chat_length: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Streaming ASR server address (`host:port`). Empty disables
    /// transcription entirely.
    pub url: String,
    /// PCM sample rate sent in the config preamble.
    pub sample_rate: u32,
    /// RTP-to-PCM decoder binary.
    pub decoder_path: String,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            sample_rate: 16_000,
            decoder_path: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Remote summarization endpoint. Used only when a token is present.
    pub url: String,
    /// Bearer token; empty forces the local summarizer.
    pub token: String,
    /// Deadline for one remote summarization call, in seconds.
    pub timeout_seconds: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            timeout_seconds: 120,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (CONCLAVE_SERVER_SECRET, etc.)
        builder = builder.add_source(
            Environment::with_prefix("CONCLAVE")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Transcription is enabled only when an ASR endpoint is configured.
    #[must_use]
    pub fn transcription_enabled(&self) -> bool {
        !self.asr.url.is_empty()
    }

    /// Remote summarization requires both an endpoint and a token.
    #[must_use]
    pub fn remote_summarizer_enabled(&self) -> bool {
        !self.summarizer.url.is_empty() && !self.summarizer.token.is_empty()
    }

    /// Instance id, generating a stable-for-process fallback when unset.
    #[must_use]
    pub fn instance_id(&self) -> String {
        if self.server.instance_id.is_empty() {
            format!("conclave-{}", nanoid::nanoid!(6))
        } else {
            self.server.instance_id.clone()
        }
    }

    /// Reported version string.
    #[must_use]
    pub fn version(&self) -> String {
        if self.server.version.is_empty() {
            env!("CARGO_PKG_VERSION").to_string()
        } else {
            self.server.version.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:8443");
        assert_eq!(config.asr.sample_rate, 16_000);
        assert!(!config.transcription_enabled());
        assert!(!config.remote_summarizer_enabled());
    }

    #[test]
    fn test_summarizer_needs_token() {
        let mut config = Config::default();
        config.summarizer.url = "https://summarize.example".to_string();
        assert!(!config.remote_summarizer_enabled());

        config.summarizer.token = "secret".to_string();
        assert!(config.remote_summarizer_enabled());
    }

    #[test]
    fn test_transcription_toggle() {
        let mut config = Config::default();
        assert!(!config.transcription_enabled());
        config.asr.url = "127.0.0.1:2700".to_string();
        assert!(config.transcription_enabled());
    }
}
