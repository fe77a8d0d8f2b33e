//! Streaming ASR client.
//!
//! The server is a line-oriented JSON sink: we open a TCP stream, send one
//! config line, push raw PCM frames, and read newline-delimited JSON frames
//! back. `partial` frames are volatile; `text` frames are final and may
//! carry word-level timings in seconds.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use conclave_core::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum AsrFrame {
    Partial {
        text: String,
    },
    Final {
        text: String,
        /// Seconds from stream start, from word timings when present.
        start: Option<f64>,
        end: Option<f64>,
        speaker: Option<String>,
    },
}

/// Parse one JSON line from the ASR server. Unknown shapes yield `None` and
/// are skipped by the caller.
#[must_use]
pub fn parse_frame(line: &str) -> Option<AsrFrame> {
    let value: Value = serde_json::from_str(line).ok()?;

    if let Some(partial) = value.get("partial").and_then(Value::as_str) {
        return Some(AsrFrame::Partial {
            text: partial.to_string(),
        });
    }

    let text = value.get("text").and_then(Value::as_str)?.to_string();
    let speaker = value
        .get("speaker")
        .and_then(Value::as_str)
        .map(String::from);

    // Word-level timings win; message-level start/end are the fallback.
    let words = value.get("result").and_then(Value::as_array);
    let (start, end) = match words {
        Some(words) if !words.is_empty() => {
            let start = words
                .first()
                .and_then(|w| w.get("start"))
                .and_then(Value::as_f64);
            let end = words
                .last()
                .and_then(|w| w.get("end"))
                .and_then(Value::as_f64);
            (start, end)
        }
        _ => (
            value.get("start").and_then(Value::as_f64),
            value.get("end").and_then(Value::as_f64),
        ),
    };

    Some(AsrFrame::Final {
        text,
        start,
        end,
        speaker,
    })
}

/// Write half: PCM frames in, end-of-stream marker out.
pub struct AsrSender {
    writer: OwnedWriteHalf,
}

impl AsrSender {
    pub async fn send_pcm(&mut self, frame: &[u8]) -> Result<()> {
        self.writer
            .write_all(frame)
            .await
            .map_err(|e| Error::Transient(format!("ASR PCM write: {e}")))
    }

    /// Best-effort end-of-stream marker followed by a shutdown.
    pub async fn finish(&mut self) {
        let _ = self.writer.write_all(b"{\"eof\":1}\n").await;
        let _ = self.writer.shutdown().await;
    }
}

/// Read half: newline-delimited JSON frames.
pub struct AsrReceiver {
    reader: Lines<BufReader<OwnedReadHalf>>,
}

impl AsrReceiver {
    /// Next JSON line from the server; `None` when the server closed.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.reader
            .next_line()
            .await
            .map_err(|e| Error::Transient(format!("ASR read: {e}")))
    }
}

/// Connect and send the one-line config preamble. The halves are split so
/// the pipeline can pump PCM and read frames concurrently.
pub async fn connect(addr: &str, sample_rate: u32) -> Result<(AsrSender, AsrReceiver)> {
    let addr = addr.trim_start_matches("tcp://");
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::UpstreamUnavailable(format!("ASR server {addr}: {e}")))?;
    let (read_half, mut write_half) = stream.into_split();

    let config = json!({ "config": { "sample_rate": sample_rate } });
    let mut line = config.to_string();
    line.push('\n');
    write_half
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::UpstreamUnavailable(format!("ASR config write: {e}")))?;

    debug!(addr, sample_rate, "ASR socket connected");
    Ok((
        AsrSender { writer: write_half },
        AsrReceiver {
            reader: BufReader::new(read_half).lines(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial() {
        let frame = parse_frame(r#"{"partial": "hello wor"}"#).unwrap();
        assert_eq!(
            frame,
            AsrFrame::Partial {
                text: "hello wor".to_string()
            }
        );
    }

    #[test]
    fn test_parse_final_with_word_timings() {
        let line = r#"{"text": "hello world", "result": [
            {"word": "hello", "start": 1.2, "end": 1.6},
            {"word": "world", "start": 1.7, "end": 2.1}
        ]}"#;
        let frame = parse_frame(line).unwrap();
        assert_eq!(
            frame,
            AsrFrame::Final {
                text: "hello world".to_string(),
                start: Some(1.2),
                end: Some(2.1),
                speaker: None,
            }
        );
    }

    #[test]
    fn test_parse_final_message_level_fallback() {
        let line = r#"{"text": "ok", "start": 3.0, "end": 3.5, "speaker": "spk1"}"#;
        let frame = parse_frame(line).unwrap();
        assert_eq!(
            frame,
            AsrFrame::Final {
                text: "ok".to_string(),
                start: Some(3.0),
                end: Some(3.5),
                speaker: Some("spk1".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_final_without_timings() {
        let frame = parse_frame(r#"{"text": "ok"}"#).unwrap();
        assert_eq!(
            frame,
            AsrFrame::Final {
                text: "ok".to_string(),
                start: None,
                end: None,
                speaker: None,
            }
        );
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"status": "listening"}"#).is_none());
    }

    #[tokio::test]
    async fn test_connect_sends_config_preamble() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let (mut sender, _receiver) = connect(&addr, 16_000).await.unwrap();
        sender.send_pcm(&[0u8; 4]).await.unwrap();
        sender.finish().await;

        let received = server.await.unwrap();
        assert!(received.starts_with(r#"{"config":{"sample_rate":16000}}"#));
    }
}
