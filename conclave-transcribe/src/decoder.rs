//! RTP-to-PCM decoder process.
//!
//! The decoder (ffmpeg by default) receives an SDP describing the plain RTP
//! transport on stdin and emits mono s16le PCM on stdout. The pipeline owns
//! the process for its whole lifetime and terminates it on stop.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use conclave_core::media::PlainRtpTransport;
use conclave_core::{Error, Result};

/// SDP announcing the audio consumer's RTP stream to the decoder.
#[must_use]
pub fn build_sdp(transport: &PlainRtpTransport) -> String {
    format!(
        "v=0\r\n\
         o=- 0 0 IN IP4 {ip}\r\n\
         s=conclave-audio-tap\r\n\
         c=IN IP4 {ip}\r\n\
         t=0 0\r\n\
         m=audio {port} RTP/AVP {pt}\r\n\
         a=rtpmap:{pt} {codec}/{clock}/2\r\n\
         a=recvonly\r\n",
        ip = transport.local_ip,
        port = transport.local_port,
        pt = transport.payload_type,
        codec = transport.codec,
        clock = transport.clock_rate,
    )
}

pub struct DecoderProcess {
    child: Child,
}

impl DecoderProcess {
    /// Spawn the decoder and hand back its PCM stream.
    pub async fn spawn(
        binary: &str,
        transport: &PlainRtpTransport,
        sample_rate: u32,
    ) -> Result<(Self, ChildStdout)> {
        let mut child = Command::new(binary)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-protocol_whitelist",
                "pipe,file,udp,rtp",
                "-f",
                "sdp",
                "-i",
                "pipe:0",
                "-f",
                "s16le",
                "-acodec",
                "pcm_s16le",
                "-ac",
                "1",
                "-ar",
                &sample_rate.to_string(),
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::UpstreamUnavailable(format!("decoder {binary}: {e}")))?;

        let sdp = build_sdp(transport);
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(sdp.as_bytes())
                .await
                .map_err(|e| Error::UpstreamUnavailable(format!("decoder stdin: {e}")))?;
            // Dropping stdin closes it; the decoder starts reading RTP.
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("decoder stdout not captured".to_string()))?;

        debug!(binary, port = transport.local_port, "Decoder spawned");
        Ok((Self { child }, stdout))
    }

    /// Terminate the decoder and reap it.
    pub async fn terminate(mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(error = %e, "Decoder already exited");
        }
        let _ = self.child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use conclave_core::media::MediaTransport;
    use conclave_core::models::id::TransportId;

    struct NoopTransport {
        id: TransportId,
        closed: AtomicBool,
    }

    impl MediaTransport for NoopTransport {
        fn id(&self) -> &TransportId {
            &self.id
        }

        fn close(&self) {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_sdp_describes_transport() {
        let transport = PlainRtpTransport {
            transport: Arc::new(NoopTransport {
                id: TransportId::new(),
                closed: AtomicBool::new(false),
            }),
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            local_port: 40_002,
            payload_type: 100,
            codec: "opus".to_string(),
            clock_rate: 48_000,
        };

        let sdp = build_sdp(&transport);
        assert!(sdp.contains("m=audio 40002 RTP/AVP 100"));
        assert!(sdp.contains("a=rtpmap:100 opus/48000/2"));
        assert!(sdp.contains("c=IN IP4 127.0.0.1"));
    }
}
