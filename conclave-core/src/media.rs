//! Seam to the media transport/router engine.
//!
//! The RTP engine (router, transports, codec negotiation) is an external
//! collaborator with a fixed interface: the core issues
//! create/connect/produce/consume/close calls and receives
//! producer/transport/router close notifications. Nothing in the core holds
//! engine internals, only the trait objects below.
//!
//! [`loopback`] is an in-process implementation used by tests and local
//! development; a production deployment binds the real engine here.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::id::{ChannelId, ProducerId, TransportId};
use crate::models::participant::{MediaKind, ProducerType};
use crate::Result;

/// Opaque router capabilities handed to joining clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub Value);

/// One media worker as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: String,
    pub pid: u32,
    pub router_count: usize,
    pub healthy: bool,
}

/// Notifications pushed by the media plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    ProducerClosed {
        channel_id: ChannelId,
        producer_id: ProducerId,
    },
    TransportClosed {
        channel_id: ChannelId,
        transport_id: TransportId,
    },
    RouterClosed {
        channel_id: ChannelId,
    },
}

/// A media stream a participant publishes.
pub trait MediaProducer: Send + Sync {
    fn id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn producer_type(&self) -> ProducerType;
    /// Idempotent; a second close is a no-op.
    fn close(&self);
    fn is_closed(&self) -> bool;
}

pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> &str;
    fn close(&self);
}

pub trait MediaTransport: Send + Sync {
    fn id(&self) -> &TransportId;
    fn close(&self);
}

/// A plain RTP transport bound on loopback, used by the transcription tap.
pub struct PlainRtpTransport {
    pub transport: Arc<dyn MediaTransport>,
    pub local_ip: IpAddr,
    pub local_port: u16,
    /// RTP payload type of the re-encoded audio.
    pub payload_type: u8,
    pub codec: String,
    pub clock_rate: u32,
}

#[async_trait]
pub trait MediaPlane: Send + Sync {
    fn rtp_capabilities(&self, channel_id: &ChannelId) -> RtpCapabilities;

    async fn produce(
        &self,
        channel_id: &ChannelId,
        kind: MediaKind,
        producer_type: ProducerType,
    ) -> Result<Arc<dyn MediaProducer>>;

    /// Create a plain RTP transport on loopback and return its local port.
    async fn create_plain_transport(&self, channel_id: &ChannelId) -> Result<PlainRtpTransport>;

    /// Consume `producer_id` into the given transport.
    async fn consume(
        &self,
        channel_id: &ChannelId,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        paused: bool,
    ) -> Result<Arc<dyn MediaConsumer>>;

    /// Tear down the per-room router; emits `RouterClosed`.
    fn close_router(&self, channel_id: &ChannelId);

    fn workers(&self) -> Vec<WorkerStatus>;

    /// Subscribe to close notifications. Every subscriber sees every event.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<MediaEvent>;
}

pub mod loopback {
    //! In-process media plane. Producers and transports are plain flags;
    //! close notifications flow through the same [`MediaEvent`] channel the
    //! real engine would use.

    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
    use std::sync::Arc;

    use dashmap::DashMap;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::{
        MediaConsumer, MediaEvent, MediaPlane, MediaProducer, MediaTransport, PlainRtpTransport,
        RtpCapabilities, WorkerStatus,
    };
    use crate::models::id::{generate_id, ChannelId, ProducerId, TransportId};
    use crate::models::participant::{MediaKind, ProducerType};
    use crate::Result;

    pub struct LoopbackProducer {
        id: ProducerId,
        channel_id: ChannelId,
        kind: MediaKind,
        producer_type: ProducerType,
        closed: AtomicBool,
        plane: Arc<LoopbackShared>,
    }

    impl MediaProducer for LoopbackProducer {
        fn id(&self) -> &ProducerId {
            &self.id
        }

        fn kind(&self) -> MediaKind {
            self.kind
        }

        fn producer_type(&self) -> ProducerType {
            self.producer_type
        }

        fn close(&self) {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            self.plane.emit(MediaEvent::ProducerClosed {
                channel_id: self.channel_id.clone(),
                producer_id: self.id.clone(),
            });
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct LoopbackTransport {
        id: TransportId,
        closed: AtomicBool,
    }

    impl MediaTransport for LoopbackTransport {
        fn id(&self) -> &TransportId {
            &self.id
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct LoopbackConsumer {
        id: String,
        closed: AtomicBool,
    }

    impl MediaConsumer for LoopbackConsumer {
        fn id(&self) -> &str {
            &self.id
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct LoopbackShared {
        subscribers: Mutex<Vec<mpsc::UnboundedSender<MediaEvent>>>,
    }

    impl LoopbackShared {
        fn emit(&self, event: MediaEvent) {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub struct LoopbackMediaPlane {
        shared: Arc<LoopbackShared>,
        producers: DashMap<ProducerId, Arc<LoopbackProducer>>,
        routers: DashMap<ChannelId, Vec<ProducerId>>,
        next_port: AtomicU16,
    }

    impl LoopbackMediaPlane {
        #[must_use]
        pub fn new() -> Self {
            Self {
                shared: Arc::new(LoopbackShared {
                    subscribers: Mutex::new(Vec::new()),
                }),
                producers: DashMap::new(),
                routers: DashMap::new(),
                next_port: AtomicU16::new(40_000),
            }
        }

        /// Look up a producer handle, e.g. to simulate an engine-side close.
        #[must_use]
        pub fn producer(&self, id: &ProducerId) -> Option<Arc<LoopbackProducer>> {
            self.producers.get(id).map(|p| p.clone())
        }
    }

    impl Default for LoopbackMediaPlane {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait::async_trait]
    impl MediaPlane for LoopbackMediaPlane {
        fn rtp_capabilities(&self, _channel_id: &ChannelId) -> RtpCapabilities {
            RtpCapabilities(json!({
                "codecs": [
                    {"mimeType": "audio/opus", "clockRate": 48_000, "channels": 2},
                    {"mimeType": "video/VP8", "clockRate": 90_000}
                ]
            }))
        }

        async fn produce(
            &self,
            channel_id: &ChannelId,
            kind: MediaKind,
            producer_type: ProducerType,
        ) -> Result<Arc<dyn MediaProducer>> {
            let producer = Arc::new(LoopbackProducer {
                id: ProducerId::new(),
                channel_id: channel_id.clone(),
                kind,
                producer_type,
                closed: AtomicBool::new(false),
                plane: Arc::clone(&self.shared),
            });
            self.producers
                .insert(producer.id.clone(), Arc::clone(&producer));
            self.routers
                .entry(channel_id.clone())
                .or_default()
                .push(producer.id.clone());
            Ok(producer)
        }

        async fn create_plain_transport(
            &self,
            _channel_id: &ChannelId,
        ) -> Result<PlainRtpTransport> {
            let port = self.next_port.fetch_add(2, Ordering::SeqCst);
            Ok(PlainRtpTransport {
                transport: Arc::new(LoopbackTransport {
                    id: TransportId::new(),
                    closed: AtomicBool::new(false),
                }),
                local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                local_port: port,
                payload_type: 100,
                codec: "opus".to_string(),
                clock_rate: 48_000,
            })
        }

        async fn consume(
            &self,
            _channel_id: &ChannelId,
            _transport_id: &TransportId,
            producer_id: &ProducerId,
            _paused: bool,
        ) -> Result<Arc<dyn MediaConsumer>> {
            if !self.producers.contains_key(producer_id) {
                return Err(crate::Error::NotFound(format!(
                    "Producer {producer_id} not found"
                )));
            }
            Ok(Arc::new(LoopbackConsumer {
                id: generate_id(),
                closed: AtomicBool::new(false),
            }))
        }

        fn close_router(&self, channel_id: &ChannelId) {
            if let Some((_, producer_ids)) = self.routers.remove(channel_id) {
                for id in producer_ids {
                    self.producers.remove(&id);
                }
            }
            self.shared.emit(MediaEvent::RouterClosed {
                channel_id: channel_id.clone(),
            });
        }

        fn workers(&self) -> Vec<WorkerStatus> {
            vec![WorkerStatus {
                id: "loopback-0".to_string(),
                pid: std::process::id(),
                router_count: self.routers.len(),
                healthy: true,
            }]
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<MediaEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.shared.subscribers.lock().push(tx);
            rx
        }
    }

}
