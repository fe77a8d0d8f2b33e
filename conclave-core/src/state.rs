//! Process-wide state container.
//!
//! Everything that used to be ambient global state (the room registry, the
//! draining flag, the media plane, the worker list) lives in one `SfuState`
//! with explicit init and teardown. Background iteration (cleanup sweeps,
//! media event pumping) is owned by tasks spawned here and aborted on
//! shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::config::Config;
use crate::media::{MediaEvent, MediaPlane, WorkerStatus};
use crate::service::drain::DrainFlag;
use crate::service::moderation;
use crate::service::registry::RoomRegistry;

pub struct SfuState {
    pub config: Config,
    pub registry: RoomRegistry,
    pub bus: Arc<dyn MessageBus>,
    pub media: Arc<dyn MediaPlane>,
    pub drain: DrainFlag,
    instance_id: String,
    version: String,
    started_at: Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SfuState {
    pub fn new(config: Config, bus: Arc<dyn MessageBus>, media: Arc<dyn MediaPlane>) -> Arc<Self> {
        let instance_id = config.instance_id();
        let version = config.version();
        let state = Arc::new(Self {
            config,
            registry: RoomRegistry::new(),
            bus,
            media,
            drain: DrainFlag::new(),
            instance_id,
            version,
            started_at: Instant::now(),
            tasks: Mutex::new(Vec::new()),
        });

        info!(
            instance_id = %state.instance_id,
            version = %state.version,
            "SFU control plane state initialized"
        );
        state
    }

    /// Start the cleanup sweep and the media event pump.
    pub fn spawn_background_tasks(self: Arc<Self>) {
        let cleanup_state = Arc::clone(&self);
        let cleanup = tokio::spawn(async move {
            let secs = cleanup_state.config.rooms.cleanup_interval_seconds.max(1);
            let mut ticker = interval(Duration::from_secs(secs));
            loop {
                ticker.tick().await;
                cleanup_state.registry.cleanup_empty_rooms().await;
            }
        });

        let pump_state = Arc::clone(&self);
        let mut events = self.media.subscribe();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                pump_state.handle_media_event(event).await;
            }
            debug!("Media event stream ended");
        });

        let mut tasks = self.tasks.lock();
        tasks.push(cleanup);
        tasks.push(pump);
    }

    /// Media-plane close notifications. A notification racing an explicit
    /// close finds nothing left to do and is absorbed.
    async fn handle_media_event(&self, event: MediaEvent) {
        match event {
            MediaEvent::ProducerClosed {
                channel_id,
                producer_id,
            } => {
                if let Some(room) = self.registry.get(&channel_id) {
                    let outcome =
                        moderation::close_producer_by_id(&room, &producer_id, "producerclose")
                            .await;
                    if outcome.closed {
                        debug!(
                            channel_id = %channel_id,
                            producer_id = %producer_id,
                            "Producer closed by media plane"
                        );
                    }
                }
            }
            MediaEvent::TransportClosed {
                channel_id,
                transport_id,
            } => {
                debug!(
                    channel_id = %channel_id,
                    transport_id = %transport_id,
                    "Transport closed by media plane"
                );
            }
            MediaEvent::RouterClosed { channel_id } => {
                self.registry
                    .force_close(&channel_id, self.bus.as_ref(), "routerclose")
                    .await;
            }
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    #[must_use]
    pub fn workers(&self) -> Vec<WorkerStatus> {
        self.media.workers()
    }

    /// Abort background tasks. Rooms are left to the registry owner.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!(instance_id = %self.instance_id, "SFU control plane state shut down");
    }
}

impl Drop for SfuState {
    fn drop(&mut self) {
        self.shutdown();
    }
}
