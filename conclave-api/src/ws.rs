//! WebSocket adapter.
//!
//! Framing is deliberately thin: client frames are
//! `{"id": n, "event": "...", "payload": {...}}`, replies are
//! `{"id": n, "result": {...}}` or `{"id": n, "error": "..."}`, and pushed
//! events are `{"event": "...", "payload": {...}}`. Everything of substance
//! happens in the engines; the adapter only owns the socket capability and
//! the join/leave lifecycle.
//!
//! Token validation happens upstream; the `token` query parameter carries
//! the already-verified claims as JSON.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conclave_core::bus::SocketHandle;
use conclave_core::models::id::{ClientId, ProducerId, RoomId, SessionId, UserId};
use conclave_core::models::identity::{derive_key, normalize_display_name, AuthToken};
use conclave_core::models::participant::{MediaKind, ParticipantMode, ProducerType};
use conclave_core::service::admission::{self, JoinOutcome, JoinRequest};
use conclave_core::service::room::Room;
use conclave_core::service::{chat, moderation};
use conclave_core::Error;

use crate::admin_events;
use crate::http::{ApiState, AppError};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Verified claims as a JSON object.
    pub token: String,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub mode: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// The narrow socket capability handed to the core: an outbound frame queue
/// plus a teardown token.
struct WsSocket {
    id: String,
    tx: mpsc::UnboundedSender<Value>,
    cancel: CancellationToken,
}

impl SocketHandle for WsSocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, event: &str, payload: Value) {
        let _ = self.tx.send(json!({ "event": event, "payload": payload }));
    }

    fn disconnect(&self, _close_immediate: bool) {
        self.cancel.cancel();
    }
}

pub async fn ws_handler(
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let token: AuthToken = serde_json::from_str(&query.token)
        .map_err(|e| AppError::unauthorized(format!("Invalid token payload: {e}")))?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, query, token)))
}

struct Connection {
    state: ApiState,
    room: Arc<Room>,
    handle: Arc<WsSocket>,
    user_id: UserId,
    admin_by_token: bool,
    joined: bool,
    waiting: bool,
}

async fn handle_socket(
    socket: WebSocket,
    state: ApiState,
    room_id: String,
    query: WsQuery,
    token: AuthToken,
) {
    let user_key = match derive_key(&token) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "Connection with unusable token");
            return;
        }
    };
    let session_id = query
        .session_id
        .map(SessionId::from_string)
        .unwrap_or_default();
    let user_id = UserId::compose(&user_key, &session_id);

    let display_name = query
        .display_name
        .as_deref()
        .or(token.display_name.as_deref())
        .and_then(|raw| normalize_display_name(raw).ok())
        .unwrap_or_else(|| user_key.local_handle().to_string());
    let mode = query
        .mode
        .as_deref()
        .and_then(ParticipantMode::parse)
        .unwrap_or_default();

    let client_id = ClientId::from_string(
        query.client_id.unwrap_or_else(|| "default".to_string()),
    );
    let room = state
        .sfu
        .registry
        .create_if_absent(&client_id, &RoomId::from_string(room_id));

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let handle = Arc::new(WsSocket {
        id: format!("ws-{}", nanoid::nanoid!(10)),
        tx,
        cancel: CancellationToken::new(),
    });

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut conn = Connection {
        state,
        room,
        handle: Arc::clone(&handle),
        user_id,
        admin_by_token: token.is_admin,
        joined: false,
        waiting: false,
    };

    info!(
        channel_id = %conn.room.channel_id,
        user_id = %conn.user_id,
        "WebSocket connection established"
    );

    loop {
        tokio::select! {
            () = handle.cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            outgoing = rx.recv() => match outgoing {
                Some(frame) => {
                    if ws_tx.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = conn
                        .handle_frame(&text, &user_key, &session_id, &display_name, mode)
                        .await
                    {
                        if ws_tx.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary, ping, pong
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    conn.teardown().await;
}

impl Connection {
    async fn handle_frame(
        &mut self,
        text: &str,
        user_key: &conclave_core::models::id::UserKey,
        session_id: &SessionId,
        display_name: &str,
        mode: ParticipantMode,
    ) -> Option<Value> {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => return Some(json!({ "error": "Malformed frame" })),
        };
        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        let event = frame.get("event").and_then(Value::as_str)?.to_string();
        let payload = frame.get("payload").cloned().unwrap_or_else(|| json!({}));

        let result = self
            .handle_event(&event, &payload, user_key, session_id, display_name, mode)
            .await;
        Some(match result {
            Ok(result) => json!({ "id": id, "result": result }),
            Err(e) => json!({ "id": id, "error": e.to_string() }),
        })
    }

    async fn handle_event(
        &mut self,
        event: &str,
        payload: &Value,
        user_key: &conclave_core::models::id::UserKey,
        session_id: &SessionId,
        display_name: &str,
        mode: ParticipantMode,
    ) -> conclave_core::Result<Value> {
        let bus = self.state.sfu.bus.as_ref();
        match event {
            "joinRoom" => {
                if self.joined {
                    return Err(Error::Conflict("Already joined".to_string()));
                }
                let outcome = admission::join(
                    &self.room,
                    JoinRequest {
                        user_key: user_key.clone(),
                        session_id: session_id.clone(),
                        mode,
                        is_admin_by_token: self.admin_by_token,
                        display_name: display_name.to_string(),
                        socket: Arc::clone(&self.handle) as Arc<dyn SocketHandle>,
                    },
                    self.state.sfu.drain.is_draining(),
                    bus,
                )
                .await?;

                match outcome {
                    JoinOutcome::Joined { user_id, as_admin } => {
                        self.joined = true;
                        self.waiting = false;
                        self.user_id = user_id;
                        let caps = self
                            .state
                            .sfu
                            .media
                            .rtp_capabilities(&self.room.channel_id);
                        Ok(json!({
                            "status": "joined",
                            "rtpCapabilities": caps,
                            "userId": self.user_id.as_str(),
                            "asAdmin": as_admin,
                        }))
                    }
                    JoinOutcome::Waiting => {
                        self.waiting = true;
                        Ok(json!({ "status": "waiting" }))
                    }
                    JoinOutcome::Rejected { reason } => {
                        Err(Error::Forbidden(format!("Join rejected: {}", reason.as_str())))
                    }
                }
            }
            "chat" => {
                self.require_joined()?;
                let content = payload
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidInput("Missing field 'content'".to_string()))?;
                let max = self.state.sfu.config.rooms.max_chat_length;
                chat::deliver(&self.room, &self.user_id, content, max, bus).await?;
                Ok(json!({ "success": true }))
            }
            "raiseHand" => {
                self.require_joined()?;
                let changed = self.room.raise_hand(&self.user_id, bus).await?;
                Ok(json!({ "success": true, "changed": changed }))
            }
            "lowerHand" => {
                self.require_joined()?;
                let changed = self.room.lower_hand(&self.user_id, bus).await;
                Ok(json!({ "success": true, "changed": changed }))
            }
            "setDisplayName" => {
                self.require_joined()?;
                let raw = payload
                    .get("displayName")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidInput("Missing field 'displayName'".to_string()))?;
                let name = normalize_display_name(raw)?;
                let changed = self.room.set_display_name(&self.user_id, name, bus).await?;
                Ok(json!({ "success": true, "changed": changed }))
            }
            "produce" => {
                self.require_joined()?;
                let kind = payload
                    .get("kind")
                    .and_then(Value::as_str)
                    .and_then(MediaKind::parse)
                    .ok_or_else(|| Error::InvalidInput("Bad media kind".to_string()))?;
                let producer_type = payload
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(ProducerType::parse)
                    .ok_or_else(|| Error::InvalidInput("Bad producer type".to_string()))?;

                let producer = self
                    .state
                    .sfu
                    .media
                    .produce(&self.room.channel_id, kind, producer_type)
                    .await?;
                let producer_id = producer.id().clone();
                {
                    let mut inner = self.room.write().await;
                    inner.add_producer(
                        &self.user_id,
                        conclave_core::models::participant::ProducerRef {
                            id: producer_id.clone(),
                            kind,
                            producer_type,
                            handle: producer,
                        },
                    )?;
                }

                // The first audio producer starts the room's audio tap.
                if kind == MediaKind::Audio {
                    self.state
                        .transcribers
                        .start(&self.room, &producer_id)
                        .await?;
                }
                Ok(json!({ "success": true, "producerId": producer_id.as_str() }))
            }
            "closeProducer" => {
                self.require_joined()?;
                let producer_id = payload
                    .get("producerId")
                    .and_then(Value::as_str)
                    .map(|s| ProducerId::from_string(s.to_string()))
                    .ok_or_else(|| Error::InvalidInput("Missing field 'producerId'".to_string()))?;
                let outcome =
                    moderation::close_producer_by_id(&self.room, &producer_id, "closed by owner")
                        .await;
                Ok(json!({ "success": true, "closed": outcome.closed }))
            }
            "leave" => {
                self.handle.cancel.cancel();
                Ok(json!({ "success": true }))
            }
            other => {
                if other.starts_with("admin:") || is_legacy_admin_event(other) {
                    self.require_joined()?;
                    return admin_events::dispatch(
                        &self.state,
                        &self.room.channel_id,
                        &self.user_id,
                        other,
                        payload,
                    )
                    .await;
                }
                Err(Error::InvalidInput(format!("Unknown event '{other}'")))
            }
        }
    }

    fn require_joined(&self) -> conclave_core::Result<()> {
        if self.joined {
            Ok(())
        } else {
            Err(Error::Forbidden("Join the room first".to_string()))
        }
    }

    async fn teardown(&mut self) {
        let bus = self.state.sfu.bus.as_ref();
        if self.joined {
            let mut inner = self.room.write().await;
            let _ = inner.remove_participant(&self.user_id, bus);
        } else if self.waiting {
            let mut inner = self.room.write().await;
            let ours = inner
                .pending
                .get(&self.user_id.user_key())
                .map_or(false, |entry| entry.socket.id() == self.handle.id());
            if ours {
                let _ = inner.remove_pending(&self.user_id.user_key());
            }
        }
        info!(
            channel_id = %self.room.channel_id,
            user_id = %self.user_id,
            "WebSocket connection closed"
        );
    }
}

fn is_legacy_admin_event(event: &str) -> bool {
    matches!(
        event,
        "roomLock" | "kickUser" | "muteUser" | "blockUser" | "transferHost"
    )
}
