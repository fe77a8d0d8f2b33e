//! End-to-end tests of the operator HTTP surface against a live server.

use std::sync::Arc;

use serde_json::{json, Value};

use conclave_api::{create_router, ApiState};
use conclave_core::bus::InMemoryBus;
use conclave_core::media::loopback::LoopbackMediaPlane;
use conclave_core::media::MediaPlane;
use conclave_core::models::id::{ClientId, RoomId, UserKey};
use conclave_core::models::participant::{MediaKind, ParticipantMode, ProducerType};
use conclave_core::test_helpers::*;
use conclave_core::{Config, SfuState};
use conclave_transcribe::{MinutesGenerator, TranscriberRegistry};

const SECRET: &str = "operator-secret";

fn test_state() -> ApiState {
    let mut config = Config::default();
    config.server.secret = SECRET.to_string();

    let media: Arc<dyn MediaPlane> = Arc::new(LoopbackMediaPlane::new());
    let sfu = SfuState::new(config, Arc::new(InMemoryBus::new()), Arc::clone(&media));
    ApiState {
        transcribers: TranscriberRegistry::new(sfu.config.asr.clone(), media),
        minutes: MinutesGenerator::new(&sfu.config.summarizer),
        sfu,
    }
}

async fn spawn_server(state: ApiState) -> String {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn post(base: &str, path: &str, body: Value) -> reqwest::Response {
    client()
        .post(format!("{base}{path}"))
        .header("x-sfu-secret", SECRET)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn get(base: &str, path: &str) -> reqwest::Response {
    client()
        .get(format!("{base}{path}"))
        .header("x-sfu-secret", SECRET)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_is_open_but_admin_needs_secret() {
    let state = test_state();
    let base = spawn_server(state).await;

    let health = client()
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    let denied = client()
        .get(format!("{base}/admin/overview"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let wrong = client()
        .get(format!("{base}/admin/overview"))
        .header("x-sfu-secret", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let ok = get(&base, "/admin/overview").await;
    assert_eq!(ok.status(), 200);
}

#[tokio::test]
async fn test_waiting_room_admit_flow() {
    let state = test_state();
    let room = state
        .sfu
        .registry
        .create_if_absent(&ClientId::from("default"), &RoomId::from("r1"));
    let base = spawn_server(state.clone()).await;

    // Lock the room, then let a caller land in the waiting room.
    let resp = post(&base, "/admin/rooms/r1/policies", json!({ "locked": true })).await;
    assert_eq!(resp.status(), 200);

    let waiting = enroll_test_pending(&room, "alice@x.y", "s1").await;

    let resp = post(&base, "/admin/rooms/r1/pending/alice@x.y/admit", json!({})).await;
    assert_eq!(resp.status(), 200);
    assert!(waiting.saw_event("joinApproved"));

    let snapshot: Value = get(&base, "/admin/rooms/r1").await.json().await.unwrap();
    let locked_allowed: Vec<String> = snapshot["lockedAllowedUserKeys"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert!(locked_allowed.contains(&"alice@x.y".to_string()));
    assert_eq!(snapshot["pendingCount"], json!(0));

    // A second admit reports no change.
    let resp = post(&base, "/admin/rooms/r1/pending/alice@x.y/admit", json!({})).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["changed"], json!(false));
}

#[tokio::test]
async fn test_block_with_kick_flow() {
    let state = test_state();
    let room = state
        .sfu
        .registry
        .create_if_absent(&ClientId::from("default"), &RoomId::from("r1"));
    let bus = state.sfu.bus.clone();
    let socket = Arc::new(RecordingSocket::new("alice-s1"));
    install_test_participant_with(
        &room,
        "alice@x.y",
        "s1",
        ParticipantMode::Meeting,
        socket.clone(),
        bus.as_ref(),
    )
    .await;
    let base = spawn_server(state.clone()).await;

    let resp = post(
        &base,
        "/admin/rooms/r1/access/block",
        json!({ "userKeys": ["alice@x.y"], "kickPresent": true, "reason": "policy" }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kicked"], json!(["alice@x.y#s1"]));

    assert!(socket.saw_event("kicked"));
    assert_eq!(
        socket.last_payload("kicked").unwrap()["reason"],
        json!("policy")
    );
    assert!(socket.is_disconnected());

    let snapshot = room.snapshot().await;
    assert!(snapshot
        .blocked_user_keys
        .contains(&UserKey::from("alice@x.y")));
    assert_eq!(snapshot.participant_count, 0);
}

#[tokio::test]
async fn test_ambiguous_room_conflict() {
    let state = test_state();
    state
        .sfu
        .registry
        .create_if_absent(&ClientId::from("t1"), &RoomId::from("rX"));
    state
        .sfu
        .registry
        .create_if_absent(&ClientId::from("t2"), &RoomId::from("rX"));
    let base = spawn_server(state).await;

    let resp = get(&base, "/admin/rooms/rX").await;
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Room ID is ambiguous"));
    assert_eq!(body["candidates"], json!(["t1:rX", "t2:rX"]));

    // Scoped by tenant the same lookup succeeds.
    let resp = get(&base, "/admin/rooms/rX?clientId=t2").await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_remove_non_admins_keeps_admins() {
    let state = test_state();
    let room = state
        .sfu
        .registry
        .create_if_absent(&ClientId::from("default"), &RoomId::from("r1"));
    let bus = state.sfu.bus.clone();

    let admin1 = install_test_participant(&room, "host@x.y", "s1", bus.as_ref()).await;
    let admin2 = install_test_participant(&room, "cohost@x.y", "s1", bus.as_ref()).await;
    room.promote_to_admin(&admin1, bus.as_ref()).await.unwrap();
    room.promote_to_admin(&admin2, bus.as_ref()).await.unwrap();
    for (key, session) in [("u1@x.y", "s1"), ("u2@x.y", "s1"), ("u3@x.y", "s1")] {
        let user = install_test_participant(&room, key, session, bus.as_ref()).await;
        publish_test_producer(&room, &user, MediaKind::Audio, ProducerType::Webcam).await;
    }
    let base = spawn_server(state).await;

    let resp = post(
        &base,
        "/admin/rooms/r1/users/remove-non-admins",
        json!({ "includeGhosts": false, "includeAttendees": true }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kickedCount"], json!(3));

    let snapshot = room.snapshot().await;
    assert_eq!(snapshot.participant_count, 2);
    assert!(snapshot.admin_user_keys.contains(&UserKey::from("host@x.y")));
}

#[tokio::test]
async fn test_forced_drain_notifies_then_disconnects() {
    let state = test_state();
    let room = state
        .sfu
        .registry
        .create_if_absent(&ClientId::from("default"), &RoomId::from("r1"));
    let bus = state.sfu.bus.clone();
    let socket = Arc::new(RecordingSocket::new("member"));
    install_test_participant_with(
        &room,
        "a@x.y",
        "s1",
        ParticipantMode::Meeting,
        socket.clone(),
        bus.as_ref(),
    )
    .await;
    let base = spawn_server(state.clone()).await;

    let resp = post(
        &base,
        "/drain",
        json!({ "draining": true, "force": true, "noticeDelayMs": 100 }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["draining"], json!(true));
    assert_eq!(body["forced"], json!(true));

    assert!(socket.saw_event("serverRestarting"));
    assert_eq!(
        socket.last_payload("serverRestarting").unwrap()["reconnecting"],
        json!(true)
    );
    assert!(socket.is_disconnected());
    assert!(state.sfu.drain.is_draining());
}

mod minutes_single_flight {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl conclave_transcribe::summarize::Summarizer for CountingSummarizer {
        async fn summarize(&self, _transcript: &str) -> conclave_core::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok("- ship friday".to_string())
        }
    }

    #[tokio::test]
    async fn test_minutes_single_flight_and_cache() {
        let mut state = test_state();
        let summarizer = Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
        });
        state.minutes = MinutesGenerator::with_summarizer(summarizer.clone());

        // A room that already ended: only its retained transcript remains.
        let media: Arc<dyn MediaPlane> = Arc::new(LoopbackMediaPlane::new());
        let asr_config = conclave_core::config::AsrConfig {
            url: "127.0.0.1:1".to_string(),
            ..Default::default()
        };
        state.transcribers = TranscriberRegistry::new(asr_config, media);
        let room = Arc::new(conclave_core::service::room::Room::new(
            ClientId::from("default"),
            RoomId::from("r1"),
        ));
        let producer = conclave_core::models::id::ProducerId::new();
        state.transcribers.start(&room, &producer).await.unwrap();
        state
            .transcribers
            .get(&room.channel_id)
            .unwrap()
            .handle_frame(conclave_transcribe::asr::AsrFrame::Final {
                text: "we will ship friday".to_string(),
                start: Some(1.0),
                end: Some(2.0),
                speaker: None,
            });
        state.transcribers.stop(&room.channel_id).await;

        let base = spawn_server(state).await;

        let first = post(&base, "/minutes", json!({ "roomId": "r1" }));
        let second = post(&base, "/minutes", json!({ "roomId": "r1" }));
        let (first, second) = tokio::join!(first, second);
        let first = first.bytes().await.unwrap();
        let second = second.bytes().await.unwrap();

        assert!(first.starts_with(b"%PDF"));
        assert_eq!(first, second);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

        // A later call serves the cache without invoking the summarizer.
        let third = post(&base, "/minutes", json!({ "roomId": "r1" })).await;
        assert_eq!(third.status(), 200);
        assert_eq!(
            third.headers()["content-type"].to_str().unwrap(),
            "application/pdf"
        );
        assert!(third.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .contains("minutes-r1.pdf"));
        let third = third.bytes().await.unwrap();
        assert_eq!(third, first);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_policy_update_is_idempotent() {
    let state = test_state();
    state
        .sfu
        .registry
        .create_if_absent(&ClientId::from("default"), &RoomId::from("r1"));
    let base = spawn_server(state).await;

    let first: Value = post(&base, "/admin/rooms/r1/policies", json!({ "locked": true }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["changed"]["locked"], json!(true));

    let second: Value = post(&base, "/admin/rooms/r1/policies", json!({ "locked": true }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["changed"], json!({}));
}

#[tokio::test]
async fn test_unknown_room_is_not_found() {
    let state = test_state();
    let base = spawn_server(state).await;

    let resp = get(&base, "/admin/rooms/missing").await;
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not found"));
}
