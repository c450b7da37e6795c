//! Engine events delivered to live connections
//!
//! Wires the dispatch engine's broadcast bus into the realtime notifier and
//! checks who receives which frame. Frames for one connection arrive in
//! publish order, so a later mission broadcast proves an earlier targeted
//! frame was never queued.

use beacon_dispatch::MemoryStore;
use beacon_realtime::{ConnectionDirectory, RealtimeNotifier, WsServer};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::test_utils::{roster, Harness, COMMANDER, MISSION, NEAR_SITE};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let text = timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("frame within timeout")
        .expect("channel open");
    serde_json::from_str(&text).unwrap()
}

fn start_notifier(harness: &Harness) -> Arc<ConnectionDirectory> {
    let directory = Arc::new(ConnectionDirectory::new());
    let notifier = Arc::new(RealtimeNotifier::new(directory.clone()));
    tokio::spawn(notifier.run(harness.bus.subscribe()));
    directory
}

#[tokio::test]
async fn test_assignment_is_targeted_and_response_is_broadcast() {
    let harness = Harness::new(Arc::new(MemoryStore::new()));
    let directory = start_notifier(&harness);

    let (chen_tx, mut chen_rx) = mpsc::unbounded_channel();
    let (wang_tx, mut wang_rx) = mpsc::unbounded_channel();
    let (room_tx, mut room_rx) = mpsc::unbounded_channel();
    directory.register("vol-chen", MISSION, chen_tx).await;
    directory.register("vol-wang", MISSION, wang_tx).await;
    directory.register(COMMANDER, MISSION, room_tx).await;

    let task = harness.located_task("Clear debris on Route 9");
    harness
        .engine
        .assign_task(&task.id, &["vol-chen".to_string()], COMMANDER, &roster())
        .unwrap();
    harness
        .engine
        .accept_assignment(&task.id, "vol-chen", Some("On my way".to_string()))
        .unwrap();

    let first = next_frame(&mut chen_rx).await;
    assert_eq!(first["type"], "task:assigned");
    assert_eq!(first["data"]["volunteerIds"][0], "vol-chen");
    assert_eq!(first["data"]["volunteerNames"][0], "陳志明");

    let second = next_frame(&mut chen_rx).await;
    assert_eq!(second["type"], "task:assignment-response");
    assert_eq!(second["data"]["accepted"], true);

    // Responders who were not assigned and the command room only see the response
    for rx in [&mut wang_rx, &mut room_rx] {
        let frame = next_frame(rx).await;
        assert_eq!(frame["type"], "task:assignment-response");
        assert_eq!(frame["data"]["volunteerId"], "vol-chen");
    }
}

#[tokio::test]
async fn test_mission_broadcast_does_not_leak_across_missions() {
    let harness = Harness::new(Arc::new(MemoryStore::new()));
    let directory = start_notifier(&harness);

    let (here_tx, mut here_rx) = mpsc::unbounded_channel();
    let (other_tx, mut other_rx) = mpsc::unbounded_channel();
    directory.register(COMMANDER, MISSION, here_tx).await;
    directory.register("cmdr-other", "mission-flood", other_tx).await;

    let task = harness.located_task("Shelter headcount");
    harness
        .engine
        .cancel_task(&task.id, Some("Merged with task 12".to_string()))
        .unwrap();

    let frame = next_frame(&mut here_rx).await;
    assert_eq!(frame["type"], "task:cancelled");
    assert_eq!(frame["data"]["taskId"], task.id.as_str());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_attendance_frames_reach_command_room() {
    let harness = Harness::new(Arc::new(MemoryStore::new()));
    let directory = start_notifier(&harness);

    let (room_tx, mut room_rx) = mpsc::unbounded_channel();
    directory.register(COMMANDER, MISSION, room_tx).await;

    let task = harness.located_task("Sandbag levee");
    harness.assign_and_accept(&task.id, "vol-lee");
    harness.engine.start_task(&task.id, "vol-lee").unwrap();
    harness
        .engine
        .check_in(
            &task.id,
            "vol-lee",
            beacon_dispatch::CheckInInput {
                latitude: NEAR_SITE.latitude,
                longitude: NEAR_SITE.longitude,
                note: None,
            },
        )
        .unwrap();
    harness.clock.advance(chrono::Duration::minutes(45));
    harness
        .engine
        .check_out(&task.id, "vol-lee", Default::default())
        .unwrap();

    let kinds = [
        "task:assignment-response",
        "task:started",
        "task:checked-in",
        "task:checked-out",
    ];
    for expected in kinds {
        let frame = next_frame(&mut room_rx).await;
        assert_eq!(frame["type"], expected);
        if expected == "task:checked-out" {
            assert_eq!(frame["data"]["durationMinutes"], 45);
        }
        if expected == "task:checked-in" {
            assert_eq!(frame["data"]["isWithinRange"], true);
        }
    }
}

#[tokio::test]
async fn test_websocket_client_receives_assignment() {
    let harness = Harness::new(Arc::new(MemoryStore::new()));
    let directory = start_notifier(&harness);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(WsServer::new(addr, directory.clone()));
    tokio::spawn(server.serve(listener));

    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    ws.send(Message::Text(
        serde_json::json!({
            "type": "task:register",
            "userId": "vol-wang",
            "missionSessionId": MISSION,
        })
        .to_string(),
    ))
    .await
    .unwrap();

    // Skip the greeting until the registration is acknowledged
    loop {
        let msg = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("ack within timeout")
            .expect("stream open")
            .unwrap();
        let frame: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        if frame["data"]["message"] == "Registered" {
            break;
        }
    }
    assert_eq!(directory.responder_connections("vol-wang").await, 1);

    let task = harness.located_task("Evacuate riverside homes");
    harness
        .engine
        .assign_task(&task.id, &["vol-wang".to_string()], COMMANDER, &roster())
        .unwrap();

    let msg = timeout(RECV_TIMEOUT, ws.next())
        .await
        .expect("frame within timeout")
        .expect("stream open")
        .unwrap();
    let frame: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(frame["type"], "task:assigned");
    assert_eq!(frame["data"]["taskId"], task.id.as_str());
    assert_eq!(frame["data"]["title"], "Evacuate riverside homes");

    ws.close(None).await.unwrap();
    for _ in 0..50 {
        if directory.connection_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(directory.connection_count().await, 0);
}
