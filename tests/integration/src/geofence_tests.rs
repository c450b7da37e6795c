//! Geofence crossings raised through the dispatch engine

use beacon_core::GeoCoordinate;
use beacon_dispatch::{
    CheckInInput, CrossingKind, DispatchEvent, GeofenceRegistry, GeofenceZone, MemoryStore,
    ZoneType,
};
use beacon_realtime::{ConnectionDirectory, RealtimeNotifier};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::test_utils::{Harness, COMMANDER, MISSION, NEAR_SITE};

/// Square of roughly 1 km around the task site
fn levee_hazard() -> GeofenceZone {
    GeofenceZone {
        id: "zone-levee".to_string(),
        name: "North levee".to_string(),
        mission_id: MISSION.to_string(),
        vertices: vec![
            GeoCoordinate { latitude: 25.035, longitude: 121.545 },
            GeoCoordinate { latitude: 25.035, longitude: 121.555 },
            GeoCoordinate { latitude: 25.045, longitude: 121.555 },
            GeoCoordinate { latitude: 25.045, longitude: 121.545 },
        ],
        zone_type: ZoneType::Hazard,
        iap_highlights: Vec::new(),
        hazard_info: Some("Levee seepage, stay off the crest".to_string()),
        notify_on_enter: true,
        notify_on_exit: true,
    }
}

fn harness_with_hazard() -> Harness {
    let registry = Arc::new(GeofenceRegistry::new());
    registry.register_zone(levee_hazard());
    Harness::new(Arc::new(MemoryStore::new())).with_geofences(registry)
}

#[tokio::test]
async fn test_check_in_inside_hazard_raises_enter() {
    let harness = harness_with_hazard();
    let mut events = harness.bus.subscribe();

    let task = harness.located_task("Reinforce levee");
    harness.assign_and_accept(&task.id, "vol-chen");
    harness
        .engine
        .check_in(
            &task.id,
            "vol-chen",
            CheckInInput {
                latitude: NEAR_SITE.latitude,
                longitude: NEAR_SITE.longitude,
                note: None,
            },
        )
        .unwrap();

    let mut names = Vec::new();
    let mut crossing = None;
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
        if let DispatchEvent::GeofenceTriggered(payload) = event {
            crossing = Some(payload);
        }
    }
    assert_eq!(
        names,
        vec![
            "task.assigned",
            "task.assignment-response",
            "task.checkedIn",
            "geofence.triggered"
        ]
    );

    let crossing = crossing.unwrap();
    assert_eq!(crossing.event.kind, CrossingKind::Enter);
    assert_eq!(crossing.event.volunteer_name, "陳志明");
    assert_eq!(crossing.notification.title, "進入危險區域");
    assert_eq!(crossing.notification.body, "Levee seepage, stay off the crest");
}

#[tokio::test]
async fn test_repeated_reports_inside_zone_are_quiet() {
    let harness = harness_with_hazard();
    let inside = GeoCoordinate { latitude: 25.04, longitude: 121.55 };

    let first = harness
        .engine
        .report_location(MISSION, "vol-wang", "王美玲", inside);
    let second = harness
        .engine
        .report_location(MISSION, "vol-wang", "王美玲", inside);

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());

    let outside = GeoCoordinate { latitude: 25.06, longitude: 121.55 };
    let exit = harness
        .engine
        .report_location(MISSION, "vol-wang", "王美玲", outside);
    assert_eq!(exit.len(), 1);
    assert_eq!(exit[0].kind, CrossingKind::Exit);
}

#[tokio::test]
async fn test_crossing_pushed_only_to_responder() {
    let harness = harness_with_hazard();
    let directory = Arc::new(ConnectionDirectory::new());
    let notifier = Arc::new(RealtimeNotifier::new(directory.clone()));
    tokio::spawn(notifier.run(harness.bus.subscribe()));

    let (lee_tx, mut lee_rx) = mpsc::unbounded_channel();
    let (room_tx, mut room_rx) = mpsc::unbounded_channel();
    directory.register("vol-lee", MISSION, lee_tx).await;
    directory.register(COMMANDER, MISSION, room_tx).await;

    let inside = GeoCoordinate { latitude: 25.04, longitude: 121.55 };
    let outside = GeoCoordinate { latitude: 25.06, longitude: 121.55 };
    harness
        .engine
        .report_location(MISSION, "vol-lee", "李大華", inside);
    harness
        .engine
        .report_location(MISSION, "vol-lee", "李大華", outside);

    for expected in ["enter", "exit"] {
        let text = timeout(Duration::from_secs(2), lee_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frame: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["type"], "geofence:triggered");
        assert_eq!(frame["data"]["event"]["type"], expected);
        assert_eq!(frame["data"]["event"]["zoneId"], "zone-levee");
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(room_rx.try_recv().is_err());
}
