//! Polygon geofence zones with enter/exit detection
//!
//! Zones are registered per mission. Each location report is tested against
//! the mission's polygons by ray casting; comparing the result with the
//! responder's previous zone set yields `enter` and `exit` events, each with
//! a ready-to-send notification.

use beacon_core::GeoCoordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use tracing::{debug, info};

/// Kind of area a zone marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    /// Operational sector with IAP briefing points
    Sector,
    /// Dangerous area
    Hazard,
    /// Rally point
    Rally,
    /// Off-limits area
    Restricted,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Sector => "sector",
            ZoneType::Hazard => "hazard",
            ZoneType::Rally => "rally",
            ZoneType::Restricted => "restricted",
        }
    }
}

/// Polygon zone scoped to a mission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceZone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mission_id: String,
    /// Polygon vertices; fewer than three never contain a point
    pub vertices: Vec<GeoCoordinate>,
    pub zone_type: ZoneType,
    #[serde(default)]
    pub iap_highlights: Vec<String>,
    #[serde(default)]
    pub hazard_info: Option<String>,
    pub notify_on_enter: bool,
    pub notify_on_exit: bool,
}

impl GeofenceZone {
    /// Ray-casting point-in-polygon test
    pub fn contains(&self, point: &GeoCoordinate) -> bool {
        let polygon = &self.vertices;
        if polygon.len() < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = polygon.len() - 1;
        for i in 0..polygon.len() {
            let (xi, yi) = (polygon[i].longitude, polygon[i].latitude);
            let (xj, yj) = (polygon[j].longitude, polygon[j].latitude);

            if (yi > point.latitude) != (yj > point.latitude)
                && point.longitude < (xj - xi) * (point.latitude - yi) / (yj - yi) + xi
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Boundary crossing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingKind {
    Enter,
    Exit,
}

/// A responder crossed a zone boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    #[serde(rename = "type")]
    pub kind: CrossingKind,
    pub zone_id: String,
    pub zone_name: String,
    pub zone_type: ZoneType,
    pub volunteer_id: String,
    pub volunteer_name: String,
    pub location: GeoCoordinate,
    pub timestamp: DateTime<Utc>,
    pub mission_id: String,
}

/// Notification text for a crossing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl NotificationPayload {
    fn new(title: String, body: String, zone_id: &str, kind: Option<&str>) -> Self {
        let mut data = BTreeMap::new();
        data.insert("zoneId".to_string(), zone_id.to_string());
        if let Some(kind) = kind {
            data.insert("type".to_string(), kind.to_string());
        }
        Self { title, body, data }
    }

    /// Build the notification for `event` crossing `zone`
    pub fn for_crossing(event: &GeofenceEvent, zone: &GeofenceZone) -> Self {
        match (event.kind, zone.zone_type) {
            (CrossingKind::Enter, ZoneType::Hazard) => Self::new(
                "進入危險區域".to_string(),
                zone.hazard_info.clone().unwrap_or_else(|| zone.name.clone()),
                &zone.id,
                Some("hazard_warning"),
            ),
            (CrossingKind::Enter, ZoneType::Sector) => {
                let highlights = if zone.iap_highlights.is_empty() {
                    "無特別注意事項".to_string()
                } else {
                    zone.iap_highlights.join("\n• ")
                };
                Self::new(
                    format!("進入 {}", zone.name),
                    format!("IAP 重點:\n• {}", highlights),
                    &zone.id,
                    Some("iap_briefing"),
                )
            }
            (CrossingKind::Enter, ZoneType::Rally) => Self::new(
                format!("抵達集結點: {}", zone.name),
                "請於此處待命等待指示".to_string(),
                &zone.id,
                Some("rally_point"),
            ),
            (CrossingKind::Enter, ZoneType::Restricted) => {
                Self::new("進入區域".to_string(), zone.name.clone(), &zone.id, None)
            }
            (CrossingKind::Exit, zone_type) => Self::new(
                format!("離開 {}", zone.name),
                if zone_type == ZoneType::Hazard {
                    "已離開危險區域".to_string()
                } else {
                    "區域已記錄".to_string()
                },
                &zone.id,
                Some("zone_exit"),
            ),
        }
    }
}

/// In-memory zone registry and per-responder zone tracking
#[derive(Default)]
pub struct GeofenceRegistry {
    zones: RwLock<HashMap<String, Vec<GeofenceZone>>>,
    // (mission, responder) -> zone ids the responder was last seen inside
    occupancy: RwLock<HashMap<(String, String), BTreeSet<String>>>,
}

impl GeofenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a zone, replacing any zone with the same id in its mission
    pub fn register_zone(&self, zone: GeofenceZone) {
        let mut zones = self.zones.write().unwrap_or_else(|e| e.into_inner());
        let mission_zones = zones.entry(zone.mission_id.clone()).or_default();

        info!(
            zone_id = %zone.id,
            zone_type = zone.zone_type.as_str(),
            mission_id = %zone.mission_id,
            "Geofence zone registered"
        );

        match mission_zones.iter_mut().find(|z| z.id == zone.id) {
            Some(existing) => *existing = zone,
            None => mission_zones.push(zone),
        }
    }

    /// Register several zones
    pub fn register_zones(&self, zones: impl IntoIterator<Item = GeofenceZone>) {
        for zone in zones {
            self.register_zone(zone);
        }
    }

    /// Remove a zone; returns `false` if it was not registered
    pub fn remove_zone(&self, mission_id: &str, zone_id: &str) -> bool {
        let mut zones = self.zones.write().unwrap_or_else(|e| e.into_inner());
        let Some(mission_zones) = zones.get_mut(mission_id) else {
            return false;
        };

        let before = mission_zones.len();
        mission_zones.retain(|z| z.id != zone_id);
        let removed = mission_zones.len() != before;
        if removed {
            // Forget occupancy so a zone re-registered under the same id starts clean
            let mut occupancy = self.occupancy.write().unwrap_or_else(|e| e.into_inner());
            for ((mission, _), inside) in occupancy.iter_mut() {
                if mission == mission_id {
                    inside.remove(zone_id);
                }
            }
            info!(zone_id, mission_id, "Geofence zone removed");
        }
        removed
    }

    /// All zones of a mission
    pub fn zones(&self, mission_id: &str) -> Vec<GeofenceZone> {
        self.zones
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(mission_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every zone and tracking entry of a mission
    pub fn clear_mission(&self, mission_id: &str) {
        self.zones
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(mission_id);
        self.occupancy
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(mission, _), _| mission != mission_id);
        info!(mission_id, "Cleared geofence zones");
    }

    /// Test a location report and return the crossings it causes
    pub fn check_location(
        &self,
        volunteer_id: &str,
        volunteer_name: &str,
        location: GeoCoordinate,
        mission_id: &str,
        at: DateTime<Utc>,
    ) -> Vec<(GeofenceEvent, NotificationPayload)> {
        let mission_zones = self.zones(mission_id);
        let key = (mission_id.to_string(), volunteer_id.to_string());

        let mut occupancy = self.occupancy.write().unwrap_or_else(|e| e.into_inner());
        let previous = occupancy.get(&key).cloned().unwrap_or_default();

        let now_inside: BTreeSet<String> = mission_zones
            .iter()
            .filter(|zone| zone.contains(&location))
            .map(|zone| zone.id.clone())
            .collect();

        let crossing = |kind: CrossingKind, zone: &GeofenceZone| {
            let event = GeofenceEvent {
                kind,
                zone_id: zone.id.clone(),
                zone_name: zone.name.clone(),
                zone_type: zone.zone_type,
                volunteer_id: volunteer_id.to_string(),
                volunteer_name: volunteer_name.to_string(),
                location,
                timestamp: at,
                mission_id: mission_id.to_string(),
            };
            debug!(
                volunteer_id,
                zone_id = %zone.id,
                kind = ?kind,
                "Geofence crossing"
            );
            let notification = NotificationPayload::for_crossing(&event, zone);
            (event, notification)
        };

        let mut crossings = Vec::new();
        for zone in &mission_zones {
            let inside_now = now_inside.contains(&zone.id);
            let inside_before = previous.contains(&zone.id);

            if inside_now && !inside_before && zone.notify_on_enter {
                crossings.push(crossing(CrossingKind::Enter, zone));
            } else if !inside_now && inside_before && zone.notify_on_exit {
                crossings.push(crossing(CrossingKind::Exit, zone));
            }
        }

        occupancy.insert(key, now_inside);
        crossings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> GeoCoordinate {
        GeoCoordinate {
            latitude: lat,
            longitude: lng,
        }
    }

    fn square(id: &str, zone_type: ZoneType) -> GeofenceZone {
        GeofenceZone {
            id: id.to_string(),
            name: format!("Zone {}", id),
            mission_id: "m-1".to_string(),
            vertices: vec![
                point(25.00, 121.50),
                point(25.00, 121.60),
                point(25.10, 121.60),
                point(25.10, 121.50),
            ],
            zone_type,
            iap_highlights: Vec::new(),
            hazard_info: None,
            notify_on_enter: true,
            notify_on_exit: true,
        }
    }

    #[test]
    fn test_contains() {
        let zone = square("z1", ZoneType::Sector);
        assert!(zone.contains(&point(25.05, 121.55)));
        assert!(!zone.contains(&point(25.20, 121.55)));
        assert!(!zone.contains(&point(25.05, 121.70)));
    }

    #[test]
    fn test_degenerate_polygon_contains_nothing() {
        let mut zone = square("z1", ZoneType::Sector);
        zone.vertices.truncate(2);
        assert!(!zone.contains(&point(25.05, 121.55)));
    }

    #[test]
    fn test_register_upserts() {
        let registry = GeofenceRegistry::new();
        registry.register_zone(square("z1", ZoneType::Sector));
        let mut renamed = square("z1", ZoneType::Sector);
        renamed.name = "North sector".to_string();
        registry.register_zone(renamed);

        let zones = registry.zones("m-1");
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].name, "North sector");
    }

    #[test]
    fn test_enter_then_exit() {
        let registry = GeofenceRegistry::new();
        registry.register_zone(square("haz", ZoneType::Hazard));
        let now = Utc::now();

        let entered = registry.check_location("v-1", "Lin", point(25.05, 121.55), "m-1", now);
        assert_eq!(entered.len(), 1);
        assert_eq!(entered[0].0.kind, CrossingKind::Enter);
        assert_eq!(entered[0].1.data["type"], "hazard_warning");

        // Still inside: no new crossing
        let stayed = registry.check_location("v-1", "Lin", point(25.06, 121.56), "m-1", now);
        assert!(stayed.is_empty());

        let exited = registry.check_location("v-1", "Lin", point(25.50, 121.55), "m-1", now);
        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].0.kind, CrossingKind::Exit);
        assert_eq!(exited[0].1.body, "已離開危險區域");
    }

    #[test]
    fn test_removed_zone_forgets_occupancy() {
        let registry = GeofenceRegistry::new();
        registry.register_zone(square("haz", ZoneType::Hazard));
        let now = Utc::now();

        let entered = registry.check_location("v-1", "Lin", point(25.05, 121.55), "m-1", now);
        assert_eq!(entered.len(), 1);

        assert!(registry.remove_zone("m-1", "haz"));
        assert!(!registry.remove_zone("m-1", "haz"));
        registry.register_zone(square("haz", ZoneType::Hazard));

        let again = registry.check_location("v-1", "Lin", point(25.05, 121.55), "m-1", now);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].0.kind, CrossingKind::Enter);
    }

    #[test]
    fn test_opt_out_of_enter_still_tracks() {
        let registry = GeofenceRegistry::new();
        let mut zone = square("s1", ZoneType::Sector);
        zone.notify_on_enter = false;
        registry.register_zone(zone);
        let now = Utc::now();

        assert!(registry
            .check_location("v-1", "Lin", point(25.05, 121.55), "m-1", now)
            .is_empty());
        let exited = registry.check_location("v-1", "Lin", point(26.0, 121.55), "m-1", now);
        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].1.body, "區域已記錄");
    }

    #[test]
    fn test_sector_briefing_text() {
        let mut zone = square("s1", ZoneType::Sector);
        let event = GeofenceEvent {
            kind: CrossingKind::Enter,
            zone_id: zone.id.clone(),
            zone_name: zone.name.clone(),
            zone_type: zone.zone_type,
            volunteer_id: "v-1".to_string(),
            volunteer_name: "Lin".to_string(),
            location: point(25.05, 121.55),
            timestamp: Utc::now(),
            mission_id: "m-1".to_string(),
        };

        let empty = NotificationPayload::for_crossing(&event, &zone);
        assert_eq!(empty.body, "IAP 重點:\n• 無特別注意事項");

        zone.iap_highlights = vec!["Bridge closed".to_string(), "Use channel 3".to_string()];
        let filled = NotificationPayload::for_crossing(&event, &zone);
        assert_eq!(filled.body, "IAP 重點:\n• Bridge closed\n• Use channel 3");
        assert_eq!(filled.data["type"], "iap_briefing");
    }

    #[test]
    fn test_clear_mission() {
        let registry = GeofenceRegistry::new();
        registry.register_zone(square("z1", ZoneType::Rally));
        registry.check_location("v-1", "Lin", point(25.05, 121.55), "m-1", Utc::now());

        registry.clear_mission("m-1");
        assert!(registry.zones("m-1").is_empty());
        assert!(!registry.remove_zone("m-1", "z1"));
    }
}
