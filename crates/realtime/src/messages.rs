//! WebSocket wire format
//!
//! Server frames are JSON text `{"type": "<channel>", "data": {...}}`.
//! Clients identify themselves with a `task:register` frame.

use beacon_dispatch::DispatchEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Channel names understood by the command-room dashboard
pub mod channel {
    #![allow(missing_docs)]
    pub const CREATED: &str = "task:created";
    pub const UPDATED: &str = "task:updated";
    pub const ASSIGNED: &str = "task:assigned";
    pub const STARTED: &str = "task:started";
    pub const COMPLETED: &str = "task:completed";
    pub const CANCELLED: &str = "task:cancelled";
    pub const ASSIGNMENT_RESPONSE: &str = "task:assignment-response";
    pub const CHECKED_IN: &str = "task:checked-in";
    pub const CHECKED_OUT: &str = "task:checked-out";
    pub const GEOFENCE_TRIGGERED: &str = "geofence:triggered";
    pub const ACK: &str = "ack";
    pub const ERROR: &str = "error";
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsFrame {
    /// Channel name
    #[serde(rename = "type")]
    pub kind: String,
    /// Channel payload
    pub data: Value,
}

impl WsFrame {
    /// Frame for a domain event
    pub fn from_event(event: &DispatchEvent) -> Result<Self> {
        let (kind, data) = match event {
            DispatchEvent::Created(p) => (channel::CREATED, serde_json::to_value(p)?),
            DispatchEvent::Updated(p) => (channel::UPDATED, serde_json::to_value(p)?),
            DispatchEvent::Assigned(p) => (channel::ASSIGNED, serde_json::to_value(p)?),
            DispatchEvent::Started(p) => (channel::STARTED, serde_json::to_value(p)?),
            DispatchEvent::Completed(p) => (channel::COMPLETED, serde_json::to_value(p)?),
            DispatchEvent::Cancelled(p) => (channel::CANCELLED, serde_json::to_value(p)?),
            DispatchEvent::AssignmentResponse(p) => {
                (channel::ASSIGNMENT_RESPONSE, serde_json::to_value(p)?)
            }
            DispatchEvent::CheckedIn(p) => (channel::CHECKED_IN, serde_json::to_value(p)?),
            DispatchEvent::CheckedOut(p) => (channel::CHECKED_OUT, serde_json::to_value(p)?),
            DispatchEvent::GeofenceTriggered(p) => {
                (channel::GEOFENCE_TRIGGERED, serde_json::to_value(p)?)
            }
        };
        Ok(Self {
            kind: kind.to_string(),
            data,
        })
    }

    /// Registration acknowledgment
    pub fn ack(message: &str, user_id: Option<&str>, mission_id: Option<&str>) -> Self {
        Self {
            kind: channel::ACK.to_string(),
            data: serde_json::json!({
                "message": message,
                "userId": user_id,
                "missionSessionId": mission_id,
            }),
        }
    }

    /// Error notice sent back to a misbehaving client
    pub fn error(message: &str) -> Self {
        Self {
            kind: channel::ERROR.to_string(),
            data: serde_json::json!({ "message": message }),
        }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join a mission feed as a responder
    #[serde(rename = "task:register")]
    Register {
        /// Responder identifier
        #[serde(rename = "userId")]
        user_id: String,
        /// Mission to join
        #[serde(rename = "missionSessionId")]
        mission_id: String,
    },

    /// Keep-alive
    #[serde(rename = "ping")]
    Ping,
}
