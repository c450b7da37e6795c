//! Beacon realtime delivery
//!
//! Subscribes to the dispatch event bus and pushes each event to the
//! WebSocket connections it concerns: a whole mission's command room, or
//! only the responders an assignment or geofence crossing names.
//!
//! Delivery is best-effort. There is no durable queue; clients that were
//! offline re-fetch state through the query API.

#![warn(missing_docs)]

pub mod directory;
pub mod error;
pub mod messages;
pub mod notifier;
pub mod websocket;

pub use directory::{ConnectionDirectory, ConnectionId, Outbound};
pub use error::{RealtimeError, Result};
pub use messages::{ClientMessage, WsFrame};
pub use notifier::{Audience, RealtimeNotifier};
pub use websocket::WsServer;
