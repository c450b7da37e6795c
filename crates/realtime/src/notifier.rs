//! Event routing to live connections
//!
//! Most events go to every connection of the event's mission. Assignment
//! notices and geofence crossings are pushed only to the responders they
//! concern.

use beacon_dispatch::DispatchEvent;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::directory::ConnectionDirectory;
use crate::messages::WsFrame;

/// Audience of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connection registered for the mission
    Mission(String),
    /// Only the listed responders
    Responders(Vec<String>),
}

impl Audience {
    /// Routing policy for a domain event
    pub fn for_event(event: &DispatchEvent) -> Self {
        match event {
            DispatchEvent::Assigned(p) => Audience::Responders(p.volunteer_ids.clone()),
            DispatchEvent::GeofenceTriggered(p) => {
                Audience::Responders(vec![p.volunteer_id.clone()])
            }
            other => Audience::Mission(other.mission_id().to_string()),
        }
    }
}

/// Pushes domain events to registered connections
pub struct RealtimeNotifier {
    directory: Arc<ConnectionDirectory>,
}

impl RealtimeNotifier {
    /// Create a notifier delivering through `directory`
    pub fn new(directory: Arc<ConnectionDirectory>) -> Self {
        Self { directory }
    }

    /// Connection directory used for delivery
    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    /// Deliver one event; returns the number of connections reached.
    ///
    /// Encoding and delivery failures are logged and never surface to the
    /// operation that produced the event.
    pub async fn route(&self, event: &DispatchEvent) -> usize {
        let frame = match WsFrame::from_event(event).and_then(|f| f.to_json()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = event.name(), error = %e, "Failed to encode event frame");
                return 0;
            }
        };

        let delivered = match Audience::for_event(event) {
            Audience::Mission(mission_id) => {
                self.directory.send_to_mission(&mission_id, &frame).await
            }
            Audience::Responders(responders) => {
                self.directory.send_to_responders(&responders, &frame).await
            }
        };

        debug!(event = event.name(), delivered, "Event routed");
        delivered
    }

    /// Pump events from the bus until it closes
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<DispatchEvent>) {
        info!("Realtime notifier started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.route(&event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Realtime notifier lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Realtime notifier stopped");
    }
}
