//! Best-effort event push from a delivery endpoint to the coordinator
//!
//! Each publish runs on its own task. A failed push is logged and counted,
//! never retried, and never surfaces on the participant's request.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::coordinator::client::CoordinatorClient;
use crate::metrics;
use crate::models::{ClientEvent, EventType};

/// Publishes events for one delivery
#[derive(Clone)]
pub struct EventPublisher {
    client: Option<Arc<CoordinatorClient>>,
    delivery_id: i64,
    client_id: String,
}

impl EventPublisher {
    pub fn new(client: Arc<CoordinatorClient>, delivery_id: i64) -> Self {
        let client_id = client.client_id().to_string();
        Self {
            client: Some(client),
            delivery_id,
            client_id,
        }
    }

    /// Publisher that drops every event (tests and detached endpoints)
    pub fn disabled(delivery_id: i64) -> Self {
        Self {
            client: None,
            delivery_id,
            client_id: String::new(),
        }
    }

    /// Fire and forget; the returned handle is only useful to tests
    pub fn publish(&self, event_type: EventType, data: Value) -> Option<JoinHandle<()>> {
        let client = self.client.clone()?;
        let event = ClientEvent::new(event_type, self.delivery_id, self.client_id.clone(), data);

        Some(tokio::spawn(async move {
            if let Err(e) = client.push_event(&event).await {
                metrics::record_event_push_failure();
                tracing::warn!(
                    delivery_id = event.delivery_id,
                    event_type = event.event_type.as_str(),
                    error = %e,
                    "Event push failed"
                );
            }
        }))
    }
}
