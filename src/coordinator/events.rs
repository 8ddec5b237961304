//! Event intake for worker-pushed delivery events
//!
//! Every accepted event is written to the delivery store's audit table and
//! then broadcast to in-process subscribers. Subscribers that fall behind
//! lose the oldest events; the audit row is the durable copy.

use tokio::sync::broadcast;

use crate::delivery::{DeliveryError, SharedDeliveryStore};
use crate::metrics;
use crate::models::ClientEvent;

/// Default broadcast buffer per subscriber
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Records and fans out worker events
pub struct EventHub {
    store: SharedDeliveryStore,
    sender: broadcast::Sender<ClientEvent>,
}

impl EventHub {
    pub fn new(store: SharedDeliveryStore, buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { store, sender }
    }

    /// Receive every event accepted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Persist an event and broadcast it; returns the audit row id
    pub fn ingest(&self, event: ClientEvent) -> Result<i64, DeliveryError> {
        let row_id = self.store.record_event(&event)?;
        metrics::record_event_received(event.event_type.as_str());

        tracing::debug!(
            delivery_id = event.delivery_id,
            client_id = %event.client_id,
            event_type = event.event_type.as_str(),
            "Delivery event received"
        );

        // No subscribers is fine
        let _ = self.sender.send(event);
        Ok(row_id)
    }
}
