//! Per-delivery exam runtime: local store, participant endpoint, event push

pub mod endpoint;
pub mod events;
pub mod store;

pub use endpoint::{DeliveryEndpoint, EndpointState};
pub use events::EventPublisher;
pub use store::{DeliveryDatabase, DeliveryStats, ExamStoreError, LiveProgress};
