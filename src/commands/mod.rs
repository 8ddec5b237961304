pub mod coordinator;
pub mod exam_client;
pub mod shutdown;

// Re-export command functions for convenience
pub use coordinator::{coordinator, CoordinatorParams};
pub use exam_client::{exam_client, ExamClientParams};
