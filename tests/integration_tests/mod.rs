//! Integration tests module
//!
//! End-to-end tests for the examgrid coordinator and exam-client workers,
//! including:
//! - Registration, status and polling over HTTP
//! - Auto-start claims flowing through the assignment queue
//! - Full delivery runs from claim to reconciled results
//! - Error handling and recovery scenarios

pub mod end_to_end_test;
pub mod error_scenarios;
pub mod fixtures;
pub mod protocol_test;
pub mod scheduler_test;
