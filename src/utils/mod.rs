//! Common utilities shared by the coordinator and the worker

pub mod retry;
pub mod sql;
