//! Core task types for the aidash task tracker.
//!
//! Pure, synchronous building blocks shared by the registry, the poller
//! and the CLI: the [`task::Task`] entity and its status state machine,
//! the validating decoder for task-service payloads in [`wire`], and the
//! error taxonomy in [`error`]. Nothing in this crate performs I/O.

pub mod error;
pub mod task;
pub mod types;
pub mod wire;
