//! Task-service client, poller and producer/consumer adapters.
//!
//! Provides the HTTP wrapper for the backend task service, the per-task
//! [`poller::Poller`] that reconciles server state into the
//! [`TaskRegistry`](aidash_events::TaskRegistry), and the
//! [`tracker::TaskTracker`] that pages use to submit or follow tasks.

pub mod api;
pub mod config;
pub mod poller;
pub mod retry;
pub mod service;
pub mod tracker;
