//! Task registry and change notification for aidash.
//!
//! - [`TaskRegistry`] -- the single source of truth for every known task,
//!   constructed once by the application and shared as `Arc`.
//! - [`TaskEvent`] -- the change envelope published on every mutation.
//! - [`TaskSubscription`] -- a per-task view over the registry's event
//!   stream, used by consumers to follow one task.
//! - [`PollerLease`] -- the "active poller" flag for one identifier.

pub mod bus;
pub mod registry;
pub mod subscription;

pub use bus::TaskEvent;
pub use registry::{PatchOutcome, PollerLease, RegistryError, TaskRegistry};
pub use subscription::{TaskChange, TaskSubscription};
