//! InfraBox work queue - keyed work distribution for controllers
//!
//! This crate provides:
//! - A deduplicating work queue that hands each key to one worker at a time
//! - Per-key exponential backoff for failed syncs
//! - A dispatcher running a pool of workers against a reconciler

pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod rate_limiter;

// Re-export commonly used types
pub use dispatcher::{Dispatcher, DispatcherConfig, Reconciler, SyncOutcome};
pub use error::{Result, WorkQueueError};
pub use queue::WorkQueue;
pub use rate_limiter::ExponentialBackoff;
