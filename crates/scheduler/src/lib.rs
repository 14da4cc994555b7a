//! Update scheduler for asynchronous tree fetches
//!
//! This crate provides:
//! - `PendingUpdate`, one outstanding has-children, child-count or children fetch
//! - `UpdateScheduler`, which orders requests parent-before-child, coalesces
//!   waiting children fetches, and reports update sequence begin/complete
//!
//! Scheduling is purely in-memory; the owning viewer dispatches started
//! updates to its content provider and reports replies back.

pub mod queue;
pub mod update;

// Re-exports
pub use queue::{PathState, SchedulerEvent, UpdateScheduler};
pub use update::{PendingUpdate, UpdateId, UpdateKind};
