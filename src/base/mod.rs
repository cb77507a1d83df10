//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): Network error codes matching `net_error_list.h`
//! - [`RequestPriority`](priority::RequestPriority) and the per-job [`PriorityTracker`](priority::PriorityTracker)
//! - [`PrioritizedDispatcher`](dispatcher::PrioritizedDispatcher): bounded, priority-ordered job queue
//! - [`ConnectionType`](network_change::ConnectionType): link type reported by the embedder

pub mod context;
pub mod dispatcher;
pub mod network_change;
pub mod neterror;
pub mod priority;

#[cfg(test)]
mod tests;
