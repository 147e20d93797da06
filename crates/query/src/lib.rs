//! Price query resolution
//!
//! Answers "latest" and "historical" lookups for a batch of symbols against
//! the time-series store.

pub mod service;

pub use service::QueryService;
