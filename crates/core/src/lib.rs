//! Core types and utilities for the price oracle node
//!
//! This crate provides shared types used across all components:
//! - Price points and their storage keys
//! - Market data shapes (assets, venues, tickers)
//! - Error taxonomy
//! - Node configuration

pub mod types;
pub mod market;
pub mod clock;
pub mod config;
pub mod errors;

pub use types::*;
pub use market::*;
pub use clock::*;
pub use config::*;
pub use errors::*;
