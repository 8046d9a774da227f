//! Local cache tier
//!
//! Freshness policy, cached reads and crash-safe cache fills that record
//! their provenance in the metadata store.

pub mod errors;
pub mod file_cache;
pub mod locks;

pub use file_cache::{FillOutcome, LocalCache};
