//! Retention job for the Rentwise auth layer.
//!
//! Rate limit records and sessions are never removed on the request path
//! except when a single session is rejected. This crate purges what is left
//! behind: rate limit records older than 24 hours and sessions whose refresh
//! token has lapsed.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod sweeper;

pub use config::SweeperConfig;
pub use sweeper::{SweepError, SweepReport, Sweeper};
