//! cdp automation service library.
//!
//! This crate primarily ships the `automation` binary, but we expose the
//! library surface so the workers can be driven from integration tests
//! against in-memory stores.

pub mod api;
pub mod config;
pub mod correlation;
pub mod db;
pub mod handlers;
pub mod ops;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod triggers;
