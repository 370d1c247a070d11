//! # cdp-events
//!
//! Inbound event envelope and payload definitions for the automation service.
//!
//! ## Envelope
//!
//! Every queue message decodes into an [`EventEnvelope`] carrying:
//! - `event_type`, used to route the message to exactly one handler
//! - `timestamp`, when the infrastructure observed the event
//! - `payload`, the event-specific JSON object
//!
//! Two header shapes are accepted on the wire: a camelCase `eventType`
//! wrapper, and a snake_case `event_type` document whose payload is either
//! inline or a gzip+base64 string announced by `compression`.
//!
//! ## Event Types
//!
//! - Deployment events (`deployment.*`)
//! - Image registry events (`image.*`)
//! - Test run task events (`test_run.*`)
//! - Database migration build events (`migration.*`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
