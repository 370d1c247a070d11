//! # cdp-id
//!
//! Typed identifiers for the records owned by the automation service.
//!
//! All IDs use a prefixed ULID format: `{prefix}_{ulid}`, e.g.
//! `sch_01HV4Z2WQXKJNM8GPQY6VBKC3D`. The prefix makes a schedule ID
//! impossible to confuse with a test run ID in logs and queries, and the
//! ULID keeps them time-ordered.
//!
//! IDs are stored as `TEXT` columns; every type implements the sqlx
//! `Type`/`Encode`/`Decode` traits for Postgres so it can be bound and read
//! directly.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

#[doc(hidden)]
pub mod __private {
    pub use serde;
    pub use sqlx;
}
