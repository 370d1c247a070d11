//! Event handlers and the registry that routes event types to them.
//!
//! Each event type maps to exactly one handler. The registry is built once at
//! startup and a duplicate registration is fatal, so a misconfiguration is
//! caught before any message is consumed.
//!
//! Handlers that do more than persist a read model live next to the logic
//! they drive ([`crate::correlation`], [`crate::triggers`]); this module holds
//! the plain persistence handler and the correlation handlers.

mod deployments;
mod migrations;
mod test_runs;

pub use deployments::DeploymentLifecycleHandler;
pub use migrations::MigrationBuildHandler;
pub use test_runs::TestRunTaskHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cdp_events::{EventEnvelope, EventError};
use thiserror::Error;

use crate::db::DbError;
use crate::ops::OpsError;

/// Result type for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors a handler can report for one message.
///
/// The consumer logs them with the message id; none of them stops the loop.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid event payload: {0}")]
    Decode(#[from] EventError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("ops API error: {0}")]
    Ops(#[from] OpsError),

    #[error("{failed} of {total} actions failed")]
    Partial { failed: usize, total: usize },
}

/// Delivery metadata passed to handlers alongside the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerContext {
    pub message_id: String,
    pub queue: String,
    pub receive_count: u32,
}

impl HandlerContext {
    /// True when the message has been delivered before.
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Handles one or more event types.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name, used in logs and registry errors.
    fn name(&self) -> &'static str;

    /// The event types this handler processes.
    fn event_types(&self) -> &'static [&'static str];

    async fn handle(&self, event: &EventEnvelope, ctx: &HandlerContext) -> HandlerResult<()>;
}

/// Registry construction errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler {rejected} cannot register for {event_type}: already handled by {existing}")]
    DuplicateHandler {
        event_type: String,
        existing: &'static str,
        rejected: &'static str,
    },
}

/// Event type to handler map.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry, registering each handler for all of its event types.
    pub fn from_handlers(
        handlers: impl IntoIterator<Item = Arc<dyn EventHandler>>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for handler in handlers {
            registry.register(handler)?;
        }
        Ok(registry)
    }

    /// Registers `handler` for every type in [`EventHandler::event_types`].
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) -> Result<(), RegistryError> {
        for event_type in handler.event_types() {
            self.register_for(event_type, Arc::clone(&handler))?;
        }
        Ok(())
    }

    /// Registers `handler` for a single event type.
    pub fn register_for(
        &mut self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), RegistryError> {
        if let Some(existing) = self.handlers.get(event_type) {
            return Err(RegistryError::DuplicateHandler {
                event_type: event_type.to_string(),
                existing: existing.name(),
                rejected: handler.name(),
            });
        }
        self.handlers.insert(event_type.to_string(), handler);
        Ok(())
    }

    /// Get the handler for a given event type.
    pub fn handler_for(&self, event_type: &str) -> Option<&dyn EventHandler> {
        self.handlers.get(event_type).map(|h| h.as_ref())
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
