//! Correlation of confirmation events with the records that caused them.
//!
//! When this service requests an action (a test run, a database migration) it
//! stores a record without an external reference. The infrastructure later
//! reports on the action with an event that carries only the external
//! reference and the match keys. [`Correlator::link`] attaches the reference
//! to the newest unlinked record with equal keys created within the window
//! before the event; every later event for the same reference updates that
//! record directly.
//!
//! Linking is a single conditional write in the store, so concurrent
//! deliveries of the same event link at most one record.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::db::DbError;
use crate::store::{CorrelatedRecord, CorrelationStore, MatchKeys, StatusUpdate, TimeWindow};

/// Correlation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationConfig {
    /// How far before the event a record may have been created.
    pub window: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window: Duration::seconds(120),
        }
    }
}

/// What happened to a confirmation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// The event linked a record and updated its status.
    Linked(CorrelatedRecord),
    /// The reference was already linked; its record's status was updated.
    Updated,
    /// No record matched. Not an error: the event is a duplicate for a record
    /// that no longer exists, arrived outside the window, or was never ours.
    Unmatched,
}

pub struct Correlator<S: ?Sized> {
    store: Arc<S>,
    config: CorrelationConfig,
}

impl<S: CorrelationStore + ?Sized> Correlator<S> {
    pub fn new(store: Arc<S>, config: CorrelationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// The `created_at` range a record must fall in to match an event at `event_time`.
    pub fn window_for(&self, event_time: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: event_time - self.config.window,
            end: event_time,
        }
    }

    /// Links `external_ref` to the matching unlinked record, if any.
    pub async fn link(
        &self,
        keys: &MatchKeys,
        external_ref: &str,
        event_time: DateTime<Utc>,
    ) -> Result<Option<CorrelatedRecord>, DbError> {
        let window = self.window_for(event_time);
        let linked = self.store.link(keys, external_ref, window).await?;

        match &linked {
            Some(record) => info!(
                record_id = %record.id,
                external_ref,
                subject = %keys.subject,
                environment = %keys.environment,
                "Linked record to external reference"
            ),
            None => debug!(
                external_ref,
                subject = %keys.subject,
                environment = %keys.environment,
                window_start = %window.start,
                "No unlinked record in window"
            ),
        }

        Ok(linked)
    }

    /// Updates the record linked to `external_ref`. Returns false if there is none.
    pub async fn record_status(
        &self,
        external_ref: &str,
        update: &StatusUpdate,
    ) -> Result<bool, DbError> {
        self.store.update_status(external_ref, update).await
    }

    /// Links the event if its reference is new, then records its status.
    pub async fn correlate(
        &self,
        keys: &MatchKeys,
        external_ref: &str,
        update: &StatusUpdate,
    ) -> Result<CorrelationOutcome, DbError> {
        let linked = self.link(keys, external_ref, update.at).await?;

        if !self.record_status(external_ref, update).await? {
            return Ok(CorrelationOutcome::Unmatched);
        }

        Ok(match linked {
            Some(mut record) => {
                record.status = Some(update.status.clone());
                record.updated_at = update.at;
                CorrelationOutcome::Linked(record)
            }
            None => CorrelationOutcome::Updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryTestRunStore;
    use crate::store::{TestRun, TestRunStore};
    use cdp_events::UserDetails;

    fn update(status: &str, at: DateTime<Utc>) -> StatusUpdate {
        StatusUpdate {
            status: status.to_string(),
            detail: None,
            at,
        }
    }

    #[tokio::test]
    async fn test_event_outside_window_never_links() {
        let store = Arc::new(MemoryTestRunStore::new());
        let correlator = Correlator::new(store.clone(), CorrelationConfig::default());
        let created = Utc::now();
        store
            .create(&TestRun::starting("smoke", "dev", None, UserDetails::system(), created))
            .await
            .unwrap();

        let late = created + Duration::seconds(121);
        let outcome = correlator
            .correlate(&MatchKeys::new("smoke", "dev"), "arn:1", &update("RUNNING", late))
            .await
            .unwrap();

        assert_eq!(outcome, CorrelationOutcome::Unmatched);
        assert!(store.records()[0].task_arn.is_none());
    }

    #[tokio::test]
    async fn test_event_at_window_edge_links() {
        let store = Arc::new(MemoryTestRunStore::new());
        let correlator = Correlator::new(store.clone(), CorrelationConfig::default());
        let created = Utc::now();
        store
            .create(&TestRun::starting("smoke", "dev", None, UserDetails::system(), created))
            .await
            .unwrap();

        let at_edge = created + Duration::seconds(120);
        let outcome = correlator
            .correlate(&MatchKeys::new("smoke", "dev"), "arn:1", &update("RUNNING", at_edge))
            .await
            .unwrap();

        assert!(matches!(outcome, CorrelationOutcome::Linked(_)));
    }

    #[tokio::test]
    async fn test_event_before_record_never_links() {
        let store = Arc::new(MemoryTestRunStore::new());
        let correlator = Correlator::new(store.clone(), CorrelationConfig::default());
        let created = Utc::now();
        store
            .create(&TestRun::starting("smoke", "dev", None, UserDetails::system(), created))
            .await
            .unwrap();

        let early = created - Duration::seconds(1);
        let linked = correlator
            .link(&MatchKeys::new("smoke", "dev"), "arn:1", early)
            .await
            .unwrap();
        assert!(linked.is_none());
    }

    #[tokio::test]
    async fn test_later_events_update_linked_record() {
        let store = Arc::new(MemoryTestRunStore::new());
        let correlator = Correlator::new(store.clone(), CorrelationConfig::default());
        let created = Utc::now();
        store
            .create(&TestRun::starting("smoke", "dev", None, UserDetails::system(), created))
            .await
            .unwrap();
        let keys = MatchKeys::new("smoke", "dev");

        let first = correlator
            .correlate(&keys, "arn:1", &update("RUNNING", created + Duration::seconds(5)))
            .await
            .unwrap();
        assert!(matches!(first, CorrelationOutcome::Linked(_)));

        // Well past the window: still updates, by reference.
        let second = correlator
            .correlate(&keys, "arn:1", &update("STOPPED", created + Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(second, CorrelationOutcome::Updated);
        assert_eq!(store.records()[0].task_status.as_deref(), Some("STOPPED"));
    }

    #[test]
    fn test_window_is_configurable() {
        let correlator = Correlator::new(
            Arc::new(MemoryTestRunStore::new()),
            CorrelationConfig {
                window: Duration::seconds(30),
            },
        );
        let now = Utc::now();
        let window = correlator.window_for(now);
        assert_eq!(window.end, now);
        assert_eq!(window.start, now - Duration::seconds(30));
    }
}
