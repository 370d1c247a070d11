//! Short-lived distributed leases.

use std::time::Duration;

use async_trait::async_trait;

use crate::db::DbError;

/// A TTL-bounded mutual exclusion primitive shared by all service instances.
///
/// Each store handle acts for one holder. A lease that is not released
/// expires after its TTL, so a crashed holder cannot block others for longer
/// than that.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Takes the lease for `key` if it is free or expired.
    ///
    /// Returns false if another holder owns an unexpired lease.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, DbError>;

    /// Releases the lease if this holder owns it.
    async fn release(&self, key: &str) -> Result<(), DbError>;
}
