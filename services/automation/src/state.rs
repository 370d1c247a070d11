//! State shared by the health endpoints.

use std::sync::Arc;

use cdp_id::WorkerId;

use crate::db::Database;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    worker_id: WorkerId,
}

impl AppState {
    pub fn new(db: Database, worker_id: WorkerId) -> Self {
        Self {
            inner: Arc::new(Inner { db, worker_id }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    /// Identity of this process, also used as its lease holder.
    pub fn worker_id(&self) -> WorkerId {
        self.inner.worker_id
    }
}
