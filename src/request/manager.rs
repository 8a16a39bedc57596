use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    core::{DeskError, DeskResult},
    storage::RequestStore,
    validation_error,
};

use super::{MediaRequest, NewRequest, RequestSet, Transition, DEFAULT_STATUS};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Owns the open/closed lifecycle of media requests.
///
/// Transitions fail with `NotFound` for unknown ids. Status updates and
/// closed-set deletes are permissive: an unknown id is a successful no-op.
pub struct LifecycleManager {
    store: Arc<dyn RequestStore>,
    clock: Clock,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self {
            store,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the time source used for `created_at` and `closed_at`.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    /// Create a new open request.
    pub async fn submit(&self, request: NewRequest) -> DeskResult<MediaRequest> {
        let draft = request
            .into_draft()
            .map_err(|_| validation_error!("Missing required fields."))?;

        let record = self
            .store
            .create(RequestSet::Open, draft, (self.clock)())
            .await?;
        log::info!("Request {} submitted: {:?}", record.id, record.title);
        Ok(record)
    }

    /// Open requests, most recently created first.
    pub async fn list_open(&self) -> DeskResult<Vec<MediaRequest>> {
        self.store.list(RequestSet::Open).await
    }

    /// Closed requests, most recently closed first.
    pub async fn list_closed(&self) -> DeskResult<Vec<MediaRequest>> {
        self.store.list(RequestSet::Closed).await
    }

    /// Move an open request to the closed set.
    ///
    /// A supplied status replaces the current label; otherwise it is kept.
    pub async fn close(&self, id: i64, status: Option<&str>) -> DeskResult<MediaRequest> {
        let change = Transition {
            status: non_blank(status).map(str::to_string),
            closed_at: Some((self.clock)()),
        };
        self.transition(RequestSet::Open, id, change).await
    }

    /// Move a closed request back to the open set.
    ///
    /// The id and `created_at` survive; the status becomes the supplied one
    /// or "Pending".
    pub async fn reopen(&self, id: i64, status: Option<&str>) -> DeskResult<MediaRequest> {
        let change = Transition {
            status: Some(non_blank(status).unwrap_or(DEFAULT_STATUS).to_string()),
            closed_at: None,
        };
        self.transition(RequestSet::Closed, id, change).await
    }

    /// Relabel an open request in place.
    pub async fn update_status(&self, id: i64, status: &str) -> DeskResult<()> {
        self.relabel(RequestSet::Open, id, status).await
    }

    /// Relabel a closed request in place.
    pub async fn update_closed_status(&self, id: i64, status: &str) -> DeskResult<()> {
        self.relabel(RequestSet::Closed, id, status).await
    }

    /// Permanently remove a closed request. Unknown ids succeed.
    pub async fn delete_closed(&self, id: i64) -> DeskResult<()> {
        let removed = self.store.delete(RequestSet::Closed, id).await?;
        if removed == 0 {
            log::debug!("Delete of closed request {id} matched nothing");
        } else {
            log::info!("Closed request {id} deleted");
        }
        Ok(())
    }

    async fn transition(
        &self,
        from: RequestSet,
        id: i64,
        change: Transition,
    ) -> DeskResult<MediaRequest> {
        match self.store.transfer(from, id, &change).await {
            Ok(record) => {
                log::info!(
                    "Request {id} moved to {} with status: {}",
                    from.other(),
                    record.status()
                );
                Ok(record)
            }
            Err(DeskError::NotFound(msg)) => {
                log::debug!("{msg}");
                Err(DeskError::NotFound(match from {
                    RequestSet::Open => "Request not found.".to_string(),
                    RequestSet::Closed => "Closed request not found.".to_string(),
                }))
            }
            Err(DeskError::Consistency(msg)) => {
                log::warn!("Request {id} left in place, duplicate detected: {msg}");
                Err(DeskError::Consistency(msg))
            }
            Err(err) => Err(err),
        }
    }

    async fn relabel(&self, set: RequestSet, id: i64, status: &str) -> DeskResult<()> {
        let status = non_blank(Some(status))
            .ok_or_else(|| validation_error!("Missing request ID or status."))?;

        let updated = self.store.update_status(set, id, status).await?;
        if updated == 0 {
            log::debug!("Status update for {set} request {id} matched nothing");
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
