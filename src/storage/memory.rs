use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    core::{DeskError, DeskResult},
    request::{MediaRequest, RequestDraft, RequestSet, Transition},
};

use super::{sort_newest_first, RequestStore};

#[derive(Default)]
struct Sets {
    last_id: i64,
    open: BTreeMap<i64, MediaRequest>,
    closed: BTreeMap<i64, MediaRequest>,
}

impl Sets {
    fn of(&self, set: RequestSet) -> &BTreeMap<i64, MediaRequest> {
        match set {
            RequestSet::Open => &self.open,
            RequestSet::Closed => &self.closed,
        }
    }

    fn of_mut(&mut self, set: RequestSet) -> &mut BTreeMap<i64, MediaRequest> {
        match set {
            RequestSet::Open => &mut self.open,
            RequestSet::Closed => &mut self.closed,
        }
    }
}

/// In-process store. A single lock covers both sets and the id counter.
#[derive(Default)]
pub struct MemoryStore {
    sets: Mutex<Sets>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn ping(&self) -> DeskResult<()> {
        Ok(())
    }

    async fn create(
        &self,
        set: RequestSet,
        draft: RequestDraft,
        created_at: DateTime<Utc>,
    ) -> DeskResult<MediaRequest> {
        let mut sets = self.sets.lock().await;
        sets.last_id += 1;
        let record = draft.into_request(sets.last_id, created_at);
        sets.of_mut(set).insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, set: RequestSet, id: i64) -> DeskResult<Option<MediaRequest>> {
        Ok(self.sets.lock().await.of(set).get(&id).cloned())
    }

    async fn list(&self, set: RequestSet) -> DeskResult<Vec<MediaRequest>> {
        let mut records: Vec<MediaRequest> =
            self.sets.lock().await.of(set).values().cloned().collect();
        sort_newest_first(set, &mut records);
        Ok(records)
    }

    async fn update_status(&self, set: RequestSet, id: i64, status: &str) -> DeskResult<u64> {
        let mut sets = self.sets.lock().await;
        match sets.of_mut(set).get_mut(&id) {
            Some(record) => {
                record.status = Some(status.to_string());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete(&self, set: RequestSet, id: i64) -> DeskResult<u64> {
        let removed = self.sets.lock().await.of_mut(set).remove(&id);
        Ok(removed.map_or(0, |_| 1))
    }

    async fn transfer(
        &self,
        from: RequestSet,
        id: i64,
        change: &Transition,
    ) -> DeskResult<MediaRequest> {
        let to = from.other();
        let mut sets = self.sets.lock().await;

        let Some(mut record) = sets.of_mut(from).remove(&id) else {
            return Err(DeskError::NotFound(format!(
                "request {id} is not in the {from} set"
            )));
        };
        if sets.of(to).contains_key(&id) {
            sets.of_mut(from).insert(id, record);
            return Err(DeskError::Consistency(format!(
                "request {id} already exists in the {to} set"
            )));
        }

        change.apply(&mut record);
        sets.of_mut(to).insert(id, record.clone());
        Ok(record)
    }
}
