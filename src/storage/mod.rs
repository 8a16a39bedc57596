//! Storage capability the lifecycle manager is written against.

pub mod etcd;
pub mod memory;

use async_trait::async_trait;

use crate::{
    core::DeskResult,
    request::{MediaRequest, RequestDraft, RequestSet, Transition},
};

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// Persistence for the open and closed request sets.
///
/// Implementations must keep `transfer` atomic: either the record is in the
/// destination set and gone from the source, or nothing changed.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Check the backend is reachable.
    async fn ping(&self) -> DeskResult<()>;

    /// Persist a new record in `set`, assigning a fresh id.
    async fn create(
        &self,
        set: RequestSet,
        draft: RequestDraft,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> DeskResult<MediaRequest>;

    async fn get(&self, set: RequestSet, id: i64) -> DeskResult<Option<MediaRequest>>;

    /// All records of `set`, newest first (see [`sort_newest_first`]).
    async fn list(&self, set: RequestSet) -> DeskResult<Vec<MediaRequest>>;

    /// Returns the number of records changed (0 or 1).
    async fn update_status(&self, set: RequestSet, id: i64, status: &str) -> DeskResult<u64>;

    /// Returns the number of records removed (0 or 1).
    async fn delete(&self, set: RequestSet, id: i64) -> DeskResult<u64>;

    /// Move record `id` out of `from` into the other set in one transaction,
    /// applying `change` to the stored copy on the way. Returns the moved record.
    ///
    /// Fails with `NotFound` when `from` does not hold `id` and with
    /// `Consistency` when the destination already does.
    async fn transfer(
        &self,
        from: RequestSet,
        id: i64,
        change: &Transition,
    ) -> DeskResult<MediaRequest>;
}

/// Order records the way a set is listed: by its timestamp, newest first,
/// ties broken by id descending.
pub fn sort_newest_first(set: RequestSet, records: &mut [MediaRequest]) {
    records.sort_by(|a, b| {
        b.sort_key(set)
            .cmp(&a.sort_key(set))
            .then_with(|| b.id.cmp(&a.id))
    });
}
