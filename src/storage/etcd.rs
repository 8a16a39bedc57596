use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etcd_client::{Compare, CompareOp, GetOptions, KeyValue, Txn, TxnOp, TxnOpResponse};

use crate::{
    config::{etcd::EtcdClientWrapper, Etcd},
    core::{error::ErrorContext, DeskError, DeskResult},
    request::{MediaRequest, RequestDraft, RequestSet, Transition},
    storage_error,
};

use super::{sort_newest_first, RequestStore};

/// Attempts for compare-and-swap loops before giving up on contention.
const MAX_CAS_RETRIES: usize = 8;

/// Failure of a single etcd operation.
///
/// Only errors raised by the client itself leave the connection in doubt.
#[derive(Debug)]
enum Fault {
    Etcd(etcd_client::Error),
    Desk(DeskError),
}

impl Fault {
    fn needs_reconnect(&self) -> bool {
        matches!(self, Fault::Etcd(_))
    }
}

impl From<etcd_client::Error> for Fault {
    fn from(err: etcd_client::Error) -> Self {
        Fault::Etcd(err)
    }
}

impl From<DeskError> for Fault {
    fn from(err: DeskError) -> Self {
        Fault::Desk(err)
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Fault::Desk(err.into())
    }
}

impl From<Fault> for DeskError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Etcd(err) => err.into(),
            Fault::Desk(err) => err,
        }
    }
}

type FaultResult<T> = Result<T, Fault>;

/// Why a guarded move between sets did not commit.
#[derive(Debug, PartialEq, Eq)]
enum MoveRejection {
    SourceMissing,
    DestinationTaken,
    SourceChanged,
}

/// Classify a failed move from what the source and destination keys held
/// when the guarded transaction was evaluated.
fn move_rejection(source_present: bool, destination_taken: bool) -> MoveRejection {
    match (source_present, destination_taken) {
        (false, _) => MoveRejection::SourceMissing,
        (true, true) => MoveRejection::DestinationTaken,
        (true, false) => MoveRejection::SourceChanged,
    }
}

/// Whether a `Get` op response found its key.
fn holds_key(op: Option<&TxnOpResponse>) -> bool {
    matches!(op, Some(TxnOpResponse::Get(get)) if !get.kvs().is_empty())
}

/// etcd v3 backed store.
///
/// Layout under the configured prefix:
/// `{prefix}/requests/{id}`, `{prefix}/closed_requests/{id}` and the id
/// counter at `{prefix}/next_id`. Values are JSON encoded records.
pub struct EtcdStore {
    etcd: EtcdClientWrapper,
}

impl EtcdStore {
    pub fn new(config: Etcd) -> Self {
        Self {
            etcd: EtcdClientWrapper::new(config),
        }
    }

    fn record_key(&self, set: RequestSet, id: i64) -> String {
        record_key(self.etcd.prefix(), set, id)
    }

    fn set_prefix(&self, set: RequestSet) -> String {
        format!("{}/{}/", self.etcd.prefix(), set.collection())
    }

    fn counter_key(&self) -> String {
        format!("{}/next_id", self.etcd.prefix())
    }

    /// Reset the client after client faults so the next call reconnects.
    async fn observe<T>(&self, result: FaultResult<T>) -> DeskResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(fault) => {
                if fault.needs_reconnect() {
                    self.etcd.reset().await;
                }
                let err = DeskError::from(fault);
                if let DeskError::Storage(msg) = &err {
                    log::error!("etcd operation failed: {msg}");
                }
                Err(err)
            }
        }
    }

    async fn create_inner(
        &self,
        set: RequestSet,
        draft: RequestDraft,
        created_at: DateTime<Utc>,
    ) -> FaultResult<MediaRequest> {
        let mut client = self.etcd.client().await?;
        let counter_key = self.counter_key();

        for _ in 0..MAX_CAS_RETRIES {
            let response = client.get(counter_key.as_str(), None).await?;
            let (last_id, guard) = match response.kvs().first() {
                Some(kv) => (
                    parse_counter(kv)?,
                    Compare::mod_revision(counter_key.as_str(), CompareOp::Equal, kv.mod_revision()),
                ),
                None => (
                    0,
                    Compare::version(counter_key.as_str(), CompareOp::Equal, 0),
                ),
            };

            let record = draft.clone().into_request(last_id + 1, created_at);
            let value = serde_json::to_vec(&record)?;
            let txn = Txn::new().when(vec![guard]).and_then(vec![
                TxnOp::put(counter_key.as_str(), record.id.to_string(), None),
                TxnOp::put(self.record_key(set, record.id), value, None),
            ]);

            if client.txn(txn).await?.succeeded() {
                return Ok(record);
            }
            log::debug!("id counter moved while creating request, retrying");
        }

        Err(storage_error!("id counter contention after {MAX_CAS_RETRIES} attempts").into())
    }

    async fn get_inner(&self, set: RequestSet, id: i64) -> FaultResult<Option<MediaRequest>> {
        let mut client = self.etcd.client().await?;
        let response = client.get(self.record_key(set, id), None).await?;
        Ok(response.kvs().first().map(decode_record).transpose()?)
    }

    async fn list_inner(&self, set: RequestSet) -> FaultResult<Vec<MediaRequest>> {
        let mut client = self.etcd.client().await?;
        let response = client
            .get(self.set_prefix(set), Some(GetOptions::new().with_prefix()))
            .await?;

        let mut records = response
            .kvs()
            .iter()
            .map(decode_record)
            .collect::<DeskResult<Vec<_>>>()?;
        sort_newest_first(set, &mut records);
        Ok(records)
    }

    async fn update_status_inner(
        &self,
        set: RequestSet,
        id: i64,
        status: &str,
    ) -> FaultResult<u64> {
        let mut client = self.etcd.client().await?;
        let key = self.record_key(set, id);

        for _ in 0..MAX_CAS_RETRIES {
            let response = client.get(key.as_str(), None).await?;
            let Some(kv) = response.kvs().first() else {
                return Ok(0);
            };

            let mut record = decode_record(kv)?;
            record.status = Some(status.to_string());
            let txn = Txn::new()
                .when(vec![Compare::mod_revision(
                    key.as_str(),
                    CompareOp::Equal,
                    kv.mod_revision(),
                )])
                .and_then(vec![TxnOp::put(key.as_str(), serde_json::to_vec(&record)?, None)]);

            if client.txn(txn).await?.succeeded() {
                return Ok(1);
            }
        }

        Err(storage_error!("record {key} kept changing during status update").into())
    }

    async fn delete_inner(&self, set: RequestSet, id: i64) -> FaultResult<u64> {
        let mut client = self.etcd.client().await?;
        let response = client.delete(self.record_key(set, id), None).await?;
        Ok(response.deleted().max(0) as u64)
    }

    async fn transfer_inner(
        &self,
        from: RequestSet,
        id: i64,
        change: &Transition,
    ) -> FaultResult<MediaRequest> {
        let to = from.other();
        let mut client = self.etcd.client().await?;
        let from_key = self.record_key(from, id);
        let to_key = self.record_key(to, id);

        for _ in 0..MAX_CAS_RETRIES {
            let response = client.get(from_key.as_str(), None).await?;
            let Some(kv) = response.kvs().first() else {
                return Err(DeskError::NotFound(format!(
                    "request {id} is not in the {from} set"
                ))
                .into());
            };

            let read_revision = kv.mod_revision();
            let mut record = decode_record(kv)?;
            change.apply(&mut record);

            let txn = Txn::new()
                .when(vec![
                    Compare::mod_revision(from_key.as_str(), CompareOp::Equal, read_revision),
                    Compare::version(to_key.as_str(), CompareOp::Equal, 0),
                ])
                .and_then(vec![
                    TxnOp::put(to_key.as_str(), serde_json::to_vec(&record)?, None),
                    TxnOp::delete(from_key.as_str(), None),
                ])
                .or_else(vec![
                    TxnOp::get(from_key.as_str(), None),
                    TxnOp::get(to_key.as_str(), None),
                ]);

            let response = client.txn(txn).await?;
            if response.succeeded() {
                return Ok(record);
            }

            let ops = response.op_responses();
            match move_rejection(holds_key(ops.first()), holds_key(ops.get(1))) {
                MoveRejection::SourceMissing => {
                    return Err(DeskError::NotFound(format!(
                        "request {id} is not in the {from} set"
                    ))
                    .into());
                }
                MoveRejection::DestinationTaken => {
                    return Err(DeskError::Consistency(format!(
                        "request {id} already exists in the {to} set"
                    ))
                    .into());
                }
                MoveRejection::SourceChanged => {
                    log::debug!("request {id} changed while moving to the {to} set, retrying");
                }
            }
        }

        Err(storage_error!("record {from_key} kept changing during transfer").into())
    }
}

#[async_trait]
impl RequestStore for EtcdStore {
    async fn ping(&self) -> DeskResult<()> {
        let result: FaultResult<()> = async {
            let mut client = self.etcd.client().await?;
            client.status().await?;
            Ok(())
        }
        .await;
        self.observe(result).await
    }

    async fn create(
        &self,
        set: RequestSet,
        draft: RequestDraft,
        created_at: DateTime<Utc>,
    ) -> DeskResult<MediaRequest> {
        let result = self.create_inner(set, draft, created_at).await;
        self.observe(result).await
    }

    async fn get(&self, set: RequestSet, id: i64) -> DeskResult<Option<MediaRequest>> {
        let result = self.get_inner(set, id).await;
        self.observe(result).await
    }

    async fn list(&self, set: RequestSet) -> DeskResult<Vec<MediaRequest>> {
        let result = self.list_inner(set).await;
        self.observe(result).await
    }

    async fn update_status(&self, set: RequestSet, id: i64, status: &str) -> DeskResult<u64> {
        let result = self.update_status_inner(set, id, status).await;
        self.observe(result).await
    }

    async fn delete(&self, set: RequestSet, id: i64) -> DeskResult<u64> {
        let result = self.delete_inner(set, id).await;
        self.observe(result).await
    }

    async fn transfer(
        &self,
        from: RequestSet,
        id: i64,
        change: &Transition,
    ) -> DeskResult<MediaRequest> {
        let result = self.transfer_inner(from, id, change).await;
        self.observe(result).await
    }
}

fn record_key(prefix: &str, set: RequestSet, id: i64) -> String {
    format!("{prefix}/{}/{id}", set.collection())
}

fn decode_record(kv: &KeyValue) -> DeskResult<MediaRequest> {
    serde_json::from_slice(kv.value()).map_err(|e| {
        storage_error!(
            "invalid record at {}: {e}",
            String::from_utf8_lossy(kv.key())
        )
    })
}

fn parse_counter(kv: &KeyValue) -> DeskResult<i64> {
    std::str::from_utf8(kv.value())
        .with_context("id counter")?
        .parse::<i64>()
        .with_context("id counter")
}
