use crate::domain::event::{EventOutcome, WebhookEventRecord};
use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::{Admission, EventStore, Inserted, LedgerStore, RequestStore};
use crate::domain::request::{RequestFilter, Transition, WithdrawalRequest, WithdrawalStatus};
use crate::error::{Result, WithdrawalError};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column family for per-user ledger entries.
pub const CF_LEDGER: &str = "ledger";
/// Column family for withdrawal requests.
pub const CF_REQUESTS: &str = "requests";
/// Column family for webhook event records.
pub const CF_EVENTS: &str = "events";
/// Index: `user/idempotency_key` -> request id.
pub const CF_REQUESTS_IDEM: &str = "requests_idem";
/// Index: external payout id -> request id.
pub const CF_REQUESTS_PAYOUT: &str = "requests_payout";

/// A persistent store implementation using RocksDB.
///
/// Implements all three store ports over separate column families, with two
/// index families for the request lookups. Read-modify-write sections
/// (version CAS, conditional transitions, event admission) are serialized by
/// an internal mutex; this adapter targets a single-process embedding.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [
            CF_LEDGER,
            CF_REQUESTS,
            CF_EVENTS,
            CF_REQUESTS_IDEM,
            CF_REQUESTS_PAYOUT,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            WithdrawalError::Internal(Box::new(std::io::Error::other(format!(
                "Column family {name} not found"
            ))))
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: serde::Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let handle = self.cf(cf)?;
        self.db.put_cf(handle, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get_request_by_id(&self, id: Uuid) -> Result<Option<WithdrawalRequest>> {
        self.get_json(CF_REQUESTS, id.as_bytes())
    }

    fn get_request_by_index(&self, index_cf: &str, key: &[u8]) -> Result<Option<WithdrawalRequest>> {
        let handle = self.cf(index_cf)?;
        match self.db.get_cf(handle, key)? {
            Some(id_bytes) => {
                let id = Uuid::from_slice(&id_bytes)
                    .map_err(|e| WithdrawalError::Internal(Box::new(e)))?;
                self.get_request_by_id(id)
            }
            None => Ok(None),
        }
    }
}

fn idem_key(user: Uuid, key: &str) -> Vec<u8> {
    format!("{user}/{key}").into_bytes()
}

#[async_trait]
impl LedgerStore for RocksDbStore {
    async fn get(&self, user: Uuid) -> Result<Option<LedgerEntry>> {
        self.get_json(CF_LEDGER, user.as_bytes())
    }

    async fn get_all(&self) -> Result<Vec<LedgerEntry>> {
        let handle = self.cf(CF_LEDGER)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(handle, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    async fn put_if_version(&self, entry: LedgerEntry, expected_version: u64) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let current = self
            .get_json::<LedgerEntry>(CF_LEDGER, entry.user.as_bytes())?
            .map(|e| e.version)
            .unwrap_or(0);
        if current != expected_version {
            return Err(WithdrawalError::VersionConflict(entry.user));
        }
        self.put_json(CF_LEDGER, entry.user.as_bytes(), &entry)
    }
}

#[async_trait]
impl RequestStore for RocksDbStore {
    async fn insert(&self, request: WithdrawalRequest) -> Result<Inserted> {
        let _gate = self.write_gate.lock().await;
        let index = idem_key(request.user, &request.idempotency_key);
        if let Some(existing) = self.get_request_by_index(CF_REQUESTS_IDEM, &index)? {
            return Ok(Inserted::Duplicate(existing));
        }
        self.put_json(CF_REQUESTS, request.id.as_bytes(), &request)?;
        let idem = self.cf(CF_REQUESTS_IDEM)?;
        self.db.put_cf(idem, index, request.id.as_bytes())?;
        Ok(Inserted::Created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<WithdrawalRequest>> {
        self.get_request_by_id(id)
    }

    async fn find_by_idempotency_key(
        &self,
        user: Uuid,
        key: &str,
    ) -> Result<Option<WithdrawalRequest>> {
        self.get_request_by_index(CF_REQUESTS_IDEM, &idem_key(user, key))
    }

    async fn find_by_payout_id(&self, payout_id: &str) -> Result<Option<WithdrawalRequest>> {
        self.get_request_by_index(CF_REQUESTS_PAYOUT, payout_id.as_bytes())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        transition: Transition,
    ) -> Result<WithdrawalRequest> {
        let _gate = self.write_gate.lock().await;
        let mut request = self
            .get_request_by_id(id)?
            .ok_or(WithdrawalError::RequestNotFound(id))?;
        if request.status != expected {
            return Err(WithdrawalError::StaleRequestState {
                expected,
                found: request.status,
            });
        }
        transition.apply(&mut request);
        self.put_json(CF_REQUESTS, request.id.as_bytes(), &request)?;
        if let Some(payout_id) = &request.external_payout_id {
            let payout = self.cf(CF_REQUESTS_PAYOUT)?;
            self.db
                .put_cf(payout, payout_id.as_bytes(), request.id.as_bytes())?;
        }
        Ok(request)
    }

    async fn list(&self, filter: RequestFilter) -> Result<Vec<WithdrawalRequest>> {
        let handle = self.cf(CF_REQUESTS)?;
        let mut matched = Vec::new();
        for item in self.db.iterator_cf(handle, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let request: WithdrawalRequest = serde_json::from_slice(&value)?;
            if filter.user.is_none_or(|user| request.user == user)
                && filter.status.is_none_or(|status| request.status == status)
            {
                matched.push(request);
            }
        }
        matched.sort_by_key(|r| r.created_at);
        Ok(matched)
    }
}

#[async_trait]
impl EventStore for RocksDbStore {
    async fn admit(&self, record: WebhookEventRecord) -> Result<Admission> {
        let _gate = self.write_gate.lock().await;
        match self.get_json::<WebhookEventRecord>(CF_EVENTS, record.external_event_id.as_bytes())? {
            Some(existing) if existing.is_processed() => Ok(Admission::Processed(existing)),
            Some(_) => Ok(Admission::InFlight),
            None => {
                self.put_json(CF_EVENTS, record.external_event_id.as_bytes(), &record)?;
                Ok(Admission::New)
            }
        }
    }

    async fn finalize(&self, external_event_id: &str, outcome: EventOutcome) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        if let Some(mut record) =
            self.get_json::<WebhookEventRecord>(CF_EVENTS, external_event_id.as_bytes())?
            && !record.is_processed()
        {
            record.processed_at = Some(Utc::now());
            record.outcome = Some(outcome);
            self.put_json(CF_EVENTS, external_event_id.as_bytes(), &record)?;
        }
        Ok(())
    }

    async fn get(&self, external_event_id: &str) -> Result<Option<WebhookEventRecord>> {
        self.get_json(CF_EVENTS, external_event_id.as_bytes())
    }
}
