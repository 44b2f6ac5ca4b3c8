use crate::domain::event::{EventOutcome, WebhookEventRecord};
use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::{Admission, EventStore, Inserted, LedgerStore, RequestStore};
use crate::domain::request::{RequestFilter, Transition, WithdrawalRequest, WithdrawalStatus};
use crate::error::{Result, WithdrawalError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory ledger store.
///
/// Compare-and-swap semantics are enforced under the write lock, which
/// serializes concurrent writers to the same user entry.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    entries: Arc<RwLock<HashMap<Uuid, LedgerEntry>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get(&self, user: Uuid) -> Result<Option<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&user).cloned())
    }

    async fn get_all(&self) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.values().cloned().collect())
    }

    async fn put_if_version(&self, entry: LedgerEntry, expected_version: u64) -> Result<()> {
        let mut entries = self.entries.write().await;
        let current = entries.get(&entry.user).map(|e| e.version).unwrap_or(0);
        if current != expected_version {
            return Err(WithdrawalError::VersionConflict(entry.user));
        }
        entries.insert(entry.user, entry);
        Ok(())
    }
}

/// A thread-safe in-memory withdrawal request store.
///
/// Idempotency-key uniqueness and status-conditional transitions are checked
/// under the write lock.
#[derive(Default, Clone)]
pub struct InMemoryRequestStore {
    requests: Arc<RwLock<HashMap<Uuid, WithdrawalRequest>>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: WithdrawalRequest) -> Result<Inserted> {
        let mut requests = self.requests.write().await;
        if let Some(existing) = requests
            .values()
            .find(|r| r.user == request.user && r.idempotency_key == request.idempotency_key)
        {
            return Ok(Inserted::Duplicate(existing.clone()));
        }
        requests.insert(request.id, request);
        Ok(Inserted::Created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<WithdrawalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        user: Uuid,
        key: &str,
    ) -> Result<Option<WithdrawalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .find(|r| r.user == user && r.idempotency_key == key)
            .cloned())
    }

    async fn find_by_payout_id(&self, payout_id: &str) -> Result<Option<WithdrawalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .find(|r| r.external_payout_id.as_deref() == Some(payout_id))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        transition: Transition,
    ) -> Result<WithdrawalRequest> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&id)
            .ok_or(WithdrawalError::RequestNotFound(id))?;
        if request.status != expected {
            return Err(WithdrawalError::StaleRequestState {
                expected,
                found: request.status,
            });
        }
        transition.apply(request);
        Ok(request.clone())
    }

    async fn list(&self, filter: RequestFilter) -> Result<Vec<WithdrawalRequest>> {
        let requests = self.requests.read().await;
        let mut matched: Vec<WithdrawalRequest> = requests
            .values()
            .filter(|r| filter.user.is_none_or(|user| r.user == user))
            .filter(|r| filter.status.is_none_or(|status| r.status == status))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        Ok(matched)
    }
}

/// A thread-safe in-memory webhook event log.
#[derive(Default, Clone)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<HashMap<String, WebhookEventRecord>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn admit(&self, record: WebhookEventRecord) -> Result<Admission> {
        let mut events = self.events.write().await;
        match events.get(&record.external_event_id) {
            Some(existing) if existing.is_processed() => {
                Ok(Admission::Processed(existing.clone()))
            }
            Some(_) => Ok(Admission::InFlight),
            None => {
                events.insert(record.external_event_id.clone(), record);
                Ok(Admission::New)
            }
        }
    }

    async fn finalize(&self, external_event_id: &str, outcome: EventOutcome) -> Result<()> {
        let mut events = self.events.write().await;
        if let Some(record) = events.get_mut(external_event_id)
            && !record.is_processed()
        {
            record.processed_at = Some(Utc::now());
            record.outcome = Some(outcome);
        }
        Ok(())
    }

    async fn get(&self, external_event_id: &str) -> Result<Option<WebhookEventRecord>> {
        let events = self.events.read().await;
        Ok(events.get(external_event_id).cloned())
    }
}
