use super::event::{EventOutcome, WebhookEventRecord};
use super::ledger::{Amount, LedgerEntry};
use super::request::{RequestFilter, Transition, WithdrawalRequest, WithdrawalStatus};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handles: the orchestrator and the webhook processor operate on the
/// same underlying stores.
pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type RequestStoreRef = Arc<dyn RequestStore>;
pub type EventStoreRef = Arc<dyn EventStore>;
pub type PayoutGatewayRef = Arc<dyn PayoutGateway>;
pub type NotifierRef = Arc<dyn Notifier>;

/// Result of inserting a withdrawal request under per-user idempotency-key
/// uniqueness.
#[derive(Debug, PartialEq, Clone)]
pub enum Inserted {
    Created,
    /// A request with the same user and idempotency key already exists.
    Duplicate(WithdrawalRequest),
}

/// Result of admitting a webhook event record into the dedup log.
#[derive(Debug, PartialEq, Clone)]
pub enum Admission {
    /// First sighting; the record was stored unprocessed.
    New,
    /// Seen before but never finalized (crash recovery); safe to reprocess.
    InFlight,
    /// Seen before and fully processed; must not reapply any mutation.
    Processed(WebhookEventRecord),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, user: Uuid) -> Result<Option<LedgerEntry>>;

    async fn get_all(&self) -> Result<Vec<LedgerEntry>>;

    /// Compare-and-swap write: succeeds only when the stored version equals
    /// `expected_version` (0 for an absent entry). The caller supplies the
    /// entry with its version already bumped.
    async fn put_if_version(&self, entry: LedgerEntry, expected_version: u64) -> Result<()>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Inserts atomically with respect to the per-user idempotency-key
    /// uniqueness check; a losing racer receives the winner's request.
    async fn insert(&self, request: WithdrawalRequest) -> Result<Inserted>;

    async fn get(&self, id: Uuid) -> Result<Option<WithdrawalRequest>>;

    async fn find_by_idempotency_key(
        &self,
        user: Uuid,
        key: &str,
    ) -> Result<Option<WithdrawalRequest>>;

    async fn find_by_payout_id(&self, payout_id: &str) -> Result<Option<WithdrawalRequest>>;

    /// Conditional update keyed on the expected current status. At most one
    /// of several racing transitions succeeds; losers get
    /// `StaleRequestState`.
    async fn transition(
        &self,
        id: Uuid,
        expected: WithdrawalStatus,
        transition: Transition,
    ) -> Result<WithdrawalRequest>;

    async fn list(&self, filter: RequestFilter) -> Result<Vec<WithdrawalRequest>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomic get-or-insert keyed by `external_event_id`, performed before
    /// any business processing so that duplicate deliveries are caught even
    /// after a crash.
    async fn admit(&self, record: WebhookEventRecord) -> Result<Admission>;

    /// Marks the record processed with its final outcome. A record that was
    /// already finalized is left untouched (append-only audit trail).
    async fn finalize(&self, external_event_id: &str, outcome: EventOutcome) -> Result<()>;

    async fn get(&self, external_event_id: &str) -> Result<Option<WebhookEventRecord>>;
}

/// Outbound boundary to the payment processor's payout-creation API.
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    /// Initiates a payout and returns the gateway-side payout id. Must be
    /// called with a stable idempotency key per request so a transport retry
    /// cannot trigger two real payouts.
    async fn initiate(
        &self,
        amount: Amount,
        currency: &str,
        bank_account_ref: &str,
        idempotency_key: &str,
    ) -> Result<String>;
}

/// Outbound fire-and-forget collaborator, told about every terminal
/// transition. Failures must never roll back a state transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user: Uuid, request_id: Uuid, status: WithdrawalStatus) -> Result<()>;
}
