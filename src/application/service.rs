use crate::application::ledger::Ledger;
use crate::domain::ledger::{Amount, LedgerEntry};
use crate::domain::ports::{Inserted, NotifierRef, PayoutGatewayRef, RequestStoreRef};
use crate::domain::request::{RequestFilter, Transition, WithdrawalRequest, WithdrawalStatus};
use crate::error::{Result, WithdrawalError};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tunables for the withdrawal service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upper bound on the synchronous gateway call in the approve path. A
    /// timeout is indeterminate: the request stays pending, funds stay
    /// reserved, and no automatic retry is attempted.
    pub gateway_timeout: Duration,
    /// Bounded optimistic-concurrency retries for ledger mutations.
    pub ledger_max_attempts: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(30),
            ledger_max_attempts: 3,
        }
    }
}

/// Aggregate counters for the admin surface.
#[derive(Debug, Serialize, Default, PartialEq)]
pub struct WithdrawalStats {
    pub total_requests: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub rejected: usize,
    pub cancelled: usize,
    pub total_completed_amount: Decimal,
}

/// Orchestrates the withdrawal lifecycle: user create/cancel, admin
/// approve/reject, and the pass-through read surface. Every money movement
/// goes through exactly one `Ledger` operation.
#[derive(Clone)]
pub struct WithdrawalService {
    ledger: Ledger,
    requests: RequestStoreRef,
    gateway: PayoutGatewayRef,
    notifier: NotifierRef,
    config: ServiceConfig,
}

impl WithdrawalService {
    pub fn new(
        ledger: Ledger,
        requests: RequestStoreRef,
        gateway: PayoutGatewayRef,
        notifier: NotifierRef,
        config: ServiceConfig,
    ) -> Self {
        let ledger = ledger.with_max_attempts(config.ledger_max_attempts);
        Self {
            ledger,
            requests,
            gateway,
            notifier,
            config,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Opens a ledger entry for a user (no-op if already open).
    pub async fn open_account(&self, user: Uuid, currency: &str) -> Result<LedgerEntry> {
        self.ledger.open(user, currency).await
    }

    /// Credits accrued earnings into a user's available balance.
    pub async fn credit(&self, user: Uuid, amount: Decimal, currency: &str) -> Result<LedgerEntry> {
        let amount = Amount::new(amount)?;
        self.ledger.credit(user, amount, currency).await
    }

    /// Creates a withdrawal request, reserving the funds.
    ///
    /// Idempotent per (user, idempotency_key): a retried create returns the
    /// existing request instead of a second reservation, even when the retry
    /// races the original.
    pub async fn create_request(
        &self,
        user: Uuid,
        amount: Decimal,
        currency: &str,
        bank_account_ref: &str,
        idempotency_key: &str,
    ) -> Result<WithdrawalRequest> {
        let amount = Amount::new(amount)?;
        if bank_account_ref.trim().is_empty() {
            return Err(WithdrawalError::Validation(
                "Bank account reference must not be empty".to_string(),
            ));
        }
        if idempotency_key.trim().is_empty() {
            return Err(WithdrawalError::Validation(
                "Idempotency key must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self
            .requests
            .find_by_idempotency_key(user, idempotency_key)
            .await?
        {
            debug!(%user, idempotency_key, request = %existing.id, "idempotent create replay");
            return Ok(existing);
        }

        let entry = self.ledger.entry(user).await?;
        if entry.currency != currency {
            return Err(WithdrawalError::Validation(format!(
                "Currency mismatch: ledger holds {}, request asks {}",
                entry.currency, currency
            )));
        }

        self.ledger.reserve(user, amount).await?;

        let request =
            WithdrawalRequest::new(user, amount, currency, bank_account_ref, idempotency_key);
        match self.requests.insert(request.clone()).await? {
            Inserted::Created => {
                info!(request = %request.id, %user, amount = %amount.value(), "withdrawal request created");
                Ok(request)
            }
            Inserted::Duplicate(existing) => {
                // Lost a create race on the same key; hand back our
                // reservation and return the winner.
                self.ledger.release(user, amount).await?;
                debug!(%user, idempotency_key, request = %existing.id, "create raced, returning existing request");
                Ok(existing)
            }
        }
    }

    /// Cancels a pending request owned by the caller and returns the
    /// reserved funds. Purely local: no gateway call.
    pub async fn cancel_request(&self, id: Uuid, user: Uuid) -> Result<WithdrawalRequest> {
        let request = self.get_request(id).await?;
        if request.user != user {
            return Err(WithdrawalError::Validation(
                "Caller does not own this request".to_string(),
            ));
        }

        let cancelled = self
            .requests
            .transition(
                id,
                WithdrawalStatus::Pending,
                Transition::to(WithdrawalStatus::Cancelled),
            )
            .await?;
        self.ledger.release(user, cancelled.amount).await?;
        info!(request = %id, %user, "withdrawal request cancelled");
        self.notify(&cancelled).await;
        Ok(cancelled)
    }

    /// Admin approval: initiates the payout through the gateway, then moves
    /// the request to processing. A synchronous gateway failure or timeout
    /// leaves the request pending with funds reserved; the stable
    /// idempotency key (the request id) makes a later retry safe.
    pub async fn approve(&self, id: Uuid, admin_id: Uuid) -> Result<WithdrawalRequest> {
        let request = self.get_request(id).await?;
        if request.status != WithdrawalStatus::Pending {
            return Err(WithdrawalError::StaleRequestState {
                expected: WithdrawalStatus::Pending,
                found: request.status,
            });
        }

        let idempotency_key = request.id.to_string();
        let initiate = self.gateway.initiate(
            request.amount,
            &request.currency,
            &request.bank_account_ref,
            &idempotency_key,
        );
        let payout_id = match timeout(self.config.gateway_timeout, initiate).await {
            Ok(Ok(payout_id)) => payout_id,
            Ok(Err(e)) => {
                warn!(request = %id, error = %e, "payout initiation failed, request stays pending");
                return Err(e);
            }
            Err(_) => {
                warn!(request = %id, "payout initiation timed out, request stays pending");
                return Err(WithdrawalError::GatewayTimeout(
                    self.config.gateway_timeout.as_millis() as u64,
                ));
            }
        };

        match self
            .requests
            .transition(
                id,
                WithdrawalStatus::Pending,
                Transition::to(WithdrawalStatus::Processing)
                    .with_admin(admin_id)
                    .with_external_payout_id(payout_id.clone()),
            )
            .await
        {
            Ok(processing) => {
                info!(request = %id, %admin_id, payout = %payout_id, "withdrawal approved, payout initiated");
                Ok(processing)
            }
            Err(e) => {
                // The request left pending while the payout call was in
                // flight. The payout was initiated; flag it for gateway-side
                // cancellation.
                error!(
                    request = %id,
                    payout = %payout_id,
                    "payout initiated for a request no longer pending; needs manual gateway reconciliation"
                );
                Err(e)
            }
        }
    }

    /// Admin rejection: records the reason and returns the reserved funds.
    pub async fn reject(
        &self,
        id: Uuid,
        admin_id: Uuid,
        reason: &str,
    ) -> Result<WithdrawalRequest> {
        let rejected = self
            .requests
            .transition(
                id,
                WithdrawalStatus::Pending,
                Transition::to(WithdrawalStatus::Rejected)
                    .with_admin(admin_id)
                    .with_rejection_reason(reason),
            )
            .await?;
        self.ledger.release(rejected.user, rejected.amount).await?;
        info!(request = %id, %admin_id, reason, "withdrawal request rejected");
        self.notify(&rejected).await;
        Ok(rejected)
    }

    pub async fn get_request(&self, id: Uuid) -> Result<WithdrawalRequest> {
        self.requests
            .get(id)
            .await?
            .ok_or(WithdrawalError::RequestNotFound(id))
    }

    pub async fn find_request(
        &self,
        user: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<WithdrawalRequest>> {
        self.requests
            .find_by_idempotency_key(user, idempotency_key)
            .await
    }

    pub async fn list_requests(&self, filter: RequestFilter) -> Result<Vec<WithdrawalRequest>> {
        self.requests.list(filter).await
    }

    pub async fn ledger_entry(&self, user: Uuid) -> Result<LedgerEntry> {
        self.ledger.entry(user).await
    }

    pub async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries().await
    }

    pub async fn stats(&self) -> Result<WithdrawalStats> {
        let requests = self.requests.list(RequestFilter::default()).await?;
        let mut by_status: HashMap<WithdrawalStatus, usize> = HashMap::new();
        let mut total_completed_amount = Decimal::ZERO;
        for request in &requests {
            *by_status.entry(request.status).or_default() += 1;
            if request.status == WithdrawalStatus::Completed {
                total_completed_amount += request.amount.value();
            }
        }
        let count = |status| by_status.get(&status).copied().unwrap_or(0);
        Ok(WithdrawalStats {
            total_requests: requests.len(),
            pending: count(WithdrawalStatus::Pending),
            processing: count(WithdrawalStatus::Processing),
            completed: count(WithdrawalStatus::Completed),
            failed: count(WithdrawalStatus::Failed),
            rejected: count(WithdrawalStatus::Rejected),
            cancelled: count(WithdrawalStatus::Cancelled),
            total_completed_amount,
        })
    }

    async fn notify(&self, request: &WithdrawalRequest) {
        if let Err(e) = self
            .notifier
            .notify(request.user, request.id, request.status)
            .await
        {
            warn!(request = %request.id, error = %e, "notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{Notifier, PayoutGateway};
    use crate::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryRequestStore};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGateway {
        calls: AtomicUsize,
        fail: bool,
        hang: bool,
    }

    impl FakeGateway {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                hang: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl PayoutGateway for FakeGateway {
        async fn initiate(
            &self,
            _amount: Amount,
            _currency: &str,
            _bank_account_ref: &str,
            idempotency_key: &str,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(WithdrawalError::Gateway("connection refused".to_string()));
            }
            Ok(format!("po-{idempotency_key}"))
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _: Uuid, _: Uuid, _: WithdrawalStatus) -> Result<()> {
            Ok(())
        }
    }

    fn service_with(gateway: FakeGateway) -> WithdrawalService {
        let ledger = Ledger::new(Arc::new(InMemoryLedgerStore::new()));
        WithdrawalService::new(
            ledger,
            Arc::new(InMemoryRequestStore::new()),
            Arc::new(gateway),
            Arc::new(NullNotifier),
            ServiceConfig {
                gateway_timeout: Duration::from_millis(50),
                ..ServiceConfig::default()
            },
        )
    }

    async fn seeded(service: &WithdrawalService) -> Uuid {
        let user = Uuid::new_v4();
        service.credit(user, dec!(1000.0), "USD").await.unwrap();
        user
    }

    #[tokio::test]
    async fn test_create_reserves_funds() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;

        let request = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Pending);

        let entry = service.ledger_entry(user).await.unwrap();
        assert_eq!(entry.available.0, dec!(600.0));
        assert_eq!(entry.reserved.0, dec!(400.0));
    }

    #[tokio::test]
    async fn test_create_rejects_insufficient_funds_without_partial_reservation() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;

        let result = service
            .create_request(user, dec!(5000.0), "USD", "bank-1", "k1")
            .await;
        assert!(matches!(
            result,
            Err(WithdrawalError::InsufficientFunds { .. })
        ));

        let entry = service.ledger_entry(user).await.unwrap();
        assert_eq!(entry.reserved.0, dec!(0.0));
        assert_eq!(entry.available.0, dec!(1000.0));
    }

    #[tokio::test]
    async fn test_create_rejects_currency_mismatch() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;

        let result = service
            .create_request(user, dec!(10.0), "EUR", "bank-1", "k1")
            .await;
        assert!(matches!(result, Err(WithdrawalError::Validation(_))));
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_returns_existing() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;

        let first = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();
        let second = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        // Exactly one reservation.
        let entry = service.ledger_entry(user).await.unwrap();
        assert_eq!(entry.reserved.0, dec!(400.0));
    }

    #[tokio::test]
    async fn test_cancel_returns_funds_and_requires_ownership() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;
        let request = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();

        let stranger = Uuid::new_v4();
        assert!(matches!(
            service.cancel_request(request.id, stranger).await,
            Err(WithdrawalError::Validation(_))
        ));

        let cancelled = service.cancel_request(request.id, user).await.unwrap();
        assert_eq!(cancelled.status, WithdrawalStatus::Cancelled);
        let entry = service.ledger_entry(user).await.unwrap();
        assert_eq!(entry.available.0, dec!(1000.0));
    }

    #[tokio::test]
    async fn test_cancel_non_pending_conflicts_and_leaves_balances() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;
        let request = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();
        service.approve(request.id, Uuid::new_v4()).await.unwrap();

        let result = service.cancel_request(request.id, user).await;
        assert!(matches!(
            result,
            Err(WithdrawalError::StaleRequestState { .. })
        ));
        let entry = service.ledger_entry(user).await.unwrap();
        assert_eq!(entry.reserved.0, dec!(400.0));
    }

    #[tokio::test]
    async fn test_approve_moves_to_processing_with_payout_id() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;
        let request = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();

        let admin = Uuid::new_v4();
        let processing = service.approve(request.id, admin).await.unwrap();
        assert_eq!(processing.status, WithdrawalStatus::Processing);
        assert_eq!(processing.admin_id, Some(admin));
        assert_eq!(
            processing.external_payout_id,
            Some(format!("po-{}", request.id))
        );
    }

    #[tokio::test]
    async fn test_approve_gateway_failure_leaves_pending() {
        let service = service_with(FakeGateway::failing());
        let user = seeded(&service).await;
        let request = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();

        let result = service.approve(request.id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(WithdrawalError::Gateway(_))));

        let request = service.get_request(request.id).await.unwrap();
        assert_eq!(request.status, WithdrawalStatus::Pending);
        assert!(request.external_payout_id.is_none());
        let entry = service.ledger_entry(user).await.unwrap();
        assert_eq!(entry.reserved.0, dec!(400.0));
    }

    #[tokio::test]
    async fn test_approve_timeout_leaves_pending() {
        let service = service_with(FakeGateway::hanging());
        let user = seeded(&service).await;
        let request = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();

        let result = service.approve(request.id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(WithdrawalError::GatewayTimeout(_))));

        let request = service.get_request(request.id).await.unwrap();
        assert_eq!(request.status, WithdrawalStatus::Pending);
    }

    #[tokio::test]
    async fn test_reject_records_reason_and_releases() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;
        let request = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();

        let admin = Uuid::new_v4();
        let rejected = service
            .reject(request.id, admin, "suspicious account")
            .await
            .unwrap();
        assert_eq!(rejected.status, WithdrawalStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("suspicious account"));

        let entry = service.ledger_entry(user).await.unwrap();
        assert_eq!(entry.available.0, dec!(1000.0));
    }

    #[tokio::test]
    async fn test_concurrent_approve_and_reject_admit_one_winner() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;
        let request = service
            .create_request(user, dec!(400.0), "USD", "bank-1", "k1")
            .await
            .unwrap();

        let approve = {
            let service = service.clone();
            let id = request.id;
            tokio::spawn(async move { service.approve(id, Uuid::new_v4()).await })
        };
        let reject = {
            let service = service.clone();
            let id = request.id;
            tokio::spawn(async move { service.reject(id, Uuid::new_v4(), "racing").await })
        };

        let results = [approve.await.unwrap(), reject.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);

        // Whichever lost, the ledger is consistent: reserved funds either
        // still track the processing payout, or were released exactly once.
        let request = service.get_request(request.id).await.unwrap();
        let entry = service.ledger_entry(user).await.unwrap();
        match request.status {
            WithdrawalStatus::Processing => assert_eq!(entry.reserved.0, dec!(400.0)),
            WithdrawalStatus::Rejected => assert_eq!(entry.available.0, dec!(1000.0)),
            other => panic!("unexpected status {other}"),
        }
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let service = service_with(FakeGateway::ok());
        let user = seeded(&service).await;
        let r1 = service
            .create_request(user, dec!(100.0), "USD", "bank-1", "k1")
            .await
            .unwrap();
        service
            .create_request(user, dec!(200.0), "USD", "bank-1", "k2")
            .await
            .unwrap();
        service.cancel_request(r1.id, user).await.unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.pending, 1);
    }
}
