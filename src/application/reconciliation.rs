use crate::application::ledger::Ledger;
use crate::domain::event::{EventOutcome, PayoutEvent, PayoutOutcome, WebhookEventRecord};
use crate::domain::ports::{Admission, EventStoreRef, NotifierRef, RequestStoreRef};
use crate::domain::request::{Transition, WithdrawalRequest, WithdrawalStatus};
use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

/// Signs a webhook body with the shared secret: `hex(sha256(secret || body))`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Hash of the raw payload, kept on every audit record.
pub fn payload_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Disposition of a single webhook delivery, reported back to the sender.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct WebhookAck {
    pub external_event_id: Option<String>,
    pub outcome: EventOutcome,
}

/// Consumes gateway payout-status events and drives request/ledger
/// transitions, safely under at-least-once and out-of-order delivery.
///
/// The ordering is what makes redelivery and crash recovery safe without a
/// distributed transaction: the dedup record is admitted before any mutation,
/// the status transition is itself conditional on the current state, and the
/// record is finalized only after the mutation applied.
#[derive(Clone)]
pub struct WebhookProcessor {
    requests: RequestStoreRef,
    events: EventStoreRef,
    ledger: Ledger,
    notifier: NotifierRef,
    secret: String,
}

impl WebhookProcessor {
    pub fn new(
        requests: RequestStoreRef,
        events: EventStoreRef,
        ledger: Ledger,
        notifier: NotifierRef,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            requests,
            events,
            ledger,
            notifier,
            secret: secret.into(),
        }
    }

    /// Processes one delivery: raw body bytes plus the signature header.
    pub async fn process(&self, body: &[u8], signature: &str) -> Result<WebhookAck> {
        let hash = payload_hash(body);

        if signature != sign(&self.secret, body) {
            warn!(payload_hash = %hash, "webhook signature verification failed");
            return self.record_untrusted(&hash).await;
        }

        let event: PayoutEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                // Correctly signed but not a payout event we understand;
                // equally untrusted as a business event.
                warn!(payload_hash = %hash, error = %e, "webhook payload unparseable");
                return self.record_untrusted(&hash).await;
            }
        };

        let record = WebhookEventRecord::new(event.external_event_id.clone(), hash);
        match self.events.admit(record).await? {
            Admission::Processed(_) => {
                debug!(event = %event.external_event_id, "duplicate delivery, already processed");
                return Ok(WebhookAck {
                    external_event_id: Some(event.external_event_id),
                    outcome: EventOutcome::Duplicate,
                });
            }
            Admission::InFlight => {
                debug!(event = %event.external_event_id, "redelivery of unfinished event, reprocessing");
            }
            Admission::New => {}
        }

        let Some(request) = self
            .requests
            .find_by_payout_id(&event.external_payout_id)
            .await?
        else {
            warn!(
                event = %event.external_event_id,
                payout = %event.external_payout_id,
                "webhook references a payout not originated here"
            );
            return self
                .finish(&event.external_event_id, EventOutcome::UnknownReference)
                .await;
        };

        if request.status != WithdrawalStatus::Processing {
            // The transition already happened (redelivery, or a concurrent
            // delivery won); a no-op duplicate.
            debug!(
                event = %event.external_event_id,
                request = %request.id,
                status = %request.status,
                "request already settled, treating delivery as duplicate"
            );
            return self
                .finish(&event.external_event_id, EventOutcome::Duplicate)
                .await;
        }

        self.settle(&event, request).await
    }

    /// Applies the settled outcome to a request that is still processing.
    async fn settle(&self, event: &PayoutEvent, request: WithdrawalRequest) -> Result<WebhookAck> {
        let to = match event.outcome {
            PayoutOutcome::Succeeded => WithdrawalStatus::Completed,
            PayoutOutcome::Failed => WithdrawalStatus::Failed,
        };

        let settled = match self
            .requests
            .transition(request.id, WithdrawalStatus::Processing, Transition::to(to))
            .await
        {
            Ok(settled) => settled,
            Err(_) => {
                // Lost a race against another delivery for the same payout.
                return self
                    .finish(&event.external_event_id, EventOutcome::Duplicate)
                    .await;
            }
        };

        let ledger_result = match event.outcome {
            PayoutOutcome::Succeeded => self.ledger.debit(settled.user, settled.amount).await,
            PayoutOutcome::Failed => self.ledger.release(settled.user, settled.amount).await,
        };
        if let Err(e) = ledger_result {
            // Balance state no longer matches the request we just settled.
            // Halt here: the event stays unfinalized and the error surfaces
            // loudly instead of silently adjusting balances.
            error!(
                event = %event.external_event_id,
                request = %settled.id,
                error = %e,
                "ledger mutation failed after settlement transition"
            );
            return Err(e);
        }

        self.events
            .finalize(&event.external_event_id, EventOutcome::Accepted)
            .await?;
        info!(
            event = %event.external_event_id,
            request = %settled.id,
            status = %settled.status,
            "withdrawal settled from webhook"
        );
        if let Err(e) = self
            .notifier
            .notify(settled.user, settled.id, settled.status)
            .await
        {
            warn!(request = %settled.id, error = %e, "notification failed");
        }

        Ok(WebhookAck {
            external_event_id: Some(event.external_event_id.clone()),
            outcome: EventOutcome::Accepted,
        })
    }

    /// Records a delivery that failed integrity checks. Keyed by payload
    /// hash since no trusted event id exists; acknowledged so the gateway
    /// stops redelivering, with the audit trail carrying the alert.
    async fn record_untrusted(&self, hash: &str) -> Result<WebhookAck> {
        let key = format!("untrusted-{hash}");
        let record = WebhookEventRecord::new(key.clone(), hash);
        match self.events.admit(record).await? {
            Admission::Processed(_) => Ok(WebhookAck {
                external_event_id: None,
                outcome: EventOutcome::Duplicate,
            }),
            Admission::New | Admission::InFlight => {
                self.events
                    .finalize(&key, EventOutcome::RejectedSignature)
                    .await?;
                Ok(WebhookAck {
                    external_event_id: None,
                    outcome: EventOutcome::RejectedSignature,
                })
            }
        }
    }

    async fn finish(&self, event_id: &str, outcome: EventOutcome) -> Result<WebhookAck> {
        self.events.finalize(event_id, outcome).await?;
        Ok(WebhookAck {
            external_event_id: Some(event_id.to_string()),
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::Amount;
    use crate::domain::ports::{EventStore, Notifier, RequestStore, RequestStoreRef};
    use crate::error::{Result, WithdrawalError};
    use crate::infrastructure::in_memory::{
        InMemoryEventStore, InMemoryLedgerStore, InMemoryRequestStore,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    const SECRET: &str = "shhh";

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _: Uuid, _: Uuid, _: WithdrawalStatus) -> Result<()> {
            Err(WithdrawalError::Gateway("notifier down".to_string()))
        }
    }

    struct Fixture {
        processor: WebhookProcessor,
        requests: RequestStoreRef,
        events: EventStoreRef,
        ledger: Ledger,
        user: Uuid,
        request: WithdrawalRequest,
    }

    async fn processing_fixture() -> Fixture {
        let ledger = Ledger::new(Arc::new(InMemoryLedgerStore::new()));
        let requests: RequestStoreRef = Arc::new(InMemoryRequestStore::new());
        let events: EventStoreRef = Arc::new(InMemoryEventStore::new());

        let user = Uuid::new_v4();
        let amount = Amount::new(dec!(400.0)).unwrap();
        ledger
            .credit(user, Amount::new(dec!(1000.0)).unwrap(), "USD")
            .await
            .unwrap();
        ledger.reserve(user, amount).await.unwrap();

        let request = WithdrawalRequest::new(user, amount, "USD", "bank-1", "k1");
        requests.insert(request.clone()).await.unwrap();
        let request = requests
            .transition(
                request.id,
                WithdrawalStatus::Pending,
                Transition::to(WithdrawalStatus::Processing).with_external_payout_id("ext-1"),
            )
            .await
            .unwrap();

        let processor = WebhookProcessor::new(
            requests.clone(),
            events.clone(),
            ledger.clone(),
            Arc::new(NullNotifier),
            SECRET,
        );
        Fixture {
            processor,
            requests,
            events,
            ledger,
            user,
            request,
        }
    }

    fn event_body(event_id: &str, payout_id: &str, outcome: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "external_event_id": event_id,
            "external_payout_id": payout_id,
            "outcome": outcome,
        }))
        .unwrap()
    }

    async fn deliver(fixture: &Fixture, body: &[u8]) -> WebhookAck {
        fixture
            .processor
            .process(body, &sign(SECRET, body))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_event_completes_and_debits() {
        let fixture = processing_fixture().await;
        let body = event_body("evt-1", "ext-1", "succeeded");

        let ack = deliver(&fixture, &body).await;
        assert_eq!(ack.outcome, EventOutcome::Accepted);

        let request = fixture
            .requests
            .get(fixture.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Completed);

        let entry = fixture.ledger.entry(fixture.user).await.unwrap();
        assert_eq!(entry.reserved.0, dec!(0.0));
        assert_eq!(entry.available.0, dec!(600.0));

        let record = fixture.events.get("evt-1").await.unwrap().unwrap();
        assert!(record.is_processed());
        assert_eq!(record.outcome, Some(EventOutcome::Accepted));
    }

    #[tokio::test]
    async fn test_failure_event_fails_and_releases() {
        let fixture = processing_fixture().await;
        let body = event_body("evt-1", "ext-1", "failed");

        let ack = deliver(&fixture, &body).await;
        assert_eq!(ack.outcome, EventOutcome::Accepted);

        let request = fixture
            .requests
            .get(fixture.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Failed);

        let entry = fixture.ledger.entry(fixture.user).await.unwrap();
        assert_eq!(entry.available.0, dec!(1000.0));
        assert_eq!(entry.reserved.0, dec!(0.0));
    }

    #[tokio::test]
    async fn test_redelivery_mutates_ledger_at_most_once() {
        let fixture = processing_fixture().await;
        let body = event_body("evt-1", "ext-1", "succeeded");

        let first = deliver(&fixture, &body).await;
        assert_eq!(first.outcome, EventOutcome::Accepted);
        let second = deliver(&fixture, &body).await;
        assert_eq!(second.outcome, EventOutcome::Duplicate);

        let entry = fixture.ledger.entry(fixture.user).await.unwrap();
        assert_eq!(entry.available.0, dec!(600.0));
        assert_eq!(entry.reserved.0, dec!(0.0));
    }

    #[tokio::test]
    async fn test_conflicting_event_after_settlement_is_duplicate() {
        let fixture = processing_fixture().await;
        deliver(&fixture, &event_body("evt-1", "ext-1", "succeeded")).await;

        // A different event id for the same payout, after settlement.
        let ack = deliver(&fixture, &event_body("evt-2", "ext-1", "failed")).await;
        assert_eq!(ack.outcome, EventOutcome::Duplicate);

        let request = fixture
            .requests
            .get(fixture.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Completed);
        let entry = fixture.ledger.entry(fixture.user).await.unwrap();
        assert_eq!(entry.available.0, dec!(600.0));
    }

    #[tokio::test]
    async fn test_unknown_payout_reference_is_recorded_and_acked() {
        let fixture = processing_fixture().await;
        let body = event_body("evt-9", "ext-unknown", "succeeded");

        let ack = deliver(&fixture, &body).await;
        assert_eq!(ack.outcome, EventOutcome::UnknownReference);

        let record = fixture.events.get("evt-9").await.unwrap().unwrap();
        assert_eq!(record.outcome, Some(EventOutcome::UnknownReference));

        // No state was touched.
        let request = fixture
            .requests
            .get(fixture.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Processing);
    }

    #[tokio::test]
    async fn test_bad_signature_is_recorded_without_transitions() {
        let fixture = processing_fixture().await;
        let body = event_body("evt-1", "ext-1", "succeeded");

        let ack = fixture.processor.process(&body, "forged").await.unwrap();
        assert_eq!(ack.outcome, EventOutcome::RejectedSignature);

        let request = fixture
            .requests
            .get(fixture.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Processing);
        let entry = fixture.ledger.entry(fixture.user).await.unwrap();
        assert_eq!(entry.reserved.0, dec!(400.0));

        let key = format!("untrusted-{}", payload_hash(&body));
        let record = fixture.events.get(&key).await.unwrap().unwrap();
        assert_eq!(record.outcome, Some(EventOutcome::RejectedSignature));
    }

    #[tokio::test]
    async fn test_signed_but_malformed_body_is_recorded() {
        let fixture = processing_fixture().await;
        let body = b"not json at all";

        let ack = fixture
            .processor
            .process(body, &sign(SECRET, body))
            .await
            .unwrap();
        assert_eq!(ack.outcome, EventOutcome::RejectedSignature);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_roll_back() {
        // NullNotifier always errors; settlement must stick regardless.
        let fixture = processing_fixture().await;
        let ack = deliver(&fixture, &event_body("evt-1", "ext-1", "succeeded")).await;
        assert_eq!(ack.outcome, EventOutcome::Accepted);

        let request = fixture
            .requests
            .get(fixture.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_redeliveries_settle_once() {
        let fixture = processing_fixture().await;
        let body = event_body("evt-1", "ext-1", "succeeded");
        let signature = sign(SECRET, &body);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let processor = fixture.processor.clone();
            let body = body.clone();
            let signature = signature.clone();
            handles.push(tokio::spawn(async move {
                processor.process(&body, &signature).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            let ack = handle.await.unwrap().unwrap();
            if ack.outcome == EventOutcome::Accepted {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        let entry = fixture.ledger.entry(fixture.user).await.unwrap();
        assert_eq!(entry.available.0, dec!(600.0));
        assert_eq!(entry.reserved.0, dec!(0.0));
    }
}
