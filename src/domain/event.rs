use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gateway-reported settlement result carried by a webhook payload.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PayoutOutcome {
    Succeeded,
    Failed,
}

/// Wire shape of a payout-status webhook body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PayoutEvent {
    pub external_event_id: String,
    pub external_payout_id: String,
    pub outcome: PayoutOutcome,
}

/// How a delivery was disposed of by the reconciliation processor.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum EventOutcome {
    Accepted,
    Duplicate,
    RejectedSignature,
    UnknownReference,
}

/// Append-only audit record for an inbound webhook delivery.
///
/// Admitted (keyed by `external_event_id`) before any business processing so
/// redeliveries are detected even if processing crashed mid-way; finalized
/// exactly once by setting `processed_at` and `outcome`, and never mutated
/// afterwards.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WebhookEventRecord {
    pub external_event_id: String,
    pub payload_hash: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub outcome: Option<EventOutcome>,
}

impl WebhookEventRecord {
    pub fn new(external_event_id: impl Into<String>, payload_hash: impl Into<String>) -> Self {
        Self {
            external_event_id: external_event_id.into(),
            payload_hash: payload_hash.into(),
            received_at: Utc::now(),
            processed_at: None,
            outcome: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}
