//! Receiving side of the payout gateway integration.
//!
//! The endpoint is a thin shell around [`WebhookProcessor`]: it acknowledges
//! every delivery whose event was durably recorded, no matter what the
//! business outcome was, so the gateway stops redelivering. Only an internal
//! failure (a store error before the event could be recorded) answers with a
//! non-ack, which tells the gateway to try again later.

use tracing::error;

use crate::application::reconciliation::WebhookProcessor;
pub use crate::application::reconciliation::sign;
use crate::domain::event::EventOutcome;

/// A raw delivery as it arrives from the payout gateway.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub body: Vec<u8>,
    pub signature: String,
}

/// What the endpoint answers to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    /// `true` tells the gateway the delivery is settled and must not be
    /// retried. `false` requests a redelivery.
    pub acknowledged: bool,
    pub external_event_id: Option<String>,
    pub outcome: Option<EventOutcome>,
}

#[derive(Clone)]
pub struct WebhookEndpoint {
    processor: WebhookProcessor,
}

impl WebhookEndpoint {
    pub fn new(processor: WebhookProcessor) -> Self {
        Self { processor }
    }

    pub async fn handle(&self, delivery: WebhookDelivery) -> WebhookResponse {
        match self.processor.process(&delivery.body, &delivery.signature).await {
            Ok(ack) => WebhookResponse {
                acknowledged: true,
                external_event_id: ack.external_event_id,
                outcome: Some(ack.outcome),
            },
            Err(err) => {
                error!(%err, "webhook processing failed before the event was recorded");
                WebhookResponse {
                    acknowledged: false,
                    external_event_id: None,
                    outcome: None,
                }
            }
        }
    }
}
