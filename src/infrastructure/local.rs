use crate::domain::ledger::Amount;
use crate::domain::ports::{Notifier, PayoutGateway};
use crate::domain::request::WithdrawalStatus;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Deterministic local payout gateway for the replay driver and tests.
///
/// Issues sequential `po-N` ids and honors the idempotency-key contract: a
/// repeated key returns the id already issued instead of creating a second
/// payout.
#[derive(Default, Clone)]
pub struct SequentialPayoutGateway {
    issued: Arc<Mutex<HashMap<String, String>>>,
}

impl SequentialPayoutGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutGateway for SequentialPayoutGateway {
    async fn initiate(
        &self,
        _amount: Amount,
        _currency: &str,
        _bank_account_ref: &str,
        idempotency_key: &str,
    ) -> Result<String> {
        let mut issued = self.issued.lock().await;
        if let Some(existing) = issued.get(idempotency_key) {
            return Ok(existing.clone());
        }
        let payout_id = format!("po-{}", issued.len() + 1);
        issued.insert(idempotency_key.to_string(), payout_id.clone());
        Ok(payout_id)
    }
}

/// Notification collaborator that logs terminal transitions.
#[derive(Default, Clone)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user: Uuid, request_id: Uuid, status: WithdrawalStatus) -> Result<()> {
        info!(%user, request = %request_id, %status, "withdrawal notification");
        Ok(())
    }
}
