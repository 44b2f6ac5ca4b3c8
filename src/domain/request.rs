use crate::domain::ledger::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Withdrawal request lifecycle:
/// `Pending -> {Cancelled, Rejected, Processing} -> {Completed, Failed}`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Cancelled,
    Rejected,
    Processing,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    /// Terminal states admit no further transition and are retained for audit.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Rejected | Self::Completed | Self::Failed
        )
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A request to pay out accumulated balance to an external bank account.
///
/// Exactly one ledger reservation is associated with a request from creation
/// until it is released (cancel/reject/failed) or debited (completed).
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub user: Uuid,
    pub amount: Amount,
    pub currency: String,
    pub bank_account_ref: String,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Admin who approved or rejected the request.
    pub admin_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    /// Gateway-side payout reference, assigned once the payout is initiated.
    pub external_payout_id: Option<String>,
    /// Client-supplied token, unique per user, guarding against retried
    /// create calls.
    pub idempotency_key: String,
}

impl WithdrawalRequest {
    pub fn new(
        user: Uuid,
        amount: Amount,
        currency: impl Into<String>,
        bank_account_ref: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user,
            amount,
            currency: currency.into(),
            bank_account_ref: bank_account_ref.into(),
            status: WithdrawalStatus::Pending,
            created_at: now,
            updated_at: now,
            admin_id: None,
            rejection_reason: None,
            external_payout_id: None,
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// Patch applied by a conditional status update. Stores apply it only when
/// the request currently holds the expected status, which serializes racing
/// transitions (approve vs cancel, duplicate webhook deliveries).
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: WithdrawalStatus,
    pub admin_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub external_payout_id: Option<String>,
}

impl Transition {
    pub fn to(status: WithdrawalStatus) -> Self {
        Self {
            to: status,
            admin_id: None,
            rejection_reason: None,
            external_payout_id: None,
        }
    }

    pub fn with_admin(mut self, admin_id: Uuid) -> Self {
        self.admin_id = Some(admin_id);
        self
    }

    pub fn with_rejection_reason(mut self, reason: impl Into<String>) -> Self {
        self.rejection_reason = Some(reason.into());
        self
    }

    pub fn with_external_payout_id(mut self, payout_id: impl Into<String>) -> Self {
        self.external_payout_id = Some(payout_id.into());
        self
    }

    /// Applies the patch to a request, refreshing `updated_at`.
    pub fn apply(self, request: &mut WithdrawalRequest) {
        request.status = self.to;
        if let Some(admin_id) = self.admin_id {
            request.admin_id = Some(admin_id);
        }
        if let Some(reason) = self.rejection_reason {
            request.rejection_reason = Some(reason);
        }
        if let Some(payout_id) = self.external_payout_id {
            request.external_payout_id = Some(payout_id);
        }
        request.updated_at = Utc::now();
    }
}

/// Filter for the admin read surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub user: Option<Uuid>,
    pub status: Option<WithdrawalStatus>,
}
