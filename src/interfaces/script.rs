use crate::domain::event::PayoutOutcome;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::BufRead;

/// A single line of a replay script.
///
/// Withdrawals are referenced by `user` + idempotency `key` rather than by
/// request id, since ids are assigned at runtime; the driver resolves them
/// against the request store.
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    OpenAccount {
        user: String,
        currency: String,
    },
    Credit {
        user: String,
        amount: Decimal,
        currency: String,
    },
    CreateWithdrawal {
        user: String,
        amount: Decimal,
        currency: String,
        bank_account_ref: String,
        key: String,
    },
    Cancel {
        user: String,
        key: String,
    },
    Approve {
        user: String,
        key: String,
        admin: String,
    },
    Reject {
        user: String,
        key: String,
        admin: String,
        reason: String,
    },
    /// Synthesizes a signed gateway delivery for the payout backing the
    /// referenced withdrawal.
    Webhook {
        event_id: String,
        user: String,
        key: String,
        outcome: PayoutOutcome,
    },
}

/// Reads operations from a JSON-lines source.
///
/// One JSON object per line; blank lines are skipped. Parsing is lazy, so
/// large scripts stream without loading everything into memory.
pub struct OperationReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> OperationReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Returns an iterator that lazily reads and deserializes operations.
    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.source
            .lines()
            .filter(|line| line.as_ref().map(|l| !l.trim().is_empty()).unwrap_or(true))
            .map(|line| {
                let line = line?;
                Ok(serde_json::from_str(&line)?)
            })
    }
}
