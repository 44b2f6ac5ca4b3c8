//! Application layer containing the core business logic orchestration.
//!
//! `Ledger` is the only writer of balances, `WithdrawalService` drives the
//! request lifecycle, and `WebhookProcessor` reconciles gateway deliveries
//! against internal state.

pub mod ledger;
pub mod reconciliation;
pub mod service;
