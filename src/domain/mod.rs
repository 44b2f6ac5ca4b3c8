//! Domain layer: money newtypes, the per-user ledger entry, the withdrawal
//! request state machine, webhook event records, and the ports the
//! application layer is wired through.

pub mod event;
pub mod ledger;
pub mod ports;
pub mod request;
