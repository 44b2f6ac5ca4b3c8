//! Inbound/outbound boundaries: the webhook endpoint, the replay-script
//! reader, and the final-state report writer.

pub mod report;
pub mod script;
pub mod webhook;
