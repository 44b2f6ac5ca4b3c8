//! Store adapters and local stand-ins for the external collaborators.

pub mod in_memory;
pub mod local;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
