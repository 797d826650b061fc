//! Storage layers: in-process memory (L1) and Redis-backed remote (L2).

pub mod memory;
pub mod remote;

pub use memory::{MemoryStore, MemoryStoreConfig, ReadOutcome};
pub use remote::RemoteStore;
