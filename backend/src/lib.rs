//! Backing-store contract and the two primitives built on it.
//!
//! The runtime serializes cross-process work through two small primitives:
//! a per-session [`SequenceAllocator`] and an advisory [`LockManager`]. Both
//! sit on top of [`KeyValueBackend`], a Redis-class contract of three atomic
//! operations (set-if-absent-with-expiry, compare-and-delete, counter-range
//! reservation). [`MemoryBackend`] implements the contract in-process for
//! single-node deployments and tests.

mod allocator;
mod kv;
mod lock;
mod memory;

pub use allocator::{AllocatorError, SequenceAllocator};
pub use kv::{BackendError, KeyValueBackend};
pub use lock::{LockError, LockManager, LockOptions, LockOutcome, LockToken};
pub use memory::MemoryBackend;
