//! Test doubles for the storage collector
//!
//! [`MemoryCluster`] implements the volume store contract in memory and keeps a
//! [`Ledger`] of every call so tests can assert on ordering and on references
//! to entities that were already removed.

pub mod cluster;
pub mod ledger;

pub use cluster::{DEFAULT_MAX_UNMAP_ATTEMPTS, MemoryCluster};
pub use ledger::{Ledger, LedgerEntry, Op};
