// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for RBD volume lineage
//!
//! These types are shared by every layer of the stack:
//!
//! - **storage-contracts**: the backend trait speaks in these identifiers
//! - **storage-sys**: renders them into `rbd` command lines
//! - **storage-gc**: makes deletion decisions over them
//!
//! ## Naming
//!
//! The cluster has no notion of lineage state beyond names, so a tombstoned
//! volume or snapshot is renamed with a `zombie_` prefix. [`identifier`] is the
//! only place that prefix is encoded or decoded.

pub mod identifier;

pub use identifier::{
    Entity, IdentifierError, LineageKey, Liveness, Protection, SnapshotId, VolumeId,
    ZOMBIE_PREFIX,
};
