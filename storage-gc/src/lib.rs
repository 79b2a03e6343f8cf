// SPDX-License-Identifier: GPL-3.0-only

//! Dependency-aware garbage collection for RBD volumes
//!
//! Deleting a volume or snapshot that clones still depend on would destroy
//! data in use, so the collector either removes an entity or tombstones it
//! ("zombie") until its last dependent disappears, and sweeps tombstones as
//! soon as they become unreferenced.
//!
//! - [`ZombieEngine`] holds the recursive delete algorithm over any
//!   [`VolumeStore`](storage_contracts::VolumeStore)
//! - [`Collector`] serializes passes per lineage tree with a [`LineageLock`]
//! - [`GcConfig`] loads the TOML configuration

pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
#[cfg(feature = "cli")]
pub mod logging;

pub use collector::Collector;
pub use config::{CONFIG_ENV, GcConfig, LogLevel, LoggingConfig};
pub use engine::{Disposal, ZombieEngine};
pub use error::{GcError, Result};
pub use lock::LineageLock;
