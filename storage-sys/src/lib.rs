// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for RBD volume management
//!
//! This crate drives the `rbd` command-line tool and implements the
//! [`storage_contracts::VolumeStore`] contract on top of it:
//! - Process execution behind a replaceable [`CommandRunner`]
//! - Errno-based normalization of rbd exit statuses
//! - Parsing of `rbd info`, `rbd children`, `rbd snap ls` and `rbd map` output
//!
//! These operations talk to the cluster with the configured client identity
//! and should only be called from the collector or an operator tool.

pub mod cmd;
pub mod error;
pub mod rbd;

pub use cmd::{CommandOutcome, CommandRunner, SystemRunner};
pub use error::{Result, SysError};
pub use rbd::{DEFAULT_MAX_UNMAP_ATTEMPTS, RbdCli, RbdSettings};
