// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod unmap;

pub use error::{StoreError, StoreErrorKind};
pub use unmap::{UnmapState, unmap_until_absent};
