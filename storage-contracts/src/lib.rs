// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{StoreError, StoreErrorKind, UnmapState, unmap_until_absent};
pub use traits::VolumeStore;
