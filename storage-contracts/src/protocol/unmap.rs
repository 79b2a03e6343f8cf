// SPDX-License-Identifier: GPL-3.0-only

use storage_types::Entity;

use super::error::{StoreError, StoreErrorKind};

/// Result of a single unmap request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapState {
    /// One mapping was removed; more may remain.
    Unmapped,
    /// The backend reported the entity as not mapped.
    NotMapped,
}

/// Drive `attempt` until the backend reports the entity as not mapped.
///
/// An entity may be mapped several times, so a single successful unmap does not
/// prove it is gone. With `until_absent` unset one successful request is
/// enough. Up to `max_attempts` mappings are removed; one further request
/// must then report the entity as not mapped, otherwise the loop gives up with
/// [`StoreErrorKind::Timeout`].
pub fn unmap_until_absent<F>(
    entity: &Entity,
    until_absent: bool,
    max_attempts: u32,
    mut attempt: F,
) -> Result<(), StoreError>
where
    F: FnMut() -> Result<UnmapState, StoreError>,
{
    let max_attempts = max_attempts.max(1);

    for _ in 0..=max_attempts {
        match attempt()? {
            UnmapState::NotMapped => return Ok(()),
            UnmapState::Unmapped if !until_absent => return Ok(()),
            UnmapState::Unmapped => {}
        }
    }

    Err(StoreError::new(
        StoreErrorKind::Timeout,
        entity.to_string(),
        format!("still mapped after removing {max_attempts} mappings"),
    ))
}
