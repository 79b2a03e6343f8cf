// SPDX-License-Identifier: GPL-3.0-only

use storage_types::{Entity, SnapshotId, VolumeId};

use crate::StoreError;

/// One blocking backend operation per call.
///
/// Implementations normalize backend responses before returning:
/// "already absent" on delete and "already in the requested state" on
/// protect, unprotect and unmap are reported as success. Lookups that find
/// nothing return [`StoreErrorKind::NotFound`](crate::StoreErrorKind::NotFound)
/// rather than an empty payload so callers have to branch on it.
pub trait VolumeStore: Send + Sync {
    fn volume_create(&self, volume: &VolumeId, size: &str) -> Result<(), StoreError>;

    fn volume_exists(&self, volume: &VolumeId) -> Result<bool, StoreError>;

    /// Remove an image. Succeeds when the image is already gone.
    fn volume_delete(&self, volume: &VolumeId) -> Result<(), StoreError>;

    /// Map an image as a block device and return the device path.
    fn volume_map(&self, volume: &VolumeId) -> Result<String, StoreError>;

    /// Unmap an image or snapshot. With `until_absent` the request is repeated
    /// until the backend reports nothing left to unmap, bounded by the
    /// implementation's retry limit.
    fn unmap(&self, entity: &Entity, until_absent: bool) -> Result<(), StoreError>;

    fn volume_rename(&self, from: &VolumeId, to: &VolumeId) -> Result<(), StoreError>;

    /// Full, non-sparse copy. The target has no lineage relation to the source.
    fn volume_copy(&self, from: &VolumeId, to: &VolumeId) -> Result<(), StoreError>;

    /// Raw `pool/image@snap` of the snapshot this image was cloned from.
    fn volume_get_parent(&self, volume: &VolumeId) -> Result<String, StoreError>;

    /// Bare snapshot names (`[zombie_]snap`) of an image.
    fn volume_list_snapshots(&self, volume: &VolumeId) -> Result<Vec<String>, StoreError>;

    fn snapshot_create(&self, snapshot: &SnapshotId) -> Result<(), StoreError>;

    /// Remove a snapshot. Succeeds when the snapshot is already gone.
    fn snapshot_delete(&self, snapshot: &SnapshotId) -> Result<(), StoreError>;

    fn snapshot_protect(&self, snapshot: &SnapshotId) -> Result<(), StoreError>;

    fn snapshot_unprotect(&self, snapshot: &SnapshotId) -> Result<(), StoreError>;

    fn snapshot_rename(&self, from: &SnapshotId, to: &SnapshotId) -> Result<(), StoreError>;

    /// Raw `pool/image` identifiers of the clones of a snapshot.
    fn snapshot_list_clones(&self, snapshot: &SnapshotId) -> Result<Vec<String>, StoreError>;

    fn snapshot_rollback(&self, snapshot: &SnapshotId) -> Result<(), StoreError>;

    fn clone_create(&self, source: &SnapshotId, target: &VolumeId) -> Result<(), StoreError>;
}

impl<T: VolumeStore + ?Sized> VolumeStore for &T {
    fn volume_create(&self, volume: &VolumeId, size: &str) -> Result<(), StoreError> {
        (**self).volume_create(volume, size)
    }

    fn volume_exists(&self, volume: &VolumeId) -> Result<bool, StoreError> {
        (**self).volume_exists(volume)
    }

    fn volume_delete(&self, volume: &VolumeId) -> Result<(), StoreError> {
        (**self).volume_delete(volume)
    }

    fn volume_map(&self, volume: &VolumeId) -> Result<String, StoreError> {
        (**self).volume_map(volume)
    }

    fn unmap(&self, entity: &Entity, until_absent: bool) -> Result<(), StoreError> {
        (**self).unmap(entity, until_absent)
    }

    fn volume_rename(&self, from: &VolumeId, to: &VolumeId) -> Result<(), StoreError> {
        (**self).volume_rename(from, to)
    }

    fn volume_copy(&self, from: &VolumeId, to: &VolumeId) -> Result<(), StoreError> {
        (**self).volume_copy(from, to)
    }

    fn volume_get_parent(&self, volume: &VolumeId) -> Result<String, StoreError> {
        (**self).volume_get_parent(volume)
    }

    fn volume_list_snapshots(&self, volume: &VolumeId) -> Result<Vec<String>, StoreError> {
        (**self).volume_list_snapshots(volume)
    }

    fn snapshot_create(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        (**self).snapshot_create(snapshot)
    }

    fn snapshot_delete(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        (**self).snapshot_delete(snapshot)
    }

    fn snapshot_protect(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        (**self).snapshot_protect(snapshot)
    }

    fn snapshot_unprotect(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        (**self).snapshot_unprotect(snapshot)
    }

    fn snapshot_rename(&self, from: &SnapshotId, to: &SnapshotId) -> Result<(), StoreError> {
        (**self).snapshot_rename(from, to)
    }

    fn snapshot_list_clones(&self, snapshot: &SnapshotId) -> Result<Vec<String>, StoreError> {
        (**self).snapshot_list_clones(snapshot)
    }

    fn snapshot_rollback(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        (**self).snapshot_rollback(snapshot)
    }

    fn clone_create(&self, source: &SnapshotId, target: &VolumeId) -> Result<(), StoreError> {
        (**self).clone_create(source, target)
    }
}
