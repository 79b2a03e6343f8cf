//! In-memory stand-in for an RBD pool set
//!
//! The cluster keeps the refusal rules of the real backend that the collector
//! has to respect: images with snapshots cannot be removed, snapshots with
//! clones cannot be unprotected, protected or mapped snapshots cannot be
//! removed and mapped images cannot be removed. Everything the collector does
//! is recorded in a [`Ledger`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use storage_contracts::{
    StoreError, StoreErrorKind, UnmapState, VolumeStore, unmap_until_absent,
};
use storage_types::{Entity, Protection, SnapshotId, VolumeId};

use crate::ledger::{Ledger, LedgerEntry, Op};

pub const DEFAULT_MAX_UNMAP_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct ImageKey {
    pool: String,
    /// Wire image name, zombie marker included
    name: String,
}

impl ImageKey {
    fn of(volume: &VolumeId) -> Self {
        Self {
            pool: volume.pool.clone(),
            name: volume.image_name(),
        }
    }

    fn render(&self) -> String {
        format!("{}/{}", self.pool, self.name)
    }
}

#[derive(Debug, Clone, Default)]
struct Mapping {
    count: u32,
    /// Unmap keeps reporting success without ever draining
    stuck: bool,
}

impl Mapping {
    fn unmap(&mut self) -> UnmapState {
        if self.stuck {
            return UnmapState::Unmapped;
        }
        if self.count == 0 {
            UnmapState::NotMapped
        } else {
            self.count -= 1;
            UnmapState::Unmapped
        }
    }

    fn is_mapped(&self) -> bool {
        self.stuck || self.count > 0
    }
}

#[derive(Debug, Clone, Default)]
struct Snap {
    protection: Protection,
    mapping: Mapping,
}

#[derive(Debug, Clone, Default)]
struct Image {
    size: String,
    mapping: Mapping,
    snapshots: BTreeMap<String, Snap>,
    parent: Option<(ImageKey, String)>,
}

#[derive(Debug, Default)]
struct ClusterState {
    images: BTreeMap<ImageKey, Image>,
    ledger: Ledger,
    faults: Vec<(Op, String)>,
    next_device: u32,
}

impl ClusterState {
    fn clones_of(&self, key: &ImageKey, snapshot: &str) -> Vec<String> {
        self.images
            .iter()
            .filter(|(_, image)| {
                image
                    .parent
                    .as_ref()
                    .is_some_and(|(parent, snap)| parent == key && snap == snapshot)
            })
            .map(|(clone, _)| clone.render())
            .collect()
    }

    fn image(&self, volume: &VolumeId) -> Result<&Image, StoreError> {
        self.images
            .get(&ImageKey::of(volume))
            .ok_or_else(|| StoreError::not_found(volume.to_string(), "no such image"))
    }

    fn image_mut(&mut self, volume: &VolumeId) -> Result<&mut Image, StoreError> {
        self.images
            .get_mut(&ImageKey::of(volume))
            .ok_or_else(|| StoreError::not_found(volume.to_string(), "no such image"))
    }

    fn snap_mut(&mut self, snapshot: &SnapshotId) -> Result<&mut Snap, StoreError> {
        let target = snapshot.to_string();
        self.image_mut(&snapshot.volume)?
            .snapshots
            .get_mut(&snapshot.wire_name())
            .ok_or_else(|| StoreError::not_found(target, "no such snapshot"))
    }

    fn take_fault(&mut self, op: Op, target: &str) -> Option<StoreError> {
        let position = self
            .faults
            .iter()
            .position(|(fault_op, fault_target)| *fault_op == op && fault_target == target)?;
        self.faults.remove(position);
        Some(StoreError::backend(target, "injected failure"))
    }
}

/// Thread-safe in-memory cluster implementing [`VolumeStore`]
#[derive(Debug)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
    max_unmap_attempts: u32,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::with_unmap_limit(DEFAULT_MAX_UNMAP_ATTEMPTS)
    }

    pub fn with_unmap_limit(max_unmap_attempts: u32) -> Self {
        Self {
            state: Mutex::default(),
            max_unmap_attempts,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        // A panicking test thread must not hide the state from the others.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `body` against the state and record the call.
    fn call<T>(
        &self,
        op: Op,
        target: &str,
        body: impl FnOnce(&mut ClusterState) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.lock();
        let result = match state.take_fault(op, target) {
            Some(error) => Err(error),
            None => body(&mut *state),
        };

        state.ledger.record(LedgerEntry {
            op,
            target: target.to_string(),
            result: result.as_ref().map(drop).map_err(|error| error.kind),
            removed: matches!(result, Ok((_, true))),
        });
        result.map(|(value, _)| value)
    }

    /// Make the next `op` on `target` fail with a backend error.
    pub fn fail_next(&self, op: Op, target: &str) {
        self.lock().faults.push((op, target.to_string()));
    }

    /// Make unmap of `entity` report success forever.
    pub fn stick_mapping(&self, entity: &Entity) -> Result<(), StoreError> {
        let mut state = self.lock();
        match entity {
            Entity::Volume(volume) => state.image_mut(volume)?.mapping.stuck = true,
            Entity::Snapshot(snapshot) => state.snap_mut(snapshot)?.mapping.stuck = true,
        }
        Ok(())
    }

    pub fn ledger(&self) -> Ledger {
        self.lock().ledger.clone()
    }

    pub fn clear_ledger(&self) {
        self.lock().ledger.clear();
    }

    /// Every image and snapshot currently present, fully qualified and sorted.
    pub fn inventory(&self) -> Vec<String> {
        let state = self.lock();
        let mut names = Vec::new();
        for (key, image) in &state.images {
            let rendered = key.render();
            for snapshot in image.snapshots.keys() {
                names.push(format!("{rendered}@{snapshot}"));
            }
            names.push(rendered);
        }
        names.sort();
        names
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.inventory().iter().any(|name| name == identifier)
    }

    pub fn protection(&self, snapshot: &SnapshotId) -> Option<Protection> {
        let mut state = self.lock();
        state.snap_mut(snapshot).ok().map(|snap| snap.protection)
    }

    pub fn map_count(&self, entity: &Entity) -> Option<u32> {
        let mut state = self.lock();
        match entity {
            Entity::Volume(volume) => state.image(volume).ok().map(|image| image.mapping.count),
            Entity::Snapshot(snapshot) => state.snap_mut(snapshot).ok().map(|snap| snap.mapping.count),
        }
    }
}

impl VolumeStore for MemoryCluster {
    fn volume_create(&self, volume: &VolumeId, size: &str) -> Result<(), StoreError> {
        let target = volume.to_string();
        self.call(Op::VolumeCreate, &target, |state| {
            let key = ImageKey::of(volume);
            if state.images.contains_key(&key) {
                return Err(StoreError::backend(target.clone(), "image already exists"));
            }
            state.images.insert(
                key,
                Image {
                    size: size.to_string(),
                    ..Image::default()
                },
            );
            Ok(((), false))
        })
    }

    fn volume_exists(&self, volume: &VolumeId) -> Result<bool, StoreError> {
        self.call(Op::VolumeExists, &volume.to_string(), |state| {
            Ok((state.images.contains_key(&ImageKey::of(volume)), false))
        })
    }

    fn volume_delete(&self, volume: &VolumeId) -> Result<(), StoreError> {
        let target = volume.to_string();
        self.call(Op::VolumeDelete, &target, |state| {
            let key = ImageKey::of(volume);
            let Some(image) = state.images.get(&key) else {
                return Ok(((), false));
            };
            if !image.snapshots.is_empty() {
                return Err(StoreError::backend(target.clone(), "image has snapshots"));
            }
            if image.mapping.is_mapped() {
                return Err(StoreError::backend(target.clone(), "image is mapped"));
            }
            state.images.remove(&key);
            Ok(((), true))
        })
    }

    fn volume_map(&self, volume: &VolumeId) -> Result<String, StoreError> {
        self.call(Op::VolumeMap, &volume.to_string(), |state| {
            state.image_mut(volume)?.mapping.count += 1;
            let device = format!("/dev/rbd{}", state.next_device);
            state.next_device += 1;
            Ok((device, false))
        })
    }

    fn unmap(&self, entity: &Entity, until_absent: bool) -> Result<(), StoreError> {
        let target = entity.to_string();
        unmap_until_absent(entity, until_absent, self.max_unmap_attempts, || {
            self.call(Op::Unmap, &target, |state| {
                let mapping = match entity {
                    Entity::Volume(volume) => state.image_mut(volume).map(|image| &mut image.mapping),
                    Entity::Snapshot(snapshot) => state.snap_mut(snapshot).map(|snap| &mut snap.mapping),
                };
                match mapping {
                    Ok(mapping) => Ok((mapping.unmap(), false)),
                    Err(error) if error.is_not_found() => Ok((UnmapState::NotMapped, false)),
                    Err(error) => Err(error),
                }
            })
        })
    }

    fn volume_rename(&self, from: &VolumeId, to: &VolumeId) -> Result<(), StoreError> {
        let target = from.to_string();
        self.call(Op::VolumeRename, &target, |state| {
            if from.pool != to.pool {
                return Err(StoreError::backend(target.clone(), "cannot rename across pools"));
            }
            let old = ImageKey::of(from);
            let new = ImageKey::of(to);
            if state.images.contains_key(&new) {
                return Err(StoreError::backend(target.clone(), "destination exists"));
            }
            let image = state
                .images
                .remove(&old)
                .ok_or_else(|| StoreError::not_found(target.clone(), "no such image"))?;
            state.images.insert(new.clone(), image);

            for clone in state.images.values_mut() {
                if let Some((parent, _)) = clone.parent.as_mut()
                    && *parent == old
                {
                    *parent = new.clone();
                }
            }
            Ok(((), false))
        })
    }

    fn volume_copy(&self, from: &VolumeId, to: &VolumeId) -> Result<(), StoreError> {
        let target = from.to_string();
        self.call(Op::VolumeCopy, &target, |state| {
            let size = state.image(from)?.size.clone();
            let key = ImageKey::of(to);
            if state.images.contains_key(&key) {
                return Err(StoreError::backend(target.clone(), "destination exists"));
            }
            state.images.insert(
                key,
                Image {
                    size,
                    ..Image::default()
                },
            );
            Ok(((), false))
        })
    }

    fn volume_get_parent(&self, volume: &VolumeId) -> Result<String, StoreError> {
        let target = volume.to_string();
        self.call(Op::VolumeGetParent, &target, |state| {
            let (parent, snapshot) = state
                .image(volume)?
                .parent
                .as_ref()
                .ok_or_else(|| StoreError::not_found(target.clone(), "image is not a clone"))?;
            Ok((format!("{}@{}", parent.render(), snapshot), false))
        })
    }

    fn volume_list_snapshots(&self, volume: &VolumeId) -> Result<Vec<String>, StoreError> {
        let target = volume.to_string();
        self.call(Op::VolumeListSnapshots, &target, |state| {
            let names: Vec<String> = state.image(volume)?.snapshots.keys().cloned().collect();
            if names.is_empty() {
                return Err(StoreError::not_found(target.clone(), "image has no snapshots"));
            }
            Ok((names, false))
        })
    }

    fn snapshot_create(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        let target = snapshot.to_string();
        self.call(Op::SnapshotCreate, &target, |state| {
            let image = state.image_mut(&snapshot.volume)?;
            let name = snapshot.wire_name();
            if image.snapshots.contains_key(&name) {
                return Err(StoreError::backend(target.clone(), "snapshot already exists"));
            }
            image.snapshots.insert(name, Snap::default());
            Ok(((), false))
        })
    }

    fn snapshot_delete(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        let target = snapshot.to_string();
        self.call(Op::SnapshotDelete, &target, |state| {
            let key = ImageKey::of(&snapshot.volume);
            let name = snapshot.wire_name();
            let has_clones = !state.clones_of(&key, &name).is_empty();
            let Some(image) = state.images.get_mut(&key) else {
                return Ok(((), false));
            };
            let Some(snap) = image.snapshots.get(&name) else {
                return Ok(((), false));
            };
            if snap.protection == Protection::Protected {
                return Err(StoreError::backend(target.clone(), "snapshot is protected"));
            }
            if has_clones {
                return Err(StoreError::backend(target.clone(), "snapshot has clones"));
            }
            if snap.mapping.is_mapped() {
                return Err(StoreError::backend(target.clone(), "snapshot is mapped"));
            }
            image.snapshots.remove(&name);
            Ok(((), true))
        })
    }

    fn snapshot_protect(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        self.call(Op::SnapshotProtect, &snapshot.to_string(), |state| {
            state.snap_mut(snapshot)?.protection = Protection::Protected;
            Ok(((), false))
        })
    }

    fn snapshot_unprotect(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        let target = snapshot.to_string();
        self.call(Op::SnapshotUnprotect, &target, |state| {
            let key = ImageKey::of(&snapshot.volume);
            if !state.clones_of(&key, &snapshot.wire_name()).is_empty() {
                return Err(StoreError::backend(target.clone(), "snapshot has clones"));
            }
            match state.snap_mut(snapshot) {
                Ok(snap) => snap.protection = Protection::Unprotected,
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error),
            }
            Ok(((), false))
        })
    }

    fn snapshot_rename(&self, from: &SnapshotId, to: &SnapshotId) -> Result<(), StoreError> {
        let target = from.to_string();
        self.call(Op::SnapshotRename, &target, |state| {
            if from.volume != to.volume {
                return Err(StoreError::backend(target.clone(), "cannot move snapshot between images"));
            }
            let key = ImageKey::of(&from.volume);
            let old = from.wire_name();
            let new = to.wire_name();
            let image = state.image_mut(&from.volume)?;
            if image.snapshots.contains_key(&new) {
                return Err(StoreError::backend(target.clone(), "destination exists"));
            }
            let snap = image
                .snapshots
                .remove(&old)
                .ok_or_else(|| StoreError::not_found(target.clone(), "no such snapshot"))?;
            image.snapshots.insert(new.clone(), snap);

            for clone in state.images.values_mut() {
                if let Some((parent, name)) = clone.parent.as_mut()
                    && *parent == key
                    && *name == old
                {
                    *name = new.clone();
                }
            }
            Ok(((), false))
        })
    }

    fn snapshot_list_clones(&self, snapshot: &SnapshotId) -> Result<Vec<String>, StoreError> {
        let target = snapshot.to_string();
        self.call(Op::SnapshotListClones, &target, |state| {
            let name = snapshot.wire_name();
            if !state.image(&snapshot.volume)?.snapshots.contains_key(&name) {
                return Err(StoreError::not_found(target.clone(), "no such snapshot"));
            }
            let clones = state.clones_of(&ImageKey::of(&snapshot.volume), &name);
            if clones.is_empty() {
                return Err(StoreError::not_found(target.clone(), "snapshot has no clones"));
            }
            Ok((clones, false))
        })
    }

    fn snapshot_rollback(&self, snapshot: &SnapshotId) -> Result<(), StoreError> {
        self.call(Op::SnapshotRollback, &snapshot.to_string(), |state| {
            state.snap_mut(snapshot)?;
            Ok(((), false))
        })
    }

    fn clone_create(&self, source: &SnapshotId, target: &VolumeId) -> Result<(), StoreError> {
        let rendered = target.to_string();
        self.call(Op::CloneCreate, &rendered, |state| {
            let image = state.image(&source.volume)?;
            let size = image.size.clone();
            let snap = image
                .snapshots
                .get(&source.wire_name())
                .ok_or_else(|| StoreError::not_found(source.to_string(), "no such snapshot"))?;
            if snap.protection != Protection::Protected {
                return Err(StoreError::new(
                    StoreErrorKind::Backend,
                    source.to_string(),
                    "snapshot must be protected before cloning",
                ));
            }
            let key = ImageKey::of(target);
            if state.images.contains_key(&key) {
                return Err(StoreError::backend(rendered.clone(), "image already exists"));
            }
            state.images.insert(
                key,
                Image {
                    size,
                    parent: Some((ImageKey::of(&source.volume), source.wire_name())),
                    ..Image::default()
                },
            );
            Ok(((), false))
        })
    }
}
