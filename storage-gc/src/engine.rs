// SPDX-License-Identifier: GPL-3.0-only

//! Recursive zombie deletion
//!
//! A volume is removed once none of its snapshots survive; a snapshot is
//! removed once none of its clones survive. Whatever cannot be removed is
//! renamed into its zombie form and collected by a later pass that removes
//! the last dependent.
//!
//! The upward sweep (snapshot to owning volume, clone to parent snapshot) is
//! only issued by a frame that did not arrive from that ancestor. The caller
//! higher up the stack is still working on the ancestor and finishes it
//! itself, so no backend call ever names an entity that was already removed.

use serde::Serialize;
use storage_contracts::{StoreError, VolumeStore};
use storage_types::{Entity, SnapshotId, VolumeId};
use tracing::{debug, error, info};

use crate::error::Result;

/// Successful outcome of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposal {
    /// The entity is physically gone.
    Deleted,
    /// The entity is still referenced and now carries the zombie marker.
    MarkedZombie,
}

impl Disposal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::MarkedZombie => "marked_zombie",
        }
    }
}

/// Zombie deletion over a volume store
pub struct ZombieEngine<S> {
    store: S,
}

impl<S: VolumeStore> ZombieEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Delete a volume or a snapshot.
    pub fn delete(&self, entity: &Entity) -> Result<Disposal> {
        match entity {
            Entity::Volume(volume) => self.volume_delete(volume),
            Entity::Snapshot(snapshot) => self.snapshot_delete(snapshot),
        }
    }

    /// Delete a volume, tombstoning it while any of its snapshots is needed.
    ///
    /// Removing a clone also sweeps its parent snapshot when that snapshot or
    /// its owning volume is a zombie.
    pub fn volume_delete(&self, volume: &VolumeId) -> Result<Disposal> {
        self.delete_volume(volume, true)
    }

    /// Delete a snapshot, tombstoning it while any live clone depends on it.
    ///
    /// Removing the snapshot also sweeps its owning volume when that volume is
    /// a zombie.
    pub fn snapshot_delete(&self, snapshot: &SnapshotId) -> Result<Disposal> {
        self.delete_snapshot(snapshot, true)
    }

    /// Rename a zombie volume back to its live form.
    ///
    /// Returns the live identifier; an alive volume is left untouched.
    pub fn revive_volume(&self, volume: &VolumeId) -> Result<VolumeId> {
        let alive = volume.to_alive();
        if !volume.is_zombie() {
            return Ok(alive);
        }

        debug!("reviving {volume} as {alive}");
        self.store.volume_rename(volume, &alive).inspect_err(|err| {
            error!("failed to revive {volume}: {err}");
        })?;
        info!("{volume} revived as {alive}");
        Ok(alive)
    }

    fn delete_volume(&self, volume: &VolumeId, sweep_parent: bool) -> Result<Disposal> {
        let snapshots = absent_as_empty(self.store.volume_list_snapshots(volume))
            .inspect_err(|err| error!("failed to list snapshots of {volume}: {err}"))?;

        let mut zombies = 0usize;
        for wire_name in &snapshots {
            let snapshot = volume.snapshot_from_wire(wire_name);
            if self.delete_snapshot(&snapshot, false)? == Disposal::MarkedZombie {
                zombies += 1;
            }
        }

        if zombies > 0 {
            debug!("{volume} keeps {zombies} zombie snapshot(s)");
            self.store.unmap(&Entity::from(volume.clone()), true)?;
            if !volume.is_zombie() {
                let zombie = volume.to_zombie();
                self.store.volume_rename(volume, &zombie).inspect_err(|err| {
                    error!("failed to mark {volume} as zombie: {err}");
                })?;
            }
            info!("{volume} marked as zombie");
            return Ok(Disposal::MarkedZombie);
        }

        let parent = match self.store.volume_get_parent(volume) {
            Ok(raw) => Some(SnapshotId::parse(&raw).map_err(StoreError::from)?),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                error!("failed to look up parent of {volume}: {err}");
                return Err(err.into());
            }
        };

        self.store.unmap(&Entity::from(volume.clone()), true)?;
        self.store.volume_delete(volume).inspect_err(|err| {
            error!("failed to delete {volume}: {err}");
        })?;
        info!("{volume} deleted");

        if let Some(parent) = parent
            && sweep_parent
            && (parent.volume.is_zombie() || parent.is_zombie())
        {
            debug!("sweeping parent snapshot {parent} of {volume}");
            self.delete_snapshot(&parent, true)?;
        }

        Ok(Disposal::Deleted)
    }

    fn delete_snapshot(&self, snapshot: &SnapshotId, sweep_owner: bool) -> Result<Disposal> {
        let raw_clones = absent_as_empty(self.store.snapshot_list_clones(snapshot))
            .inspect_err(|err| error!("failed to list clones of {snapshot}: {err}"))?;
        let clones = raw_clones
            .iter()
            .map(|raw| VolumeId::parse(raw))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
            .inspect_err(|err| error!("unusable clone listing for {snapshot}: {err}"))?;

        let mut can_delete = true;
        for clone in &clones {
            if !clone.is_zombie() {
                debug!("{snapshot} is still used by {clone}");
                can_delete = false;
                continue;
            }
            if self.delete_volume(clone, false)? == Disposal::MarkedZombie {
                can_delete = false;
            }
        }

        let entity = Entity::from(snapshot.clone());
        if can_delete {
            self.store.snapshot_unprotect(snapshot)?;
            self.store.unmap(&entity, true)?;
            self.store.snapshot_delete(snapshot).inspect_err(|err| {
                error!("failed to delete {snapshot}: {err}");
            })?;
            info!("{snapshot} deleted");

            if sweep_owner && snapshot.volume.is_zombie() {
                debug!("sweeping owner {} of {snapshot}", snapshot.volume);
                self.delete_volume(&snapshot.volume, true)?;
            }
            return Ok(Disposal::Deleted);
        }

        if !snapshot.is_zombie() {
            self.store.unmap(&entity, true)?;
            let zombie = snapshot.to_zombie();
            self.store.snapshot_rename(snapshot, &zombie).inspect_err(|err| {
                error!("failed to mark {snapshot} as zombie: {err}");
            })?;
        }
        info!("{snapshot} marked as zombie");
        Ok(Disposal::MarkedZombie)
    }
}

/// Treat a not-found listing as an empty one.
fn absent_as_empty(listing: std::result::Result<Vec<String>, StoreError>) -> Result<Vec<String>> {
    match listing {
        Ok(items) => Ok(items),
        Err(err) if err.is_not_found() => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_contracts::StoreErrorKind;
    use storage_testing::{MemoryCluster, Op};

    fn image() -> VolumeId {
        VolumeId::new("lxd", "image", "abc")
    }

    fn container(name: &str) -> VolumeId {
        VolumeId::new("lxd", "container", name)
    }

    /// `lxd/image_abc@readonly` protected, cloned into the given containers.
    fn cloned_image(clones: &[&str]) -> (MemoryCluster, SnapshotId) {
        let cluster = MemoryCluster::new();
        let snapshot = image().snapshot("readonly");
        cluster.volume_create(&image(), "10GB").unwrap();
        cluster.snapshot_create(&snapshot).unwrap();
        cluster.snapshot_protect(&snapshot).unwrap();
        for name in clones {
            cluster.clone_create(&snapshot, &container(name)).unwrap();
        }
        (cluster, snapshot)
    }

    #[test]
    fn plain_volume_is_deleted() {
        let cluster = MemoryCluster::new();
        cluster.volume_create(&container("c1"), "1GB").unwrap();
        cluster.volume_map(&container("c1")).unwrap();

        let engine = ZombieEngine::new(&cluster);
        assert_eq!(engine.volume_delete(&container("c1")).unwrap(), Disposal::Deleted);
        assert!(cluster.inventory().is_empty());
    }

    #[test]
    fn absent_volume_counts_as_deleted() {
        let cluster = MemoryCluster::new();
        let engine = ZombieEngine::new(&cluster);
        assert_eq!(engine.volume_delete(&container("gone")).unwrap(), Disposal::Deleted);
    }

    #[test]
    fn live_clone_tombstones_image_and_snapshot() {
        let (cluster, _) = cloned_image(&["c1"]);
        let engine = ZombieEngine::new(&cluster);

        assert_eq!(engine.volume_delete(&image()).unwrap(), Disposal::MarkedZombie);
        assert_eq!(
            cluster.inventory(),
            vec![
                "lxd/container_c1",
                "lxd/zombie_image_abc",
                "lxd/zombie_image_abc@zombie_readonly",
            ]
        );
    }

    #[test]
    fn one_live_sibling_vetoes_the_snapshot() {
        let (cluster, snapshot) = cloned_image(&["c1", "c2"]);
        cluster.volume_rename(&container("c1"), &container("c1").to_zombie()).unwrap();

        let engine = ZombieEngine::new(&cluster);
        assert_eq!(engine.snapshot_delete(&snapshot).unwrap(), Disposal::MarkedZombie);
        assert!(!cluster.contains("lxd/zombie_container_c1"));
        assert!(cluster.contains("lxd/container_c2"));
        assert!(cluster.contains("lxd/image_abc@zombie_readonly"));
    }

    #[test]
    fn zombie_snapshot_is_not_renamed_twice() {
        let (cluster, snapshot) = cloned_image(&["c1"]);
        let engine = ZombieEngine::new(&cluster);
        engine.snapshot_delete(&snapshot).unwrap();
        cluster.clear_ledger();

        let zombie = snapshot.to_zombie();
        assert_eq!(engine.snapshot_delete(&zombie).unwrap(), Disposal::MarkedZombie);
        assert_eq!(cluster.ledger().count(Op::SnapshotRename), 0);
    }

    #[test]
    fn removing_the_last_clone_sweeps_the_chain() {
        let (cluster, _) = cloned_image(&["c1"]);
        let engine = ZombieEngine::new(&cluster);
        engine.volume_delete(&image()).unwrap();

        assert_eq!(engine.volume_delete(&container("c1")).unwrap(), Disposal::Deleted);
        assert!(cluster.inventory().is_empty());
        assert!(cluster.ledger().references_after_removal().is_empty());
    }

    #[test]
    fn live_parent_snapshot_is_left_alone() {
        let (cluster, _) = cloned_image(&["c1"]);
        let engine = ZombieEngine::new(&cluster);

        assert_eq!(engine.volume_delete(&container("c1")).unwrap(), Disposal::Deleted);
        assert_eq!(cluster.inventory(), vec!["lxd/image_abc", "lxd/image_abc@readonly"]);
    }

    #[test]
    fn backend_failures_propagate() {
        let (cluster, snapshot) = cloned_image(&[]);
        cluster.fail_next(Op::SnapshotDelete, &snapshot.to_string());

        let engine = ZombieEngine::new(&cluster);
        let err = engine.volume_delete(&image()).unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::Backend));
        assert!(cluster.contains("lxd/image_abc"));
    }

    #[test]
    fn revive_restores_the_live_name() {
        let (cluster, _) = cloned_image(&["c1"]);
        let engine = ZombieEngine::new(&cluster);
        engine.volume_delete(&image()).unwrap();

        let alive = engine.revive_volume(&image().to_zombie()).unwrap();
        assert_eq!(alive, image());
        assert!(cluster.contains("lxd/image_abc@zombie_readonly"));
        assert_eq!(engine.revive_volume(&alive).unwrap(), image());
    }

    #[test]
    fn disposal_serializes_in_snake_case() {
        assert_eq!(Disposal::MarkedZombie.as_str(), "marked_zombie");
        assert_eq!(Disposal::Deleted.as_str(), "deleted");
    }
}
