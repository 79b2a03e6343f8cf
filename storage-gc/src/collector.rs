// SPDX-License-Identifier: GPL-3.0-only

//! Lock-guarded collector passes
//!
//! Two passes over the same lineage tree would race on the same snapshots,
//! so every pass first resolves the root of its target's tree and holds the
//! [`LineageLock`] for that root while the engine runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use storage_contracts::{StoreError, VolumeStore};
use storage_types::{Entity, LineageKey, SnapshotId, VolumeId};
use tracing::{debug, info};

use crate::engine::{Disposal, ZombieEngine};
use crate::error::{GcError, Result};
use crate::lock::LineageLock;

pub struct Collector<S> {
    engine: ZombieEngine<S>,
    lock_dir: PathBuf,
}

impl<S: VolumeStore> Collector<S> {
    pub fn new(store: S, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: ZombieEngine::new(store),
            lock_dir: lock_dir.into(),
        }
    }

    /// Parent snapshots of `volume`, nearest first.
    pub fn lineage(&self, volume: &VolumeId) -> Result<Vec<SnapshotId>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([volume.to_string()]);
        let mut current = volume.clone();

        loop {
            let raw = match self.engine.store().volume_get_parent(&current) {
                Ok(raw) => raw,
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err.into()),
            };
            let parent = SnapshotId::parse(&raw).map_err(StoreError::from)?;
            if !seen.insert(parent.volume.to_string()) {
                return Err(GcError::LineageCycle(volume.to_string()));
            }
            current = parent.volume.clone();
            chain.push(parent);
        }

        Ok(chain)
    }

    /// The ancestor volume of `volume` that has no parent.
    pub fn lineage_root(&self, volume: &VolumeId) -> Result<VolumeId> {
        Ok(self
            .lineage(volume)?
            .pop()
            .map(|snapshot| snapshot.volume)
            .unwrap_or_else(|| volume.clone()))
    }

    /// Delete `entity`, waiting for any pass already running on its tree.
    pub fn collect(&self, entity: &Entity) -> Result<Disposal> {
        let _lock = self.lock(entity, LineageLock::acquire)?;
        self.run(entity)
    }

    /// Delete `entity`, failing with [`GcError::LockBusy`] if its tree is in use.
    pub fn try_collect(&self, entity: &Entity) -> Result<Disposal> {
        let _lock = self.lock(entity, LineageLock::try_acquire)?;
        self.run(entity)
    }

    /// Bring a zombie volume back under its live name.
    pub fn revive(&self, volume: &VolumeId) -> Result<VolumeId> {
        let _lock = self.lock(&Entity::from(volume.clone()), LineageLock::acquire)?;
        self.engine.revive_volume(volume)
    }

    fn lock(
        &self,
        entity: &Entity,
        take: fn(&Path, &LineageKey) -> Result<LineageLock>,
    ) -> Result<LineageLock> {
        let owner = match entity {
            Entity::Volume(volume) => volume,
            Entity::Snapshot(snapshot) => &snapshot.volume,
        };
        let root = self.lineage_root(owner)?;
        debug!("{entity} belongs to the tree rooted at {root}");
        take(&self.lock_dir, &root.lineage_key())
    }

    fn run(&self, entity: &Entity) -> Result<Disposal> {
        let disposal = self.engine.delete(entity)?;
        info!("collected {entity}: {}", disposal.as_str());
        Ok(disposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_testing::MemoryCluster;

    fn collector(cluster: &MemoryCluster) -> Collector<&MemoryCluster> {
        let dir = std::env::temp_dir().join(format!("storage-gc-collector-{}", uuid::Uuid::new_v4()));
        Collector::new(cluster, dir)
    }

    #[test]
    fn lineage_walks_to_the_root() {
        let cluster = MemoryCluster::new();
        let base = VolumeId::new("lxd", "image", "abc");
        let middle = VolumeId::new("lxd", "container", "c1");
        let leaf = VolumeId::new("lxd", "container", "c2");

        cluster.volume_create(&base, "10GB").unwrap();
        cluster.snapshot_create(&base.snapshot("readonly")).unwrap();
        cluster.snapshot_protect(&base.snapshot("readonly")).unwrap();
        cluster.clone_create(&base.snapshot("readonly"), &middle).unwrap();
        cluster.snapshot_create(&middle.snapshot("snap0")).unwrap();
        cluster.snapshot_protect(&middle.snapshot("snap0")).unwrap();
        cluster.clone_create(&middle.snapshot("snap0"), &leaf).unwrap();

        let collector = collector(&cluster);
        let chain: Vec<String> = collector
            .lineage(&leaf)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(chain, vec!["lxd/container_c1@snap0", "lxd/image_abc@readonly"]);
        assert_eq!(collector.lineage_root(&leaf).unwrap(), base);
        assert_eq!(collector.lineage_root(&base).unwrap(), base);
    }

    #[test]
    fn held_tree_refuses_a_second_pass() {
        let cluster = MemoryCluster::new();
        let volume = VolumeId::new("lxd", "container", "c1");
        cluster.volume_create(&volume, "1GB").unwrap();

        let collector = collector(&cluster);
        let _held = LineageLock::try_acquire(&collector.lock_dir, &volume.lineage_key()).unwrap();
        let err = collector.try_collect(&volume.clone().into()).unwrap_err();
        assert!(matches!(err, GcError::LockBusy(_)));
        assert!(cluster.contains("lxd/container_c1"));
    }
}
