// SPDX-License-Identifier: GPL-3.0-only

//! Composite RBD identifiers
//!
//! The cluster only knows flat names. A volume is addressed as
//! `<pool>/<['zombie_']type>_<name>` and a snapshot as
//! `<pool>/<['zombie_']type>_<name>@<['zombie_']snapshot>`.
//!
//! The zombie marker is decoded into [`Liveness`] here and nowhere else, so the
//! rest of the stack works on the enum instead of the string prefix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix the cluster-side name carries while an entity is tombstoned.
pub const ZOMBIE_PREFIX: &str = "zombie_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier `{0}` has no pool separator '/'")]
    MissingPool(String),

    #[error("identifier `{0}` has no type separator '_'")]
    MissingType(String),

    #[error("identifier `{0}` has no snapshot separator '@'")]
    MissingSnapshot(String),

    #[error("identifier `{0}` names a snapshot where a volume was expected")]
    UnexpectedSnapshot(String),
}

/// Whether an entity is live or retained only for its dependents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    #[default]
    Alive,
    Zombie,
}

impl Liveness {
    /// Split a wire component into its liveness and the unprefixed remainder.
    pub fn decode(component: &str) -> (Self, &str) {
        match component.strip_prefix(ZOMBIE_PREFIX) {
            Some(rest) => (Self::Zombie, rest),
            None => (Self::Alive, component),
        }
    }

    pub fn encode(self, component: &str) -> String {
        match self {
            Self::Alive => component.to_string(),
            Self::Zombie => format!("{ZOMBIE_PREFIX}{component}"),
        }
    }

    pub fn is_zombie(self) -> bool {
        self == Self::Zombie
    }
}

/// Snapshot protection flag; clones can only be created from protected snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protection {
    #[default]
    Unprotected,
    Protected,
}

/// An RBD image as seen by the storage layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId {
    pub pool: String,
    /// Caller-defined category (`container`, `image`, ...), without the zombie marker
    pub kind: String,
    pub name: String,
    pub liveness: Liveness,
}

impl VolumeId {
    pub fn new(pool: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            kind: kind.into(),
            name: name.into(),
            liveness: Liveness::Alive,
        }
    }

    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        let (pool, image) = split_pool(input)?;
        if image.contains('@') {
            return Err(IdentifierError::UnexpectedSnapshot(input.to_string()));
        }
        let (liveness, kind, name) = split_image(input, image)?;

        Ok(Self {
            pool: pool.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            liveness,
        })
    }

    pub fn is_zombie(&self) -> bool {
        self.liveness.is_zombie()
    }

    /// Pool-relative image name, as passed alongside `--pool`.
    pub fn image_name(&self) -> String {
        self.liveness.encode(&format!("{}_{}", self.kind, self.name))
    }

    pub fn with_liveness(&self, liveness: Liveness) -> Self {
        Self {
            liveness,
            ..self.clone()
        }
    }

    pub fn to_zombie(&self) -> Self {
        self.with_liveness(Liveness::Zombie)
    }

    pub fn to_alive(&self) -> Self {
        self.with_liveness(Liveness::Alive)
    }

    /// A live snapshot of this volume.
    pub fn snapshot(&self, name: impl Into<String>) -> SnapshotId {
        SnapshotId {
            volume: self.clone(),
            name: name.into(),
            liveness: Liveness::Alive,
        }
    }

    /// A snapshot of this volume from its bare wire name (`[zombie_]snap`).
    pub fn snapshot_from_wire(&self, wire_name: &str) -> SnapshotId {
        let (liveness, name) = Liveness::decode(wire_name);
        SnapshotId {
            volume: self.clone(),
            name: name.to_string(),
            liveness,
        }
    }

    /// Identity of this volume that survives zombie renames.
    pub fn lineage_key(&self) -> LineageKey {
        LineageKey {
            pool: self.pool.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool, self.image_name())
    }
}

impl FromStr for VolumeId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A snapshot of an RBD image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId {
    pub volume: VolumeId,
    /// Snapshot name without the zombie marker
    pub name: String,
    pub liveness: Liveness,
}

impl SnapshotId {
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        let (pool, spec) = split_pool(input)?;
        let (image, snapshot) = spec
            .split_once('@')
            .ok_or_else(|| IdentifierError::MissingSnapshot(input.to_string()))?;
        let (volume_liveness, kind, name) = split_image(input, image)?;
        let (liveness, snapshot) = Liveness::decode(snapshot);

        Ok(Self {
            volume: VolumeId {
                pool: pool.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                liveness: volume_liveness,
            },
            name: snapshot.to_string(),
            liveness,
        })
    }

    pub fn pool(&self) -> &str {
        &self.volume.pool
    }

    pub fn is_zombie(&self) -> bool {
        self.liveness.is_zombie()
    }

    /// Bare snapshot name as the cluster stores it (`[zombie_]snap`).
    pub fn wire_name(&self) -> String {
        self.liveness.encode(&self.name)
    }

    /// Pool-relative spec, `image@snap`.
    pub fn image_spec(&self) -> String {
        format!("{}@{}", self.volume.image_name(), self.wire_name())
    }

    pub fn to_zombie(&self) -> Self {
        Self {
            liveness: Liveness::Zombie,
            ..self.clone()
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.volume.pool, self.image_spec())
    }
}

impl FromStr for SnapshotId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Either kind of addressable entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    Volume(VolumeId),
    Snapshot(SnapshotId),
}

impl Entity {
    /// Parse either form, picking the snapshot grammar when an `@` is present.
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        if input.contains('@') {
            SnapshotId::parse(input).map(Self::Snapshot)
        } else {
            VolumeId::parse(input).map(Self::Volume)
        }
    }

    pub fn pool(&self) -> &str {
        match self {
            Self::Volume(volume) => &volume.pool,
            Self::Snapshot(snapshot) => snapshot.pool(),
        }
    }

    /// Pool-relative name accepted by `rbd map`, `rbd unmap` and friends.
    pub fn image_spec(&self) -> String {
        match self {
            Self::Volume(volume) => volume.image_name(),
            Self::Snapshot(snapshot) => snapshot.image_spec(),
        }
    }

    pub fn is_zombie(&self) -> bool {
        match self {
            Self::Volume(volume) => volume.is_zombie(),
            Self::Snapshot(snapshot) => snapshot.is_zombie(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume(volume) => volume.fmt(f),
            Self::Snapshot(snapshot) => snapshot.fmt(f),
        }
    }
}

impl From<VolumeId> for Entity {
    fn from(volume: VolumeId) -> Self {
        Self::Volume(volume)
    }
}

impl From<SnapshotId> for Entity {
    fn from(snapshot: SnapshotId) -> Self {
        Self::Snapshot(snapshot)
    }
}

/// Liveness-free identity of a volume, used to key per-tree locks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineageKey {
    pub pool: String,
    pub kind: String,
    pub name: String,
}

impl LineageKey {
    /// Filesystem-safe stem, e.g. `rbd.container_web1`.
    pub fn file_stem(&self) -> String {
        format!("{}.{}_{}", self.pool, self.kind, self.name)
            .chars()
            .map(|character| match character {
                '/' | '\0' => '-',
                other => other,
            })
            .collect()
    }
}

impl fmt::Display for LineageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.pool, self.kind, self.name)
    }
}

fn split_pool(input: &str) -> Result<(&str, &str), IdentifierError> {
    input
        .split_once('/')
        .ok_or_else(|| IdentifierError::MissingPool(input.to_string()))
}

fn split_image<'a>(
    input: &str,
    image: &'a str,
) -> Result<(Liveness, &'a str, &'a str), IdentifierError> {
    let (liveness, body) = Liveness::decode(image);
    let (kind, name) = body
        .split_once('_')
        .ok_or_else(|| IdentifierError::MissingType(input.to_string()))?;
    Ok((liveness, kind, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_live_volume() {
        let volume = VolumeId::parse("lxd/container_web1").unwrap();
        assert_eq!(volume.pool, "lxd");
        assert_eq!(volume.kind, "container");
        assert_eq!(volume.name, "web1");
        assert_eq!(volume.liveness, Liveness::Alive);
    }

    #[test]
    fn volume_name_keeps_later_underscores() {
        let volume = VolumeId::parse("lxd/image_abc_def").unwrap();
        assert_eq!(volume.kind, "image");
        assert_eq!(volume.name, "abc_def");
    }

    #[test]
    fn zombie_markers_are_independent() {
        let only_volume = SnapshotId::parse("lxd/zombie_image_abc@readonly").unwrap();
        assert!(only_volume.volume.is_zombie());
        assert!(!only_volume.is_zombie());

        let only_snapshot = SnapshotId::parse("lxd/image_abc@zombie_readonly").unwrap();
        assert!(!only_snapshot.volume.is_zombie());
        assert!(only_snapshot.is_zombie());
        assert_eq!(only_snapshot.name, "readonly");
    }

    #[test]
    fn compose_inverts_parse() {
        let volumes = [
            "lxd/container_web1",
            "lxd/zombie_container_web1",
            "pool-a/image_abc_def",
            "p/_x",
        ];
        for raw in volumes {
            assert_eq!(VolumeId::parse(raw).unwrap().to_string(), raw);
        }

        let snapshots = [
            "lxd/image_abc@readonly",
            "lxd/zombie_image_abc@zombie_readonly",
            "lxd/container_c1@snapshot_snap0",
            "lxd/zombie_container_c1@snapshot_snap0",
        ];
        for raw in snapshots {
            assert_eq!(SnapshotId::parse(raw).unwrap().to_string(), raw);
        }
    }

    #[test]
    fn rejects_missing_delimiters() {
        assert_eq!(
            VolumeId::parse("container_web1"),
            Err(IdentifierError::MissingPool("container_web1".to_string()))
        );
        assert_eq!(
            VolumeId::parse("lxd/web1"),
            Err(IdentifierError::MissingType("lxd/web1".to_string()))
        );
        assert_eq!(
            VolumeId::parse("lxd/zombie_web1"),
            Err(IdentifierError::MissingType("lxd/zombie_web1".to_string()))
        );
        assert_eq!(
            SnapshotId::parse("lxd/image_abc"),
            Err(IdentifierError::MissingSnapshot("lxd/image_abc".to_string()))
        );
        assert!(matches!(
            VolumeId::parse("lxd/image_abc@snap"),
            Err(IdentifierError::UnexpectedSnapshot(_))
        ));
    }

    #[test]
    fn zombie_transition_only_touches_prefix() {
        let volume = VolumeId::new("lxd", "image", "abc");
        let zombie = volume.to_zombie();
        assert_eq!(zombie.to_string(), "lxd/zombie_image_abc");
        assert_eq!(zombie.lineage_key(), volume.lineage_key());
        assert_eq!(zombie.to_alive(), volume);

        let snapshot = volume.snapshot("readonly").to_zombie();
        assert_eq!(snapshot.image_spec(), "image_abc@zombie_readonly");
    }

    #[test]
    fn snapshot_from_wire_decodes_marker() {
        let volume = VolumeId::new("lxd", "container", "c1");
        let snapshot = volume.snapshot_from_wire("zombie_snapshot_s0");
        assert!(snapshot.is_zombie());
        assert_eq!(snapshot.name, "snapshot_s0");
        assert_eq!(snapshot.wire_name(), "zombie_snapshot_s0");
    }

    #[test]
    fn entity_parse_picks_grammar() {
        assert!(matches!(
            Entity::parse("lxd/image_abc").unwrap(),
            Entity::Volume(_)
        ));
        let entity = Entity::parse("lxd/image_abc@readonly").unwrap();
        assert_eq!(entity.image_spec(), "image_abc@readonly");
        assert_eq!(entity.pool(), "lxd");
    }

    #[test]
    fn lineage_key_file_stem_is_flat() {
        let key = VolumeId::parse("lxd/zombie_image_abc").unwrap().lineage_key();
        assert_eq!(key.file_stem(), "lxd.image_abc");
        assert_eq!(key.to_string(), "lxd/image_abc");
    }
}
