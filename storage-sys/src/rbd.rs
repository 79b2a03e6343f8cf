// SPDX-License-Identifier: GPL-3.0-only

//! Low-level `rbd` CLI operations
//!
//! Every [`VolumeStore`] call maps to exactly one `rbd` invocation, except the
//! bounded unmap loop. Exit statuses are errno values and are normalized here:
//! `ENOENT` becomes not-found, `EBUSY` on protect and `EINVAL` on unprotect or
//! unmap mean the entity is already in the requested state.

use std::path::PathBuf;

use serde_json::Value;
use storage_contracts::{StoreError, StoreErrorKind, UnmapState, VolumeStore, unmap_until_absent};
use storage_types::{Entity, SnapshotId, VolumeId};
use tracing::{debug, info, warn};
use which::which;

use crate::cmd::{CommandOutcome, CommandRunner, SystemRunner, render};
use crate::error::{Result, SysError};

pub const DEFAULT_MAX_UNMAP_ATTEMPTS: u32 = 64;

/// Connection parameters shared by every invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbdSettings {
    /// Binary name or path, resolved through `PATH`
    pub binary: String,
    pub cluster: String,
    /// Ceph client id passed as `--id`
    pub user: String,
    pub max_unmap_attempts: u32,
}

impl Default for RbdSettings {
    fn default() -> Self {
        Self {
            binary: "rbd".to_string(),
            cluster: "ceph".to_string(),
            user: "admin".to_string(),
            max_unmap_attempts: DEFAULT_MAX_UNMAP_ATTEMPTS,
        }
    }
}

/// `rbd` CLI wrapper implementing the backend contract
pub struct RbdCli<R = SystemRunner> {
    binary_path: PathBuf,
    settings: RbdSettings,
    runner: R,
}

impl RbdCli<SystemRunner> {
    /// Create a wrapper around the host's rbd binary
    ///
    /// Returns an error if the binary is not installed
    pub fn new(settings: RbdSettings) -> Result<Self> {
        let binary_path = Self::find_binary(&settings.binary)?;
        info!("Found rbd binary at {:?}", binary_path);
        Ok(Self::with_runner(settings, binary_path, SystemRunner))
    }

    pub fn find_binary(name: &str) -> Result<PathBuf> {
        which(name).map_err(|_| SysError::BinaryNotFound(name.to_string()))
    }
}

impl<R: CommandRunner> RbdCli<R> {
    pub fn with_runner(settings: RbdSettings, binary_path: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            binary_path: binary_path.into(),
            settings,
            runner,
        }
    }

    pub fn settings(&self) -> &RbdSettings {
        &self.settings
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "--id".to_string(),
            self.settings.user.clone(),
            "--cluster".to_string(),
            self.settings.cluster.clone(),
        ]
    }

    fn pool_args(&self, pool: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.push("--pool".to_string());
        args.push(pool.to_string());
        args
    }

    fn exec(&self, target: &str, args: Vec<String>) -> std::result::Result<CommandOutcome, StoreError> {
        debug!(
            "{}",
            render(&self.binary_path.to_string_lossy(), &args)
        );
        self.runner
            .run(&self.binary_path, &args)
            .map_err(|error| StoreError::backend(target, error.to_string()))
    }

    fn invoke(
        &self,
        target: &str,
        args: Vec<String>,
        already: Option<i32>,
    ) -> std::result::Result<CommandOutcome, StoreError> {
        let outcome = self.exec(target, args)?;
        check(outcome, target, already)
    }

    fn unmap_once(&self, entity: &Entity) -> std::result::Result<UnmapState, StoreError> {
        let target = entity.to_string();
        let mut args = self.pool_args(entity.pool());
        args.push("unmap".to_string());
        args.push(entity.image_spec());

        match self.invoke(&target, args, Some(libc::EINVAL)) {
            Ok(_) => Ok(UnmapState::Unmapped),
            Err(error) if error.is_already_in_state() || error.is_not_found() => {
                Ok(UnmapState::NotMapped)
            }
            Err(error) => Err(error),
        }
    }
}

impl<R: CommandRunner> VolumeStore for RbdCli<R> {
    fn volume_create(&self, volume: &VolumeId, size: &str) -> std::result::Result<(), StoreError> {
        let mut args = self.pool_args(&volume.pool);
        args.extend([
            "--image-feature".to_string(),
            "layering".to_string(),
            "--size".to_string(),
            size.to_string(),
            "create".to_string(),
            volume.image_name(),
        ]);
        self.invoke(&volume.to_string(), args, None).map(drop)
    }

    fn volume_exists(&self, volume: &VolumeId) -> std::result::Result<bool, StoreError> {
        let mut args = self.pool_args(&volume.pool);
        args.extend([
            "image-meta".to_string(),
            "list".to_string(),
            volume.image_name(),
        ]);
        match self.invoke(&volume.to_string(), args, None) {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    fn volume_delete(&self, volume: &VolumeId) -> std::result::Result<(), StoreError> {
        let mut args = self.pool_args(&volume.pool);
        args.extend(["rm".to_string(), volume.image_name()]);
        absorb_not_found(self.invoke(&volume.to_string(), args, None))
    }

    fn volume_map(&self, volume: &VolumeId) -> std::result::Result<String, StoreError> {
        let target = volume.to_string();
        let mut args = self.pool_args(&volume.pool);
        args.extend(["map".to_string(), volume.image_name()]);
        let outcome = self.invoke(&target, args, None)?;

        parse_device_path(&outcome.stdout)
            .ok_or_else(|| StoreError::backend(target, "failed to detect mapped device path"))
    }

    fn unmap(&self, entity: &Entity, until_absent: bool) -> std::result::Result<(), StoreError> {
        unmap_until_absent(
            entity,
            until_absent,
            self.settings.max_unmap_attempts,
            || self.unmap_once(entity),
        )
    }

    fn volume_rename(&self, from: &VolumeId, to: &VolumeId) -> std::result::Result<(), StoreError> {
        if from.pool != to.pool {
            return Err(StoreError::backend(
                from.to_string(),
                format!("cannot rename across pools to {to}"),
            ));
        }
        let mut args = self.base_args();
        args.extend(["mv".to_string(), from.to_string(), to.to_string()]);
        self.invoke(&from.to_string(), args, None).map(drop)
    }

    fn volume_copy(&self, from: &VolumeId, to: &VolumeId) -> std::result::Result<(), StoreError> {
        let mut args = self.base_args();
        args.extend(["cp".to_string(), from.to_string(), to.to_string()]);
        self.invoke(&from.to_string(), args, None).map(drop)
    }

    fn volume_get_parent(&self, volume: &VolumeId) -> std::result::Result<String, StoreError> {
        let target = volume.to_string();
        let mut args = self.pool_args(&volume.pool);
        args.extend(["info".to_string(), volume.image_name()]);
        let outcome = self.invoke(&target, args, None)?;

        parse_parent(&outcome.stdout)
            .ok_or_else(|| StoreError::not_found(target, "image is not a clone"))
    }

    fn volume_list_snapshots(&self, volume: &VolumeId) -> std::result::Result<Vec<String>, StoreError> {
        let target = volume.to_string();
        let mut args = self.base_args();
        args.extend([
            "--format".to_string(),
            "json".to_string(),
            "--pool".to_string(),
            volume.pool.clone(),
            "snap".to_string(),
            "ls".to_string(),
            volume.image_name(),
        ]);
        let outcome = self.invoke(&target, args, None)?;

        let snapshots = parse_snapshot_names(&outcome.stdout)
            .map_err(|reason| StoreError::backend(target.clone(), reason))?;
        if snapshots.is_empty() {
            return Err(StoreError::not_found(target, "image has no snapshots"));
        }
        Ok(snapshots)
    }

    fn snapshot_create(&self, snapshot: &SnapshotId) -> std::result::Result<(), StoreError> {
        let mut args = self.pool_args(snapshot.pool());
        args.extend([
            "snap".to_string(),
            "create".to_string(),
            "--snap".to_string(),
            snapshot.wire_name(),
            snapshot.volume.image_name(),
        ]);
        self.invoke(&snapshot.to_string(), args, None).map(drop)
    }

    fn snapshot_delete(&self, snapshot: &SnapshotId) -> std::result::Result<(), StoreError> {
        let mut args = self.pool_args(snapshot.pool());
        args.extend(["snap".to_string(), "rm".to_string(), snapshot.image_spec()]);
        absorb_not_found(self.invoke(&snapshot.to_string(), args, None))
    }

    fn snapshot_protect(&self, snapshot: &SnapshotId) -> std::result::Result<(), StoreError> {
        let mut args = self.pool_args(snapshot.pool());
        args.extend([
            "snap".to_string(),
            "protect".to_string(),
            "--snap".to_string(),
            snapshot.wire_name(),
            snapshot.volume.image_name(),
        ]);
        absorb_already(self.invoke(&snapshot.to_string(), args, Some(libc::EBUSY)))
    }

    fn snapshot_unprotect(&self, snapshot: &SnapshotId) -> std::result::Result<(), StoreError> {
        let mut args = self.pool_args(snapshot.pool());
        args.extend([
            "snap".to_string(),
            "unprotect".to_string(),
            "--snap".to_string(),
            snapshot.wire_name(),
            snapshot.volume.image_name(),
        ]);
        absorb_not_found(absorb_already(self.invoke(
            &snapshot.to_string(),
            args,
            Some(libc::EINVAL),
        )))
    }

    fn snapshot_rename(&self, from: &SnapshotId, to: &SnapshotId) -> std::result::Result<(), StoreError> {
        let mut args = self.base_args();
        args.extend([
            "snap".to_string(),
            "rename".to_string(),
            from.to_string(),
            to.to_string(),
        ]);
        self.invoke(&from.to_string(), args, None).map(drop)
    }

    fn snapshot_list_clones(&self, snapshot: &SnapshotId) -> std::result::Result<Vec<String>, StoreError> {
        let target = snapshot.to_string();
        let mut args = self.pool_args(snapshot.pool());
        args.extend([
            "children".to_string(),
            "--image".to_string(),
            snapshot.volume.image_name(),
            "--snap".to_string(),
            snapshot.wire_name(),
        ]);
        let outcome = self.invoke(&target, args, None)?;

        let clones = parse_children(&outcome.stdout);
        if clones.is_empty() {
            return Err(StoreError::not_found(target, "snapshot has no clones"));
        }
        Ok(clones)
    }

    fn snapshot_rollback(&self, snapshot: &SnapshotId) -> std::result::Result<(), StoreError> {
        let mut args = self.pool_args(snapshot.pool());
        args.extend([
            "snap".to_string(),
            "rollback".to_string(),
            "--snap".to_string(),
            snapshot.wire_name(),
            snapshot.volume.image_name(),
        ]);
        self.invoke(&snapshot.to_string(), args, None).map(drop)
    }

    fn clone_create(&self, source: &SnapshotId, target: &VolumeId) -> std::result::Result<(), StoreError> {
        let mut args = self.base_args();
        args.extend([
            "--image-feature".to_string(),
            "layering".to_string(),
            "clone".to_string(),
            source.to_string(),
            target.to_string(),
        ]);
        self.invoke(&target.to_string(), args, None).map(drop)
    }
}

/// Map a finished invocation onto the normalized error classes.
fn check(
    outcome: CommandOutcome,
    target: &str,
    already: Option<i32>,
) -> std::result::Result<CommandOutcome, StoreError> {
    if outcome.success() {
        return Ok(outcome);
    }

    let kind = match outcome.status {
        Some(code) if already == Some(code) => StoreErrorKind::AlreadyInState,
        Some(libc::ENOENT) => StoreErrorKind::NotFound,
        _ => StoreErrorKind::Backend,
    };
    let status = outcome
        .status
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string());
    let message = format!(
        "`{}` exited with {}: {}",
        outcome.command,
        status,
        outcome.stderr.trim()
    );

    if kind == StoreErrorKind::Backend {
        warn!("rbd failed for {}: {}", target, message);
    }
    Err(StoreError::new(kind, target, message))
}

fn absorb_already<T>(
    result: std::result::Result<T, StoreError>,
) -> std::result::Result<(), StoreError> {
    match result {
        Ok(_) => Ok(()),
        Err(error) if error.is_already_in_state() => {
            debug!("{} already in requested state", error.target);
            Ok(())
        }
        Err(error) => Err(error),
    }
}

fn absorb_not_found<T>(
    result: std::result::Result<T, StoreError>,
) -> std::result::Result<(), StoreError> {
    match result {
        Ok(_) => Ok(()),
        Err(error) if error.is_not_found() => {
            debug!("{} already absent", error.target);
            Ok(())
        }
        Err(error) => Err(error),
    }
}

/// Extract `pool/image@snap` from the `parent:` line of `rbd info`.
pub fn parse_parent(info: &str) -> Option<String> {
    let (_, rest) = info.split_once("parent: ")?;
    let line = rest.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Clone identifiers printed by `rbd children`, one per whitespace-separated field.
pub fn parse_children(output: &str) -> Vec<String> {
    output.split_whitespace().map(ToString::to_string).collect()
}

/// Snapshot names from `rbd snap ls --format json`.
pub fn parse_snapshot_names(json: &str) -> std::result::Result<Vec<String>, String> {
    let entries: Vec<Value> = serde_json::from_str(json.trim())
        .map_err(|error| format!("failed to parse snapshot list: {error}"))?;

    entries
        .iter()
        .map(|entry| match entry.get("name") {
            None => Err("No \"name\" property found".to_string()),
            Some(Value::String(name)) => Ok(name.trim().to_string()),
            Some(_) => Err("\"name\" property did not have string type".to_string()),
        })
        .collect()
}

/// Device node reported by `rbd map`.
pub fn parse_device_path(output: &str) -> Option<String> {
    let index = output.find("/dev/rbd")?;
    let path = output[index..].split_whitespace().next()?;
    Some(path.to_string())
}
