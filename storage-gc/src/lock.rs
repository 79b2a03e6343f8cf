// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use storage_types::LineageKey;
use tracing::debug;

use crate::error::{GcError, Result};

/// Exclusive `flock(2)` lock on one lineage tree
///
/// The lock lives in `<dir>/<pool>.<type>_<name>.lock` and is released when
/// the value is dropped. Separate acquisitions contend even inside one
/// process, so the lock serializes threads as well as processes.
#[derive(Debug)]
pub struct LineageLock {
    path: PathBuf,
    _file: Flock<File>,
}

impl LineageLock {
    /// Block until the lineage is free.
    pub fn acquire(dir: &Path, key: &LineageKey) -> Result<Self> {
        Self::take(dir, key, FlockArg::LockExclusive)
    }

    /// Take the lock or fail with [`GcError::LockBusy`].
    pub fn try_acquire(dir: &Path, key: &LineageKey) -> Result<Self> {
        Self::take(dir, key, FlockArg::LockExclusiveNonblock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn take(dir: &Path, key: &LineageKey, mode: FlockArg) -> Result<Self> {
        let path = dir.join(format!("{}.lock", key.file_stem()));
        let io_error = |source: std::io::Error| GcError::Lock {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_error)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_error)?;

        let file = match Flock::lock(file, mode) {
            Ok(file) => file,
            Err((_, Errno::EWOULDBLOCK)) => return Err(GcError::LockBusy(key.to_string())),
            Err((_, errno)) => return Err(io_error(errno.into())),
        };

        debug!("locked lineage {key} ({})", path.display());
        Ok(Self {
            path,
            _file: file,
        })
    }
}
