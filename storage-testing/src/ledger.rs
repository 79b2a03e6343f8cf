use serde::Serialize;
use storage_contracts::StoreErrorKind;

/// Backend operations the in-memory cluster understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    VolumeCreate,
    VolumeExists,
    VolumeDelete,
    VolumeMap,
    Unmap,
    VolumeRename,
    VolumeCopy,
    VolumeGetParent,
    VolumeListSnapshots,
    SnapshotCreate,
    SnapshotDelete,
    SnapshotProtect,
    SnapshotUnprotect,
    SnapshotRename,
    SnapshotListClones,
    SnapshotRollback,
    CloneCreate,
}

impl Op {
    pub fn is_delete(self) -> bool {
        matches!(self, Op::VolumeDelete | Op::SnapshotDelete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub op: Op,
    /// Fully-qualified entity the call was about
    pub target: String,
    pub result: Result<(), StoreErrorKind>,
    /// Set on deletes that physically removed something
    pub removed: bool,
}

/// Ordered record of every call made against a cluster
#[derive(Debug, Clone, Default, Serialize)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn record(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn ops_on(&self, target: &str) -> Vec<Op> {
        self.entries
            .iter()
            .filter(|entry| entry.target == target)
            .map(|entry| entry.op)
            .collect()
    }

    pub fn count(&self, op: Op) -> usize {
        self.entries.iter().filter(|entry| entry.op == op).count()
    }

    /// Calls that referenced an entity after it was physically removed.
    ///
    /// Removing a volume also retires every `volume@snap` name under it.
    pub fn references_after_removal(&self) -> Vec<LedgerEntry> {
        let mut removed: Vec<&str> = Vec::new();
        let mut violations = Vec::new();

        for entry in &self.entries {
            let stale = removed.iter().any(|gone| {
                entry.target == *gone
                    || entry
                        .target
                        .strip_prefix(*gone)
                        .is_some_and(|rest| rest.starts_with('@'))
            });
            if stale {
                violations.push(entry.clone());
            }
            if entry.op.is_delete() && entry.removed {
                removed.push(&entry.target);
            }
        }

        violations
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(op: Op, target: &str, removed: bool) -> LedgerEntry {
        LedgerEntry {
            op,
            target: target.to_string(),
            result: Ok(()),
            removed,
        }
    }

    #[test]
    fn flags_calls_on_removed_entities() {
        let mut ledger = Ledger::default();
        ledger.record(entry(Op::VolumeDelete, "lxd/container_c1", true));
        ledger.record(entry(Op::Unmap, "lxd/container_c1", false));
        ledger.record(entry(Op::SnapshotListClones, "lxd/container_c1@s0", false));
        ledger.record(entry(Op::Unmap, "lxd/container_c10", false));

        let violations = ledger.references_after_removal();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].op, Op::Unmap);
        assert_eq!(violations[1].op, Op::SnapshotListClones);
    }

    #[test]
    fn idempotent_deletes_do_not_retire_names() {
        let mut ledger = Ledger::default();
        ledger.record(entry(Op::VolumeDelete, "lxd/container_c1", false));
        ledger.record(entry(Op::VolumeCreate, "lxd/container_c1", false));
        assert!(ledger.references_after_removal().is_empty());
        assert_eq!(ledger.count(Op::VolumeDelete), 1);
        assert!(ledger.to_json_pretty().contains("volume_delete"));
    }
}
