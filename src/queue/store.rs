//! File-backed queue state guarded by an exclusive lock.
//!
//! Every mutation takes `queue.lock` with `flock`, loads all queue files,
//! applies the change and writes them back before unlocking. Two workers can
//! therefore never both observe an item as unclaimed and both win it.

use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use super::types::{Claim, ConflictRecord, EscalationRecord, LedgerEntry, WorkItem};
use crate::errors::QueueError;
use crate::util::{atomic_write_json, read_json_or_default};

/// Everything the coordinator persists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueState {
    pub backlog: Vec<WorkItem>,
    /// Keyed by item id; at most one claim per item
    pub claims: BTreeMap<String, Claim>,
    pub conflicts: Vec<ConflictRecord>,
    pub ledger: Vec<LedgerEntry>,
    pub escalations: Vec<EscalationRecord>,
}

impl QueueState {
    pub fn item(&self, id: &str) -> Option<&WorkItem> {
        self.backlog.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut WorkItem> {
        self.backlog.iter_mut().find(|i| i.id == id)
    }

    pub fn take_item(&mut self, id: &str) -> Option<WorkItem> {
        let pos = self.backlog.iter().position(|i| i.id == id)?;
        Some(self.backlog.remove(pos))
    }
}

pub struct QueueStore {
    dir: PathBuf,
}

impl QueueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Whether any work items are waiting. Never creates the queue directory.
    pub fn has_backlog(&self) -> Result<bool, QueueError> {
        if !self.file("backlog.json").exists() {
            return Ok(false);
        }
        Ok(!self.snapshot()?.backlog.is_empty())
    }

    fn open_lock(&self) -> Result<File, QueueError> {
        let lock_path = self.file("queue.lock");
        std::fs::create_dir_all(&self.dir).map_err(|source| QueueError::LockFailed {
            path: lock_path.clone(),
            source,
        })?;
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|source| QueueError::LockFailed {
                path: lock_path,
                source,
            })
    }

    fn load_unlocked(&self) -> Result<QueueState, QueueError> {
        Ok(QueueState {
            backlog: read_json_or_default(&self.file("backlog.json"))?,
            claims: read_json_or_default(&self.file("claims.json"))?,
            conflicts: read_json_or_default(&self.file("conflicts.json"))?,
            ledger: read_json_or_default(&self.file("ledger.json"))?,
            escalations: read_json_or_default(&self.file("escalations.json"))?,
        })
    }

    fn save_unlocked(&self, state: &QueueState) -> Result<(), QueueError> {
        atomic_write_json(&self.file("backlog.json"), &state.backlog)?;
        atomic_write_json(&self.file("claims.json"), &state.claims)?;
        atomic_write_json(&self.file("conflicts.json"), &state.conflicts)?;
        atomic_write_json(&self.file("ledger.json"), &state.ledger)?;
        atomic_write_json(&self.file("escalations.json"), &state.escalations)?;
        Ok(())
    }

    /// Consistent read-only snapshot under a shared lock.
    pub fn snapshot(&self) -> Result<QueueState, QueueError> {
        let lock = self.open_lock()?;
        FileExt::lock_shared(&lock).map_err(|source| QueueError::LockFailed {
            path: self.file("queue.lock"),
            source,
        })?;
        let state = self.load_unlocked();
        let _ = FileExt::unlock(&lock);
        state
    }

    /// Run `f` against the queue state while holding the exclusive lock.
    ///
    /// The state is written back only when `f` succeeds.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut QueueState) -> Result<R, QueueError>,
    ) -> Result<R, QueueError> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()
            .map_err(|source| QueueError::LockFailed {
                path: self.file("queue.lock"),
                source,
            })?;

        let result = (|| {
            let mut state = self.load_unlocked()?;
            let value = f(&mut state)?;
            self.save_unlocked(&state)?;
            Ok(value)
        })();

        let _ = FileExt::unlock(&lock);
        result
    }
}
