use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::{Session, SessionOutcome};
use crate::errors::SessionError;
use crate::util::atomic_write_json;

/// Whole-record persistence for the active session.
///
/// An absent record means "no active session" and is not an error.
pub trait SessionStore: Send + Sync {
    fn read(&self) -> Result<Option<Session>, SessionError>;

    /// Replace the stored record. Stamps `last_activity` with `now` first.
    fn write(&self, session: &mut Session, now: DateTime<Utc>) -> Result<(), SessionError>;

    /// Record `outcome` on the session, move it out of the active slot.
    fn archive(
        &self,
        session: &mut Session,
        outcome: SessionOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError>;
}

/// Session store backed by `.phaseloop/session.json`.
pub struct FileSessionStore {
    session_file: PathBuf,
    task_file: PathBuf,
    archive_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(session_file: PathBuf, task_file: PathBuf, archive_dir: PathBuf) -> Self {
        Self {
            session_file,
            task_file,
            archive_dir,
        }
    }

    pub fn from_state_dir(state_dir: &Path) -> Self {
        Self::new(
            state_dir.join("session.json"),
            state_dir.join("task.md"),
            state_dir.join("archive"),
        )
    }
}

fn load_record(path: &Path) -> Result<Option<Session>, SessionError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    let session: Session =
        serde_json::from_str(&content).map_err(|e| SessionError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    session
        .check_invariants()
        .map_err(|message| SessionError::Corrupt {
            path: path.to_path_buf(),
            message,
        })?;
    Ok(Some(session))
}

impl SessionStore for FileSessionStore {
    fn read(&self) -> Result<Option<Session>, SessionError> {
        load_record(&self.session_file)
    }

    fn write(&self, session: &mut Session, now: DateTime<Utc>) -> Result<(), SessionError> {
        session.last_activity = now;
        atomic_write_json(&self.session_file, session)?;

        // Task description is immutable after creation.
        if !self.task_file.exists() {
            fs::write(&self.task_file, format!("{}\n", session.task)).with_context(|| {
                format!("Failed to write task file: {}", self.task_file.display())
            })?;
        }
        Ok(())
    }

    fn archive(
        &self,
        session: &mut Session,
        outcome: SessionOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        session.last_activity = now;
        session.outcome = Some(outcome);
        let target = self.archive_dir.join(format!("{}.json", session.id));
        atomic_write_json(&target, session)?;

        for path in [&self.session_file, &self.task_file] {
            if path.exists() {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}

/// In-memory session store for tests and dry runs.
#[derive(Default)]
pub struct MemorySessionStore {
    current: Mutex<Option<Session>>,
    archived: Mutex<Vec<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn archived(&self) -> Vec<Session> {
        self.archived
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn read(&self) -> Result<Option<Session>, SessionError> {
        Ok(self.current.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn write(&self, session: &mut Session, now: DateTime<Utc>) -> Result<(), SessionError> {
        session.last_activity = now;
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn archive(
        &self,
        session: &mut Session,
        outcome: SessionOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        session.last_activity = now;
        session.outcome = Some(outcome);
        self.archived
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(session.clone());
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::session::Tier;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn make_store(dir: &Path) -> FileSessionStore {
        FileSessionStore::from_state_dir(dir)
    }

    #[test]
    fn test_read_absent_is_none() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let mut session = Session::new("Add login", Tier::Standard, 10, false, t0());
        session.iteration = 4;
        store.write(&mut session, t0() + Duration::minutes(5)).unwrap();

        let loaded = store.read().unwrap().unwrap();
        assert_eq!(loaded.iteration, 4);
        assert_eq!(loaded.last_activity, t0() + Duration::minutes(5));
        assert_eq!(loaded.id, session.id);
    }

    #[test]
    fn test_task_file_is_immutable() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let mut session = Session::new("First", Tier::Standard, 10, false, t0());
        store.write(&mut session, t0()).unwrap();
        session.task = "Changed".into();
        store.write(&mut session, t0()).unwrap();

        let task = fs::read_to_string(dir.path().join("task.md")).unwrap();
        assert_eq!(task.trim(), "First");
    }

    #[test]
    fn test_unknown_phase_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let mut session = Session::new("x", Tier::Standard, 10, false, t0());
        store.write(&mut session, t0()).unwrap();

        let path = dir.path().join("session.json");
        let content = fs::read_to_string(&path)
            .unwrap()
            .replace("\"CHALLENGE\"", "\"DEPLOY\"");
        fs::write(&path, content).unwrap();

        match store.read() {
            Err(SessionError::Corrupt { message, .. }) => assert!(message.contains("DEPLOY")),
            other => panic!("Expected Corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_complete_outside_terminal_phase_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let mut session = Session::new("x", Tier::Standard, 10, false, t0());
        session.phase = Phase::Review;
        session.complete = true;
        store.write(&mut session, t0()).unwrap();
        assert!(matches!(store.read(), Err(SessionError::Corrupt { .. })));
    }

    #[test]
    fn test_archive_clears_active_slot() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let mut session = Session::new("x", Tier::Standard, 10, false, t0());
        store.write(&mut session, t0()).unwrap();
        store
            .archive(&mut session, SessionOutcome::Cancelled, t0())
            .unwrap();

        assert!(store.read().unwrap().is_none());
        assert!(!dir.path().join("task.md").exists());
        let archived = load_record(&dir.path().join("archive").join(format!("{}.json", session.id)))
            .unwrap()
            .unwrap();
        assert_eq!(archived.outcome, Some(SessionOutcome::Cancelled));
    }

    #[test]
    fn test_memory_store_archive() {
        let store = MemorySessionStore::new();
        let mut session = Session::new("x", Tier::Trivial, 3, true, t0());
        store.write(&mut session, t0()).unwrap();
        assert!(store.read().unwrap().is_some());
        store
            .archive(&mut session, SessionOutcome::Completed, t0())
            .unwrap();
        assert!(store.read().unwrap().is_none());
        assert_eq!(store.archived().len(), 1);
    }
}
