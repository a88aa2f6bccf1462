//! Scripted collaborators for pipeline and CI tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use super::ci::{CiState, CiStatus};
use super::vcs::{PushResult, RebaseResult, Vcs};
use crate::errors::PublishError;

#[derive(Debug, Default)]
pub struct FakeVcsState {
    pub branch: String,
    pub head: String,
    pub remote_head: String,
    pub pushes: VecDeque<PushResult>,
    pub rebases: VecDeque<RebaseResult>,
    pub push_calls: u32,
    pub fetch_calls: u32,
    pub rebase_calls: u32,
    pub aborts: u32,
    pub resets: Vec<String>,
    /// Branch name to revision
    pub branches: BTreeMap<String, String>,
    /// Revisions the remote already contains
    pub contained: HashSet<String>,
}

/// In-memory `Vcs`. Pushes and rebases follow the script, then succeed.
#[derive(Debug, Default)]
pub struct FakeVcs {
    pub state: Mutex<FakeVcsState>,
}

impl FakeVcs {
    pub fn new(head: &str, remote_head: &str) -> Self {
        Self {
            state: Mutex::new(FakeVcsState {
                branch: "main".into(),
                head: head.into(),
                remote_head: remote_head.into(),
                ..Default::default()
            }),
        }
    }

    pub fn script_pushes(&self, results: Vec<PushResult>) {
        self.lock().pushes = results.into();
    }

    pub fn script_rebases(&self, results: Vec<RebaseResult>) {
        self.lock().rebases = results.into();
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeVcsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn current_branch(&self) -> Result<String, PublishError> {
        Ok(self.lock().branch.clone())
    }

    async fn head_rev(&self) -> Result<String, PublishError> {
        Ok(self.lock().head.clone())
    }

    async fn push(&self, _remote: &str, _branch: &str) -> Result<PushResult, PublishError> {
        let mut state = self.lock();
        state.push_calls += 1;
        let result = state.pushes.pop_front().unwrap_or(PushResult::Pushed);
        if result == PushResult::Pushed {
            state.remote_head = state.head.clone();
        }
        Ok(result)
    }

    async fn fetch(&self, _remote: &str, _branch: &str) -> Result<(), PublishError> {
        self.lock().fetch_calls += 1;
        Ok(())
    }

    async fn remote_rev(&self, _remote: &str, _branch: &str) -> Result<String, PublishError> {
        Ok(self.lock().remote_head.clone())
    }

    async fn rebase(&self, _onto: &str) -> Result<RebaseResult, PublishError> {
        let mut state = self.lock();
        state.rebase_calls += 1;
        let result = state.rebases.pop_front().unwrap_or(RebaseResult::Clean);
        if result == RebaseResult::Clean {
            state.head = format!("{}+rebased", state.head);
        }
        Ok(result)
    }

    async fn abort_rebase(&self) -> Result<(), PublishError> {
        self.lock().aborts += 1;
        Ok(())
    }

    async fn create_branch(&self, name: &str, rev: &str) -> Result<(), PublishError> {
        self.lock().branches.insert(name.to_string(), rev.to_string());
        Ok(())
    }

    async fn reset_to(&self, rev: &str) -> Result<(), PublishError> {
        let mut state = self.lock();
        state.head = rev.to_string();
        state.resets.push(rev.to_string());
        Ok(())
    }

    async fn remote_contains(
        &self,
        _remote: &str,
        _branch: &str,
        rev: &str,
    ) -> Result<bool, PublishError> {
        let state = self.lock();
        Ok(state.remote_head == rev || state.contained.contains(rev))
    }

    async fn remote_url(&self, _remote: &str) -> Result<String, PublishError> {
        Ok("https://github.com/acme/widgets.git".to_string())
    }
}

/// `CiStatus` that replays a script, then reports pending forever.
#[derive(Debug, Default)]
pub struct ScriptedCi {
    script: Mutex<VecDeque<CiState>>,
    calls: AtomicU32,
}

impl ScriptedCi {
    pub fn new(script: Vec<CiState>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CiStatus for ScriptedCi {
    async fn status(&self, _sha: &str) -> Result<CiState, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(next.unwrap_or(CiState::Pending))
    }
}
