//! Version-control collaborator.
//!
//! Reads (revisions, ancestry, branch creation) go through `git2`; network and
//! rebase operations shell out to the `git` CLI so credentials helpers and
//! hooks behave as they do for the user.

use async_trait::async_trait;
use git2::{BranchType, Oid, Repository};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::errors::PublishError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    Pushed,
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseResult {
    Clean,
    Conflicted { paths: Vec<String> },
}

#[async_trait]
pub trait Vcs: Send + Sync {
    async fn current_branch(&self) -> Result<String, PublishError>;
    async fn head_rev(&self) -> Result<String, PublishError>;
    async fn push(&self, remote: &str, branch: &str) -> Result<PushResult, PublishError>;
    async fn fetch(&self, remote: &str, branch: &str) -> Result<(), PublishError>;
    /// Revision of `remote/branch` as of the last fetch.
    async fn remote_rev(&self, remote: &str, branch: &str) -> Result<String, PublishError>;
    async fn rebase(&self, onto: &str) -> Result<RebaseResult, PublishError>;
    async fn abort_rebase(&self) -> Result<(), PublishError>;
    async fn create_branch(&self, name: &str, rev: &str) -> Result<(), PublishError>;
    /// Move the current branch and working tree to `rev`, discarding local commits.
    async fn reset_to(&self, rev: &str) -> Result<(), PublishError>;
    /// Whether `rev` is already reachable from `remote/branch`.
    async fn remote_contains(
        &self,
        remote: &str,
        branch: &str,
        rev: &str,
    ) -> Result<bool, PublishError>;
    async fn remote_url(&self, remote: &str) -> Result<String, PublishError>;
}

/// `Vcs` over a local working copy.
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn open(&self) -> Result<Repository, PublishError> {
        Repository::discover(&self.repo_dir).map_err(git2_error("open"))
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, PublishError> {
        tracing::debug!(args = ?args, "Running git");
        tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(PublishError::SpawnFailed)
    }

    async fn run_checked(&self, args: &[&str]) -> Result<String, PublishError> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(PublishError::Git {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn git2_error(command: &'static str) -> impl Fn(git2::Error) -> PublishError {
    move |e| PublishError::Git {
        command: command.to_string(),
        stderr: e.message().to_string(),
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn current_branch(&self) -> Result<String, PublishError> {
        let repo = self.open()?;
        let head = repo.head().map_err(git2_error("head"))?;
        head.shorthand()
            .filter(|_| head.is_branch())
            .map(str::to_string)
            .ok_or_else(|| PublishError::Git {
                command: "head".into(),
                stderr: "HEAD is detached; pass --branch".into(),
            })
    }

    async fn head_rev(&self) -> Result<String, PublishError> {
        let repo = self.open()?;
        let commit = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(git2_error("rev-parse HEAD"))?;
        Ok(commit.id().to_string())
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<PushResult, PublishError> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let output = self.run(&["push", remote, &refspec]).await?;
        if output.status.success() {
            Ok(PushResult::Pushed)
        } else {
            Ok(PushResult::Rejected {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn fetch(&self, remote: &str, branch: &str) -> Result<(), PublishError> {
        self.run_checked(&["fetch", remote, branch]).await?;
        Ok(())
    }

    async fn remote_rev(&self, remote: &str, branch: &str) -> Result<String, PublishError> {
        let repo = self.open()?;
        let name = format!("{}/{}", remote, branch);
        let reference = repo
            .find_branch(&name, BranchType::Remote)
            .map_err(git2_error("rev-parse remote"))?;
        let commit = reference
            .get()
            .peel_to_commit()
            .map_err(git2_error("rev-parse remote"))?;
        Ok(commit.id().to_string())
    }

    async fn rebase(&self, onto: &str) -> Result<RebaseResult, PublishError> {
        let output = self.run(&["rebase", onto]).await?;
        if output.status.success() {
            return Ok(RebaseResult::Clean);
        }

        let listing = self
            .run_checked(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let paths: Vec<String> = listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if paths.is_empty() {
            // Failed for a reason other than content conflicts.
            let _ = self.run(&["rebase", "--abort"]).await;
            return Err(PublishError::Git {
                command: format!("rebase {}", onto),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(RebaseResult::Conflicted { paths })
    }

    async fn abort_rebase(&self) -> Result<(), PublishError> {
        self.run_checked(&["rebase", "--abort"]).await?;
        Ok(())
    }

    async fn create_branch(&self, name: &str, rev: &str) -> Result<(), PublishError> {
        let repo = self.open()?;
        let oid = Oid::from_str(rev).map_err(git2_error("branch"))?;
        let commit = repo.find_commit(oid).map_err(git2_error("branch"))?;
        repo.branch(name, &commit, false)
            .map_err(git2_error("branch"))?;
        Ok(())
    }

    async fn reset_to(&self, rev: &str) -> Result<(), PublishError> {
        self.run_checked(&["reset", "--hard", "-q", rev]).await?;
        Ok(())
    }

    async fn remote_contains(
        &self,
        remote: &str,
        branch: &str,
        rev: &str,
    ) -> Result<bool, PublishError> {
        let remote_rev = self.remote_rev(remote, branch).await?;
        let repo = self.open()?;
        let target = Oid::from_str(rev).map_err(git2_error("merge-base"))?;
        let tip = Oid::from_str(&remote_rev).map_err(git2_error("merge-base"))?;
        if target == tip {
            return Ok(true);
        }
        repo.graph_descendant_of(tip, target)
            .map_err(git2_error("merge-base"))
    }

    async fn remote_url(&self, remote: &str) -> Result<String, PublishError> {
        let repo = self.open()?;
        let found = repo.find_remote(remote).map_err(git2_error("remote"))?;
        found
            .url()
            .map(str::to_string)
            .ok_or_else(|| PublishError::UnknownRemote(remote.to_string()))
    }
}
