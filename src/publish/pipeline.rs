use std::sync::Arc;

use super::vcs::{PushResult, RebaseResult, Vcs};
use crate::clock::Clock;
use crate::errors::{PublishError, QueueError};
use crate::phaseloop_config::PublishSection;
use crate::queue::{ConflictRecord, Disposition, QueueCoordinator, ReleaseOutcome};

/// Result of publishing one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published { commit: String, push_attempts: u32 },
    /// Work preserved on a recovery branch; the item was not charged an attempt
    Conflict(ConflictRecord),
    /// The item was released as a failed attempt
    Failed { error: String, disposition: Disposition },
}

/// Push, fetch, rebase and retry, quarantining true content conflicts.
pub struct PublishPipeline<'a> {
    vcs: &'a dyn Vcs,
    queue: &'a QueueCoordinator,
    clock: Arc<dyn Clock>,
    config: PublishSection,
}

impl<'a> PublishPipeline<'a> {
    pub fn new(
        vcs: &'a dyn Vcs,
        queue: &'a QueueCoordinator,
        clock: Arc<dyn Clock>,
        config: PublishSection,
    ) -> Self {
        Self {
            vcs,
            queue,
            clock,
            config,
        }
    }

    fn recovery_branch(&self, item_id: &str, local_rev: &str) -> String {
        format!(
            "{}/{}-{}-{}",
            self.config.recovery_prefix,
            item_id,
            self.clock.now().format("%Y%m%d%H%M%S"),
            local_rev.get(..7).unwrap_or(local_rev)
        )
    }

    /// Publish the work for `item_id`, held by `worker`, to `branch` (the
    /// current branch when `None`), then release the claim accordingly.
    pub async fn publish(
        &self,
        item_id: &str,
        worker: &str,
        branch: Option<&str>,
    ) -> Result<PublishOutcome, PublishError> {
        let state = self.queue.snapshot()?;
        match state.claims.get(item_id) {
            Some(claim) if claim.holder == worker => {}
            _ if state.item(item_id).is_none() => {
                return Err(QueueError::ItemNotFound {
                    id: item_id.to_string(),
                }
                .into());
            }
            _ => {
                return Err(QueueError::ClaimNotHeld {
                    id: item_id.to_string(),
                    worker: worker.to_string(),
                }
                .into());
            }
        }

        match self.push_with_recovery(item_id, worker, branch).await {
            Ok(outcome) => Ok(outcome),
            Err(PublishError::Queue(e)) => Err(PublishError::Queue(e)),
            Err(e) => {
                // The collaborator itself failed; charge the attempt.
                let error = format!("push-failed: {}", e);
                tracing::warn!(item = %item_id, error = %error, "Publish aborted");
                let disposition = self.queue.release(
                    item_id,
                    worker,
                    ReleaseOutcome::Failure {
                        error: error.clone(),
                    },
                )?;
                Ok(PublishOutcome::Failed { error, disposition })
            }
        }
    }

    async fn push_with_recovery(
        &self,
        item_id: &str,
        worker: &str,
        branch: Option<&str>,
    ) -> Result<PublishOutcome, PublishError> {
        let branch = match branch {
            Some(b) => b.to_string(),
            None => self.vcs.current_branch().await?,
        };
        let remote = self.config.remote.as_str();
        let max_attempts = self.config.max_push_attempts.max(1);
        let mut last_rejection = String::new();

        for attempt in 1..=max_attempts {
            match self.vcs.push(remote, &branch).await? {
                PushResult::Pushed => {
                    let commit = self.vcs.head_rev().await?;
                    tracing::info!(item = %item_id, commit = %commit, attempt, "Published");
                    self.queue.release(
                        item_id,
                        worker,
                        ReleaseOutcome::Success {
                            commit: commit.clone(),
                        },
                    )?;
                    return Ok(PublishOutcome::Published {
                        commit,
                        push_attempts: attempt,
                    });
                }
                PushResult::Rejected { reason } => {
                    tracing::info!(item = %item_id, attempt, reason = %reason, "Push rejected");
                    last_rejection = reason;
                }
            }

            if attempt == max_attempts {
                break;
            }

            let local_rev = self.vcs.head_rev().await?;
            self.vcs.fetch(remote, &branch).await?;
            let onto = format!("{}/{}", remote, branch);
            match self.vcs.rebase(&onto).await? {
                RebaseResult::Clean => {
                    tracing::info!(item = %item_id, onto = %onto, "Rebased cleanly; retrying push");
                }
                RebaseResult::Conflicted { paths } => {
                    let remote_rev = self.vcs.remote_rev(remote, &branch).await?;
                    self.vcs.abort_rebase().await?;
                    let recovery_branch = self.recovery_branch(item_id, &local_rev);
                    self.vcs.create_branch(&recovery_branch, &local_rev).await?;
                    // The work lives on only in the recovery branch; the next
                    // item starts from the remote tip.
                    self.vcs.reset_to(&remote_rev).await?;

                    let record = ConflictRecord {
                        item_id: item_id.to_string(),
                        worker: worker.to_string(),
                        blocked_at: self.clock.now(),
                        branch: branch.clone(),
                        paths,
                        local_rev,
                        remote_rev,
                        recovery_branch,
                    };
                    self.queue.release(
                        item_id,
                        worker,
                        ReleaseOutcome::Conflict(record.clone()),
                    )?;
                    return Ok(PublishOutcome::Conflict(record));
                }
            }
        }

        let error = if last_rejection.is_empty() {
            "push-failed".to_string()
        } else {
            format!("push-failed: {}", last_rejection)
        };
        tracing::warn!(item = %item_id, attempts = max_attempts, "Push attempts exhausted");
        let disposition = self.queue.release(
            item_id,
            worker,
            ReleaseOutcome::Failure {
                error: error.clone(),
            },
        )?;
        Ok(PublishOutcome::Failed { error, disposition })
    }

    /// Settle conflict records whose local revision the remote now contains.
    /// Returns the item ids moved to the ledger.
    pub async fn reconcile_conflicts(&self) -> Result<Vec<String>, PublishError> {
        let state = self.queue.snapshot()?;
        let remote = self.config.remote.as_str();
        let mut fetched: Vec<String> = Vec::new();
        let mut settled = Vec::new();

        for record in &state.conflicts {
            if !fetched.contains(&record.branch) {
                self.vcs.fetch(remote, &record.branch).await?;
                fetched.push(record.branch.clone());
            }
            if self
                .vcs
                .remote_contains(remote, &record.branch, &record.local_rev)
                .await?
            {
                settled.push(record.item_id.clone());
            }
        }

        if settled.is_empty() {
            return Ok(settled);
        }
        Ok(self.queue.settle_conflicts(&settled)?)
    }
}
