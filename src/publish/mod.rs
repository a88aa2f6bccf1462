//! Conflict-aware publishing of completed work items.
//!
//! A rejected push is followed by fetch + rebase and a bounded retry. A
//! rebase that stops on content conflicts is aborted, the unpushed commits are
//! parked on a recovery branch, and the item is released without being
//! charged an attempt: another worker's change caused the conflict.

mod ci;
mod pipeline;
mod vcs;

#[cfg(test)]
pub(crate) mod testing;

pub use ci::{CiState, CiStatus, CiVerdict, GithubActions, parse_owner_repo, wait_for_ci};
pub use pipeline::{PublishOutcome, PublishPipeline};
pub use vcs::{GitCli, PushResult, RebaseResult, Vcs};
