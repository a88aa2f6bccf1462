//! Shared task queue with lease-based claims.
//!
//! Multiple phaseloop instances cooperate on one backlog under
//! `.phaseloop/queue/`. The only hard guarantee is that no item ever has two
//! live claims; ordering between independent items is not guaranteed.

mod coordinator;
mod store;
mod types;

pub use coordinator::QueueCoordinator;
pub use store::{QueueState, QueueStore};
pub use types::{
    Claim, ConflictRecord, Disposition, EscalationRecord, ItemStatus, LedgerEntry, LedgerOutcome,
    Priority, ReleaseOutcome, WorkItem,
};
