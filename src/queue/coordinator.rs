use chrono::Duration;
use std::sync::Arc;

use super::store::{QueueState, QueueStore};
use super::types::{
    Claim, ConflictRecord, Disposition, EscalationRecord, ItemStatus, LedgerEntry, LedgerOutcome,
    Priority, ReleaseOutcome, WorkItem,
};
use crate::clock::Clock;
use crate::errors::QueueError;
use crate::phaseloop_config::QueueSection;

/// Lease-based work distribution over a shared backlog.
pub struct QueueCoordinator {
    store: QueueStore,
    clock: Arc<dyn Clock>,
    lease: Duration,
    max_attempts: u32,
    escalation_threshold: u32,
}

impl QueueCoordinator {
    pub fn new(store: QueueStore, clock: Arc<dyn Clock>, config: &QueueSection) -> Self {
        Self {
            store,
            clock,
            lease: Duration::minutes(i64::from(config.lease_minutes)),
            max_attempts: config.max_attempts.max(1),
            escalation_threshold: config.escalation_threshold.max(1),
        }
    }

    pub fn snapshot(&self) -> Result<QueueState, QueueError> {
        self.store.snapshot()
    }

    /// Append a new unclaimed item to the backlog.
    pub fn add(
        &self,
        title: &str,
        description: &str,
        priority: Priority,
    ) -> Result<WorkItem, QueueError> {
        let now = self.clock.now();
        self.store.transaction(|state| {
            let item = WorkItem::new(next_id(state), title, description, priority, now);
            state.backlog.push(item.clone());
            tracing::info!(item = %item.id, priority = %priority, "Added work item");
            Ok(item)
        })
    }

    /// Claim the highest-priority selectable item for `worker`.
    ///
    /// A worker that already holds a live claim gets that item back.
    pub fn claim(&self, worker: &str) -> Result<Option<WorkItem>, QueueError> {
        let now = self.clock.now();
        let lease = self.lease;
        self.store.transaction(|state| {
            if let Some(held) = state
                .claims
                .values()
                .find(|c| c.holder == worker && !c.is_expired(now))
                .map(|c| c.item_id.clone())
                && let Some(item) = state.item(&held)
            {
                return Ok(Some(item.clone()));
            }

            let mut candidates: Vec<(usize, Priority)> = state
                .backlog
                .iter()
                .enumerate()
                .filter(|(_, item)| is_selectable(state, item, now))
                .map(|(idx, item)| (idx, item.priority))
                .collect();
            // Stable sort keeps declaration order within a tier.
            candidates.sort_by_key(|(_, priority)| *priority);

            let Some(&(idx, _)) = candidates.first() else {
                return Ok(None);
            };

            let item = &mut state.backlog[idx];
            if let Some(stale) = state.claims.get(&item.id) {
                tracing::info!(
                    item = %item.id,
                    previous = %stale.holder,
                    "Seizing expired claim"
                );
            }
            item.status = ItemStatus::Claimed;
            let claimed = item.clone();
            state.claims.insert(
                claimed.id.clone(),
                Claim {
                    item_id: claimed.id.clone(),
                    holder: worker.to_string(),
                    acquired_at: now,
                    expires_at: now + lease,
                },
            );
            tracing::info!(item = %claimed.id, worker, "Claimed work item");
            Ok(Some(claimed))
        })
    }

    /// Give an item back. Only the claim holder may release.
    pub fn release(
        &self,
        item_id: &str,
        worker: &str,
        outcome: ReleaseOutcome,
    ) -> Result<Disposition, QueueError> {
        let now = self.clock.now();
        let max_attempts = self.max_attempts;
        let escalation_threshold = self.escalation_threshold;
        self.store.transaction(|state| {
            if state.item(item_id).is_none() {
                return Err(QueueError::ItemNotFound {
                    id: item_id.to_string(),
                });
            }
            match state.claims.get(item_id) {
                Some(claim) if claim.holder == worker => {}
                _ => {
                    return Err(QueueError::ClaimNotHeld {
                        id: item_id.to_string(),
                        worker: worker.to_string(),
                    });
                }
            }
            state.claims.remove(item_id);

            match outcome {
                ReleaseOutcome::Success { commit } => {
                    let mut item = state.take_item(item_id).ok_or_else(|| {
                        QueueError::ItemNotFound {
                            id: item_id.to_string(),
                        }
                    })?;
                    item.status = ItemStatus::Completed;
                    tracing::info!(item = %item.id, commit = %commit, "Work item completed");
                    state.ledger.push(LedgerEntry {
                        item,
                        outcome: LedgerOutcome::Completed { commit },
                        worker: worker.to_string(),
                        recorded_at: now,
                    });
                    Ok(Disposition::Completed)
                }
                ReleaseOutcome::Failure { error } => {
                    let item = state.item_mut(item_id).ok_or_else(|| QueueError::ItemNotFound {
                        id: item_id.to_string(),
                    })?;
                    item.attempts += 1;
                    item.errors.push(error.clone());
                    let attempts = item.attempts;
                    tracing::warn!(item = %item_id, attempts, error = %error, "Work item attempt failed");

                    let escalate = attempts >= escalation_threshold;
                    if escalate {
                        let snapshot = item.clone();
                        state.escalations.retain(|e| e.item_id != item_id);
                        state.escalations.push(EscalationRecord {
                            item_id: snapshot.id.clone(),
                            title: snapshot.title.clone(),
                            failures: snapshot.errors.clone(),
                            raised_at: now,
                        });
                    }

                    if attempts >= max_attempts {
                        let mut item = state.take_item(item_id).ok_or_else(|| {
                            QueueError::ItemNotFound {
                                id: item_id.to_string(),
                            }
                        })?;
                        item.status = ItemStatus::Failed;
                        let errors = item.errors.clone();
                        state.ledger.push(LedgerEntry {
                            item,
                            outcome: LedgerOutcome::Skipped { errors },
                            worker: worker.to_string(),
                            recorded_at: now,
                        });
                        tracing::warn!(item = %item_id, attempts, "Work item skipped");
                        Ok(Disposition::Skipped { attempts })
                    } else if escalate {
                        if let Some(item) = state.item_mut(item_id) {
                            item.status = ItemStatus::Escalated;
                        }
                        Ok(Disposition::Escalated { attempts })
                    } else {
                        if let Some(item) = state.item_mut(item_id) {
                            item.status = ItemStatus::Unclaimed;
                        }
                        Ok(Disposition::Requeued { attempts })
                    }
                }
                ReleaseOutcome::Conflict(record) => {
                    if let Some(item) = state.item_mut(item_id) {
                        item.status = ItemStatus::ConflictBlocked;
                    }
                    tracing::warn!(
                        item = %item_id,
                        branch = %record.recovery_branch,
                        paths = ?record.paths,
                        "Work item blocked on conflict"
                    );
                    state.conflicts.retain(|c| c.item_id != item_id);
                    state.conflicts.push(record);
                    Ok(Disposition::ConflictBlocked)
                }
            }
        })
    }

    /// Void every expired claim. Returns the ids made claimable again.
    pub fn steal_expired(&self) -> Result<Vec<String>, QueueError> {
        let now = self.clock.now();
        self.store.transaction(|state| {
            let expired: Vec<String> = state
                .claims
                .values()
                .filter(|c| c.is_expired(now))
                .map(|c| c.item_id.clone())
                .collect();
            for id in &expired {
                if let Some(claim) = state.claims.remove(id) {
                    tracing::info!(item = %id, holder = %claim.holder, "Expired claim stolen");
                }
                if let Some(item) = state.item_mut(id)
                    && item.status == ItemStatus::Claimed
                {
                    item.status = ItemStatus::Unclaimed;
                }
            }
            Ok(expired)
        })
    }

    /// Drop conflict records whose work already reached the remote and move
    /// their items to the ledger as completed.
    pub fn settle_conflicts(&self, item_ids: &[String]) -> Result<Vec<String>, QueueError> {
        let now = self.clock.now();
        self.store.transaction(|state| {
            let mut settled = Vec::new();
            for id in item_ids {
                let Some(pos) = state.conflicts.iter().position(|c| &c.item_id == id) else {
                    continue;
                };
                let record = state.conflicts.remove(pos);
                if let Some(mut item) = state.take_item(id) {
                    item.status = ItemStatus::Completed;
                    state.ledger.push(LedgerEntry {
                        item,
                        outcome: LedgerOutcome::Completed {
                            commit: record.local_rev.clone(),
                        },
                        worker: record.worker.clone(),
                        recorded_at: now,
                    });
                }
                tracing::info!(item = %id, "Conflict reconciled: remote already contains the work");
                settled.push(id.clone());
            }
            Ok(settled)
        })
    }

    /// Manual resolution: drop the conflict record and requeue the item.
    pub fn resolve_conflict(&self, item_id: &str) -> Result<ConflictRecord, QueueError> {
        self.store.transaction(|state| {
            let pos = state
                .conflicts
                .iter()
                .position(|c| c.item_id == item_id)
                .ok_or_else(|| QueueError::NoConflict {
                    id: item_id.to_string(),
                })?;
            let record = state.conflicts.remove(pos);
            if let Some(item) = state.item_mut(item_id) {
                item.status = ItemStatus::Unclaimed;
            }
            tracing::info!(item = %item_id, "Conflict resolved manually; item requeued");
            Ok(record)
        })
    }

    /// Clear an escalation and requeue the item with a fresh attempt budget.
    pub fn clear_escalation(&self, item_id: &str) -> Result<WorkItem, QueueError> {
        self.store.transaction(|state| {
            let pos = state
                .escalations
                .iter()
                .position(|e| e.item_id == item_id)
                .ok_or_else(|| QueueError::NoEscalation {
                    id: item_id.to_string(),
                })?;
            state.escalations.remove(pos);

            if state.item(item_id).is_none() {
                let ledger_pos = state
                    .ledger
                    .iter()
                    .rposition(|e| {
                        e.item.id == item_id && matches!(e.outcome, LedgerOutcome::Skipped { .. })
                    })
                    .ok_or_else(|| QueueError::ItemNotFound {
                        id: item_id.to_string(),
                    })?;
                let entry = state.ledger.remove(ledger_pos);
                state.backlog.push(entry.item);
            }

            let item = state.item_mut(item_id).ok_or_else(|| QueueError::ItemNotFound {
                id: item_id.to_string(),
            })?;
            item.attempts = 0;
            item.status = ItemStatus::Unclaimed;
            tracing::info!(item = %item_id, "Escalation cleared; item requeued");
            Ok(item.clone())
        })
    }
}

fn is_selectable(state: &QueueState, item: &WorkItem, now: chrono::DateTime<chrono::Utc>) -> bool {
    match item.status {
        ItemStatus::Unclaimed => match state.claims.get(&item.id) {
            Some(claim) => claim.is_expired(now),
            None => true,
        },
        ItemStatus::Claimed => state
            .claims
            .get(&item.id)
            .is_none_or(|claim| claim.is_expired(now)),
        ItemStatus::Completed
        | ItemStatus::Failed
        | ItemStatus::ConflictBlocked
        | ItemStatus::Escalated => false,
    }
}

/// Next `wi-NNN` id, unique across backlog and ledger.
fn next_id(state: &QueueState) -> String {
    let highest = state
        .backlog
        .iter()
        .map(|i| i.id.as_str())
        .chain(state.ledger.iter().map(|e| e.item.id.as_str()))
        .filter_map(|id| id.strip_prefix("wi-"))
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("wi-{:03}", highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::tempdir;

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn make_coordinator(dir: &Path, clock: Arc<ManualClock>) -> QueueCoordinator {
        QueueCoordinator::new(
            QueueStore::new(dir.join("queue")),
            clock,
            &QueueSection::default(),
        )
    }

    fn conflict(item_id: &str) -> ConflictRecord {
        ConflictRecord {
            item_id: item_id.to_string(),
            worker: "w1".into(),
            blocked_at: t0(),
            branch: "main".into(),
            paths: vec!["src/lib.rs".into()],
            local_rev: "aaa".into(),
            remote_rev: "bbb".into(),
            recovery_branch: "phaseloop/recovery/wi-001-1".into(),
        }
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        assert_eq!(q.add("A", "", Priority::Medium).unwrap().id, "wi-001");
        assert_eq!(q.add("B", "", Priority::Medium).unwrap().id, "wi-002");
    }

    #[test]
    fn test_claim_order_priority_then_declaration() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("low", "", Priority::Low).unwrap();
        q.add("med-1", "", Priority::Medium).unwrap();
        q.add("high", "", Priority::High).unwrap();
        q.add("med-2", "", Priority::Medium).unwrap();

        let order: Vec<String> = ["a", "b", "c", "d"]
            .iter()
            .map(|w| q.claim(w).unwrap().unwrap().title)
            .collect();
        assert_eq!(order, vec!["high", "med-1", "med-2", "low"]);
        assert!(q.claim("e").unwrap().is_none());
    }

    #[test]
    fn test_two_workers_one_item() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("only", "", Priority::High).unwrap();
        assert!(q.claim("w1").unwrap().is_some());
        assert!(q.claim("w2").unwrap().is_none());
    }

    #[test]
    fn test_same_worker_gets_own_claim_back() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("A", "", Priority::High).unwrap();
        q.add("B", "", Priority::High).unwrap();
        let first = q.claim("w1").unwrap().unwrap();
        let again = q.claim("w1").unwrap().unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(q.snapshot().unwrap().claims.len(), 1);
    }

    #[test]
    fn test_expired_lease_is_stealable_only_after_expiry() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let q = make_coordinator(dir.path(), clock.clone());
        q.add("A", "", Priority::High).unwrap();
        q.claim("w1").unwrap().unwrap();

        clock.advance(Duration::minutes(30));
        assert!(q.steal_expired().unwrap().is_empty());
        assert!(q.claim("w2").unwrap().is_none());

        clock.advance(Duration::minutes(1));
        assert_eq!(q.steal_expired().unwrap(), vec!["wi-001".to_string()]);
        let stolen = q.claim("w2").unwrap().unwrap();
        assert_eq!(stolen.id, "wi-001");
    }

    #[test]
    fn test_expired_claim_can_be_seized_without_steal() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let q = make_coordinator(dir.path(), clock.clone());
        q.add("A", "", Priority::High).unwrap();
        q.claim("w1").unwrap().unwrap();
        clock.advance(Duration::minutes(31));

        assert!(q.claim("w2").unwrap().is_some());
        let state = q.snapshot().unwrap();
        assert_eq!(state.claims["wi-001"].holder, "w2");
        assert!(matches!(
            q.release("wi-001", "w1", ReleaseOutcome::Failure { error: "x".into() }),
            Err(QueueError::ClaimNotHeld { .. })
        ));
    }

    #[test]
    fn test_release_success_moves_to_ledger() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("A", "", Priority::High).unwrap();
        q.claim("w1").unwrap();
        let disposition = q
            .release(
                "wi-001",
                "w1",
                ReleaseOutcome::Success {
                    commit: "abc123".into(),
                },
            )
            .unwrap();
        assert_eq!(disposition, Disposition::Completed);

        let state = q.snapshot().unwrap();
        assert!(state.backlog.is_empty());
        assert!(state.claims.is_empty());
        assert_eq!(
            state.ledger[0].outcome,
            LedgerOutcome::Completed {
                commit: "abc123".into()
            }
        );
    }

    #[test]
    fn test_only_holder_may_release() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("A", "", Priority::High).unwrap();
        q.claim("w1").unwrap();
        let err = q
            .release("wi-001", "w2", ReleaseOutcome::Failure { error: "x".into() })
            .unwrap_err();
        assert!(matches!(err, QueueError::ClaimNotHeld { .. }));
        assert!(matches!(
            q.release("wi-404", "w1", ReleaseOutcome::Failure { error: "x".into() }),
            Err(QueueError::ItemNotFound { .. })
        ));
    }

    #[test]
    fn test_three_failures_skip_item() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("flaky", "", Priority::High).unwrap();

        let errors = ["compile error", "test timeout", "lint failure"];
        let mut dispositions = Vec::new();
        for (i, error) in errors.iter().enumerate() {
            let worker = format!("w{}", i);
            let item = q.claim(&worker).unwrap().unwrap();
            if i > 0 {
                assert_eq!(item.last_error(), Some(errors[i - 1]));
            }
            dispositions.push(
                q.release(
                    &item.id,
                    &worker,
                    ReleaseOutcome::Failure {
                        error: error.to_string(),
                    },
                )
                .unwrap(),
            );
        }
        assert_eq!(
            dispositions,
            vec![
                Disposition::Requeued { attempts: 1 },
                Disposition::Requeued { attempts: 2 },
                Disposition::Skipped { attempts: 3 },
            ]
        );

        assert!(q.claim("w9").unwrap().is_none());
        let state = q.snapshot().unwrap();
        assert!(state.backlog.is_empty());
        assert_eq!(
            state.ledger[0].outcome,
            LedgerOutcome::Skipped {
                errors: errors.iter().map(|e| e.to_string()).collect()
            }
        );
        assert_eq!(state.escalations.len(), 1);
        assert_eq!(state.escalations[0].failures.len(), 3);
    }

    #[test]
    fn test_escalation_below_attempt_limit_holds_item() {
        let dir = tempdir().unwrap();
        let config = QueueSection {
            lease_minutes: 30,
            max_attempts: 3,
            escalation_threshold: 2,
        };
        let q = QueueCoordinator::new(
            QueueStore::new(dir.path().join("queue")),
            Arc::new(ManualClock::new(t0())),
            &config,
        );
        q.add("A", "", Priority::High).unwrap();
        for _ in 0..2 {
            q.claim("w1").unwrap().unwrap();
            q.release("wi-001", "w1", ReleaseOutcome::Failure { error: "boom".into() })
                .unwrap();
        }
        assert!(q.claim("w1").unwrap().is_none());
        assert_eq!(
            q.snapshot().unwrap().backlog[0].status,
            ItemStatus::Escalated
        );

        let item = q.clear_escalation("wi-001").unwrap();
        assert_eq!(item.attempts, 0);
        assert!(q.claim("w1").unwrap().is_some());
    }

    #[test]
    fn test_clear_escalation_restores_skipped_item() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("A", "", Priority::High).unwrap();
        for _ in 0..3 {
            q.claim("w1").unwrap().unwrap();
            q.release("wi-001", "w1", ReleaseOutcome::Failure { error: "boom".into() })
                .unwrap();
        }
        let restored = q.clear_escalation("wi-001").unwrap();
        assert_eq!(restored.status, ItemStatus::Unclaimed);
        let state = q.snapshot().unwrap();
        assert!(state.ledger.is_empty());
        assert!(state.escalations.is_empty());
        assert!(matches!(
            q.clear_escalation("wi-001"),
            Err(QueueError::NoEscalation { .. })
        ));
    }

    #[test]
    fn test_conflict_release_does_not_count_attempt() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("A", "", Priority::High).unwrap();
        q.add("B", "", Priority::Medium).unwrap();
        q.claim("w1").unwrap();
        let disposition = q
            .release("wi-001", "w1", ReleaseOutcome::Conflict(conflict("wi-001")))
            .unwrap();
        assert_eq!(disposition, Disposition::ConflictBlocked);

        let state = q.snapshot().unwrap();
        let item = state.item("wi-001").unwrap();
        assert_eq!(item.attempts, 0);
        assert_eq!(item.status, ItemStatus::ConflictBlocked);
        assert_eq!(state.conflicts.len(), 1);

        // The worker moves on to the next item.
        assert_eq!(q.claim("w1").unwrap().unwrap().id, "wi-002");
    }

    #[test]
    fn test_resolve_conflict_requeues() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("A", "", Priority::High).unwrap();
        q.claim("w1").unwrap();
        q.release("wi-001", "w1", ReleaseOutcome::Conflict(conflict("wi-001")))
            .unwrap();

        let record = q.resolve_conflict("wi-001").unwrap();
        assert_eq!(record.recovery_branch, "phaseloop/recovery/wi-001-1");
        assert_eq!(q.claim("w2").unwrap().unwrap().id, "wi-001");
        assert!(matches!(
            q.resolve_conflict("wi-001"),
            Err(QueueError::NoConflict { .. })
        ));
    }

    #[test]
    fn test_settle_conflicts_completes_item() {
        let dir = tempdir().unwrap();
        let q = make_coordinator(dir.path(), Arc::new(ManualClock::new(t0())));
        q.add("A", "", Priority::High).unwrap();
        q.claim("w1").unwrap();
        q.release("wi-001", "w1", ReleaseOutcome::Conflict(conflict("wi-001")))
            .unwrap();

        let settled = q.settle_conflicts(&["wi-001".to_string()]).unwrap();
        assert_eq!(settled, vec!["wi-001".to_string()]);
        let state = q.snapshot().unwrap();
        assert!(state.conflicts.is_empty());
        assert!(state.backlog.is_empty());
        assert_eq!(
            state.ledger[0].outcome,
            LedgerOutcome::Completed {
                commit: "aaa".into()
            }
        );
    }

    #[test]
    fn test_concurrent_claims_never_overlap() {
        const WORKERS: usize = 8;
        const ITEMS: usize = 6;

        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let setup = make_coordinator(dir.path(), clock.clone());
        for i in 0..ITEMS {
            setup.add(&format!("item {}", i), "", Priority::Medium).unwrap();
        }

        let handles: Vec<_> = (0..WORKERS)
            .map(|w| {
                let root = dir.path().to_path_buf();
                let clock = clock.clone();
                std::thread::spawn(move || {
                    let q = make_coordinator(&root, clock);
                    let mut won = Vec::new();
                    // Distinct identities so no claim is handed back to its holder.
                    for attempt in 0..ITEMS {
                        let worker = format!("w{}-{}", w, attempt);
                        if let Some(item) = q.claim(&worker).unwrap() {
                            won.push((item.id, worker));
                        }
                    }
                    won
                })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            winners.extend(handle.join().unwrap());
        }

        assert_eq!(winners.len(), ITEMS);
        let unique: HashSet<&String> = winners.iter().map(|(id, _)| id).collect();
        assert_eq!(unique.len(), ITEMS);

        let state = setup.snapshot().unwrap();
        assert_eq!(state.claims.len(), ITEMS);
        for (id, worker) in &winners {
            assert_eq!(&state.claims[id].holder, worker);
        }
    }
}
