use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::checklist::IssuesFile;
use crate::audit::{AuditEvent, AuditKind, AuditLogger};
use crate::clock::Clock;
use crate::errors::SessionError;
use crate::hook::{HookDecision, HookInput};
use crate::phase::{InstructionContext, Phase, Sentinel, status_line};
use crate::phaseloop_config::{CeilingsSection, PhaseloopConfig};
use crate::queue::QueueStore;
use crate::safety::{Halt, Marker, Markers, SafetyValve};
use crate::session::{Session, SessionOutcome, SessionStore, Tier};
use crate::signals::CompletionDetector;
use crate::verify::{EvidenceStore, VerificationGate, Verdict};

/// Parameters for a new session.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub task: String,
    pub tier: Tier,
    pub skip_challenge: bool,
    pub publish_script: Option<PathBuf>,
}

/// Evaluates one host invocation against the persisted session.
///
/// Holds no state between calls: everything it needs is re-read from the
/// store and the state directory, and everything it decides is written back
/// before `evaluate` returns.
pub struct Orchestrator<'a> {
    store: &'a dyn SessionStore,
    clock: Arc<dyn Clock>,
    detector: CompletionDetector,
    valve: SafetyValve,
    gate: VerificationGate,
    evidence: EvidenceStore,
    audit: AuditLogger,
    issues: IssuesFile,
    plan_file: PathBuf,
    queue: QueueStore,
    ceilings: CeilingsSection,
    skip_challenge: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a dyn SessionStore, clock: Arc<dyn Clock>, config: &PhaseloopConfig) -> Self {
        let toml = &config.toml;
        Self {
            store,
            clock,
            detector: CompletionDetector::from_config(&toml.detector),
            valve: SafetyValve::new(
                Markers::new(config.state_dir.clone()),
                toml.session.staleness_hours,
            ),
            gate: VerificationGate::new(toml.verification.required.clone()),
            evidence: EvidenceStore::new(config.evidence_file()),
            audit: AuditLogger::new(&config.audit_file()),
            issues: IssuesFile::new(config.issues_file()),
            plan_file: config.plan_file(),
            queue: QueueStore::new(config.queue_dir()),
            ceilings: toml.ceilings.clone(),
            skip_challenge: toml.session.skip_challenge,
        }
    }

    pub fn markers(&self) -> &Markers {
        self.valve.markers()
    }

    pub fn issues_file(&self) -> &Path {
        self.issues.path()
    }

    fn event(&self, session: &Session, kind: AuditKind) -> Result<()> {
        self.audit.record(
            &AuditEvent::new(self.clock.now(), kind).at(
                &session.id,
                session.phase,
                session.iteration,
            ),
        )
    }

    /// Create the active session. Refuses if one already exists.
    pub fn start(&self, request: StartRequest) -> Result<Session> {
        if let Some(active) = self.store.read()? {
            return Err(SessionError::AlreadyActive { id: active.id }.into());
        }

        let removed = self.markers().clear()?;
        if !removed.is_empty() {
            warn!(markers = ?removed, "Discarded markers left over from a previous session");
        }

        let now = self.clock.now();
        let ceiling = self.ceilings.for_tier(request.tier);
        let mut session = Session::new(
            request.task,
            request.tier,
            ceiling,
            request.skip_challenge || self.skip_challenge,
            now,
        );
        session.publish_script = request.publish_script;
        self.store.write(&mut session, now)?;

        info!(
            session = %session.id,
            tier = %session.tier,
            ceiling,
            phase = %session.phase,
            "Started session"
        );
        self.event(
            &session,
            AuditKind::SessionStarted {
                tier: session.tier.to_string(),
                ceiling,
            },
        )?;
        Ok(session)
    }

    /// Decide whether the worker may stop.
    pub fn evaluate(&self, input: &HookInput) -> Result<HookDecision> {
        let Some(mut session) = self.store.read()? else {
            debug!("No active session; allowing exit");
            return Ok(HookDecision::allow());
        };
        let now = self.clock.now();

        if let Some(host) = input.session_id.as_deref() {
            match session.host_session_id.as_deref() {
                Some(bound) if bound != host => {
                    debug!(bound, host, "Invocation from another host session; allowing exit");
                    self.event(
                        &session,
                        AuditKind::ForeignSession {
                            host_session: host.to_string(),
                        },
                    )?;
                    return Ok(HookDecision::allow());
                }
                Some(_) => {}
                None => session.host_session_id = Some(host.to_string()),
            }
        }

        if let Some(halt) = self.valve.check(&session, now)? {
            return self.apply_halt(session, &halt, now);
        }

        let mut notes = Vec::new();
        if let Some(log) = input.transcript_path.as_deref() {
            let detection = self
                .detector
                .detect(log, session.transcript_offset, session.phase.exits())?;
            if let Some(sentinel) = detection.sentinel {
                session.transcript_offset = detection.transcript_len;
                if let Some(decision) = self.transition(&mut session, sentinel, &mut notes, now)? {
                    return Ok(decision);
                }
            }
        }

        session.iteration += 1;
        self.store.write(&mut session, now)?;

        let ctx = InstructionContext {
            task: &session.task,
            plan_file: &self.plan_file,
            issues_file: self.issues.path(),
            publish_script: session.publish_script.as_deref(),
            shared_queue: self.queue.has_backlog()?,
            notes,
        };
        let instruction = session.phase.instruction(&ctx);
        let status = status_line(session.phase, session.iteration, session.ceiling);

        debug!(
            session = %session.id,
            phase = %session.phase,
            iteration = session.iteration,
            "Blocking exit"
        );
        self.event(&session, AuditKind::Blocked)?;
        Ok(HookDecision::block(instruction, status))
    }

    /// Apply a detected sentinel. Returns a decision only when the session
    /// left the active slot.
    fn transition(
        &self,
        session: &mut Session,
        sentinel: Sentinel,
        notes: &mut Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<HookDecision>> {
        let from = session.phase;
        let mut to = sentinel.next;

        if from == Phase::Review && to == Phase::Ship {
            let open = self.issues.open_items()?;
            if !open.is_empty() {
                warn!(
                    session = %session.id,
                    open = open.len(),
                    "Review reported clean with open issues; sending to FIX"
                );
                notes.push(format!(
                    "Review was reported clean but {} still lists {} open issue(s). Fix them first.",
                    self.issues.path().display(),
                    open.len()
                ));
                to = Phase::Fix;
            }
        }
        if from == Phase::Fix {
            self.issues.clear()?;
        }

        info!(session = %session.id, %from, %to, sentinel = sentinel.tag, "Phase transition");
        self.event(
            session,
            AuditKind::Transitioned {
                from,
                to,
                sentinel: sentinel.tag.to_string(),
            },
        )?;

        if !to.is_terminal() {
            session.enter(to);
            return Ok(None);
        }

        session.enter(Phase::Complete);
        let verdict = self.run_gate(session)?;
        if verdict.passed() {
            self.store
                .archive(session, SessionOutcome::Completed, now)?;
            info!(session = %session.id, "Session complete");
            return Ok(Some(HookDecision::allow_with(
                "[phaseloop] Task complete: verification passed.",
            )));
        }

        self.issues.replace(&verdict.issue_lines())?;
        notes.push(verdict.describe());
        Ok(None)
    }

    /// Run the verification gate on a session that claims completion,
    /// forcing it back to REVIEW on failure.
    fn run_gate(&self, session: &mut Session) -> Result<Verdict> {
        let record = self.evidence.load()?;
        let verdict = self.gate.evaluate(&record, Some(session.started_at));
        if self.gate.enforce(session, &verdict) {
            self.event(session, AuditKind::GatePassed)?;
        } else {
            self.event(
                session,
                AuditKind::GateFailed {
                    missing: verdict.missing.iter().map(|c| c.to_string()).collect(),
                    failing: verdict.failing.iter().map(|(c, _)| c.to_string()).collect(),
                },
            )?;
        }
        Ok(verdict)
    }

    /// Evaluate current evidence without touching the session.
    pub fn check_evidence(&self) -> Result<Verdict> {
        let since = self.store.read()?.map(|s| s.started_at);
        Ok(self.gate.evaluate(&self.evidence.load()?, since))
    }

    fn apply_halt(
        &self,
        mut session: Session,
        halt: &Halt,
        now: DateTime<Utc>,
    ) -> Result<HookDecision> {
        warn!(session = %session.id, reason = halt.kind(), "Halting loop");
        self.event(
            &session,
            AuditKind::Halted {
                reason: halt.kind().to_string(),
                message: halt.message(),
            },
        )?;

        match halt {
            Halt::Aborted => {
                self.store
                    .archive(&mut session, SessionOutcome::Cancelled, now)?;
            }
            Halt::ForceCompleted { reason } => {
                session.force_complete_reason = Some(reason.clone());
                session.enter(Phase::Complete);
                self.store
                    .archive(&mut session, SessionOutcome::ForceCompleted, now)?;
            }
            // Left untouched for the external actor or for inspection.
            Halt::HandedOff | Halt::Stale { .. } | Halt::CeilingReached { .. } => {}
        }
        Ok(HookDecision::allow_with(halt.message()))
    }

    /// Drop a marker for the active session and note it in the audit trail.
    pub fn place_marker(&self, marker: &Marker) -> Result<PathBuf> {
        let session = self.store.read()?.ok_or(SessionError::NoActiveSession)?;
        let path = self.markers().place(marker)?;
        info!(session = %session.id, marker = marker.name(), "Placed marker");
        self.event(
            &session,
            AuditKind::MarkerPlaced {
                marker: marker.name().to_string(),
            },
        )?;
        Ok(path)
    }

    /// Honor a pending operator marker right away instead of waiting for
    /// the worker's next stop.
    pub fn apply_markers(&self) -> Result<Option<Halt>> {
        let Some(session) = self.store.read()? else {
            return Err(SessionError::NoActiveSession.into());
        };
        let Some(halt) = self.valve.take_marker()? else {
            return Ok(None);
        };
        self.apply_halt(session, &halt, self.clock.now())?;
        Ok(Some(halt))
    }

    pub fn raise_ceiling(&self, ceiling: u32) -> Result<Session> {
        let mut session = self.store.read()?.ok_or(SessionError::NoActiveSession)?;
        let from = session.ceiling;
        session.raise_ceiling(ceiling)?;
        self.store.write(&mut session, self.clock.now())?;
        info!(session = %session.id, from, to = ceiling, "Raised iteration ceiling");
        self.event(&session, AuditKind::CeilingRaised { from, to: ceiling })?;
        Ok(session)
    }
}
