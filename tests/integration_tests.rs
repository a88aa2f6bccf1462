//! Integration tests for phaseloop
//!
//! These drive the binary the way an operator and the host hook would.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a phaseloop Command
fn phaseloop() -> Command {
    cargo_bin_cmd!("phaseloop")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a phaseloop project in a temp directory
fn init_project(dir: &TempDir) {
    phaseloop()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn start_session(dir: &TempDir, tier: &str) {
    phaseloop()
        .current_dir(dir.path())
        .args(["start", "--tier", tier, "add", "a", "retry", "budget"])
        .assert()
        .success();
}

/// Run the hook with host JSON on stdin and return stdout.
fn hook(dir: &TempDir, input: &str) -> String {
    let output = phaseloop()
        .current_dir(dir.path())
        .arg("hook")
        .write_stdin(input.to_string())
        .output()
        .unwrap();
    assert!(output.status.success(), "hook failed: {:?}", output);
    String::from_utf8(output.stdout).unwrap()
}

fn write_transcript(dir: &Path, lines: &[&str]) -> PathBuf {
    let path = dir.join("transcript.jsonl");
    let body: Vec<String> = lines
        .iter()
        .map(|text| {
            serde_json::json!({
                "type": "assistant",
                "message": {"content": [{"type": "text", "text": text}]}
            })
            .to_string()
        })
        .collect();
    fs::write(&path, body.join("\n") + "\n").unwrap();
    path
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_phaseloop_help() {
        phaseloop().arg("--help").assert().success();
    }

    #[test]
    fn test_phaseloop_version() {
        phaseloop().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        phaseloop()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized phaseloop project"));

        assert!(dir.path().join(".phaseloop").exists());
        assert!(dir.path().join(".phaseloop/archive").exists());
        assert!(dir.path().join(".phaseloop/logs").exists());
        assert!(dir.path().join(".phaseloop/queue").exists());
        assert!(dir.path().join(".phaseloop/phaseloop.toml").exists());
    }

    #[test]
    fn test_init_twice_is_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_status_uninitialized() {
        let dir = create_temp_project();

        phaseloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not initialized"));
    }
}

// =============================================================================
// Session Lifecycle Tests
// =============================================================================

mod session_lifecycle {
    use super::*;

    #[test]
    fn test_start_then_status() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .args(["start", "--tier", "complex", "rework", "the", "parser"])
            .assert()
            .success()
            .stdout(predicate::str::contains("CHALLENGE"))
            .stdout(predicate::str::contains("ceiling 20"));

        assert!(dir.path().join(".phaseloop/session.json").exists());

        phaseloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("rework the parser"))
            .stdout(predicate::str::contains("0/20"));
    }

    #[test]
    fn test_skip_challenge_starts_at_plan() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .args(["start", "--skip-challenge", "small", "fix"])
            .assert()
            .success()
            .stdout(predicate::str::contains("PLAN"));
    }

    #[test]
    fn test_second_start_is_refused() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");

        phaseloop()
            .current_dir(dir.path())
            .args(["start", "another", "task"])
            .assert()
            .failure();
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .args(["start", "--tier", "enormous", "task"])
            .assert()
            .failure();
    }

    #[test]
    fn test_cancel_archives_session() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");

        phaseloop()
            .current_dir(dir.path())
            .arg("cancel")
            .assert()
            .success()
            .stdout(predicate::str::contains("cancelled"));

        assert!(!dir.path().join(".phaseloop/session.json").exists());
        let archived = fs::read_dir(dir.path().join(".phaseloop/archive"))
            .unwrap()
            .count();
        assert!(archived > 0);

        phaseloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("none"));
    }

    #[test]
    fn test_cancel_without_session_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .arg("cancel")
            .assert()
            .failure();
    }

    #[test]
    fn test_force_complete_requires_reason() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");

        phaseloop()
            .current_dir(dir.path())
            .args(["force-complete", "--reason", "  "])
            .assert()
            .failure();

        phaseloop()
            .current_dir(dir.path())
            .args(["force-complete", "--reason", "verified by hand"])
            .assert()
            .success()
            .stdout(predicate::str::contains("verified by hand"));

        assert!(!dir.path().join(".phaseloop/session.json").exists());
    }

    #[test]
    fn test_handoff_leaves_marker_for_next_stop() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");

        phaseloop()
            .current_dir(dir.path())
            .arg("handoff")
            .assert()
            .success();
        assert!(dir.path().join(".phaseloop/HANDOFF").exists());

        let out = hook(&dir, "{}");
        assert!(!out.contains("\"block\""));
        assert!(out.contains("handed off"));
        assert!(!dir.path().join(".phaseloop/HANDOFF").exists());
        assert!(dir.path().join(".phaseloop/session.json").exists());
    }

    #[test]
    fn test_raise_ceiling() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "trivial");

        phaseloop()
            .current_dir(dir.path())
            .args(["raise-ceiling", "15"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Ceiling raised to 15"));

        phaseloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("0/15"));
    }
}

// =============================================================================
// Stop Hook Tests
// =============================================================================

mod stop_hook {
    use super::*;

    #[test]
    fn test_hook_without_session_allows() {
        let dir = create_temp_project();
        init_project(&dir);

        let out = hook(&dir, r#"{"session_id":"host-1"}"#);
        assert_eq!(out.trim(), "{}");
    }

    #[test]
    fn test_hook_blank_input_allows() {
        let dir = create_temp_project();
        init_project(&dir);

        let out = hook(&dir, "");
        assert_eq!(out.trim(), "{}");
    }

    #[test]
    fn test_hook_blocks_with_status_line() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");

        let out = hook(&dir, r#"{"session_id":"host-1"}"#);
        let response: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(response["decision"], "block");
        assert!(
            response["reason"]
                .as_str()
                .unwrap()
                .contains("add a retry budget")
        );
        let status = response["systemMessage"].as_str().unwrap();
        assert!(status.contains("phase CHALLENGE"));
        assert!(status.contains("iteration 1/10"));
        assert!(status.contains("<promise>CHALLENGE_COMPLETE</promise>"));
    }

    #[test]
    fn test_hook_advances_on_sentinel() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");
        let transcript = write_transcript(
            dir.path(),
            &["Assumptions checked. <promise>CHALLENGE_COMPLETE</promise>"],
        );

        let input = serde_json::json!({
            "session_id": "host-1",
            "transcript_path": transcript,
        })
        .to_string();
        let out = hook(&dir, &input);
        assert!(out.contains("\"block\""));
        assert!(out.contains("phase PLAN"));

        // Same transcript again: the sentinel is behind the watermark.
        let out = hook(&dir, &input);
        assert!(out.contains("phase PLAN"));
        assert!(out.contains("iteration 2/10"));
    }

    #[test]
    fn test_hook_ignores_other_phase_sentinel() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");
        let transcript = write_transcript(dir.path(), &["<promise>SHIPPED</promise>"]);

        let out = phaseloop()
            .current_dir(dir.path())
            .args(["hook", "--transcript"])
            .arg(&transcript)
            .output()
            .unwrap();
        assert!(out.status.success());
        let out = String::from_utf8(out.stdout).unwrap();
        assert!(out.contains("phase CHALLENGE"));
    }

    #[test]
    fn test_hook_lets_worker_exit_at_ceiling() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "trivial");

        for n in 1..=3 {
            let out = hook(&dir, "{}");
            assert!(out.contains("\"block\""));
            assert!(out.contains(&format!("iteration {}/3", n)));
        }

        let out = hook(&dir, "{}");
        assert!(!out.contains("\"block\""));
        assert!(out.contains("Iteration limit reached (3/3)"));

        // The session survives for the operator to decide.
        assert!(dir.path().join(".phaseloop/session.json").exists());
    }

    #[test]
    fn test_hook_ignores_foreign_host_session() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");

        let out = hook(&dir, r#"{"session_id":"host-1"}"#);
        assert!(out.contains("\"block\""));

        let out = hook(&dir, r#"{"session_id":"host-2"}"#);
        assert_eq!(out.trim(), "{}");

        phaseloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("1/10"));
    }

    #[test]
    fn test_hook_rejects_malformed_input() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .arg("hook")
            .write_stdin("not json")
            .assert()
            .failure();
    }

    #[test]
    fn test_audit_records_blocks() {
        let dir = create_temp_project();
        init_project(&dir);
        start_session(&dir, "standard");
        hook(&dir, "{}");

        phaseloop()
            .current_dir(dir.path())
            .arg("audit")
            .assert()
            .success()
            .stdout(predicate::str::contains("session started"))
            .stdout(predicate::str::contains("blocked"));

        phaseloop()
            .current_dir(dir.path())
            .args(["audit", "--json", "-n", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"event\":\"blocked\""));
    }
}

// =============================================================================
// Verification Tests
// =============================================================================

mod verification {
    use super::*;

    fn record(dir: &TempDir, category: &str, result: &str) {
        phaseloop()
            .current_dir(dir.path())
            .args(["evidence", "record", category, result])
            .assert()
            .success();
    }

    #[test]
    fn test_verify_fails_without_evidence() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .arg("verify")
            .assert()
            .failure()
            .stdout(predicate::str::contains("Missing evidence"));
    }

    #[test]
    fn test_verify_reports_failing_category() {
        let dir = create_temp_project();
        init_project(&dir);
        for category in ["tests", "types", "lint", "build"] {
            record(&dir, category, "--passed");
        }
        phaseloop()
            .current_dir(dir.path())
            .args([
                "evidence", "record", "publish", "--failed", "--detail", "ci red",
            ])
            .assert()
            .success();

        phaseloop()
            .current_dir(dir.path())
            .arg("verify")
            .assert()
            .failure()
            .stdout(predicate::str::contains("publish (ci red)"));
    }

    #[test]
    fn test_verify_passes_with_all_evidence() {
        let dir = create_temp_project();
        init_project(&dir);
        for category in ["tests", "types", "lint", "build", "publish"] {
            record(&dir, category, "--passed");
        }

        phaseloop()
            .current_dir(dir.path())
            .arg("verify")
            .assert()
            .success()
            .stdout(predicate::str::contains("Verification passed"));
    }

    #[test]
    fn test_evidence_requires_result() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .args(["evidence", "record", "tests"])
            .assert()
            .failure();
    }

    #[test]
    fn test_evidence_rejects_unknown_category() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .args(["evidence", "record", "vibes", "--passed"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Queue Tests
// =============================================================================

mod queue {
    use super::*;

    fn add(dir: &TempDir, title: &str, priority: &str) {
        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "add", "--title", title, "--priority", priority])
            .assert()
            .success();
    }

    #[test]
    fn test_add_and_list() {
        let dir = create_temp_project();
        init_project(&dir);
        add(&dir, "Write docs", "low");
        add(&dir, "Fix crash", "high");

        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("wi-001"))
            .stdout(predicate::str::contains("Fix crash"));
    }

    #[test]
    fn test_claim_takes_highest_priority() {
        let dir = create_temp_project();
        init_project(&dir);
        add(&dir, "Write docs", "low");
        add(&dir, "Fix crash", "high");

        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "claim", "--worker", "w1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Claimed wi-002 for w1"));

        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "claim", "--worker", "w2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Claimed wi-001 for w2"));

        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "claim", "--worker", "w3"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No claimable work items"));
    }

    #[test]
    fn test_release_success_completes_item() {
        let dir = create_temp_project();
        init_project(&dir);
        add(&dir, "Fix crash", "high");
        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "claim", "--worker", "w1"])
            .assert()
            .success();

        phaseloop()
            .current_dir(dir.path())
            .args([
                "queue", "release", "wi-001", "--success", "--commit", "abc1234", "--worker",
                "w1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"));

        phaseloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("1 completed"));
    }

    #[test]
    fn test_release_failure_requeues() {
        let dir = create_temp_project();
        init_project(&dir);
        add(&dir, "Flaky thing", "medium");
        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "claim", "--worker", "w1"])
            .assert()
            .success();

        phaseloop()
            .current_dir(dir.path())
            .args([
                "queue", "release", "wi-001", "--failure", "--error", "timeout", "--worker", "w1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("requeued after 1 attempt(s)"));

        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "claim", "--worker", "w2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Previous failure: timeout"));
    }

    #[test]
    fn test_release_success_requires_commit() {
        let dir = create_temp_project();
        init_project(&dir);
        add(&dir, "Fix crash", "high");

        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "release", "wi-001", "--success", "--worker", "w1"])
            .assert()
            .failure();
    }

    #[test]
    fn test_release_by_non_holder_fails() {
        let dir = create_temp_project();
        init_project(&dir);
        add(&dir, "Fix crash", "high");
        phaseloop()
            .current_dir(dir.path())
            .args(["queue", "claim", "--worker", "w1"])
            .assert()
            .success();

        phaseloop()
            .current_dir(dir.path())
            .args([
                "queue", "release", "wi-001", "--success", "--commit", "abc", "--worker", "w2",
            ])
            .assert()
            .failure();
    }

    #[test]
    fn test_empty_conflicts_and_escalations() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .args(["conflicts", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No conflicts"));

        phaseloop()
            .current_dir(dir.path())
            .args(["escalations", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No escalations"));
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_validate_defaults() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_ceiling_override_applies_to_start() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".phaseloop/phaseloop.toml"),
            "[ceilings]\nstandard = 4\n",
        )
        .unwrap();

        phaseloop()
            .current_dir(dir.path())
            .args(["start", "task"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ceiling 4"));
    }

    #[test]
    fn test_config_validate_warns_on_zero_ceiling() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".phaseloop/phaseloop.toml"),
            "[ceilings]\ntrivial = 0\n",
        )
        .unwrap();

        phaseloop()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ceilings.trivial"));
    }

    #[test]
    fn test_config_show() {
        let dir = create_temp_project();
        init_project(&dir);

        phaseloop()
            .current_dir(dir.path())
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("[ceilings]"))
            .stdout(predicate::str::contains("Worker id"));
    }
}
