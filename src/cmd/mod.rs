//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                                                  |
//! |-----------|-------------------------------------------------------------------|
//! | `session` | `Init`, `Start`, `Status`, `Cancel`, `Handoff`, `ForceComplete`, `RaiseCeiling` |
//! | `hook`    | `Hook`                                                            |
//! | `verify`  | `Verify`, `Evidence`                                              |
//! | `queue`   | `Queue`, `Conflicts`, `Escalations`                               |
//! | `publish` | `Publish`, `Ci`                                                   |
//! | `config`  | `Config`                                                          |
//! | `audit`   | `Audit`                                                           |

pub mod audit;
pub mod config;
pub mod hook;
pub mod publish;
pub mod queue;
pub mod session;
pub mod verify;

pub use audit::cmd_audit;
pub use config::cmd_config;
pub use hook::cmd_hook;
pub use publish::{cmd_ci_wait, cmd_publish};
pub use queue::{cmd_conflicts, cmd_escalations, cmd_queue};
pub use session::{
    cmd_cancel, cmd_force_complete, cmd_handoff, cmd_init, cmd_raise_ceiling, cmd_start,
    cmd_status,
};
pub use verify::{cmd_evidence_record, cmd_verify};
