//! Session record and its persistence.
//!
//! The session is the single source of truth for the phase loop: which phase
//! the worker is in, how many invocations have been spent, and when the loop
//! last made progress. It is replaced whole on every write.

mod store;
mod types;

pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use types::{Session, SessionOutcome, Tier};
