//! Completion signal detection.
//!
//! The worker self-reports the end of a phase by emitting a sentinel such as
//! `<promise>BUILD_COMPLETE</promise>`. The detector looks for it in the
//! trailing window of the host transcript:
//!
//! - only the last `tail_bytes` of the file are read
//! - only the newest `max_entries` worker-authored entries are inspected
//! - entries are parsed as JSON; user turns, tool calls and quoted code never
//!   count
//! - malformed lines are skipped, not fatal

mod parser;
mod transcript;

pub use parser::{extract_promises, strip_quoted};
pub use transcript::{TranscriptEntry, TranscriptTail, entries_newest_first, read_tail};

use anyhow::Result;
use std::path::Path;

use crate::phase::Sentinel;
use crate::phaseloop_config::DetectorSection;

/// Outcome of one transcript scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The first accepted sentinel found, newest entry first
    pub sentinel: Option<Sentinel>,
    /// Transcript length at scan time; becomes the next watermark
    pub transcript_len: u64,
}

#[derive(Debug, Clone)]
pub struct CompletionDetector {
    tail_bytes: u64,
    max_entries: usize,
}

impl CompletionDetector {
    pub fn new(tail_bytes: u64, max_entries: usize) -> Self {
        Self {
            tail_bytes,
            max_entries,
        }
    }

    pub fn from_config(config: &DetectorSection) -> Self {
        Self::new(config.tail_bytes, config.max_entries)
    }

    /// Worker-authored texts after `offset`, newest first, at most `max_entries`.
    fn recent_worker_texts(&self, log: &Path, offset: u64) -> Result<(Vec<String>, u64)> {
        let tail = read_tail(log, self.tail_bytes, offset)?;
        let texts = entries_newest_first(&tail.lines)
            .iter()
            .filter_map(TranscriptEntry::worker_text)
            .take(self.max_entries)
            .collect();
        Ok((texts, tail.len))
    }

    /// Whether `sentinel` appears in the recent worker output.
    pub fn has_signal(&self, log: &Path, sentinel: &str, offset: u64) -> Result<bool> {
        let (texts, _) = self.recent_worker_texts(log, offset)?;
        Ok(texts
            .iter()
            .any(|text| extract_promises(text).iter().any(|p| p == sentinel)))
    }

    /// Find the newest accepted exit among `exits`.
    ///
    /// Within one entry, `exits` order decides precedence.
    pub fn detect(&self, log: &Path, offset: u64, exits: &[Sentinel]) -> Result<Detection> {
        let (texts, transcript_len) = self.recent_worker_texts(log, offset)?;

        for text in &texts {
            let promises = extract_promises(text);
            if promises.is_empty() {
                continue;
            }
            if let Some(hit) = exits
                .iter()
                .find(|exit| promises.iter().any(|p| p == exit.tag))
            {
                return Ok(Detection {
                    sentinel: Some(*hit),
                    transcript_len,
                });
            }
        }

        Ok(Detection {
            sentinel: None,
            transcript_len,
        })
    }
}
