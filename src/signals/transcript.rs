//! Transcript entries and bounded tail reading.
//!
//! The host appends one JSON object per line. Only `assistant` entries are
//! worker-authored; everything else (user turns, tool results, system
//! notices) is skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    /// User turns, tool results, summaries and anything newer
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    /// Tool calls and thinking blocks never carry sentinels
    #[serde(other)]
    Other,
}

impl TranscriptEntry {
    /// Concatenated text blocks of a worker-authored entry.
    pub fn worker_text(&self) -> Option<String> {
        match self {
            TranscriptEntry::Assistant { message } => {
                let text = message
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(text)
            }
            _ => None,
        }
    }
}

/// The readable tail of a transcript.
#[derive(Debug, Default)]
pub struct TranscriptTail {
    /// Complete lines in file order
    pub lines: Vec<String>,
    /// Transcript length in bytes at read time
    pub len: u64,
}

/// Read at most `tail_bytes` from the end of the transcript, never before
/// `offset`. A line cut by the window start is dropped.
///
/// A missing transcript yields an empty tail. An offset past the end (the host
/// rotated or truncated the file) is ignored.
pub fn read_tail(path: &Path, tail_bytes: u64, offset: u64) -> Result<TranscriptTail> {
    if !path.exists() {
        return Ok(TranscriptTail::default());
    }
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open transcript: {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("Failed to stat transcript: {}", path.display()))?
        .len();

    let offset = if offset > len {
        tracing::warn!(offset, len, "Transcript shorter than recorded offset; rescanning tail");
        0
    } else {
        offset
    };
    let window_start = len.saturating_sub(tail_bytes);
    let start = window_start.max(offset);

    file.seek(SeekFrom::Start(start))
        .context("Failed to seek transcript")?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)
        .context("Failed to read transcript tail")?;
    let text = String::from_utf8_lossy(&buf);

    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    // Starting inside the file at a point other than the watermark means the
    // first line is probably partial.
    if start > 0 && start != offset && !lines.is_empty() {
        lines.remove(0);
    }

    Ok(TranscriptTail { lines, len })
}

/// Parse lines into entries, newest first, skipping malformed ones.
pub fn entries_newest_first(lines: &[String]) -> Vec<TranscriptEntry> {
    lines
        .iter()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<TranscriptEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed transcript line");
                None
            }
        })
        .collect()
}
