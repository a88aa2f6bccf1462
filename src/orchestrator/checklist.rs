use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Counts of `- [ ]` / `- [x]` items in a markdown checklist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub open: usize,
}

impl Progress {
    pub fn total(&self) -> usize {
        self.done + self.open
    }
}

enum Item<'a> {
    Open(&'a str),
    Done,
}

fn classify(line: &str) -> Option<Item<'_>> {
    let line = line.trim_start();
    let rest = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))?;
    if let Some(text) = rest.strip_prefix("[ ]") {
        return Some(Item::Open(text.trim()));
    }
    if rest.starts_with("[x]") || rest.starts_with("[X]") {
        return Some(Item::Done);
    }
    None
}

pub fn parse_progress(content: &str) -> Progress {
    let mut progress = Progress::default();
    for line in content.lines() {
        match classify(line) {
            Some(Item::Open(_)) => progress.open += 1,
            Some(Item::Done) => progress.done += 1,
            None => {}
        }
    }
    progress
}

/// Progress of the plan file. A missing plan has no items.
pub fn read_progress(path: &Path) -> Result<Progress> {
    if !path.exists() {
        return Ok(Progress::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_progress(&content))
}

/// The outstanding-issues list (`issues.md`).
pub struct IssuesFile {
    path: PathBuf,
}

impl IssuesFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Text of every unchecked item.
    pub fn open_items(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter_map(|line| match classify(line) {
                Some(Item::Open(text)) => Some(text.to_string()),
                _ => None,
            })
            .collect())
    }

    pub fn replace(&self, lines: &[String]) -> Result<()> {
        let mut body = String::from("# Outstanding issues\n\n");
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        fs::write(&self.path, body)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to clear {}", self.path.display()))?;
        }
        Ok(())
    }
}
