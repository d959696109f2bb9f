// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Run ledger: one JSON line per processed input

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::model::TokenUsage;
use crate::Result;

/// Outcome recorded for an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
    CompletedWithErrors,
    Failed,
    Skipped,
}

/// A single processed input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub task: String,
    pub model: String,
    pub input_path: PathBuf,
    pub input_hash: Option<String>,
    pub output_path: Option<PathBuf>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Append-only ledger file
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    /// Create a new history manager
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append an entry to the history
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all history entries
    pub fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Failed to parse history entry: {}", e);
                }
            }
        }

        Ok(entries)
    }

    /// Get the most recent N entries (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.read_all()?;
        entries.reverse();
        entries.truncate(count);
        Ok(entries)
    }

    /// Clear all history
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Get history file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// BLAKE3 hash of a file's content
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    let data = fs::read(path)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

/// Create a new history entry for `input`
pub fn create_entry(
    task: &str,
    model: &str,
    input_path: &Path,
    output_path: Option<PathBuf>,
    status: EntryStatus,
) -> HistoryEntry {
    HistoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        task: task.to_string(),
        model: model.to_string(),
        input_path: input_path.to_path_buf(),
        input_hash: calculate_file_hash(input_path).ok(),
        output_path,
        status,
        error: None,
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_recent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page.png");
        std::fs::write(&input, b"pixels").unwrap();
        let history = History::new(dir.path().join("history.jsonl"));

        for status in [EntryStatus::Completed, EntryStatus::Failed, EntryStatus::Skipped] {
            let mut entry = create_entry("transcribe", "gemini-2.5-flash", &input, None, status);
            if status == EntryStatus::Failed {
                entry.error = Some("API error (400): bad".to_string());
            }
            history.append(&entry).unwrap();
        }

        let all = history.read_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].input_hash.as_deref(), Some(blake3::hash(b"pixels").to_hex().as_str()));

        let recent = history.get_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, EntryStatus::Skipped);
        assert_eq!(recent[1].error.as_deref(), Some("API error (400): bad"));
    }

    #[test]
    fn test_corrupt_lines_skipped_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(&path, "not json\n\n").unwrap();
        let history = History::new(path.clone());

        assert!(history.read_all().unwrap().is_empty());
        history.clear().unwrap();
        assert!(!path.exists());
        assert!(history.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_missing_input_has_no_hash() {
        let entry = create_entry(
            "marketing",
            "gemini-2.5-pro",
            Path::new("/definitely/not/here.txt"),
            None,
            EntryStatus::Failed,
        );
        assert!(entry.input_hash.is_none());
        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.contains(r#""status":"failed""#));
        assert!(!line.contains("usage"));
    }
}
