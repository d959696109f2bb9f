// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Turning command-line arguments into a checked list of input files

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::tasks::Task;
use crate::validation::{check_file_size, display_name, validate_file_path};
use crate::{Result, ScriptoriumError};

/// Inputs accepted for a run, plus the ones turned away
#[derive(Debug, Default)]
pub struct Selection {
    pub accepted: Vec<PathBuf>,
    pub rejected: Vec<(PathBuf, String)>,
}

impl Selection {
    fn reject(&mut self, path: PathBuf, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Rejected file ({}): {}", reason, display_name(&path));
        self.rejected.push((path, reason));
    }
}

/// Skip hidden, temporary and OS bookkeeping files found in directories
pub fn is_candidate(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    if filename.starts_with('.') {
        return false;
    }

    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    if temp_extensions.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    let skip_names = ["desktop.ini", "thumbs.db"];
    !skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n))
}

fn has_glob_chars(arg: &str) -> bool {
    arg.contains(['*', '?', '['])
}

/// Files in a directory, sorted, optionally descending into subdirectories
fn list_dir(path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut files = Vec::new();
    for p in entries {
        // Don't follow directory symlinks
        let is_link = std::fs::symlink_metadata(&p)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if p.is_dir() && !is_link {
            if recursive {
                files.extend(list_dir(&p, true)?);
            }
        } else if is_candidate(&p) {
            files.push(p);
        }
    }
    Ok(files)
}

/// Expand one argument into candidate paths; `explicit` is false for
/// anything discovered through a directory or glob.
fn expand(arg: &str, recursive: bool) -> Result<Vec<(PathBuf, bool)>> {
    let path = PathBuf::from(arg);

    if path.is_dir() {
        return Ok(list_dir(&path, recursive)?.into_iter().map(|p| (p, false)).collect());
    }

    if !path.exists() && has_glob_chars(arg) {
        let paths = glob::glob(arg)
            .map_err(|e| ScriptoriumError::Config(format!("Bad pattern {:?}: {}", arg, e)))?;
        let mut matched: Vec<PathBuf> = paths
            .filter_map(|p| match p {
                Ok(p) => Some(p),
                Err(e) => {
                    debug!("Unreadable glob match: {}", e);
                    None
                }
            })
            .filter(|p| p.is_file() && is_candidate(p))
            .collect();
        matched.sort();
        return Ok(matched.into_iter().map(|p| (p, false)).collect());
    }

    Ok(vec![(path, true)])
}

/// Build the input list for `task`.
///
/// Explicitly named files that fail a check are reported as rejected;
/// files of other types found while scanning a directory are ignored.
pub fn collect_inputs(
    args: &[String],
    recursive: bool,
    task: &dyn Task,
    max_file_size_mb: u64,
) -> Result<Selection> {
    let mut selection = Selection::default();
    let mut seen = HashSet::new();

    for arg in args {
        let candidates = expand(arg, recursive)?;
        if candidates.is_empty() {
            warn!("Nothing matched {:?}", arg);
        }

        for (path, explicit) in candidates {
            if !task.can_handle(&path) {
                if explicit {
                    selection.reject(path, "unsupported file type");
                }
                continue;
            }

            if let Err(e) = validate_file_path(&path, None) {
                selection.reject(path, format!("invalid path: {}", e));
                continue;
            }

            if !path.is_file() {
                selection.reject(path, "not a file");
                continue;
            }

            if let Err(e) = check_file_size(&path, max_file_size_mb) {
                selection.reject(path, e.to_string());
                continue;
            }

            let key = path.canonicalize().unwrap_or_else(|_| path.clone());
            if seen.insert(key) {
                selection.accepted.push(path);
            }
        }
    }

    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::transcribe::TranscribeTask;

    fn task() -> TranscribeTask {
        TranscribeTask::new("Transcribe this image to Markdown", 1)
    }

    fn touch(path: &Path, bytes: usize) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    fn arg(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_is_candidate() {
        assert!(is_candidate(Path::new("scan.png")));
        assert!(!is_candidate(Path::new(".hidden.png")));
        assert!(!is_candidate(Path::new("scan.png.part")));
        assert!(!is_candidate(Path::new("Thumbs.db")));
    }

    #[test]
    fn test_explicit_files_checked() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("page1.png");
        let wrong_type = dir.path().join("notes.docx");
        let empty = dir.path().join("blank.jpg");
        let big = dir.path().join("huge.png");
        touch(&ok, 10);
        touch(&wrong_type, 10);
        touch(&empty, 0);
        touch(&big, 1024 * 1024 + 1);

        let args = vec![arg(&ok), arg(&wrong_type), arg(&empty), arg(&big), arg(&ok)];
        let selection = collect_inputs(&args, false, &task(), 1).unwrap();

        assert_eq!(selection.accepted, vec![ok]);
        assert_eq!(selection.rejected.len(), 3);
        assert!(selection.rejected[0].1.contains("unsupported"));
    }

    #[test]
    fn test_traversal_argument_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("page.png"), 10);
        let sneaky = dir.path().join("sub").join("..").join("page.png");
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();

        let selection = collect_inputs(&[arg(&sneaky)], false, &task(), 1).unwrap();
        assert!(selection.accepted.is_empty());
        assert!(selection.rejected[0].1.starts_with("invalid path"));
    }

    #[test]
    fn test_directory_scan_filters_types() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.png"), 10);
        touch(&dir.path().join("a.pdf"), 10);
        touch(&dir.path().join("readme.txt"), 10);
        touch(&dir.path().join(".secret.png"), 10);
        touch(&dir.path().join("nested").join("c.gif"), 10);

        let flat = collect_inputs(&[arg(dir.path())], false, &task(), 1).unwrap();
        let names: Vec<String> = flat.accepted.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["a.pdf", "b.png"]);
        assert!(flat.rejected.is_empty());

        let deep = collect_inputs(&[arg(dir.path())], true, &task(), 1).unwrap();
        assert_eq!(deep.accepted.len(), 3);
    }

    #[test]
    fn test_glob_expansion() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("p1.png"), 10);
        touch(&dir.path().join("p2.png"), 10);
        touch(&dir.path().join("cover.jpg"), 10);

        let pattern = arg(&dir.path().join("p*.png"));
        let selection = collect_inputs(&[pattern], false, &task(), 1).unwrap();
        assert_eq!(selection.accepted.len(), 2);
    }
}
