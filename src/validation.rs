// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Input validation: paths, sizes, file types, keys and prompt text

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::{Result, ScriptoriumError};

static API_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{20,}$").expect("valid API key regex"));

static SECRET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_-]{30,}").expect("valid secret regex"));

/// Longest file name written to the output directory
pub const MAX_FILENAME_LEN: usize = 255;

const WRITE_PROBE: &str = ".scriptorium_write_test";

/// Basic format check for a Google API key
pub fn is_valid_api_key(key: &str) -> bool {
    API_KEY_RE.is_match(key)
}

/// Display name of a path without leaking its directory
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Reject traversal segments, symbolic links, and (when given) anything
/// resolving outside `allowed_parent`.
pub fn validate_file_path(path: &Path, allowed_parent: Option<&Path>) -> Result<()> {
    if has_parent_component(path) {
        return Err(ScriptoriumError::InvalidPath(format!(
            "parent directory segment in {}",
            display_name(path)
        )));
    }

    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            warn!("Rejected symbolic link: {}", display_name(path));
            return Err(ScriptoriumError::InvalidPath(format!(
                "symbolic link {}",
                display_name(path)
            )));
        }
    }

    if let Some(parent) = allowed_parent {
        let real_parent = parent.canonicalize()?;
        let real_path = match path.canonicalize() {
            Ok(p) => p,
            // Not created yet: resolve its directory instead
            Err(_) => {
                let dir = path.parent().unwrap_or(Path::new("."));
                let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
                let name = path.file_name().ok_or_else(|| {
                    ScriptoriumError::InvalidPath(format!("no file name in {}", path.display()))
                })?;
                dir.canonicalize()?.join(name)
            }
        };
        if !real_path.starts_with(&real_parent) {
            warn!("File outside allowed directory: {}", display_name(path));
            return Err(ScriptoriumError::InvalidPath(format!(
                "{} is outside the output directory",
                display_name(path)
            )));
        }
    }

    Ok(())
}

/// Replace every character outside `[A-Za-z0-9._-]` and cap the length
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .take(MAX_FILENAME_LEN)
        .collect()
}

/// Create the output directory if needed and prove it is writable
pub fn validate_output_directory(dir: &Path) -> Result<PathBuf> {
    if has_parent_component(dir) {
        return Err(ScriptoriumError::InvalidPath(format!(
            "parent directory segment in output directory {}",
            dir.display()
        )));
    }

    std::fs::create_dir_all(dir)?;

    let probe = dir.join(WRITE_PROBE);
    std::fs::write(&probe, b"")?;
    std::fs::remove_file(&probe)?;

    let canonical = dir.canonicalize()?;
    debug!("Output directory ready: {:?}", canonical);
    Ok(canonical)
}

/// Path for `file_name` inside `dir`, guaranteed not to escape it
pub fn resolve_output_file(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let safe = sanitize_filename(file_name);
    if safe.is_empty() || safe == "." || safe == ".." {
        return Err(ScriptoriumError::InvalidPath(format!(
            "unusable output file name {:?}",
            file_name
        )));
    }
    let path = dir.join(&safe);
    validate_file_path(&path, Some(dir))?;
    Ok(path)
}

/// Reject empty files and files above `max_mb` megabytes; returns the size
pub fn check_file_size(path: &Path, max_mb: u64) -> Result<u64> {
    let size = std::fs::metadata(path)?.len();
    if size == 0 {
        return Err(ScriptoriumError::EmptyFile(display_name(path)));
    }
    if size > max_mb.saturating_mul(1024 * 1024) {
        return Err(ScriptoriumError::FileTooLarge {
            name: display_name(path),
            limit_mb: max_mb,
        });
    }
    Ok(size)
}

/// Lowercased extension of a path, empty when absent
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// MIME type for files the transcription tool accepts
pub fn mime_type_for(path: &Path) -> Result<&'static str> {
    match extension_of(path).as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "pdf" => Ok("application/pdf"),
        "webp" => Ok("image/webp"),
        "gif" => Ok("image/gif"),
        other => Err(ScriptoriumError::UnsupportedFileType(format!(".{}", other))),
    }
}

/// Strip control characters (except line breaks and tabs) and truncate to
/// `max_chars` characters.
pub fn sanitize_prompt_text(text: &str, max_chars: usize) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .take(max_chars)
        .collect()
}

/// Mask anything that looks like a key or token
pub fn redact(message: &str) -> Cow<'_, str> {
    SECRET_RE.replace_all(message, "[REDACTED]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_format() {
        assert!(is_valid_api_key("AIzaSyA1234567890abcdefghijklmnopqrstu"));
        assert!(is_valid_api_key("abcdefghij_klmnopqr-st"));
        assert!(!is_valid_api_key(""));
        assert!(!is_valid_api_key("short-key"));
        assert!(!is_valid_api_key("AIzaSyA1234567890 abcdefghijklmnop"));
        assert!(!is_valid_api_key("AIzaSyA1234567890abcdefghij/klmnop"));
    }

    #[test]
    fn test_parent_segments_rejected() {
        assert!(validate_file_path(Path::new("../secret.png"), None).is_err());
        assert!(validate_file_path(Path::new("scans/../../etc/passwd"), None).is_err());
        assert!(validate_file_path(Path::new("scans/page1.png"), None).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.png");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link.png");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(validate_file_path(&target, None).is_ok());
        assert!(validate_file_path(&link, None).is_err());
    }

    #[test]
    fn test_allowed_parent_containment() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let inside = out.join("page.txt");
        let outside = root.path().join("page.txt");
        std::fs::write(&outside, b"x").unwrap();

        assert!(validate_file_path(&inside, Some(&out)).is_ok());
        assert!(validate_file_path(&outside, Some(&out)).is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("scan 01 (final).png"), "scan_01__final_.png");
        assert_eq!(sanitize_filename("a/b\\c.pdf"), "a_b_c.pdf");
        assert_eq!(sanitize_filename("café.jpg"), "caf_.jpg");
        assert_eq!(sanitize_filename(&"x".repeat(400)).len(), MAX_FILENAME_LEN);
    }

    #[test]
    fn test_output_directory_created_and_probed() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("nested").join("files");
        let canonical = validate_output_directory(&out).unwrap();
        assert!(canonical.is_dir());
        assert!(!canonical.join(WRITE_PROBE).exists());
        assert!(validate_output_directory(Path::new("files/../up")).is_err());
    }

    #[test]
    fn test_resolve_output_file_stays_inside() {
        let root = tempfile::tempdir().unwrap();
        let out = validate_output_directory(root.path()).unwrap();
        let path = resolve_output_file(&out, "../evil name.txt").unwrap();
        assert_eq!(path, out.join(".._evil_name.txt"));
        assert!(resolve_output_file(&out, "..").is_err());
    }

    #[test]
    fn test_size_limits() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(check_file_size(&empty, 1), Err(ScriptoriumError::EmptyFile(_))));

        let big = dir.path().join("big.png");
        std::fs::write(&big, vec![0u8; 1024 * 1024 + 1]).unwrap();
        assert!(matches!(
            check_file_size(&big, 1),
            Err(ScriptoriumError::FileTooLarge { limit_mb: 1, .. })
        ));
        assert_eq!(check_file_size(&big, 2).unwrap(), 1024 * 1024 + 1);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for(Path::new("a.PNG")).unwrap(), "image/png");
        assert_eq!(mime_type_for(Path::new("a.jpeg")).unwrap(), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("a.pdf")).unwrap(), "application/pdf");
        assert!(matches!(
            mime_type_for(Path::new("a.tiff")),
            Err(ScriptoriumError::UnsupportedFileType(_))
        ));
        assert!(mime_type_for(Path::new("noext")).is_err());
    }

    #[test]
    fn test_prompt_sanitization() {
        let text = "Chapter 1\u{0}\u{7}\n\tIt was dark.\r\n";
        assert_eq!(sanitize_prompt_text(text, 100), "Chapter 1\n\tIt was dark.\r\n");
        assert_eq!(sanitize_prompt_text("ééééé", 3), "ééé");
    }

    #[test]
    fn test_redaction() {
        let msg = "API key AIzaSyA1234567890abcdefghijklmnopqrstu not valid";
        assert_eq!(redact(msg), "API key [REDACTED] not valid");
        assert_eq!(redact("quota exceeded"), "quota exceeded");
    }
}
