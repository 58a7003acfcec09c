//! File writer with symbolic path-alias rewriting.
//!
//! `desktop/...` and `documents/...` prefixes (case-insensitive, either
//! separator) resolve to the user's real folders before the write; any other
//! path is used as given after home expansion and normalization.

use crate::error::EngineError;
use crate::plan::{ExecutionResult, FileDetails};
use base64::{engine::general_purpose, Engine as _};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub struct FileWriter;

impl FileWriter {
    /// Rewrite aliases and normalize. The alias rewrite applies at most once
    /// and only on the two recognized prefixes.
    pub fn resolve_path(path: &str) -> PathBuf {
        let lowered = path.to_lowercase();

        let aliased = if lowered.starts_with("desktop/") || lowered.starts_with("desktop\\") {
            let rest = path["desktop".len()..].trim_start_matches(['/', '\\']);
            home_subdir("Desktop").join(rest)
        } else if lowered.starts_with("documents/") || lowered.starts_with("documents\\") {
            let rest = path["documents".len()..].trim_start_matches(['/', '\\']);
            home_subdir("Documents").join(rest)
        } else {
            expand_home(path)
        };

        normalize(&aliased)
    }

    /// Write the content, creating parent directories first. Text mode emits
    /// the content string as UTF-8; binary mode decodes base64 content to raw
    /// bytes. Every I/O failure becomes a `File error:` result.
    pub fn write(details: &FileDetails) -> ExecutionResult {
        if details.path.is_empty() {
            return ExecutionResult::failure("File path not specified");
        }

        let path = Self::resolve_path(&details.path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return file_error(e);
                }
            }
        }

        let size = if details.mode == "binary" {
            let bytes = match general_purpose::STANDARD.decode(details.content.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => return file_error(e),
            };
            if let Err(e) = fs::write(&path, &bytes) {
                return file_error(e);
            }
            bytes.len() as u64
        } else {
            if let Err(e) = fs::write(&path, details.content.as_bytes()) {
                return file_error(e);
            }
            details.content.len() as u64
        };

        ExecutionResult {
            path: Some(path.to_string_lossy().to_string()),
            size: Some(size),
            ..ExecutionResult::ok()
        }
    }
}

fn file_error(e: impl std::fmt::Display) -> ExecutionResult {
    ExecutionResult::failure(EngineError::File(e.to_string()).to_string())
}

fn home_subdir(name: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(name)
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        return dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest);
    }
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    PathBuf::from(path)
}

/// Lexical normalization: fold `.` and resolve `..` without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::FileDetails;

    fn home() -> PathBuf {
        dirs::home_dir().unwrap()
    }

    #[test]
    fn desktop_alias_resolves_to_home_desktop() {
        let resolved = FileWriter::resolve_path("Desktop/notes.txt");
        assert_eq!(resolved, home().join("Desktop").join("notes.txt"));
    }

    #[test]
    fn documents_alias_accepts_backslash() {
        let resolved = FileWriter::resolve_path("documents\\report.md");
        assert_eq!(resolved, home().join("Documents").join("report.md"));
    }

    #[test]
    fn alias_comparison_is_case_insensitive() {
        let resolved = FileWriter::resolve_path("DESKTOP/a.txt");
        assert_eq!(resolved, home().join("Desktop").join("a.txt"));
    }

    #[test]
    fn non_alias_paths_pass_through() {
        let resolved = FileWriter::resolve_path("/tmp/plain/file.txt");
        assert_eq!(resolved, PathBuf::from("/tmp/plain/file.txt"));
    }

    #[test]
    fn alias_rewrite_applies_at_most_once() {
        // A path that merely contains the word is left alone.
        let resolved = FileWriter::resolve_path("/srv/desktop/notes.txt");
        assert_eq!(resolved, PathBuf::from("/srv/desktop/notes.txt"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let resolved = FileWriter::resolve_path("~/projects/x.txt");
        assert_eq!(resolved, home().join("projects").join("x.txt"));
    }

    #[test]
    fn normalization_folds_dot_segments() {
        let resolved = FileWriter::resolve_path("/tmp/a/./b/../c.txt");
        assert_eq!(resolved, PathBuf::from("/tmp/a/c.txt"));
    }

    #[test]
    fn write_creates_parents_and_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("deep").join("hello.txt");
        let details = FileDetails {
            path: target.to_string_lossy().to_string(),
            content: "hello".to_string(),
            ..FileDetails::default()
        };
        let result = FileWriter::write(&details);
        assert!(result.success, "write failed: {:?}", result.error);
        assert_eq!(result.size, Some(5));
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
    }

    #[test]
    fn write_is_idempotent_over_existing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.txt");
        let details = FileDetails {
            path: target.to_string_lossy().to_string(),
            content: "one".to_string(),
            ..FileDetails::default()
        };
        assert!(FileWriter::write(&details).success);
        let details = FileDetails {
            content: "two".to_string(),
            ..details
        };
        assert!(FileWriter::write(&details).success);
        assert_eq!(fs::read_to_string(&target).unwrap(), "two");
    }

    #[test]
    fn binary_mode_decodes_base64() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blob.bin");
        let details = FileDetails {
            path: target.to_string_lossy().to_string(),
            content: general_purpose::STANDARD.encode([0u8, 159, 146, 150]),
            mode: "binary".to_string(),
            ..FileDetails::default()
        };
        let result = FileWriter::write(&details);
        assert!(result.success);
        assert_eq!(result.size, Some(4));
        assert_eq!(fs::read(&target).unwrap(), vec![0u8, 159, 146, 150]);
    }

    #[test]
    fn binary_mode_rejects_malformed_content() {
        let dir = tempfile::tempdir().unwrap();
        let details = FileDetails {
            path: dir.path().join("x.bin").to_string_lossy().to_string(),
            content: "not base64!!!".to_string(),
            mode: "binary".to_string(),
            ..FileDetails::default()
        };
        let result = FileWriter::write(&details);
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("File error:"));
    }

    #[test]
    fn empty_path_is_rejected() {
        let result = FileWriter::write(&FileDetails::default());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("File path not specified"));
    }
}
