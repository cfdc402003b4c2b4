//! Bounded context assembly for model prompts.
//!
//! Two modes. File-list mode concatenates whole files (the entry's relevant
//! files, or a recursive source scan as fallback) under per-file headers.
//! Failure-window mode cuts a line-radius excerpt around a located failure.
//! Both are deterministic and never exceed the character budget.

use std::path::{Path, PathBuf};

use crate::util::floor_char_boundary;

/// Maximum context size in characters, matching what a single prompt can
/// comfortably carry alongside the problem statement and test patch.
pub const MAX_CONTEXT_CHARS: usize = 30_000;

/// Assemble context from an explicit file list, falling back to a recursive
/// source scan when the list is empty or none of the files exist on disk.
///
/// `hints` (free-form guidance shipped with some benchmark entries) is
/// prepended when present.
pub fn extract_for_files(repo_path: &Path, relevant_files: &[String], hints: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(hints) = hints {
        if !hints.trim().is_empty() {
            parts.push(hints.trim().to_string());
            parts.push("\n\n".to_string());
        }
    }

    let mut appended_any = false;
    for rel in relevant_files {
        let path = repo_path.join(rel);
        if path.is_file() && append_file(&mut parts, repo_path, &path) {
            appended_any = true;
        }
    }

    if !appended_any {
        for path in collect_source_files(repo_path) {
            if parts.iter().map(String::len).sum::<usize>() > MAX_CONTEXT_CHARS {
                break;
            }
            append_file(&mut parts, repo_path, &path);
        }
    }

    truncate_to_budget(parts.concat())
}

/// Return the source lines in `[line_number - radius, line_number + radius)`
/// (1-based line number, clamped to file bounds) from `file_path` inside
/// the repository.
///
/// Returns empty text when the file cannot be read.
pub fn extract_window(repo_path: &Path, file_path: &str, line_number: u32, radius: u32) -> String {
    let path = repo_path.join(file_path);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "failure window file unreadable");
            return String::new();
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let line_idx = line_number.saturating_sub(1) as usize;
    let radius = radius as usize;
    let start = line_idx.saturating_sub(radius);
    let end = usize::min(lines.len(), line_idx + radius + 1);
    if start >= end {
        return String::new();
    }

    truncate_to_budget(lines[start..end].join("\n"))
}

fn append_file(parts: &mut Vec<String>, repo_path: &Path, path: &Path) -> bool {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "skipping unreadable context file");
            return false;
        }
    };

    let rel = path.strip_prefix(repo_path).unwrap_or(path);
    parts.push(format!("==== FILE: {} ====\n", rel.display()));
    parts.push(content);
    parts.push("\n\n".to_string());
    true
}

/// Recursively collect `.py` files under `root` in deterministic traversal
/// order (directories and files visited name-sorted).
fn collect_source_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(read) => read.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => continue,
        };
        entries.sort();

        // Reverse so the stack pops in sorted order.
        for entry in entries.into_iter().rev() {
            if entry.is_dir() {
                if entry.file_name().is_some_and(|n| n != ".git") {
                    stack.push(entry);
                }
            } else if entry.extension().is_some_and(|ext| ext == "py") {
                files.push(entry);
            }
        }
    }

    files
}

fn truncate_to_budget(text: String) -> String {
    if text.len() <= MAX_CONTEXT_CHARS {
        return text;
    }
    let cut = floor_char_boundary(&text, MAX_CONTEXT_CHARS);
    text[..cut].to_string()
}
