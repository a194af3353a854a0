//! Context Extractor — assembles a token-budgeted `ProjectContext` from the
//! filesystem: README first (truncated to 2000 tokens), the package
//! manifest verbatim, then source files in priority order until the token
//! budget is exhausted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const README_NAMES: &[&str] = &["README.md", "README", "README.txt", "readme.md"];
const MANIFEST_NAMES: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pom.xml",
    "composer.json",
    "Gemfile",
    "pyproject.toml",
];
const PRIORITY_FILENAMES: &[&str] = &[
    "CLAUDE.md",
    "PRD.md",
    "ARCHITECTURE.md",
    "Makefile",
    "Dockerfile",
    "docker-compose.yml",
    "tsconfig.json",
];
const SYSTEM_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "target",
    "coverage",
    "__pycache__",
    "vendor",
    ".vscode",
    ".idea",
    ".next",
    "out",
    ".cache",
    ".svn",
    ".hg",
];

const README_TOKEN_BUDGET: usize = 2000;
const MAX_FILE_SIZE_BYTES: u64 = 100 * 1024;
const ADMISSION_STOP_FRACTION: f64 = 0.90;
const TRUNCATION_SENTINEL: &str = "\n[… truncated …]\n";

/// Rough tokens-per-character estimate compatible enough with the external
/// model's subword tokenizer for budgeting purposes (not exact).
fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / 4.0).ceil() as usize
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    if estimate_tokens(text) <= max_tokens {
        return (text.to_string(), false);
    }
    let max_chars = max_tokens * 4;
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(TRUNCATION_SENTINEL);
    (truncated, true)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub file_count: usize,
    pub lines_of_code: i64,
    pub total_size: i64,
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    pub content: String,
    pub summary: ContextSummary,
}

struct Candidate {
    path: PathBuf,
    relative: PathBuf,
    depth: usize,
    size: u64,
    priority_rank: u8,
}

fn is_system_dir(name: &str) -> bool {
    SYSTEM_DIRS.iter().any(|d| d.eq_ignore_ascii_case(name))
}

fn collect_candidates(root: &Path) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if path.is_dir() {
                if is_system_dir(&name_str) || name_str.starts_with('.') {
                    continue;
                }
                stack.push((path, depth + 1));
                continue;
            }
            if README_NAMES.contains(&name_str.as_ref()) || MANIFEST_NAMES.contains(&name_str.as_ref())
            {
                continue; // already handled separately
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let priority_rank = if PRIORITY_FILENAMES.contains(&name_str.as_ref()) {
                0
            } else {
                1
            };
            candidates.push(Candidate {
                path,
                relative,
                depth,
                size: meta.len(),
                priority_rank,
            });
        }
    }

    candidates.sort_by(|a, b| {
        a.priority_rank
            .cmp(&b.priority_rank)
            .then(a.depth.cmp(&b.depth))
            .then(a.size.cmp(&b.size))
    });
    candidates
}

fn find_first(root: &Path, names: &[&str]) -> Option<PathBuf> {
    names
        .iter()
        .map(|n| root.join(n))
        .find(|p| p.is_file())
}

fn manifest_as_structured(path: &Path) -> String {
    let raw = std::fs::read_to_string(path).unwrap_or_default();
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                return pretty;
            }
        }
    }
    raw
}

/// Extract a token-budgeted context for `root`. Unreadable files are
/// silently skipped; nothing here returns an error — a degraded (possibly
/// empty) context is always produced.
pub fn extract(root: &Path, max_context_tokens: usize) -> ProjectContext {
    let mut content = String::new();
    let mut budget_used = 0usize;
    let mut file_count = 0usize;
    let mut lines_of_code = 0i64;
    let mut total_size = 0i64;

    if let Some(readme_path) = find_first(root, README_NAMES) {
        if let Ok(raw) = std::fs::read_to_string(&readme_path) {
            let (truncated, _) = truncate_to_tokens(&raw, README_TOKEN_BUDGET);
            let tokens = estimate_tokens(&truncated);
            content.push_str("# README\n\n");
            content.push_str(&truncated);
            content.push_str("\n\n");
            budget_used += tokens;
            file_count += 1;
            lines_of_code += raw.lines().count() as i64;
            total_size += raw.len() as i64;
        }
    }

    if let Some(manifest_path) = find_first(root, MANIFEST_NAMES) {
        let structured = manifest_as_structured(&manifest_path);
        let tokens = estimate_tokens(&structured);
        content.push_str("# MANIFEST\n\n");
        content.push_str(&structured);
        content.push_str("\n\n");
        budget_used += tokens;
        file_count += 1;
        lines_of_code += structured.lines().count() as i64;
        total_size += structured.len() as i64;
    }

    if budget_used >= max_context_tokens {
        // README (and manifest) alone already exhausted the budget; no
        // source files are admitted.
        return ProjectContext {
            content: content.clone(),
            summary: ContextSummary {
                file_count,
                lines_of_code,
                total_size,
                estimated_tokens: estimate_tokens(&content),
            },
        };
    }

    for candidate in collect_candidates(root) {
        if candidate.size > MAX_FILE_SIZE_BYTES {
            continue;
        }
        let remaining = max_context_tokens.saturating_sub(budget_used);
        let stop_threshold = (remaining as f64 * ADMISSION_STOP_FRACTION) as usize;
        if stop_threshold == 0 {
            break;
        }

        let Ok(raw) = std::fs::read_to_string(&candidate.path) else {
            continue;
        };
        let file_tokens = estimate_tokens(&raw);

        let (body, truncated_flag) = if file_tokens > stop_threshold {
            (truncate_to_tokens(&raw, stop_threshold).0, true)
        } else {
            (raw.clone(), false)
        };

        content.push_str(&format!("# FILE: {}\n\n", candidate.relative.display()));
        content.push_str(&body);
        content.push_str("\n\n");

        budget_used += estimate_tokens(&body);
        file_count += 1;
        lines_of_code += raw.lines().count() as i64;
        total_size += candidate.size as i64;

        if truncated_flag || budget_used >= (max_context_tokens as f64 * ADMISSION_STOP_FRACTION) as usize
        {
            break;
        }
    }

    ProjectContext {
        content: content.clone(),
        summary: ContextSummary {
            file_count,
            lines_of_code,
            total_size,
            estimated_tokens: estimate_tokens(&content),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn includes_readme_first_then_manifest() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "hello world").unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let ctx = extract(dir.path(), 10_000);
        let readme_pos = ctx.content.find("hello world").unwrap();
        let manifest_pos = ctx.content.find("name").unwrap();
        assert!(readme_pos < manifest_pos);
    }

    #[test]
    fn file_exactly_100kb_is_admitted_101kb_is_skipped() {
        let dir = tempdir().unwrap();
        let exactly = "a".repeat(100 * 1024);
        let over = "a".repeat(100 * 1024 + 1);
        fs::write(dir.path().join("exact.txt"), &exactly).unwrap();
        fs::write(dir.path().join("over.txt"), &over).unwrap();
        let ctx = extract(dir.path(), 1_000_000);
        assert!(ctx.content.contains("exact.txt"));
        assert!(!ctx.content.contains("over.txt"));
    }

    #[test]
    fn tiny_budget_truncates_readme_and_admits_no_source_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "x".repeat(20_000)).unwrap();
        fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        let ctx = extract(dir.path(), 10);
        assert!(!ctx.content.contains("a.rs"));
        assert!(ctx.content.contains(TRUNCATION_SENTINEL.trim()));
    }

    #[test]
    fn unreadable_entries_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let ctx = extract(dir.path(), 1000);
        assert_eq!(ctx.summary.file_count, 0);
    }
}
