//! Project Validator & Metadata Extractor.
//!
//! Classifies a directory as a development project (or rejects it) and, for
//! accepted directories, extracts the metadata a `Project` row needs: file
//! count, size, lines of code, and the detected language/framework/package
//! manager.

mod framework;
mod loc;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use framework::detect_framework;

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

const SOURCE_SUBDIRS: &[&str] = &[
    "src", "lib", "app", "components", "services", "utils", "core", "modules", "backend",
    "frontend", "server", "client", "api", "web", "ui", "packages", "apps",
];

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "php", "cs", "c", "cpp", "h", "hpp",
    "kt", "swift", "dart", "scala", "ex", "exs",
];

const BUILD_CONFIG_FILES: &[&str] = &[
    "Makefile",
    "Dockerfile",
    "docker-compose.yml",
    ".github",
    "webpack.config.js",
    "vite.config.ts",
    "vite.config.js",
    "tsconfig.json",
    ".eslintrc.json",
    ".eslintrc.js",
];

const README_NAMES: &[&str] = &["README.md", "README", "README.txt", "readme.md"];

/// `(filename, project_type, language, confidence)` — strong markers are
/// unambiguous: finding one settles the classification outright.
const STRONG_MARKERS: &[(&str, &str, &str, f64)] = &[
    ("package.json", "node", "JavaScript", 0.95),
    ("Cargo.toml", "rust", "Rust", 0.95),
    ("go.mod", "go", "Go", 0.95),
    ("pom.xml", "java", "Java", 0.92),
    ("build.gradle", "java", "Java", 0.92),
    ("composer.json", "php", "PHP", 0.9),
    ("Gemfile", "ruby", "Ruby", 0.9),
    ("pyproject.toml", "python", "Python", 0.92),
    ("requirements.txt", "python", "Python", 0.9),
    ("Pipfile", "python", "Python", 0.9),
    ("pubspec.yaml", "dart", "Dart", 0.92),
];

const NESTED_CONFIDENCE: f64 = 0.85;
const GENERIC_ACCEPT_THRESHOLD: f64 = 0.5;
const GENERIC_CAP: f64 = 0.95;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub project_type: Option<String>,
    pub framework: Option<String>,
    pub language: Option<String>,
    pub package_manager: Option<String>,
    pub confidence: f64,
}

impl ValidationResult {
    fn rejected() -> Self {
        Self {
            valid: false,
            project_type: None,
            framework: None,
            language: None,
            package_manager: None,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    pub framework: Option<String>,
    pub language: Option<String>,
    pub secondary_language: Option<String>,
    pub package_manager: Option<String>,
    pub file_count: i64,
    pub lines_of_code: i64,
    pub size_bytes: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

fn is_system_dir(name: &str) -> bool {
    SYSTEM_DIRS.iter().any(|d| d.eq_ignore_ascii_case(name))
}

fn has_csharp_marker(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.ends_with(".csproj") || name.ends_with(".sln")
            })
        })
        .unwrap_or(false)
}

/// Validate a directory per the marker-scoring algorithm. Every filesystem
/// error is absorbed locally and degrades the result rather than failing.
pub fn validate(path: &Path) -> ValidationResult {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return ValidationResult::rejected(),
    };
    if name.is_empty() || name.starts_with('.') || is_system_dir(name) {
        return ValidationResult::rejected();
    }

    let metadata = match std::fs::metadata(path) {
        Ok(m) if m.is_dir() => m,
        _ => return ValidationResult::rejected(),
    };
    let _ = metadata;

    let entries: Vec<_> = match std::fs::read_dir(path) {
        Ok(rd) => rd.flatten().collect(),
        Err(_) => return ValidationResult::rejected(),
    };

    // 1. Strong markers at the root.
    for (marker, project_type, language, confidence) in STRONG_MARKERS {
        if entries.iter().any(|e| e.file_name() == *marker) {
            let package_manager = package_manager_for(marker);
            let framework = if *marker == "package.json" {
                detect_framework(&path.join("package.json"))
            } else if *marker == "requirements.txt" {
                detect_python_framework(&path.join("requirements.txt"))
            } else {
                None
            };
            return ValidationResult {
                valid: true,
                project_type: Some(project_type.to_string()),
                framework,
                language: Some(language.to_string()),
                package_manager,
                confidence: *confidence,
            };
        }
    }
    if has_csharp_marker(path) {
        return ValidationResult {
            valid: true,
            project_type: Some("csharp".into()),
            framework: None,
            language: Some("C#".into()),
            package_manager: None,
            confidence: 0.9,
        };
    }

    // 2. Nested markers, exactly one level below root.
    for entry in &entries {
        let child = entry.path();
        if !child.is_dir() || is_system_dir(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let Ok(grandchildren) = std::fs::read_dir(&child) else {
            continue;
        };
        let grandchildren: Vec<_> = grandchildren.flatten().collect();
        for (marker, project_type, language, _) in STRONG_MARKERS {
            if grandchildren.iter().any(|e| e.file_name() == *marker) {
                return ValidationResult {
                    valid: true,
                    project_type: Some(project_type.to_string()),
                    framework: None,
                    language: Some(language.to_string()),
                    package_manager: package_manager_for(marker),
                    confidence: NESTED_CONFIDENCE,
                };
            }
        }
    }

    // 3. Generic scoring.
    let mut score = 0.0_f64;
    if entries.iter().any(|e| e.file_name() == ".git") {
        score += 0.25;
    }
    if entries
        .iter()
        .any(|e| README_NAMES.contains(&e.file_name().to_string_lossy().as_ref()))
    {
        score += 0.15;
    }
    if entries.iter().any(|e| {
        e.path().is_dir() && SOURCE_SUBDIRS.contains(&e.file_name().to_string_lossy().as_ref())
    }) {
        score += 0.20;
    }
    let code_file_count = entries
        .iter()
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| CODE_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .count();
    if code_file_count >= 2 {
        score += 0.15;
    }
    if entries
        .iter()
        .any(|e| BUILD_CONFIG_FILES.contains(&e.file_name().to_string_lossy().as_ref()))
    {
        score += 0.10;
    }
    if entries
        .iter()
        .any(|e| e.path().is_dir() && e.file_name().to_string_lossy() == "docs")
    {
        score += 0.05;
    }
    if entries.iter().any(|e| {
        e.path().is_dir()
            && matches!(
                e.file_name().to_string_lossy().as_ref(),
                "test" | "tests" | "__tests__" | "spec"
            )
    }) {
        score += 0.05;
    }
    score = score.min(GENERIC_CAP);

    if score < GENERIC_ACCEPT_THRESHOLD {
        return ValidationResult::rejected();
    }

    ValidationResult {
        valid: true,
        project_type: Some("generic".into()),
        framework: None,
        language: None,
        package_manager: None,
        confidence: score,
    }
}

fn package_manager_for(marker: &str) -> Option<String> {
    Some(
        match marker {
            "package.json" => "npm",
            "Cargo.toml" => "cargo",
            "go.mod" => "go modules",
            "pom.xml" => "maven",
            "build.gradle" => "gradle",
            "composer.json" => "composer",
            "Gemfile" => "bundler",
            "pyproject.toml" => "poetry",
            "requirements.txt" => "pip",
            "Pipfile" => "pipenv",
            "pubspec.yaml" => "pub",
            _ => return None,
        }
        .to_string(),
    )
}

fn detect_python_framework(requirements_path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(requirements_path).ok()?;
    let lower = contents.to_lowercase();
    if lower.contains("django") {
        Some("Django".into())
    } else if lower.contains("fastapi") {
        Some("FastAPI".into())
    } else if lower.contains("flask") {
        Some("Flask".into())
    } else {
        None
    }
}

/// Extract full metadata for an already-validated directory.
pub fn extract(path: &Path, validation: &ValidationResult) -> ProjectMetadata {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let last_modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(system_time_to_utc);

    let (file_count, size_bytes, files_by_extension) = scan_tree(path);
    let lines_of_code = loc::count_lines_of_code(&files_by_extension);

    let (language, secondary_language) =
        rank_languages(&files_by_extension, validation.language.clone());

    ProjectMetadata {
        name,
        framework: validation.framework.clone(),
        language,
        secondary_language,
        package_manager: validation.package_manager.clone(),
        file_count,
        lines_of_code,
        size_bytes,
        last_modified,
    }
}

fn system_time_to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

const MARKUP_CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "md", "txt", "lock", "xml", "html", "css",
];

/// Bounded-depth traversal (depth capped to avoid pathological trees) that
/// skips the system directory set; returns total file count, total size in
/// bytes, and every readable file grouped by extension for the LOC pass.
fn scan_tree(root: &Path) -> (i64, i64, Vec<(String, PathBuf)>) {
    const MAX_DEPTH: usize = 12;
    let mut file_count = 0i64;
    let mut size_bytes = 0i64;
    let mut files = Vec::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if path.is_dir() {
                if is_system_dir(&name) || name.starts_with('.') {
                    continue;
                }
                stack.push((path, depth + 1));
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            file_count += 1;
            size_bytes += meta.len() as i64;
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                files.push((ext.to_string(), path));
            }
        }
    }

    (file_count, size_bytes, files)
}

fn rank_languages(
    files: &[(String, PathBuf)],
    hinted: Option<String>,
) -> (Option<String>, Option<String>) {
    use std::collections::HashMap;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (ext, _) in files {
        if MARKUP_CONFIG_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        if let Some(lang) = loc::language_for_extension(ext) {
            *counts.entry(lang).or_default() += 1;
        }
    }
    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let primary = hinted.or_else(|| ranked.first().map(|(l, _)| l.to_string()));
    let secondary = ranked
        .iter()
        .map(|(l, _)| l.to_string())
        .find(|l| Some(l.clone()) != primary);

    (primary, secondary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn rejects_non_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let result = validate(&file);
        assert!(!result.valid);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn rejects_dotfile_directory() {
        let dir = tempdir().unwrap();
        let hidden = dir.path().join(".hidden");
        fs::create_dir(&hidden).unwrap();
        assert!(!validate(&hidden).valid);
    }

    #[test]
    fn rejects_system_directory() {
        let dir = tempdir().unwrap();
        let nm = dir.path().join("node_modules");
        fs::create_dir(&nm).unwrap();
        assert!(!validate(&nm).valid);
    }

    #[test]
    fn strong_marker_node_project() {
        let dir = tempdir().unwrap();
        let proj = dir.path().join("demo");
        fs::create_dir(&proj).unwrap();
        fs::write(
            proj.join("package.json"),
            r#"{"dependencies":{"react":"^18"}}"#,
        )
        .unwrap();
        let result = validate(&proj);
        assert!(result.valid);
        assert_eq!(result.project_type.as_deref(), Some("node"));
        assert_eq!(result.framework.as_deref(), Some("React"));
        assert!(result.confidence >= 0.9);
    }

    #[test]
    fn rejects_single_marker_only_git() {
        let dir = tempdir().unwrap();
        let proj = dir.path().join("lonegit");
        fs::create_dir(&proj).unwrap();
        fs::create_dir(proj.join(".git")).unwrap();
        let result = validate(&proj);
        assert!(!result.valid);
    }

    #[test]
    fn accepts_generic_with_two_code_files_and_readme() {
        let dir = tempdir().unwrap();
        let proj = dir.path().join("generic");
        fs::create_dir(&proj).unwrap();
        fs::write(proj.join("README.md"), "hello").unwrap();
        fs::write(proj.join("a.rs"), "fn main() {}").unwrap();
        fs::write(proj.join("b.rs"), "fn other() {}").unwrap();
        let result = validate(&proj);
        assert!(result.valid);
        assert!((result.confidence - 0.30).abs() < 1e-9);
    }

    #[test]
    fn rejects_empty_directory() {
        let dir = tempdir().unwrap();
        let proj = dir.path().join("empty");
        fs::create_dir(&proj).unwrap();
        assert!(!validate(&proj).valid);
    }
}
