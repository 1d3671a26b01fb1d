//! Project filesystem scanner.
//!
//! Walks a project root, skipping vendored and generated directories,
//! admitting only files whose extension (or exact name, for manifests) maps
//! to a known language, and enforcing the configured size cap. Results are
//! sorted by relative path so index runs are deterministic.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

/// Directory names never descended into.
const EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".idea",
    ".vscode",
    "dist",
    "build",
    ".eggs",
    "target",
];

/// Extension-to-language map for indexable source files.
const EXT_LANG: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("java", "java"),
    ("go", "go"),
    ("rs", "rust"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cc", "cpp"),
    ("html", "html"),
    ("css", "css"),
    ("md", "markdown"),
    ("toml", "toml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("json", "json"),
    ("sh", "shell"),
    ("sql", "sql"),
];

/// Manifest and lockfile names admitted regardless of extension.
const MANIFEST_FILES: &[(&str, &str)] = &[
    ("requirements.txt", "python"),
    ("pyproject.toml", "python"),
    ("package.json", "javascript"),
    ("package-lock.json", "javascript"),
    ("Cargo.toml", "rust"),
    ("Cargo.lock", "rust"),
    ("go.mod", "go"),
    ("go.sum", "go"),
    ("Makefile", "make"),
    ("Dockerfile", "docker"),
];

/// One candidate file found during a scan.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Path relative to the project root, forward slashes.
    pub rel_path: String,
    pub language: String,
    pub size: u64,
}

/// Outcome of walking a project root.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: Vec<ScannedFile>,
    /// Files matched by language but skipped for exceeding the size cap.
    pub skipped_oversize: u64,
}

/// Language for a file name, or `None` when the file is not indexable.
pub fn detect_language(file_name: &str) -> Option<&'static str> {
    if let Some((_, lang)) = MANIFEST_FILES.iter().find(|(n, _)| *n == file_name) {
        return Some(*lang);
    }
    let ext = Path::new(file_name).extension()?.to_str()?;
    EXT_LANG
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(ext))
        .map(|(_, lang)| *lang)
}

fn build_exclude_set(extra_globs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for glob in extra_globs {
        builder.add(Glob::new(glob).with_context(|| format!("Invalid exclude glob: {glob}"))?);
    }
    Ok(builder.build()?)
}

/// Walk `root` and collect indexable files under `max_file_size` bytes.
pub fn scan_project(root: &Path, max_file_size: u64, extra_globs: &[String]) -> Result<ScanResult> {
    let excludes = build_exclude_set(extra_globs)?;
    let mut result = ScanResult::default();

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| {
        !(e.file_type().is_dir()
            && e.depth() > 0
            && e.file_name()
                .to_str()
                .map(|name| EXCLUDE_DIRS.contains(&name))
                .unwrap_or(false))
    }) {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(language) = detect_language(file_name) else {
            continue;
        };

        let rel_path = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if !excludes.is_empty() && excludes.is_match(&rel_path) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > max_file_size {
            result.skipped_oversize += 1;
            continue;
        }

        result.files.push(ScannedFile {
            rel_path,
            language: language.to_string(),
            size,
        });
    }

    result.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(result)
}
