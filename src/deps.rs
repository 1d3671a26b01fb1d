//! Dependency extraction: import scanning over indexed chunk contents plus
//! manifest and lockfile resolution.
//!
//! Direct dependencies come from heuristic import-statement scanning, so the
//! counts reflect what the code actually references. Versions are filled in
//! from manifests when present. Transitive entries come from lockfiles; a
//! project without a lockfile reports direct dependencies only.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::models::Dependency;

/// Python stdlib roots skipped during import scanning. Not exhaustive, just
/// the modules that show up constantly in real code.
const PYTHON_STDLIB: &[&str] = &[
    "os", "sys", "re", "json", "time", "typing", "pathlib", "collections", "itertools",
    "functools", "dataclasses", "abc", "asyncio", "logging", "math", "io", "enum", "subprocess",
    "shutil", "tempfile", "unittest", "datetime", "hashlib", "sqlite3", "contextlib", "copy",
    "random", "string", "threading", "uuid", "urllib", "http", "socket", "argparse",
];

const RUST_BUILTIN: &[&str] = &["std", "core", "alloc", "crate", "self", "super", "test"];

/// Scan one chunk of source for imported package roots.
pub fn scan_imports(language: &str, content: &str) -> Vec<String> {
    match language {
        "python" => scan_python(content),
        "javascript" | "typescript" => scan_js(content),
        "rust" => scan_rust(content),
        "go" => scan_go(content),
        _ => Vec::new(),
    }
}

fn scan_python(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim_start();
        let targets = if let Some(rest) = line.strip_prefix("from ") {
            rest.split_whitespace().next().map(|m| vec![m]).unwrap_or_default()
        } else if let Some(rest) = line.strip_prefix("import ") {
            rest.split(',')
                .filter_map(|part| part.split_whitespace().next())
                .collect()
        } else {
            continue;
        };
        for target in targets {
            // Relative imports reference the project itself.
            if target.starts_with('.') {
                continue;
            }
            let root = target.split('.').next().unwrap_or(target);
            if root.is_empty() || PYTHON_STDLIB.contains(&root) {
                continue;
            }
            out.push(root.to_string());
        }
    }
    out
}

fn scan_js(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim_start();
        let spec = if line.starts_with("import ") || line.starts_with("export ") {
            line.split(" from ")
                .nth(1)
                .or_else(|| line.strip_prefix("import "))
                .and_then(extract_quoted)
        } else if let Some(pos) = line.find("require(") {
            extract_quoted(&line[pos + "require(".len()..])
        } else {
            None
        };
        let Some(spec) = spec else { continue };
        if spec.starts_with('.') || spec.starts_with('/') || spec.starts_with("node:") {
            continue;
        }
        let name = if spec.starts_with('@') {
            spec.splitn(3, '/').take(2).collect::<Vec<_>>().join("/")
        } else {
            spec.split('/').next().unwrap_or(&spec).to_string()
        };
        if !name.is_empty() {
            out.push(name);
        }
    }
    out
}

fn scan_rust(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim_start();
        let root = if let Some(rest) = line.strip_prefix("use ") {
            rest.split(&[':', ';', ' ', '{'][..]).next()
        } else if let Some(rest) = line.strip_prefix("extern crate ") {
            rest.split(&[';', ' '][..]).next()
        } else {
            None
        };
        if let Some(root) = root {
            let root = root.trim();
            if root.is_empty() || RUST_BUILTIN.contains(&root) {
                continue;
            }
            out.push(root.replace('_', "-"));
        }
    }
    out
}

fn scan_go(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_block = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("import (") {
            in_block = true;
            continue;
        }
        if in_block && line.starts_with(')') {
            in_block = false;
            continue;
        }
        let candidate = if in_block {
            Some(line)
        } else {
            line.strip_prefix("import ")
        };
        let Some(candidate) = candidate else { continue };
        let Some(path) = extract_quoted(candidate) else {
            continue;
        };
        // Stdlib packages have no dot in the first path segment.
        let first = path.split('/').next().unwrap_or(&path);
        if first.contains('.') {
            out.push(path);
        }
    }
    out
}

fn extract_quoted(s: &str) -> Option<String> {
    let start = s.find(['"', '\''])?;
    let quote = s.as_bytes()[start] as char;
    let rest = &s[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Extract the full dependency set for a project.
///
/// `chunks` is (path, language, content) for every indexed chunk; the
/// project root is read for manifests and lockfiles.
pub fn extract(project_root: &Path, chunks: &[(String, String, String)]) -> Result<Vec<Dependency>> {
    // (language, name) -> distinct importing files
    let mut direct: HashMap<(String, String), HashSet<String>> = HashMap::new();
    for (path, language, content) in chunks {
        for name in scan_imports(language, content) {
            direct
                .entry((language.clone(), name))
                .or_default()
                .insert(path.clone());
        }
    }

    let versions = manifest_versions(project_root);
    let lockfile = lockfile_packages(project_root);

    let mut out: Vec<Dependency> = direct
        .into_iter()
        .map(|((language, name), files)| {
            let version = versions
                .get(&(language.clone(), name.clone()))
                .or_else(|| lockfile.get(&(language.clone(), name.clone())))
                .cloned();
            Dependency {
                name,
                version,
                language,
                file_count: files.len() as u32,
                transitive: false,
            }
        })
        .collect();

    let direct_keys: HashSet<(String, String)> = out
        .iter()
        .map(|d| (d.language.clone(), d.name.clone()))
        .collect();
    for ((language, name), version) in lockfile {
        if direct_keys.contains(&(language.clone(), name.clone())) {
            continue;
        }
        out.push(Dependency {
            name,
            version: Some(version),
            language,
            file_count: 0,
            transitive: true,
        });
    }

    out.sort_by(|a, b| (&a.language, a.transitive, &a.name).cmp(&(&b.language, b.transitive, &b.name)));
    Ok(out)
}

/// Group dependencies by language for the API response.
pub fn group_by_language(deps: Vec<Dependency>) -> BTreeMap<String, Vec<Dependency>> {
    let mut grouped: BTreeMap<String, Vec<Dependency>> = BTreeMap::new();
    for dep in deps {
        grouped.entry(dep.language.clone()).or_default().push(dep);
    }
    grouped
}

/// Versions declared in manifests, keyed by (language, name).
fn manifest_versions(root: &Path) -> HashMap<(String, String), String> {
    let mut out = HashMap::new();

    if let Ok(content) = std::fs::read_to_string(root.join("requirements.txt")) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, version) = split_python_requirement(line);
            if let Some(version) = version {
                out.insert(("python".to_string(), name), version);
            }
        }
    }

    if let Ok(content) = std::fs::read_to_string(root.join("pyproject.toml")) {
        if let Ok(doc) = content.parse::<toml::Value>() {
            let deps = doc
                .get("project")
                .and_then(|p| p.get("dependencies"))
                .and_then(|d| d.as_array());
            for dep in deps.into_iter().flatten() {
                if let Some(spec) = dep.as_str() {
                    let (name, version) = split_python_requirement(spec);
                    if let Some(version) = version {
                        out.insert(("python".to_string(), name), version);
                    }
                }
            }
        }
    }

    if let Ok(content) = std::fs::read_to_string(root.join("package.json")) {
        if let Ok(doc) = serde_json::from_str::<serde_json::Value>(&content) {
            for section in ["dependencies", "devDependencies"] {
                let deps = doc.get(section).and_then(|d| d.as_object());
                for (name, version) in deps.into_iter().flatten() {
                    if let Some(version) = version.as_str() {
                        out.insert(
                            ("javascript".to_string(), name.clone()),
                            version.trim_start_matches(['^', '~']).to_string(),
                        );
                    }
                }
            }
        }
    }

    if let Ok(content) = std::fs::read_to_string(root.join("Cargo.toml")) {
        if let Ok(doc) = content.parse::<toml::Value>() {
            let deps = doc.get("dependencies").and_then(|d| d.as_table());
            for (name, spec) in deps.into_iter().flatten() {
                let version = spec
                    .as_str()
                    .map(|s| s.to_string())
                    .or_else(|| {
                        spec.get("version")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string())
                    });
                if let Some(version) = version {
                    out.insert(("rust".to_string(), name.clone()), version);
                }
            }
        }
    }

    if let Ok(content) = std::fs::read_to_string(root.join("go.mod")) {
        let mut in_block = false;
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with("require (") {
                in_block = true;
                continue;
            }
            if in_block && line.starts_with(')') {
                in_block = false;
                continue;
            }
            let spec = if in_block {
                Some(line)
            } else {
                line.strip_prefix("require ")
            };
            if let Some(spec) = spec {
                let mut parts = spec.split_whitespace();
                if let (Some(module), Some(version)) = (parts.next(), parts.next()) {
                    out.insert(("go".to_string(), module.to_string()), version.to_string());
                }
            }
        }
    }

    out
}

/// `requests==2.31.0` / `fastapi>=0.100` / bare `flask`.
fn split_python_requirement(spec: &str) -> (String, Option<String>) {
    for op in ["==", ">=", "<=", "~=", ">", "<"] {
        if let Some((name, version)) = spec.split_once(op) {
            let name = name.split('[').next().unwrap_or(name).trim().to_string();
            let version = if op == "==" {
                Some(version.trim().to_string())
            } else {
                None
            };
            return (name, version);
        }
    }
    (
        spec.split('[').next().unwrap_or(spec).trim().to_string(),
        None,
    )
}

/// Pinned packages from lockfiles, keyed by (language, name).
fn lockfile_packages(root: &Path) -> HashMap<(String, String), String> {
    let mut out = HashMap::new();

    if let Ok(content) = std::fs::read_to_string(root.join("Cargo.lock")) {
        if let Ok(doc) = content.parse::<toml::Value>() {
            let packages = doc.get("package").and_then(|p| p.as_array());
            for pkg in packages.into_iter().flatten() {
                if let (Some(name), Some(version)) = (
                    pkg.get("name").and_then(|n| n.as_str()),
                    pkg.get("version").and_then(|v| v.as_str()),
                ) {
                    out.insert(
                        ("rust".to_string(), name.to_string()),
                        version.to_string(),
                    );
                }
            }
        }
    }

    if let Ok(content) = std::fs::read_to_string(root.join("package-lock.json")) {
        if let Ok(doc) = serde_json::from_str::<serde_json::Value>(&content) {
            let packages = doc.get("packages").and_then(|p| p.as_object());
            for (key, entry) in packages.into_iter().flatten() {
                let Some(name) = key.strip_prefix("node_modules/") else {
                    continue;
                };
                if let Some(version) = entry.get("version").and_then(|v| v.as_str()) {
                    out.insert(
                        ("javascript".to_string(), name.to_string()),
                        version.to_string(),
                    );
                }
            }
        }
    }

    if let Ok(content) = std::fs::read_to_string(root.join("go.sum")) {
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(module), Some(version)) = (parts.next(), parts.next()) {
                let version = version.trim_end_matches("/go.mod").to_string();
                out.insert(("go".to_string(), module.to_string()), version);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_import_scanning() {
        let src = "import requests\nfrom fastapi import FastAPI\nimport os\nfrom . import local\nimport numpy as np, pandas\n";
        let mut found = scan_imports("python", src);
        found.sort();
        assert_eq!(found, vec!["fastapi", "numpy", "pandas", "requests"]);
    }

    #[test]
    fn test_js_import_scanning() {
        let src = "import express from 'express';\nimport { z } from \"zod\";\nconst lodash = require('lodash');\nimport util from './util';\nimport fs from 'node:fs';\nimport ui from '@scope/ui/button';\n";
        let mut found = scan_imports("javascript", src);
        found.sort();
        assert_eq!(found, vec!["@scope/ui", "express", "lodash", "zod"]);
    }

    #[test]
    fn test_rust_import_scanning() {
        let src = "use serde::Serialize;\nuse std::collections::HashMap;\nuse crate::models;\nextern crate anyhow;\nuse tokio_util::codec;\n";
        let mut found = scan_imports("rust", src);
        found.sort();
        assert_eq!(found, vec!["anyhow", "serde", "tokio-util"]);
    }

    #[test]
    fn test_go_import_scanning() {
        let src = "import \"fmt\"\nimport (\n\t\"strings\"\n\t\"github.com/gin-gonic/gin\"\n)\n";
        let found = scan_imports("go", src);
        assert_eq!(found, vec!["github.com/gin-gonic/gin"]);
    }

    #[test]
    fn test_extract_counts_distinct_files_and_fills_versions() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("requirements.txt"),
            "requests==2.31.0\nfastapi>=0.100\n",
        )
        .unwrap();

        let chunks = vec![
            ("a.py".to_string(), "python".to_string(), "import requests\n".to_string()),
            ("a.py".to_string(), "python".to_string(), "import requests\n".to_string()),
            ("b.py".to_string(), "python".to_string(), "import requests\nimport fastapi\n".to_string()),
        ];
        let deps = extract(tmp.path(), &chunks).unwrap();

        let requests = deps.iter().find(|d| d.name == "requests").unwrap();
        assert_eq!(requests.file_count, 2, "same file counted once");
        assert_eq!(requests.version.as_deref(), Some("2.31.0"));
        assert!(!requests.transitive);

        let fastapi = deps.iter().find(|d| d.name == "fastapi").unwrap();
        assert_eq!(fastapi.version, None, "range specs carry no pinned version");
    }

    #[test]
    fn test_lockfile_adds_transitive_entries() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("Cargo.lock"),
            r#"
[[package]]
name = "serde"
version = "1.0.200"

[[package]]
name = "itoa"
version = "1.0.11"
"#,
        )
        .unwrap();

        let chunks = vec![(
            "src/main.rs".to_string(),
            "rust".to_string(),
            "use serde::Serialize;\n".to_string(),
        )];
        let deps = extract(tmp.path(), &chunks).unwrap();

        let serde_dep = deps.iter().find(|d| d.name == "serde").unwrap();
        assert!(!serde_dep.transitive);
        assert_eq!(serde_dep.version.as_deref(), Some("1.0.200"));

        let itoa = deps.iter().find(|d| d.name == "itoa").unwrap();
        assert!(itoa.transitive);
        assert_eq!(itoa.file_count, 0);
    }

    #[test]
    fn test_no_lockfile_means_direct_only() {
        let tmp = tempfile::tempdir().unwrap();
        let chunks = vec![(
            "a.py".to_string(),
            "python".to_string(),
            "import flask\n".to_string(),
        )];
        let deps = extract(tmp.path(), &chunks).unwrap();
        assert_eq!(deps.len(), 1);
        assert!(deps.iter().all(|d| !d.transitive));
    }

    #[test]
    fn test_group_by_language() {
        let deps = vec![
            Dependency {
                name: "serde".into(),
                version: None,
                language: "rust".into(),
                file_count: 1,
                transitive: false,
            },
            Dependency {
                name: "flask".into(),
                version: None,
                language: "python".into(),
                file_count: 1,
                transitive: false,
            },
        ];
        let grouped = group_by_language(deps);
        let langs: Vec<_> = grouped.keys().cloned().collect();
        assert_eq!(langs, vec!["python", "rust"]);
    }
}
