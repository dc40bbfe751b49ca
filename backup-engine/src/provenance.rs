//! Creation-time provenance: framework detection and git capture.

use std::path::Path;
use std::process::Command;

/// Inspect a source tree for framework markers. Informational only.
pub fn detect_app_type(source: &Path) -> Option<String> {
    let package_json = source.join("package.json");
    if package_json.is_file() {
        let body = std::fs::read_to_string(&package_json).ok()?;
        let parsed: serde_json::Value = serde_json::from_str(&body).ok()?;
        return Some(node_framework(&parsed).to_string());
    }

    if source.join("requirements.txt").is_file() || source.join("pyproject.toml").is_file() {
        return Some("python".into());
    }
    if source.join("composer.json").is_file() {
        return Some("php".into());
    }
    if source.join("index.html").is_file() {
        return Some("static".into());
    }
    None
}

fn node_framework(package: &serde_json::Value) -> &'static str {
    let has_dependency = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|table| package.get(table).and_then(|d| d.get(name)).is_some())
    };

    if has_dependency("next") {
        "nextjs"
    } else if has_dependency("nuxt") {
        "nuxt"
    } else if has_dependency("react") {
        "react"
    } else if has_dependency("vue") {
        "vue"
    } else if has_dependency("express") {
        "express"
    } else {
        "node"
    }
}

#[derive(Debug, Clone, Default)]
pub struct GitProvenance {
    pub commit: Option<String>,
    pub branch: Option<String>,
}

/// Capture the source tree's git commit and branch. A tree that is not
/// version-controlled, or a failing `git`, yields empty provenance rather
/// than an error.
pub fn capture_git(source: &Path) -> GitProvenance {
    if !source.join(".git").exists() {
        return GitProvenance::default();
    }

    GitProvenance {
        commit: git_output(source, &["rev-parse", "HEAD"]),
        branch: git_output(source, &["rev-parse", "--abbrev-ref", "HEAD"]),
    }
}

fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
