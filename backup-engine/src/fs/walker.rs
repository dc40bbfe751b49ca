//! Source-tree traversal with content classification.
//!
//! Walks an application tree and tags every entry with the content category
//! it belongs to, so the codec can skip categories the caller did not select.

use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::models::ContentCategory;

/// Names that are never packed, regardless of selection.
const ALWAYS_IGNORED: &[&str] = &[".git", ".DS_Store"];

const DEPENDENCY_DIRS: &[&str] = &["node_modules", "vendor", ".venv"];
const BUILD_DIRS: &[&str] = &["dist", "build", ".next", ".nuxt"];
const DATABASE_EXTENSIONS: &[&str] = &["sql", "dump", "sqlite", "sqlite3", "db"];

/// One entry discovered under the source tree root.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub path: PathBuf,
    /// Path relative to the tree root; never escapes it.
    pub relative_path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
    /// `None` for plain application files, which are always packed.
    pub category: Option<ContentCategory>,
}

/// Classify a relative path into a content category.
///
/// Directory-based categories apply to anything beneath a matching
/// component; file-based ones look at the entry name itself.
pub fn classify(relative: &Path) -> Option<ContentCategory> {
    for component in relative.components() {
        if let Component::Normal(name) = component {
            let name = name.to_string_lossy();
            if DEPENDENCY_DIRS.contains(&name.as_ref()) {
                return Some(ContentCategory::Dependencies);
            }
            if BUILD_DIRS.contains(&name.as_ref()) {
                return Some(ContentCategory::BuildOutput);
            }
        }
    }

    let file_name = relative.file_name()?.to_string_lossy();
    if file_name == ".env" || file_name.starts_with(".env.") {
        return Some(ContentCategory::Environment);
    }

    if let Some(ext) = relative.extension() {
        let ext = ext.to_string_lossy().to_lowercase();
        if DATABASE_EXTENSIONS.contains(&ext.as_str()) {
            return Some(ContentCategory::Databases);
        }
    }

    None
}

fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    ALWAYS_IGNORED.contains(&name.as_ref())
}

/// Walk a source tree and collect every entry with its classification.
///
/// Symlinks are reported as links, not followed, so the traversal can never
/// leave the declared tree root.
pub fn walk_source_tree(root: &Path) -> std::io::Result<Vec<SourceEntry>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored(e));

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let category = classify(&relative_path);

        entries.push(SourceEntry {
            path,
            relative_path,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_symlink: metadata.is_symlink(),
            category,
        });
    }

    Ok(entries)
}
