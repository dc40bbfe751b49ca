//! External collaborators consumed by the engine.
//!
//! Application directory resolution and database dump/restore are owned by
//! the surrounding system; the engine treats dumps as opaque named blobs.

use std::path::{Path, PathBuf};

use crate::models::DatabaseDump;

pub trait AppResolver: Send + Sync {
    /// Source tree of an existing application, or `None` if the domain does
    /// not resolve to one.
    fn resolve(&self, domain: &str) -> Option<PathBuf>;

    /// Where the application for `domain` lives or would live. Used by
    /// restore, which may materialize a target that does not exist yet.
    fn target_path(&self, domain: &str) -> PathBuf;

    /// Directories restore stages into (the parents of target paths). A
    /// crash mid-restore can leave staging or trash directories here; the
    /// manager sweeps them at startup.
    fn staging_parents(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

pub trait DatabaseHooks: Send + Sync {
    /// Produce dump artifacts for `domain` into `scratch_dir`, one file per
    /// database, named as the returned descriptors say.
    fn dump(&self, domain: &str, scratch_dir: &Path) -> anyhow::Result<Vec<DatabaseDump>>;

    /// Apply previously produced dump artifacts found in `dump_dir`.
    fn restore(&self, domain: &str, dump_dir: &Path, dumps: &[DatabaseDump])
        -> anyhow::Result<()>;
}

/// Resolver mapping each domain to a subdirectory of one applications
/// directory.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    apps_dir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(apps_dir: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
        }
    }
}

impl AppResolver for DirectoryResolver {
    fn resolve(&self, domain: &str) -> Option<PathBuf> {
        let path = self.apps_dir.join(domain);
        path.is_dir().then_some(path)
    }

    fn target_path(&self, domain: &str) -> PathBuf {
        self.apps_dir.join(domain)
    }

    fn staging_parents(&self) -> Vec<PathBuf> {
        vec![self.apps_dir.clone()]
    }
}
