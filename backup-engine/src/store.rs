//! Metadata store: one JSON sidecar descriptor per archive.
//!
//! Layout: `<root>/<domain>/<id>.tar.gz` beside `<root>/<domain>/<id>.meta.json`.
//! Saves are atomic (temp file + rename in the same directory), so a
//! concurrent reader never observes a torn descriptor.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::models::{descriptor::bytes_to_human, BackupDescriptor};

const ARCHIVE_SUFFIX: &str = ".tar.gz";
const DESCRIPTOR_SUFFIX: &str = ".meta.json";

/// Prefix for the staging directory a delete moves its pair into.
pub const TRASH_PREFIX: &str = ".trash-";
/// Prefix for scratch/staging directories used by in-flight operations.
pub const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

/// Descriptor/archive mismatches discovered while listing. Reported, never
/// silently hidden; mismatched entries are excluded from listings.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconciliationReport {
    /// Descriptor ids whose archive file is missing.
    pub orphan_descriptors: Vec<String>,
    /// Archive file names with no matching descriptor.
    pub untracked_archives: Vec<String>,
    /// Descriptor ids whose recorded size differs from the file on disk.
    pub size_mismatches: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_descriptors.is_empty()
            && self.untracked_archives.is_empty()
            && self.size_mismatches.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Listing {
    /// Consistent descriptors, newest first.
    pub descriptors: Vec<BackupDescriptor>,
    pub reconciliation: ReconciliationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageUsage {
    pub total_size_bytes: u64,
    pub total_size_human: String,
    pub backup_count: u64,
    /// Domain subdirectory names, sorted.
    pub domains: Vec<String>,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.root.join(domain)
    }

    pub fn archive_path(&self, domain: &str, id: &str) -> PathBuf {
        self.domain_dir(domain).join(format!("{id}{ARCHIVE_SUFFIX}"))
    }

    pub fn descriptor_path(&self, domain: &str, id: &str) -> PathBuf {
        self.domain_dir(domain)
            .join(format!("{id}{DESCRIPTOR_SUFFIX}"))
    }

    /// Persist a descriptor atomically beside its archive.
    pub fn save(&self, descriptor: &BackupDescriptor) -> crate::Result<()> {
        let dir = self.domain_dir(&descriptor.domain);
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_json::to_string_pretty(descriptor)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.descriptor_path(&descriptor.domain, &descriptor.id))
            .map_err(|e| EngineError::Io(e.error))?;
        Ok(())
    }

    /// Load a descriptor by id, scanning domain directories.
    ///
    /// An orphan descriptor (archive missing) is reported and treated as not
    /// found: a descriptor exists only together with a readable archive.
    pub fn load(&self, id: &str) -> crate::Result<Option<BackupDescriptor>> {
        for domain in self.domain_names()? {
            let path = self.descriptor_path(&domain, id);
            if !path.exists() {
                continue;
            }
            let descriptor: BackupDescriptor =
                serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            if !self.archive_path(&descriptor.domain, id).exists() {
                tracing::warn!(id, domain, "descriptor without archive, treating as missing");
                return Ok(None);
            }
            return Ok(Some(descriptor));
        }
        Ok(None)
    }

    /// List descriptors newest-first, with a reconciliation pass over every
    /// scanned domain directory. `limit` applies after the domain filter.
    pub fn list(&self, domain_filter: Option<&str>, limit: usize) -> crate::Result<Listing> {
        let mut descriptors = Vec::new();
        let mut report = ReconciliationReport::default();

        for domain in self.domain_names()? {
            if let Some(filter) = domain_filter {
                if domain != filter {
                    continue;
                }
            }
            self.scan_domain(&domain, &mut descriptors, &mut report)?;
        }

        descriptors.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        descriptors.truncate(limit);

        if !report.is_clean() {
            tracing::warn!(
                orphans = report.orphan_descriptors.len(),
                untracked = report.untracked_archives.len(),
                size_mismatches = report.size_mismatches.len(),
                "backup storage reconciliation found inconsistent entries"
            );
        }

        Ok(Listing {
            descriptors,
            reconciliation: report,
        })
    }

    /// Remove a backup's archive and descriptor as a pair.
    ///
    /// Both files are renamed into a trash staging directory first, then the
    /// directory is removed. A crash mid-delete leaves only the staging
    /// directory, which the startup sweep clears; no half-deleted pair ever
    /// looks like a live backup.
    pub fn delete(&self, descriptor: &BackupDescriptor) -> crate::Result<()> {
        let dir = self.domain_dir(&descriptor.domain);
        let trash = dir.join(format!("{TRASH_PREFIX}{}", descriptor.id));
        std::fs::create_dir_all(&trash)?;

        let descriptor_path = self.descriptor_path(&descriptor.domain, &descriptor.id);
        std::fs::rename(&descriptor_path, trash.join(descriptor.descriptor_file_name()))?;

        let archive_path = self.archive_path(&descriptor.domain, &descriptor.id);
        match std::fs::rename(&archive_path, trash.join(descriptor.archive_file_name())) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(id = %descriptor.id, "archive already missing during delete");
            }
            Err(e) => return Err(e.into()),
        }

        std::fs::remove_dir_all(&trash)?;
        Ok(())
    }

    /// Total archive bytes, backup count, and domain names under the root.
    pub fn usage(&self) -> crate::Result<StorageUsage> {
        let mut total_size_bytes = 0u64;
        let mut backup_count = 0u64;
        let mut domains = Vec::new();

        for domain in self.domain_names()? {
            domains.push(domain.clone());
            for entry in std::fs::read_dir(self.domain_dir(&domain))? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(ARCHIVE_SUFFIX) && entry.file_type()?.is_file() {
                    total_size_bytes += entry.metadata()?.len();
                    backup_count += 1;
                }
            }
        }
        domains.sort();

        Ok(StorageUsage {
            total_size_bytes,
            total_size_human: bytes_to_human(total_size_bytes),
            backup_count,
            domains,
        })
    }

    /// Remove stale staging and trash directories left by a crashed process.
    pub fn sweep_stale_staging(&self) -> crate::Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        for domain in self.domain_names()? {
            sweep_prefixed_dirs(&self.domain_dir(&domain))?;
        }
        Ok(())
    }

    fn domain_names(&self) -> crate::Result<Vec<String>> {
        let mut names = Vec::new();
        let read_dir = match std::fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn scan_domain(
        &self,
        domain: &str,
        descriptors: &mut Vec<BackupDescriptor>,
        report: &mut ReconciliationReport,
    ) -> crate::Result<()> {
        let dir = self.domain_dir(domain);
        let mut archive_ids = Vec::new();
        let mut descriptor_ids = Vec::new();

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(ARCHIVE_SUFFIX) {
                archive_ids.push(id.to_string());
            } else if let Some(id) = name.strip_suffix(DESCRIPTOR_SUFFIX) {
                descriptor_ids.push(id.to_string());
            }
        }

        for id in &descriptor_ids {
            let path = self.descriptor_path(domain, id);
            let descriptor: BackupDescriptor = match std::fs::read_to_string(&path)
                .map_err(EngineError::from)
                .and_then(|s| serde_json::from_str(&s).map_err(EngineError::from))
            {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(id, domain, error = %e, "unreadable descriptor");
                    report.orphan_descriptors.push(id.clone());
                    continue;
                }
            };

            // Stat the archive directly rather than trusting the directory
            // scan: the archive can vanish between the scan and this point
            // (a concurrent delete), and a read must not fail for it.
            let on_disk = match std::fs::metadata(self.archive_path(domain, id)) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.orphan_descriptors.push(id.clone());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if on_disk != descriptor.size_bytes {
                report.size_mismatches.push(id.clone());
                continue;
            }

            descriptors.push(descriptor);
        }

        for id in &archive_ids {
            if !descriptor_ids.contains(id) {
                report
                    .untracked_archives
                    .push(format!("{domain}/{id}{ARCHIVE_SUFFIX}"));
            }
        }

        Ok(())
    }
}

/// Remove staging and trash directories directly under `dir`. Missing `dir`
/// is fine. Used for backup-root domain directories and for the application
/// directories restore stages into.
pub fn sweep_prefixed_dirs(dir: &Path) -> crate::Result<()> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in read_dir {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir()
            && (name.starts_with(TRASH_PREFIX) || name.starts_with(STAGING_PREFIX))
        {
            tracing::info!(parent = %dir.display(), dir = %name, "removing stale staging directory");
            std::fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentSelection;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn descriptor(id: &str, domain: &str, minutes_ago: i64) -> BackupDescriptor {
        BackupDescriptor {
            id: id.into(),
            domain: domain.into(),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            size_bytes: 4,
            checksum: None,
            description: String::new(),
            tags: Vec::new(),
            app_type: None,
            includes: ContentSelection::none(),
            database_backups: Vec::new(),
            git_commit: None,
            git_branch: None,
            entry_count: 1,
        }
    }

    /// Writes a matching 4-byte archive beside the descriptor.
    fn save_pair(store: &MetadataStore, d: &BackupDescriptor) {
        store.save(d).unwrap();
        std::fs::write(store.archive_path(&d.domain, &d.id), b"gzab").unwrap();
    }

    #[test]
    fn test_save_load_round_trip() {
        let root = TempDir::new().unwrap();
        let store = MetadataStore::new(root.path());

        let d = descriptor("one", "a.example.com", 0);
        save_pair(&store, &d);

        let loaded = store.load("one").unwrap().unwrap();
        assert_eq!(loaded.domain, "a.example.com");
        assert!(store.load("unknown").unwrap().is_none());
    }

    #[test]
    fn test_orphan_descriptor_is_not_found() {
        let root = TempDir::new().unwrap();
        let store = MetadataStore::new(root.path());

        store.save(&descriptor("lonely", "a.example.com", 0)).unwrap();
        assert!(store.load("lonely").unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first_with_limit_after_filter() {
        let root = TempDir::new().unwrap();
        let store = MetadataStore::new(root.path());

        save_pair(&store, &descriptor("old", "a.example.com", 30));
        save_pair(&store, &descriptor("new", "a.example.com", 1));
        save_pair(&store, &descriptor("other", "b.example.com", 0));

        let listing = store.list(Some("a.example.com"), 1).unwrap();
        assert_eq!(listing.descriptors.len(), 1);
        // The limit cuts within the filtered domain, not across all domains.
        assert_eq!(listing.descriptors[0].id, "new");

        let all = store.list(None, 100).unwrap();
        assert_eq!(all.descriptors.len(), 3);
        assert!(all.reconciliation.is_clean());
    }

    #[test]
    fn test_list_is_idempotent() {
        let root = TempDir::new().unwrap();
        let store = MetadataStore::new(root.path());
        save_pair(&store, &descriptor("one", "a.example.com", 5));
        save_pair(&store, &descriptor("two", "a.example.com", 2));

        let first: Vec<String> = store
            .list(None, 100)
            .unwrap()
            .descriptors
            .into_iter()
            .map(|d| d.id)
            .collect();
        let second: Vec<String> = store
            .list(None, 100)
            .unwrap()
            .descriptors
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reconciliation_reports_mismatches() {
        let root = TempDir::new().unwrap();
        let store = MetadataStore::new(root.path());

        // Orphan: descriptor without archive.
        store.save(&descriptor("orphan", "a.example.com", 0)).unwrap();
        // Untracked: archive without descriptor.
        std::fs::write(store.archive_path("a.example.com", "stray"), b"gz").unwrap();
        // Size mismatch: recorded 4 bytes, actual 2.
        store.save(&descriptor("short", "a.example.com", 0)).unwrap();
        std::fs::write(store.archive_path("a.example.com", "short"), b"gz").unwrap();

        let listing = store.list(None, 100).unwrap();
        assert!(listing.descriptors.is_empty());
        assert_eq!(listing.reconciliation.orphan_descriptors, vec!["orphan"]);
        assert_eq!(
            listing.reconciliation.untracked_archives,
            vec!["a.example.com/stray.tar.gz"]
        );
        assert_eq!(listing.reconciliation.size_mismatches, vec!["short"]);
    }

    #[test]
    fn test_delete_removes_pair() {
        let root = TempDir::new().unwrap();
        let store = MetadataStore::new(root.path());
        let d = descriptor("gone", "a.example.com", 0);
        save_pair(&store, &d);

        store.delete(&d).unwrap();

        assert!(!store.archive_path("a.example.com", "gone").exists());
        assert!(!store.descriptor_path("a.example.com", "gone").exists());
        assert!(store.load("gone").unwrap().is_none());
    }

    #[test]
    fn test_usage_sums_archives() {
        let root = TempDir::new().unwrap();
        let store = MetadataStore::new(root.path());
        save_pair(&store, &descriptor("one", "a.example.com", 0));
        save_pair(&store, &descriptor("two", "b.example.com", 0));

        let usage = store.usage().unwrap();
        assert_eq!(usage.backup_count, 2);
        assert_eq!(usage.total_size_bytes, 8);
        assert_eq!(usage.domains, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn test_sweep_removes_stale_staging() {
        let root = TempDir::new().unwrap();
        let store = MetadataStore::new(root.path());
        save_pair(&store, &descriptor("live", "a.example.com", 0));

        let stale = store.domain_dir("a.example.com").join(".trash-crashed");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("leftover.tar.gz"), b"x").unwrap();

        store.sweep_stale_staging().unwrap();

        assert!(!stale.exists());
        assert!(store.load("live").unwrap().is_some());
    }
}
