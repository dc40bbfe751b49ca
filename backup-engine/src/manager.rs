//! Backup Manager: orchestrates the codec, store, and verifier into the
//! create / list / get / verify / restore / delete operations, and owns the
//! on-disk layout invariants.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::archive::{self, APP_PREFIX, DB_PREFIX};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fs::checksum::file_sha256;
use crate::fs::copy_tree;
use crate::fs::walker::walk_source_tree;
use crate::hooks::{AppResolver, DatabaseHooks};
use crate::locks::LockRegistry;
use crate::models::BackupDescriptor;
use crate::models::ContentSelection;
use crate::provenance;
use crate::store::{
    sweep_prefixed_dirs, Listing, MetadataStore, StorageUsage, STAGING_PREFIX, TRASH_PREFIX,
};
use crate::verify::{verify_archive, ChecksumStatus, VerifyReport};

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub domain: String,
    pub description: String,
    pub selection: ContentSelection,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Completed,
    /// The filesystem restore succeeded but a later step failed. Never
    /// relabeled as full success or full failure.
    Partial { failed_step: String, detail: String },
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub backup_id: String,
    pub target_domain: String,
    pub outcome: RestoreOutcome,
    pub files_restored: u64,
}

pub struct BackupManager {
    config: EngineConfig,
    store: MetadataStore,
    locks: LockRegistry,
    resolver: Arc<dyn AppResolver>,
    database_hooks: Option<Arc<dyn DatabaseHooks>>,
}

impl BackupManager {
    /// Open (creating if needed) the backup root and sweep staging
    /// directories left behind by a crashed prior process.
    pub fn new(config: EngineConfig, resolver: Arc<dyn AppResolver>) -> crate::Result<Self> {
        std::fs::create_dir_all(&config.backup_root)?;
        let store = MetadataStore::new(&config.backup_root);
        store.sweep_stale_staging()?;
        // Restore stages beside its target, outside the backup root; those
        // leftovers are only reachable through the resolver.
        for dir in resolver.staging_parents() {
            sweep_prefixed_dirs(&dir)?;
        }

        Ok(Self {
            config,
            store,
            locks: LockRegistry::new(),
            resolver,
            database_hooks: None,
        })
    }

    pub fn with_database_hooks(mut self, hooks: Arc<dyn DatabaseHooks>) -> Self {
        self.database_hooks = Some(hooks);
        self
    }

    /// Create a backup of `domain`'s application tree.
    ///
    /// On any failure or cancellation, no descriptor is persisted and no
    /// partial archive remains.
    pub async fn create(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> crate::Result<BackupDescriptor> {
        validate_domain(&request.domain)?;
        let source = self.resolver.resolve(&request.domain).ok_or_else(|| {
            EngineError::NotFound(format!("application not found: {}", request.domain))
        })?;

        let _domain_guard = self.locks.try_acquire_domain(&request.domain)?;
        let id = Uuid::new_v4().to_string();
        let _id_guard = self.locks.try_acquire_backup(&id)?;

        if request.selection.includes_databases() && self.database_hooks.is_none() {
            // Recording the category without being able to honor it would
            // leave a backup that lies about what it can reproduce.
            return Err(EngineError::archive(
                "database dump",
                anyhow::anyhow!("database dumps requested but no database hooks are configured"),
            ));
        }

        tracing::info!(domain = %request.domain, id = %id, "creating backup");

        let domain_dir = self.store.domain_dir(&request.domain);
        tokio::fs::create_dir_all(&domain_dir).await?;

        // Database dumps land in a scratch directory that cleans itself up
        // on every exit path, cancellation included.
        let (dump_scratch, dumps) = if request.selection.includes_databases() {
            let hooks = self.database_hooks.clone().unwrap();
            let domain = request.domain.clone();
            let (scratch, dumps) = run_blocking("database dump", move || {
                let scratch = tempfile::Builder::new()
                    .prefix(STAGING_PREFIX)
                    .tempdir_in(&domain_dir)?;
                let dumps = hooks
                    .dump(&domain, scratch.path())
                    .map_err(|e| EngineError::archive("database dump", e))?;
                Ok((scratch, dumps))
            })
            .await?;
            (Some(scratch), dumps)
        } else {
            (None, Vec::new())
        };

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled("create"));
        }

        let archive_path = self.store.archive_path(&request.domain, &id);
        let packed = {
            let source = source.clone();
            let selection = request.selection.clone();
            let archive_path = archive_path.clone();
            let dump_dir = dump_scratch.as_ref().map(|s| s.path().to_path_buf());
            run_blocking("pack", move || {
                let app_type = provenance::detect_app_type(&source);
                let git = provenance::capture_git(&source);
                let summary =
                    archive::pack(&source, &selection, dump_dir.as_deref(), &archive_path)?;
                let checksum = file_sha256(&archive_path)?;
                Ok((summary, checksum, app_type, git))
            })
            .await
        };
        drop(dump_scratch);

        let (summary, checksum, app_type, git) = match packed {
            Ok(v) => v,
            Err(e) => {
                let _ = tokio::fs::remove_file(&archive_path).await;
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(EngineError::Cancelled("create"));
        }

        let descriptor = BackupDescriptor {
            id: id.clone(),
            domain: request.domain.clone(),
            created_at: Utc::now(),
            size_bytes: summary.archive_size,
            checksum: Some(checksum),
            description: request.description,
            tags: request.tags,
            app_type,
            includes: request.selection,
            database_backups: dumps,
            git_commit: git.commit,
            git_branch: git.branch,
            entry_count: summary.entry_count,
        };

        let saved = {
            let store = self.store.clone();
            let descriptor = descriptor.clone();
            run_blocking("save descriptor", move || store.save(&descriptor)).await
        };
        if let Err(e) = saved {
            let _ = tokio::fs::remove_file(&archive_path).await;
            return Err(e);
        }

        tracing::info!(
            id = %descriptor.id,
            domain = %descriptor.domain,
            size_bytes = descriptor.size_bytes,
            entries = descriptor.entry_count,
            "backup created"
        );
        Ok(descriptor)
    }

    /// List backups newest-first with a reconciliation report. Lock-free.
    pub async fn list(
        &self,
        domain_filter: Option<&str>,
        limit: Option<usize>,
    ) -> crate::Result<Listing> {
        let store = self.store.clone();
        let limit = self.config.clamp_limit(limit);
        let domain = domain_filter.map(str::to_string);
        run_blocking("list", move || store.list(domain.as_deref(), limit)).await
    }

    /// Look up one descriptor by id. Lock-free.
    pub async fn get(&self, id: &str) -> crate::Result<Option<BackupDescriptor>> {
        let store = self.store.clone();
        let id = id.to_string();
        run_blocking("get", move || store.load(&id)).await
    }

    /// Verify a backup's checksum and archive structure. Lock-free; an
    /// invalid backup is reported in the result, not as an error.
    pub async fn verify(&self, id: &str) -> crate::Result<VerifyReport> {
        let descriptor = self.load_descriptor(id).await?;
        let archive_path = self.store.archive_path(&descriptor.domain, &descriptor.id);
        run_blocking("verify", move || verify_archive(&archive_path, &descriptor)).await
    }

    /// Restore a backup into `target_domain` (defaulting to the backup's own
    /// domain). The target directory may be absent; restore creates it.
    ///
    /// Extraction lands in a staging directory and is swapped into place only
    /// after it fully succeeds; a failed restore leaves the pre-restore state
    /// of the target untouched. Database content is restored strictly after
    /// the swap, and a failure there yields an explicit partial success.
    pub async fn restore(
        &self,
        id: &str,
        target_domain: Option<&str>,
        cancel: CancellationToken,
    ) -> crate::Result<RestoreReport> {
        let descriptor = self.load_descriptor(id).await?;
        let target = target_domain.unwrap_or(&descriptor.domain).to_string();
        validate_domain(&target)?;

        let _id_guard = self.locks.try_acquire_backup(id)?;
        let _domain_guard = self.locks.try_acquire_domain(&target)?;

        tracing::info!(id, target = %target, "restoring backup");

        let archive_path = self.store.archive_path(&descriptor.domain, &descriptor.id);
        let target_dir = self.resolver.target_path(&target);

        let files_restored = {
            let descriptor = descriptor.clone();
            let archive_path = archive_path.clone();
            let target_dir = target_dir.clone();
            let cancel = cancel.clone();
            run_blocking("restore", move || {
                restore_filesystem(&descriptor, &archive_path, &target_dir, &cancel)
            })
            .await?
        };

        if descriptor.includes.includes_databases() && !descriptor.database_backups.is_empty() {
            if let Err(detail) = self
                .restore_databases(&descriptor, &archive_path, &target)
                .await
            {
                tracing::warn!(
                    id,
                    target = %target,
                    detail = %detail,
                    "database restore failed after successful filesystem restore"
                );
                return Ok(RestoreReport {
                    backup_id: id.to_string(),
                    target_domain: target,
                    outcome: RestoreOutcome::Partial {
                        failed_step: "database restore".into(),
                        detail,
                    },
                    files_restored,
                });
            }
        }

        tracing::info!(id, target = %target, files_restored, "backup restored");
        Ok(RestoreReport {
            backup_id: id.to_string(),
            target_domain: target,
            outcome: RestoreOutcome::Completed,
            files_restored,
        })
    }

    /// Delete a backup's archive and descriptor atomically.
    pub async fn delete(&self, id: &str) -> crate::Result<()> {
        let descriptor = self.load_descriptor(id).await?;
        let _domain_guard = self.locks.try_acquire_domain(&descriptor.domain)?;
        let _id_guard = self.locks.try_acquire_backup(id)?;

        tracing::info!(id, domain = %descriptor.domain, "deleting backup");
        let store = self.store.clone();
        run_blocking("delete", move || store.delete(&descriptor)).await
    }

    /// Total archive bytes, backup count, and domain names under the root.
    pub async fn storage_usage(&self) -> crate::Result<StorageUsage> {
        let store = self.store.clone();
        run_blocking("storage usage", move || store.usage()).await
    }

    async fn load_descriptor(&self, id: &str) -> crate::Result<BackupDescriptor> {
        self.get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("backup not found: {id}")))
    }

    async fn restore_databases(
        &self,
        descriptor: &BackupDescriptor,
        archive_path: &Path,
        target: &str,
    ) -> Result<(), String> {
        let Some(hooks) = self.database_hooks.clone() else {
            return Err("no database hooks configured".into());
        };

        let descriptor = descriptor.clone();
        let archive_path = archive_path.to_path_buf();
        let target = target.to_string();
        let result = tokio::task::spawn_blocking(move || -> crate::Result<()> {
            let scratch = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir()?;
            archive::unpack(&archive_path, DB_PREFIX, scratch.path(), true)?;
            hooks
                .restore(&target, scratch.path(), &descriptor.database_backups)
                .map_err(|e| EngineError::archive("database restore", e))
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Filesystem half of a restore: integrity pre-check, staged extraction,
/// carry-over of excluded categories, atomic swap.
fn restore_filesystem(
    descriptor: &BackupDescriptor,
    archive_path: &Path,
    target_dir: &Path,
    cancel: &CancellationToken,
) -> crate::Result<u64> {
    // Pre-check: a mismatch or structural failure aborts before anything is
    // touched. An unrecorded checksum cannot be checked and passes through.
    let report = verify_archive(archive_path, descriptor)?;
    if report.checksum == ChecksumStatus::Mismatch || !report.files_ok {
        return Err(EngineError::Integrity {
            id: descriptor.id.clone(),
            reason: report.message,
        });
    }

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled("restore"));
    }

    let parent = target_dir.parent().ok_or_else(|| {
        EngineError::archive("restore", anyhow::anyhow!("target directory has no parent"))
    })?;
    std::fs::create_dir_all(parent)?;

    let staging = parent.join(format!("{STAGING_PREFIX}{}", descriptor.id));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;
    let mut staging_guard = CleanupGuard::new(staging.clone());

    let summary = archive::unpack(archive_path, APP_PREFIX, &staging, true)?;

    // Excluded categories were never packed; whatever the target already has
    // for them is carried into the new tree untouched.
    if target_dir.exists() {
        for entry in walk_source_tree(target_dir)? {
            let Some(category) = entry.category else { continue };
            if descriptor.includes.contains(category) || entry.is_dir {
                continue;
            }
            let dest = staging.join(&entry.relative_path);
            if !dest.exists() {
                copy_tree(&entry.path, &dest)?;
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled("restore"));
    }

    // Swap: target aside, staging in. If the second rename fails the first
    // is rolled back, so the target is never left missing.
    let displaced = parent.join(format!("{TRASH_PREFIX}{}-old", descriptor.id));
    if displaced.exists() {
        std::fs::remove_dir_all(&displaced)?;
    }

    if target_dir.exists() {
        std::fs::rename(target_dir, &displaced)?;
        if let Err(e) = std::fs::rename(&staging, target_dir) {
            let _ = std::fs::rename(&displaced, target_dir);
            return Err(EngineError::archive("restore swap", e));
        }
        if let Err(e) = std::fs::remove_dir_all(&displaced) {
            tracing::warn!(error = %e, "failed to remove displaced pre-restore tree");
        }
    } else {
        std::fs::rename(&staging, target_dir)
            .map_err(|e| EngineError::archive("restore swap", e))?;
    }
    staging_guard.disarm();

    Ok(summary.entries_extracted)
}

/// Mutating operations only accept names that can correspond to a real
/// application directory; anything else cannot exist, so it is not found.
fn validate_domain(domain: &str) -> crate::Result<()> {
    let invalid = domain.is_empty()
        || domain.starts_with('.')
        || domain.contains('/')
        || domain.contains('\\')
        || domain.contains("..");
    if invalid {
        return Err(EngineError::NotFound(format!(
            "application not found: invalid domain name {domain:?}"
        )));
    }
    Ok(())
}

async fn run_blocking<T, F>(step: &'static str, task: F) -> crate::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| EngineError::archive(step, anyhow::anyhow!(e)))?
}

/// Removes its directory on drop unless disarmed, so an abandoned staging
/// tree never outlives the operation that created it.
struct CleanupGuard {
    path: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
