//! Backup & Restore Engine
//!
//! Lifecycle backups for deployed web applications: point-in-time archives
//! with selective content inclusion, sidecar metadata, integrity
//! verification, and staged atomic restores. Transport-agnostic; CLI or API
//! front ends drive it through [`BackupManager`].

pub mod archive;
pub mod config;
pub mod error;
pub mod fs;
pub mod hooks;
pub mod locks;
pub mod manager;
pub mod models;
pub mod provenance;
pub mod store;
pub mod verify;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use hooks::{AppResolver, DatabaseHooks, DirectoryResolver};
pub use manager::{BackupManager, CreateRequest, RestoreOutcome, RestoreReport};
pub use models::{BackupDescriptor, ContentCategory, ContentSelection, DatabaseDump};
pub use store::{Listing, ReconciliationReport, StorageUsage};
pub use verify::{ChecksumStatus, VerifyReport};
