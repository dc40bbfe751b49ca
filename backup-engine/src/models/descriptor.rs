//! The per-backup metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ContentSelection;

/// One database dump artifact packed into a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDump {
    /// File name of the dump inside the archive's `databases/` prefix.
    pub name: String,
    pub size_bytes: u64,
    /// Dump format as reported by the database hook ("sql", "dump", ...).
    pub format: String,
}

/// Descriptor for a single immutable backup archive.
///
/// Created exactly once, read many times, destroyed exactly once. There is
/// no update path: a backup's payload is never rewritten in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDescriptor {
    /// Sole external handle, globally unique across all domains.
    pub id: String,
    /// Logical name of the application the backup was taken from.
    pub domain: String,
    pub created_at: DateTime<Utc>,
    /// Always equals the archive file's actual size on disk.
    pub size_bytes: u64,
    /// SHA-256 hex digest of the archive, recorded at creation. Absent on
    /// descriptors written by tooling that predates checksum recording.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Detected framework/runtime of the source application. Informational.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_type: Option<String>,
    /// Content categories packed at creation time. Authoritative for what a
    /// restore can reproduce.
    #[serde(default)]
    pub includes: ContentSelection,
    #[serde(default)]
    pub database_backups: Vec<DatabaseDump>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    /// Number of entries written into the archive; checked by structural
    /// verification to detect truncation.
    pub entry_count: u64,
}

impl BackupDescriptor {
    pub fn archive_file_name(&self) -> String {
        format!("{}.tar.gz", self.id)
    }

    pub fn descriptor_file_name(&self) -> String {
        format!("{}.meta.json", self.id)
    }

    pub fn size_human(&self) -> String {
        bytes_to_human(self.size_bytes)
    }

    /// Humanized duration from `created_at` to now ("3 hours ago" style).
    pub fn age(&self) -> String {
        let elapsed = Utc::now().signed_duration_since(self.created_at);
        let secs = elapsed.num_seconds().max(0);

        if secs < 60 {
            "just now".to_string()
        } else if secs < 3600 {
            let n = secs / 60;
            format!("{} minute{} ago", n, if n == 1 { "" } else { "s" })
        } else if secs < 86400 {
            let n = secs / 3600;
            format!("{} hour{} ago", n, if n == 1 { "" } else { "s" })
        } else {
            let n = secs / 86400;
            format!("{} day{} ago", n, if n == 1 { "" } else { "s" })
        }
    }
}

pub fn bytes_to_human(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentCategory;

    fn sample() -> BackupDescriptor {
        BackupDescriptor {
            id: "b2a4".into(),
            domain: "shop.example.com".into(),
            created_at: Utc::now(),
            size_bytes: 2048,
            checksum: Some("ab".repeat(32)),
            description: "pre-deploy".into(),
            tags: vec!["nightly".into()],
            app_type: Some("nextjs".into()),
            includes: ContentSelection::none().with(ContentCategory::Environment),
            database_backups: Vec::new(),
            git_commit: None,
            git_branch: None,
            entry_count: 7,
        }
    }

    #[test]
    fn test_bytes_to_human() {
        assert_eq!(bytes_to_human(512), "512 B");
        assert_eq!(bytes_to_human(2048), "2.0 KB");
        assert_eq!(bytes_to_human(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(bytes_to_human(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_age_fresh_descriptor() {
        assert_eq!(sample().age(), "just now");
    }

    #[test]
    fn test_age_hours() {
        let mut descriptor = sample();
        descriptor.created_at = Utc::now() - chrono::Duration::hours(3);
        assert_eq!(descriptor.age(), "3 hours ago");
    }

    #[test]
    fn test_serde_round_trip() {
        let descriptor = sample();
        let json = serde_json::to_string_pretty(&descriptor).unwrap();
        let back: BackupDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, descriptor.id);
        assert_eq!(back.includes, descriptor.includes);
        assert_eq!(back.entry_count, 7);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{
            "id": "x1",
            "domain": "a.example.com",
            "created_at": "2026-01-01T00:00:00Z",
            "size_bytes": 10,
            "entry_count": 1
        }"#;
        let descriptor: BackupDescriptor = serde_json::from_str(json).unwrap();
        assert!(descriptor.checksum.is_none());
        assert!(descriptor.tags.is_empty());
        assert!(descriptor.includes.is_empty());
        assert!(descriptor.database_backups.is_empty());
    }
}
