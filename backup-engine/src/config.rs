use std::path::PathBuf;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory holding one subdirectory per domain.
    pub backup_root: PathBuf,
    /// Result count for `list` when the caller passes no limit.
    pub default_list_limit: usize,
    /// Hard cap on `list` result counts.
    pub max_list_limit: usize,
}

impl EngineConfig {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
            default_list_limit: DEFAULT_LIST_LIMIT,
            max_list_limit: MAX_LIST_LIMIT,
        }
    }

    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            backup_root: PathBuf::from(
                std::env::var("BACKUP_ROOT").unwrap_or_else(|_| "/var/backups/apps".into()),
            ),
            default_list_limit: std::env::var("BACKUP_LIST_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .min(MAX_LIST_LIMIT),
            max_list_limit: MAX_LIST_LIMIT,
        }
    }

    /// Resolve a caller-supplied limit against the configured bounds.
    pub fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.default_list_limit)
            .clamp(1, self.max_list_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit_defaults() {
        let config = EngineConfig::new("/tmp/backups");
        assert_eq!(config.clamp_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(config.clamp_limit(Some(50)), 50);
    }

    #[test]
    fn test_clamp_limit_bounds() {
        let config = EngineConfig::new("/tmp/backups");
        assert_eq!(config.clamp_limit(Some(0)), 1);
        assert_eq!(config.clamp_limit(Some(5000)), MAX_LIST_LIMIT);
    }
}
