//! Selective content inclusion.
//!
//! A backup packs the application tree plus an optional set of content
//! categories. The set recorded at creation time is authoritative for what
//! a restore can reproduce.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    /// Dotenv-style environment files (`.env`, `.env.production`, ...).
    Environment,
    /// Installed dependency trees (`node_modules`, `vendor`, `.venv`).
    Dependencies,
    /// Compiled or bundled artifacts (`dist`, `build`, `.next`, `.nuxt`).
    BuildOutput,
    /// Database dump artifacts.
    Databases,
}

/// The set of optional content categories selected for a backup.
///
/// Serializes as a JSON array of category names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentSelection(BTreeSet<ContentCategory>);

impl ContentSelection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self(BTreeSet::from([
            ContentCategory::Environment,
            ContentCategory::Dependencies,
            ContentCategory::BuildOutput,
            ContentCategory::Databases,
        ]))
    }

    pub fn with(mut self, category: ContentCategory) -> Self {
        self.0.insert(category);
        self
    }

    pub fn insert(&mut self, category: ContentCategory) {
        self.0.insert(category);
    }

    pub fn contains(&self, category: ContentCategory) -> bool {
        self.0.contains(&category)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // Boolean views matching the descriptor's original field names.

    pub fn includes_env(&self) -> bool {
        self.contains(ContentCategory::Environment)
    }

    pub fn includes_node_modules(&self) -> bool {
        self.contains(ContentCategory::Dependencies)
    }

    pub fn includes_build(&self) -> bool {
        self.contains(ContentCategory::BuildOutput)
    }

    pub fn includes_databases(&self) -> bool {
        self.contains(ContentCategory::Databases)
    }
}

impl FromIterator<ContentCategory> for ContentSelection {
    fn from_iter<I: IntoIterator<Item = ContentCategory>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
