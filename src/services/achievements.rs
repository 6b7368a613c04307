//! Achievement Catalog
//!
//! Read-only milestone catalog keyed by account. A milestone counts as
//! reached once the account's best recorded score meets its threshold.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::services::records::{MatchRecordStore, RecordError};

/// A hit-count milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Achievement {
    /// Display name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
    /// Hits needed in a single match.
    pub threshold: u32,
}

/// The static milestone list, lowest threshold first.
pub const MILESTONES: [Achievement; 5] = [
    Achievement { name: "First Hit", description: "Land your first hit", threshold: 1 },
    Achievement { name: "10 Hits", description: "Reach 10 hits", threshold: 10 },
    Achievement { name: "50 Hits", description: "Reach 50 hits", threshold: 50 },
    Achievement { name: "100 Hits", description: "Reach 100 hits", threshold: 100 },
    Achievement { name: "Combo Master", description: "Reach 200 hits", threshold: 200 },
];

/// Milestones reached by a single-match score.
pub fn milestones_for(score: u32) -> Vec<Achievement> {
    MILESTONES.iter().copied().filter(|a| score >= a.threshold).collect()
}

/// Read-only achievement lookup collaborator.
#[async_trait]
pub trait AchievementCatalog: Send + Sync {
    /// Achievements reached by an account.
    async fn lookup(&self, account: &str) -> Result<Vec<Achievement>, RecordError>;
}

/// Catalog backed by [`MILESTONES`] and the record store's best scores.
pub struct StaticAchievementCatalog {
    records: Arc<dyn MatchRecordStore>,
}

impl StaticAchievementCatalog {
    /// Create a catalog reading best scores from `records`.
    pub fn new(records: Arc<dyn MatchRecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl AchievementCatalog for StaticAchievementCatalog {
    async fn lookup(&self, account: &str) -> Result<Vec<Achievement>, RecordError> {
        let best = self.records.best_score(account).await?;
        Ok(best.map(milestones_for).unwrap_or_default())
    }
}
