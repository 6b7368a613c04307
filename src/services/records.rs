//! Match Record Store
//!
//! Append-only store of completed matches plus the ranked aggregate view
//! (total score, best score, games played) served as the leaderboard.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Default leaderboard length.
pub const DEFAULT_RANKED_LIMIT: usize = 10;

/// One completed match for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Opaque account id.
    pub account: String,
    /// Display name used in the match.
    pub display_name: String,
    /// Game mode label (`"online"` for duels).
    pub mode: String,
    /// Final hit count.
    pub score: u32,
    /// Configured match length in seconds.
    pub duration_secs: u64,
    /// When the match ended.
    pub played_at: DateTime<Utc>,
}

/// Aggregated leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// Opaque account id.
    pub account: String,
    /// Most recent display name.
    pub display_name: String,
    /// Sum of all scores.
    pub total_score: u64,
    /// Highest single-match score.
    pub best_score: u32,
    /// Number of recorded matches.
    pub games_played: u32,
}

/// Record store errors.
#[derive(Debug, Clone, Error)]
pub enum RecordError {
    /// Record failed validation.
    #[error("invalid record: {0}")]
    Invalid(String),
}

/// Persisted match-record collaborator.
#[async_trait]
pub trait MatchRecordStore: Send + Sync {
    /// Append a completed match record.
    async fn append(&self, record: MatchRecord) -> Result<(), RecordError>;

    /// Ranked aggregates, highest total score first.
    async fn ranked(&self, limit: usize) -> Result<Vec<RankedEntry>, RecordError>;

    /// Best recorded score for an account.
    async fn best_score(&self, account: &str) -> Result<Option<u32>, RecordError>;
}

/// Process-local record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<MatchRecord>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All records for one account, newest last.
    pub async fn records_for(&self, account: &str) -> Vec<MatchRecord> {
        self.records.read().await
            .iter()
            .filter(|r| r.account == account)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MatchRecordStore for InMemoryRecordStore {
    async fn append(&self, record: MatchRecord) -> Result<(), RecordError> {
        if record.account.is_empty() {
            return Err(RecordError::Invalid("empty account".to_string()));
        }
        self.records.write().await.push(record);
        Ok(())
    }

    async fn ranked(&self, limit: usize) -> Result<Vec<RankedEntry>, RecordError> {
        let records = self.records.read().await;

        let mut by_account: BTreeMap<&str, RankedEntry> = BTreeMap::new();
        for record in records.iter() {
            let entry = by_account.entry(record.account.as_str()).or_insert_with(|| RankedEntry {
                account: record.account.clone(),
                display_name: record.display_name.clone(),
                total_score: 0,
                best_score: 0,
                games_played: 0,
            });
            entry.display_name = record.display_name.clone();
            entry.total_score += u64::from(record.score);
            entry.best_score = entry.best_score.max(record.score);
            entry.games_played += 1;
        }

        let mut ranked: Vec<RankedEntry> = by_account.into_values().collect();
        // Stable sort keeps account order for equal totals
        ranked.sort_by(|a, b| b.total_score.cmp(&a.total_score));
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn best_score(&self, account: &str) -> Result<Option<u32>, RecordError> {
        Ok(self.records.read().await
            .iter()
            .filter(|r| r.account == account)
            .map(|r| r.score)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(account: &str, name: &str, score: u32) -> MatchRecord {
        MatchRecord {
            account: account.to_string(),
            display_name: name.to_string(),
            mode: "online".to_string(),
            score,
            duration_secs: 10,
            played_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_best() {
        let store = InMemoryRecordStore::new();
        store.append(record("a", "Ada", 12)).await.unwrap();
        store.append(record("a", "Ada", 30)).await.unwrap();
        store.append(record("b", "Bo", 5)).await.unwrap();

        assert_eq!(store.len().await, 3);
        assert_eq!(store.best_score("a").await.unwrap(), Some(30));
        assert_eq!(store.best_score("zz").await.unwrap(), None);
        assert_eq!(store.records_for("b").await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_account_rejected() {
        let store = InMemoryRecordStore::new();
        assert!(store.append(record("", "Ada", 1)).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_ranked_aggregates() {
        let store = InMemoryRecordStore::new();
        store.append(record("a", "Ada", 10)).await.unwrap();
        store.append(record("b", "Bo", 25)).await.unwrap();
        store.append(record("a", "Ada L.", 20)).await.unwrap();
        store.append(record("c", "Cy", 1)).await.unwrap();

        let ranked = store.ranked(2).await.unwrap();
        assert_eq!(ranked.len(), 2);

        assert_eq!(ranked[0].account, "a");
        assert_eq!(ranked[0].display_name, "Ada L.");
        assert_eq!(ranked[0].total_score, 30);
        assert_eq!(ranked[0].best_score, 20);
        assert_eq!(ranked[0].games_played, 2);

        assert_eq!(ranked[1].account, "b");
        assert_eq!(ranked[1].total_score, 25);
    }
}
