//! Per-user usage statistics
//!
//! Recording is fire-and-forget: [`Statistics::record`] returns immediately
//! and a background task does the read-increment-write. Concurrent updates for
//! the same user are best-effort and may lose an increment.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Usage repository errors
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Usage counters for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub use_count: u64,
    /// RFC 3339, empty until first use
    pub last_used: String,
}

impl UsageRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            use_count: 0,
            last_used: String::new(),
        }
    }
}

/// Storage for usage records
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Current record for `user_id`; a zeroed record when none exists
    async fn get(&self, user_id: &str) -> Result<UsageRecord, UsageError>;

    async fn update(&self, record: UsageRecord) -> Result<(), UsageError>;
}

/// Process-local repository
#[derive(Debug, Default)]
pub struct InMemoryUsageRepository {
    records: DashMap<String, UsageRecord>,
}

impl InMemoryUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageRepository for InMemoryUsageRepository {
    async fn get(&self, user_id: &str) -> Result<UsageRecord, UsageError> {
        Ok(self
            .records
            .get(user_id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| UsageRecord::new(user_id)))
    }

    async fn update(&self, record: UsageRecord) -> Result<(), UsageError> {
        self.records.insert(record.user_id.clone(), record);
        Ok(())
    }
}

/// Destination for "this user started a turn" notifications
pub trait UsageSink: Send + Sync {
    /// Must not block the caller
    fn record(&self, user_id: &str);
}

/// Usage statistics backed by a [`UsageRepository`]
#[derive(Clone)]
pub struct Statistics {
    repository: Option<Arc<dyn UsageRepository>>,
}

impl Statistics {
    pub fn new(repository: Arc<dyn UsageRepository>) -> Self {
        Self {
            repository: Some(repository),
        }
    }

    /// Statistics that discard everything
    pub fn disabled() -> Self {
        Self { repository: None }
    }

    /// Increment the use count of `user_id` and stamp the current time
    pub async fn used_by(&self, user_id: &str) -> Result<Option<UsageRecord>, UsageError> {
        let Some(repository) = &self.repository else {
            return Ok(None);
        };

        let mut record = repository.get(user_id).await?;
        info!(
            user_id = %record.user_id,
            use_count = record.use_count,
            last_used = %record.last_used,
            "loaded usage statistics"
        );

        record.use_count += 1;
        record.last_used = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        repository.update(record.clone()).await?;

        info!(
            user_id = %record.user_id,
            use_count = record.use_count,
            last_used = %record.last_used,
            "updated usage statistics"
        );
        Ok(Some(record))
    }
}

impl UsageSink for Statistics {
    fn record(&self, user_id: &str) {
        if self.repository.is_none() || user_id.is_empty() {
            return;
        }

        let stats = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = stats.used_by(&user_id).await {
                error!(user_id = %user_id, error = %e, "failed to update usage statistics");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FailingRepository;

    #[async_trait]
    impl UsageRepository for FailingRepository {
        async fn get(&self, _user_id: &str) -> Result<UsageRecord, UsageError> {
            Err(UsageError::Storage("unavailable".into()))
        }

        async fn update(&self, _record: UsageRecord) -> Result<(), UsageError> {
            Err(UsageError::Storage("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_used_by_increments() {
        let repo = Arc::new(InMemoryUsageRepository::new());
        let stats = Statistics::new(repo.clone());

        stats.used_by("U1").await.unwrap();
        let record = stats.used_by("U1").await.unwrap().unwrap();

        assert_eq!(record.use_count, 2);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.last_used).is_ok());
        assert_eq!(repo.get("U1").await.unwrap().use_count, 2);
        assert_eq!(repo.get("U2").await.unwrap().use_count, 0);
    }

    #[tokio::test]
    async fn test_disabled_statistics_do_nothing() {
        let stats = Statistics::disabled();
        assert!(stats.used_by("U1").await.unwrap().is_none());
        stats.record("U1");
    }

    #[tokio::test]
    async fn test_record_runs_in_background() {
        let repo = Arc::new(InMemoryUsageRepository::new());
        let stats = Statistics::new(repo.clone());

        stats.record("U1");

        for _ in 0..50 {
            if repo.get("U1").await.unwrap().use_count == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("usage was not recorded");
    }

    #[tokio::test]
    async fn test_record_swallows_failures() {
        let stats = Statistics::new(Arc::new(FailingRepository));
        stats.record("U1");
        assert!(stats.used_by("U1").await.is_err());
    }
}
