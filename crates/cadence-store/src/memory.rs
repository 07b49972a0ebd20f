use std::sync::Arc;
use std::time::Duration;

use cadence_models::AgentSummary;
use moka::future::Cache;

/// Hot cache for per-agent summary context.
///
/// Every GATHER reads the most recent summaries for its agent, so those
/// reads are served from memory when possible. Entries are invalidated
/// when the summarizer writes, and expire on TTL as a backstop.
pub struct SummaryCache {
    inner: Cache<String, Arc<Vec<AgentSummary>>>,
}

impl SummaryCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, config_id: &str) -> Option<Arc<Vec<AgentSummary>>> {
        self.inner.get(config_id).await
    }

    pub async fn insert(&self, config_id: String, summaries: Vec<AgentSummary>) {
        self.inner.insert(config_id, Arc::new(summaries)).await;
    }

    pub async fn invalidate(&self, config_id: &str) {
        self.inner.invalidate(config_id).await;
    }

    pub async fn entry_count(&self) -> u64 {
        // moka's entry_count is eventually consistent; drain queued
        // maintenance so the reported count reflects prior writes.
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn summary(content: &str) -> AgentSummary {
        AgentSummary {
            cycle_id: Uuid::new_v4(),
            config_id: "a1".to_string(),
            symbol: "BTC/USDT".to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = SummaryCache::new(16, Duration::from_secs(60));
        cache.insert("a1".to_string(), vec![summary("one")]).await;

        let cached = cache.get("a1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].content, "one");
        assert!(cache.get("a2").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_entry() {
        let cache = SummaryCache::new(16, Duration::from_secs(60));
        cache.insert("a1".to_string(), vec![summary("one")]).await;
        cache.invalidate("a1").await;
        assert!(cache.get("a1").await.is_none());
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache = SummaryCache::new(16, Duration::from_millis(50));
        cache.insert("a1".to_string(), vec![summary("one")]).await;
        assert!(cache.get("a1").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get("a1").await.is_none());
    }
}
