pub mod keys;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::approval::types::{ChapterStats, Rule, RuleFilter};
use keys::{
    chapter_stats_key, rule_list_key, CHAPTER_STATS_GROUP, CHAPTER_STATS_TTL, RULES_GROUP,
    RULE_LIST_TTL,
};

const TTL_JITTER_RATIO: f64 = 0.1;

#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl RedisCache {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self::new(connection))
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn.get(key).await.ok()?;
        payload.and_then(|p| serde_json::from_str(&p).ok())
    }

    /// Stores `value` and indexes `key` under `group` for bulk invalidation.
    pub async fn set_in_group<T>(&self, group: &str, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(_) => return,
        };
        let mut conn = self.connection.clone();

        if !ttl.is_zero() {
            let ttl_secs = apply_ttl_jitter(ttl).as_secs().max(1);
            let _: Result<(), _> = conn.set_ex(key, payload, ttl_secs).await;
        } else {
            let _: Result<(), _> = conn.set(key, payload).await;
        }
        let _: Result<i64, _> = conn.sadd(group, key).await;
    }

    pub async fn delete(&self, key: &str) {
        let mut conn = self.connection.clone();
        let _: Result<u64, _> = conn.del(key).await;
    }

    pub async fn invalidate_group(&self, group: &str) {
        let mut conn = self.connection.clone();
        let mut members: Vec<String> = conn.smembers(group).await.unwrap_or_default();
        members.push(group.to_string());
        let result: Result<u64, _> = conn.del(members).await;
        if let Err(err) = result {
            tracing::warn!(group, error = %err, "redis cache invalidation failed");
        }
    }

    pub async fn is_connected(&self) -> bool {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

struct MemoryEntry {
    payload: String,
    group: String,
    expires_at: Option<Instant>,
}

/// In-process TTL map with the same JSON payload contract as [`RedisCache`].
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|at| at <= Instant::now()),
            None => return None,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        entries
            .get(key)
            .and_then(|entry| serde_json::from_str(&entry.payload).ok())
    }

    pub fn set_in_group<T>(&self, group: &str, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        let Ok(payload) = serde_json::to_string(value) else {
            return;
        };
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + apply_ttl_jitter(ttl))
        };
        self.entries.lock().insert(
            key.to_string(),
            MemoryEntry {
                payload,
                group: group.to_string(),
                expires_at,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn invalidate_group(&self, group: &str) {
        self.entries.lock().retain(|_, entry| entry.group != group);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[derive(Clone)]
pub enum LookasideCache {
    Memory(Arc<MemoryCache>),
    Redis(RedisCache),
}

impl LookasideCache {
    pub fn memory() -> Self {
        LookasideCache::Memory(Arc::new(MemoryCache::new()))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            LookasideCache::Memory(_) => "memory",
            LookasideCache::Redis(_) => "redis",
        }
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        match self {
            LookasideCache::Memory(cache) => cache.get(key),
            LookasideCache::Redis(cache) => cache.get(key).await,
        }
    }

    pub async fn set_in_group<T>(&self, group: &str, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        match self {
            LookasideCache::Memory(cache) => cache.set_in_group(group, key, value, ttl),
            LookasideCache::Redis(cache) => cache.set_in_group(group, key, value, ttl).await,
        }
    }

    pub async fn delete(&self, key: &str) {
        match self {
            LookasideCache::Memory(cache) => cache.delete(key),
            LookasideCache::Redis(cache) => cache.delete(key).await,
        }
    }

    pub async fn invalidate_group(&self, group: &str) {
        match self {
            LookasideCache::Memory(cache) => cache.invalidate_group(group),
            LookasideCache::Redis(cache) => cache.invalidate_group(group).await,
        }
    }
}

/// Read-path cache for rule listings and chapter statistics.
///
/// Every rule mutation must call [`ApprovalCache::invalidate_rules`] before it
/// returns; the TTLs only bound staleness if a hook is missed.
pub struct ApprovalCache {
    backend: LookasideCache,
    rule_ttl: Duration,
    stats_ttl: Duration,
}

impl ApprovalCache {
    pub fn new(backend: LookasideCache) -> Self {
        Self {
            backend,
            rule_ttl: RULE_LIST_TTL,
            stats_ttl: CHAPTER_STATS_TTL,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(LookasideCache::memory())
    }

    pub fn with_ttls(mut self, rule_ttl: Duration, stats_ttl: Duration) -> Self {
        self.rule_ttl = rule_ttl;
        self.stats_ttl = stats_ttl;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub async fn rule_list(&self, filter: &RuleFilter) -> Option<Vec<Rule>> {
        self.backend.get(&rule_list_key(filter)).await
    }

    pub async fn put_rule_list(&self, filter: &RuleFilter, rules: &[Rule]) {
        self.backend
            .set_in_group(RULES_GROUP, &rule_list_key(filter), &rules, self.rule_ttl)
            .await;
    }

    pub async fn chapter_stats(&self, chapter_id: &str) -> Option<ChapterStats> {
        self.backend.get(&chapter_stats_key(chapter_id)).await
    }

    pub async fn put_chapter_stats(&self, stats: &ChapterStats) {
        self.backend
            .set_in_group(
                CHAPTER_STATS_GROUP,
                &chapter_stats_key(&stats.chapter_id),
                stats,
                self.stats_ttl,
            )
            .await;
    }

    pub async fn invalidate_chapter_stats(&self, chapter_id: &str) {
        self.backend.delete(&chapter_stats_key(chapter_id)).await;
    }

    /// Invalidation hook for rule create/update/delete.
    pub async fn invalidate_rules(&self) {
        self.backend.invalidate_group(RULES_GROUP).await;
        self.backend.invalidate_group(CHAPTER_STATS_GROUP).await;
        tracing::debug!(backend = self.backend_name(), "rule caches invalidated");
    }
}

fn apply_ttl_jitter(ttl: Duration) -> Duration {
    let base_ms = ttl.as_millis() as f64;
    let mut rng = rand::rng();
    let factor = rng.random_range(1.0 - TTL_JITTER_RATIO..=1.0 + TTL_JITTER_RATIO);
    let jittered_ms = (base_ms * factor).round().max(1.0);
    Duration::from_millis(jittered_ms as u64)
}
