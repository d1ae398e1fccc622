use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::approval::{ApprovalEngine, EngineConfig};
use crate::cache::{ApprovalCache, LookasideCache, RedisCache};
use crate::config::{Config, StoreBackend};
use crate::db::{self, SqliteInitError};
use crate::services::{RuleConfigService, StatisticsService};
use crate::store::Stores;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open sqlite store: {0}")]
    Sqlite(#[from] SqliteInitError),
}

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    store_backend: &'static str,
    stores: Stores,
    cache: Arc<ApprovalCache>,
    engine: Arc<ApprovalEngine>,
    rule_config: Arc<RuleConfigService>,
    statistics: Arc<StatisticsService>,
}

impl AppState {
    pub fn new(
        stores: Stores,
        engine_config: EngineConfig,
        cache: Arc<ApprovalCache>,
        store_backend: &'static str,
    ) -> Self {
        let rule_config = RuleConfigService::new(
            Arc::clone(&stores.rules),
            Arc::clone(&stores.evaluations),
            engine_config.critical_chapters.clone(),
        )
        .with_cache(Arc::clone(&cache));
        let statistics =
            StatisticsService::new(Arc::clone(&stores.evaluations)).with_cache(Arc::clone(&cache));
        let engine = ApprovalEngine::new(stores.clone(), engine_config).with_cache(Arc::clone(&cache));

        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            store_backend,
            stores,
            cache,
            engine: Arc::new(engine),
            rule_config: Arc::new(rule_config),
            statistics: Arc::new(statistics),
        }
    }

    /// Memory stores and an in-process cache.
    pub fn in_memory(stores: Stores, engine_config: EngineConfig) -> Self {
        Self::new(
            stores,
            engine_config,
            Arc::new(ApprovalCache::in_memory()),
            StoreBackend::Memory.as_str(),
        )
    }

    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let stores = match config.store_backend {
            StoreBackend::Sqlite => {
                let pool = db::connect(&config.database_url).await?;
                tracing::info!(database_url = %config.database_url, "sqlite store ready");
                db::sqlite_stores(pool)
            }
            StoreBackend::Memory => {
                tracing::warn!("using in-memory stores; data is lost on restart");
                Stores::in_memory()
            }
        };

        let backend = match config.redis_url {
            Some(ref url) => match RedisCache::connect(url).await {
                Ok(redis) => {
                    tracing::info!("redis cache connected");
                    LookasideCache::Redis(redis)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "redis unavailable, falling back to in-process cache");
                    LookasideCache::memory()
                }
            },
            None => LookasideCache::memory(),
        };
        let cache = ApprovalCache::new(backend).with_ttls(config.rule_cache_ttl, config.stats_cache_ttl);

        Ok(Self::new(
            stores,
            config.engine_config(),
            Arc::new(cache),
            config.store_backend.as_str(),
        ))
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn store_backend(&self) -> &'static str {
        self.store_backend
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn cache(&self) -> &ApprovalCache {
        &self.cache
    }

    pub fn engine(&self) -> &ApprovalEngine {
        &self.engine
    }

    pub fn rule_config(&self) -> &RuleConfigService {
        &self.rule_config
    }

    pub fn statistics(&self) -> &StatisticsService {
        &self.statistics
    }
}
