use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::approval::carryover::CarryoverPolicy;
use crate::approval::engine::DEFAULT_BATCH_CONCURRENCY;
use crate::approval::rules::{CriticalChapters, DEFAULT_THRESHOLD};
use crate::approval::{EngineConfig, MetricsMode};
use crate::cache::keys::{CHAPTER_STATS_TTL, RULE_LIST_TTL};
use crate::db::default_db_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl StoreBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(StoreBackend::Sqlite),
            "memory" | "in-memory" => Some(StoreBackend::Memory),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub critical_chapters: CriticalChapters,
    pub default_threshold: f64,
    pub batch_concurrency: usize,
    pub metrics_mode: MetricsMode,
    pub rule_cache_ttl: Duration,
    pub stats_cache_ttl: Duration,
    pub seed_user_ids: Vec<String>,
    pub seed_default_rule: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env_parse("PORT").unwrap_or(3000);

        let host = env_parse::<IpAddr>("HOST").unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let store_backend = env_string("STORE_BACKEND")
            .and_then(|v| StoreBackend::parse(&v))
            .unwrap_or(StoreBackend::Sqlite);

        let database_url = env_string("DATABASE_URL")
            .unwrap_or_else(|| default_db_path().display().to_string());

        let critical_chapters = env_string("CRITICAL_CHAPTERS")
            .map(|v| CriticalChapters::parse(&v))
            .unwrap_or_default();

        let metrics_mode = env_string("METRICS_MODE")
            .and_then(|v| MetricsMode::parse(&v))
            .unwrap_or_default();

        let seed_user_ids = env_string("SEED_USER_IDS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            host,
            port,
            log_level,
            store_backend,
            database_url,
            redis_url: env_string("REDIS_URL"),
            critical_chapters,
            default_threshold: env_parse("DEFAULT_THRESHOLD").unwrap_or(DEFAULT_THRESHOLD),
            batch_concurrency: env_parse::<usize>("BATCH_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_BATCH_CONCURRENCY),
            metrics_mode,
            rule_cache_ttl: env_parse("RULE_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(RULE_LIST_TTL),
            stats_cache_ttl: env_parse("STATS_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(CHAPTER_STATS_TTL),
            seed_user_ids,
            seed_default_rule: env_bool("SEED_DEFAULT_RULE").unwrap_or(true),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            critical_chapters: self.critical_chapters.clone(),
            default_threshold: self.default_threshold,
            carryover: CarryoverPolicy::default(),
            batch_concurrency: self.batch_concurrency,
            metrics_mode: self.metrics_mode,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse::<T>().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    let normalized = env_string(key)?.to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
