pub mod redis_backend;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use tracing::{info, warn};

use redis_backend::RedisBackend;

const QUERY_COUNT_KEY: &str = "dns:query_count";
const HIT_COUNT_KEY: &str = "dns:hit_count";
const STARTUP_KEY: &str = "dns:startup";

/// Read-through facade over Redis. Every operation degrades to a silent
/// no-op/miss when the backend never came up or a call fails at runtime;
/// the resolver must keep working with `ready() == false`.
pub struct CacheClient {
    backend: Option<RedisBackend>,
    ready: AtomicBool,
    queries: AtomicU64,
    hits: AtomicU64,
}

impl CacheClient {
    /// Connects to Redis and probes it once with `PING`. A connection
    /// failure is logged once here and never retried; the client then
    /// behaves as permanently unready.
    pub async fn connect(redis_url: &str) -> Self {
        let backend = match RedisBackend::connect(redis_url).await {
            Ok(backend) => match backend.ping().await {
                Ok(()) => Some(backend),
                Err(e) => {
                    warn!("redis ping failed at startup, caching disabled: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("redis unavailable at startup, caching disabled: {}", e);
                None
            }
        };

        let client = Self {
            ready: AtomicBool::new(backend.is_some()),
            backend,
            queries: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        };

        if let Some(backend) = &client.backend {
            backend.set(STARTUP_KEY, &Utc::now().to_rfc3339()).await;
            info!("cache backend ready");
        }

        client
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Returns the cached reply bytes for `dns:<domain>`, or `None` on a
    /// miss, an expired/absent key, or an unavailable backend.
    pub async fn get(&self, domain: &str) -> Option<Vec<u8>> {
        let backend = self.backend.as_ref()?;
        let encoded = backend.get(&cache_key(domain)).await?;
        match BASE64.decode(encoded) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("cache value for {} was not valid base64: {}", domain, e);
                None
            }
        }
    }

    /// Best-effort write; failures are logged by the backend and otherwise
    /// swallowed here.
    pub async fn put(&self, domain: &str, bytes: &[u8], ttl_secs: u64) {
        let Some(backend) = &self.backend else {
            return;
        };
        let encoded = BASE64.encode(bytes);
        backend.set_with_ttl(&cache_key(domain), &encoded, ttl_secs).await;
    }

    pub async fn incr_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if let Some(backend) = &self.backend {
            backend.incr(QUERY_COUNT_KEY).await;
        }
    }

    pub async fn incr_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(backend) = &self.backend {
            backend.incr(HIT_COUNT_KEY).await;
        }
    }

    /// In-process `(queries, hits)` counters for the periodic stats log.
    /// Kept locally rather than read back from Redis so the stats tick never
    /// blocks the accept loop on a network round trip.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.queries.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
        )
    }
}

fn cache_key(domain: &str) -> String {
    format!("dns:{}", domain.to_ascii_lowercase())
}
