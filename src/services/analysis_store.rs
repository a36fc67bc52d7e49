// Prior Analysis Store
//
// Exact-match reuse of previously generated SQL. Keys combine the schema
// fingerprint with the normalized question, so a schema change never serves
// stale SQL. The in-memory store uses LRU eviction with TTL; the SQLite
// store lives in `crate::storage`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Nl2SqlError, Result};
use crate::models::PriorAnalysis;

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<PriorAnalysis>>;

    async fn put(&self, key: &str, analysis: PriorAnalysis) -> Result<()>;

    /// Unexpired analyses recorded for a session, newest first
    async fn session_analyses(&self, session_id: &str) -> Result<Vec<PriorAnalysis>>;

    /// Hit/miss counters, for stores that keep them
    fn stats(&self) -> Option<CacheStats> {
        None
    }
}

/// Lookup key for a question against a given schema.
///
/// Whitespace runs collapse and case is folded, so trivially different
/// phrasings of the same question share a key. Keys are persisted, so the
/// digest must stay stable across builds.
pub fn generate_key(schema_fingerprint: &str, question: &str) -> String {
    let normalized = question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(schema_fingerprint.as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
struct CachedAnalysis {
    analysis: PriorAnalysis,
    cached_at: Instant,
    last_accessed: Instant,
    hit_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState {
    entries: HashMap<String, CachedAnalysis>,
    stats: CacheStats,
}

/// Prior analyses held in process memory with LRU eviction and TTL
pub struct InMemoryAnalysisStore {
    state: Mutex<CacheState>,
    max_entries: usize,
    ttl: Duration,
}

impl InMemoryAnalysisStore {
    pub fn new(max_entries: usize, ttl_secs: u64) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            max_entries: max_entries.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| Nl2SqlError::Storage("analysis cache lock poisoned".to_string()))
    }

    fn lookup(&self, key: &str, ttl: Duration) -> Result<Option<PriorAnalysis>> {
        let mut state = self.lock()?;

        let expired = match state.entries.get(key) {
            Some(cached) => cached.cached_at.elapsed() > ttl,
            None => {
                state.stats.misses += 1;
                tracing::debug!("Analysis cache miss for key: {}", key);
                return Ok(None);
            }
        };

        if expired {
            state.entries.remove(key);
            state.stats.misses += 1;
            state.stats.expirations += 1;
            tracing::debug!("Cached analysis expired for key: {}", key);
            return Ok(None);
        }

        state.stats.hits += 1;
        let Some(cached) = state.entries.get_mut(key) else {
            return Ok(None);
        };
        cached.hit_count += 1;
        cached.last_accessed = Instant::now();
        tracing::debug!(
            "Analysis cache hit for key: {} (hit_count: {})",
            key,
            cached.hit_count
        );
        Ok(Some(cached.analysis.clone()))
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn get(&self, key: &str) -> Result<Option<PriorAnalysis>> {
        self.lookup(key, self.ttl)
    }

    async fn session_analyses(&self, session_id: &str) -> Result<Vec<PriorAnalysis>> {
        let state = self.lock()?;
        let mut analyses: Vec<PriorAnalysis> = state
            .entries
            .values()
            .filter(|cached| cached.cached_at.elapsed() <= self.ttl)
            .filter(|cached| cached.analysis.session_id.as_deref() == Some(session_id))
            .map(|cached| cached.analysis.clone())
            .collect();
        analyses.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        Ok(analyses)
    }

    fn stats(&self) -> Option<CacheStats> {
        let state = self.lock().ok()?;
        Some(CacheStats {
            entries: state.entries.len(),
            ..state.stats.clone()
        })
    }

    async fn put(&self, key: &str, analysis: PriorAnalysis) -> Result<()> {
        let mut state = self.lock()?;

        if state.entries.len() >= self.max_entries && !state.entries.contains_key(key) {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, cached)| cached.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                state.stats.evictions += 1;
                tracing::debug!("Evicted cached analysis: {}", oldest);
            }
        }

        let now = Instant::now();
        state.entries.insert(
            key.to_string(),
            CachedAnalysis {
                analysis,
                cached_at: now,
                last_accessed: now,
                hit_count: 0,
            },
        );
        tracing::debug!(
            "Cached analysis for key: {} (cache size: {})",
            key,
            state.entries.len()
        );
        Ok(())
    }
}
