//! Result cache - completed analyses keyed by request id
//!
//! Entries live for one TTL. Reads never return an expired entry, and a
//! background sweep started with `start()` removes expired entries with the
//! same TTL. The sweep stops on `stop()`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::analysis::aggregator::TokenSortKey;
use crate::analysis::ranking::{RankBucket, RankingRecord};
use crate::analysis::report::{AnalysisResult, ClusterPage};
use crate::analysis::types::TokenSummary;
use crate::error::{Error, Result};

/// Configuration for the result cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a completed analysis stays readable (seconds)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Background sweep period (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    1800
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Cached analysis with its insertion time
#[derive(Clone)]
pub struct CachedAnalysis {
    pub result: Arc<AnalysisResult>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedAnalysis {
    pub fn new(result: Arc<AnalysisResult>, ttl: Duration) -> Self {
        Self {
            result,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache statistics for monitoring
#[derive(Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }
}

/// TTL-bounded store of completed analyses
pub struct ResultCache {
    ttl: Duration,
    sweep_interval: Duration,
    entries: Arc<DashMap<String, CachedAnalysis>>,
    stats: Arc<CacheStats>,
    /// Shutdown signal for the sweep task
    shutdown: broadcast::Sender<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(
            Duration::from_secs(config.ttl_secs),
            Duration::from_secs(config.sweep_interval_secs),
        )
    }

    pub fn with_ttl(ttl: Duration, sweep_interval: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            ttl,
            sweep_interval,
            entries: Arc::new(DashMap::new()),
            stats: Arc::new(CacheStats::default()),
            shutdown,
            sweeper: Mutex::new(None),
        }
    }

    /// Start the background sweep; calling it twice is a no-op
    pub async fn start(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let entries = self.entries.clone();
        let stats = self.stats.clone();
        let period = self.sweep_interval.max(Duration::from_millis(1));
        let mut shutdown_rx = self.shutdown.subscribe();

        info!(ttl_secs = self.ttl.as_secs(), "Starting result cache sweep");

        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = sweep(&entries);
                        if removed > 0 {
                            stats.record_evictions(removed as u64);
                            debug!(removed, "Evicted expired analyses");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Result cache sweep shutting down");
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the background sweep and wait for it to exit
    pub async fn stop(&self) {
        let handle = self.sweeper.lock().await.take();
        if let Some(handle) = handle {
            let _ = self.shutdown.send(());
            let _ = handle.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn insert(&self, request_id: &str, result: Arc<AnalysisResult>) {
        self.entries
            .insert(request_id.to_string(), CachedAnalysis::new(result, self.ttl));
    }

    /// Live result for a request id
    pub fn get(&self, request_id: &str) -> Option<Arc<AnalysisResult>> {
        if let Some(entry) = self.entries.get(request_id) {
            if !entry.is_expired() {
                self.stats.record_hit();
                return Some(entry.result.clone());
            }
            drop(entry);
            self.entries.remove_if(request_id, |_, e| e.is_expired());
        }
        self.stats.record_miss();
        None
    }

    /// Newest live result for a token, with its request id
    pub fn latest_for_token(&self, token_address: &str) -> Option<(String, Arc<AnalysisResult>)> {
        self.entries
            .iter()
            .filter(|e| !e.is_expired() && e.result.token_address == token_address)
            .max_by_key(|e| e.cached_at)
            .map(|e| (e.key().clone(), e.result.clone()))
    }

    /// Remove expired entries now, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let removed = sweep(&self.entries);
        self.stats.record_evictions(removed as u64);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn require(&self, request_id: &str) -> Result<Arc<AnalysisResult>> {
        self.get(request_id)
            .ok_or_else(|| Error::AnalysisNotFound(request_id.to_string()))
    }

    pub fn token_table(&self, request_id: &str, sort: TokenSortKey) -> Result<Vec<TokenSummary>> {
        Ok(self.require(request_id)?.token_table(sort))
    }

    pub fn clusters_page(&self, request_id: &str, page: usize, page_size: usize) -> Result<ClusterPage> {
        Ok(self.require(request_id)?.clusters_page(page, page_size))
    }

    pub fn ranking_bucket(&self, request_id: &str, bucket: RankBucket) -> Result<Vec<RankingRecord>> {
        Ok(self.require(request_id)?.ranking_bucket(bucket))
    }
}

fn sweep(entries: &DashMap<String, CachedAnalysis>) -> usize {
    let before = entries.len();
    entries.retain(|_, e| !e.is_expired());
    before.saturating_sub(entries.len())
}
