//! Portfolio fetcher - bounded-concurrency batch fetch with retry
//!
//! One task per holder, gated by a semaphore so the provider's rate limits
//! are respected. Each task retries transient failures with jittered
//! backoff; repeated 429s back off progressively longer. A holder whose
//! retries are exhausted is recorded as failed and the batch carries on.
//!
//! Results are merged into the batch only by the caller's task as workers
//! finish, so no shared state is written concurrently.

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::analysis::types::{short_address, Holder, HolderPortfolio, Holding};
use crate::error::{Error, Result};
use crate::provider::{PortfolioEntry, PortfolioProvider};

/// Configuration for portfolio fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Maximum concurrent portfolio requests
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per holder before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lower bound of the first retry delay
    #[serde(default = "default_retry_min_delay_ms")]
    pub retry_min_delay_ms: u64,

    /// Upper bound of the first retry delay
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Delay growth per repeated 429 response
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: f64,

    /// Timeout for a single provider call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_min_delay_ms() -> u64 {
    2_000
}
fn default_retry_max_delay_ms() -> u64 {
    5_000
}
fn default_rate_limit_multiplier() -> f64 {
    2.0
}
fn default_call_timeout_secs() -> u64 {
    120
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_min_delay_ms: default_retry_min_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl FetcherConfig {
    /// Random delay in `[retry_min_delay_ms, retry_max_delay_ms]`
    fn jittered_delay(&self) -> Duration {
        let (lo, hi) = self.delay_bounds();
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    /// Delay after the n-th consecutive 429 (n starts at 1), capped at
    /// `max_delay()`
    fn rate_limit_delay(&self, hits: u32) -> Duration {
        let multiplier = if self.rate_limit_multiplier.is_finite() {
            self.rate_limit_multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = hits.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap = self.max_delay();
        let millis = self.jittered_delay().as_millis() as f64 * multiplier.powi(exponent);
        if millis.is_finite() && millis < cap.as_millis() as f64 {
            Duration::from_millis(millis as u64)
        } else {
            cap
        }
    }

    /// Longest single wait between attempts
    fn max_delay(&self) -> Duration {
        let (_, hi) = self.delay_bounds();
        Duration::from_millis(hi.saturating_mul(4).max(1))
    }

    fn delay_bounds(&self) -> (u64, u64) {
        let lo = self.retry_min_delay_ms.min(self.retry_max_delay_ms);
        let hi = self.retry_min_delay_ms.max(self.retry_max_delay_ms);
        (lo, hi)
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Outcome of fetching one holder's portfolio
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(Vec<Holding>),
    Failed { attempts: u32, reason: String },
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched(_))
    }
}

/// Per-run collection of fetch outcomes keyed by holder address
#[derive(Debug, Default)]
pub struct PortfolioBatch {
    outcomes: HashMap<String, FetchOutcome>,
}

impl PortfolioBatch {
    /// Record an outcome (called only by the coordinating task)
    pub fn record(&mut self, address: String, outcome: FetchOutcome) {
        self.outcomes.insert(address, outcome);
    }

    pub fn outcome(&self, address: &str) -> Option<&FetchOutcome> {
        self.outcomes.get(address)
    }

    /// Number of holders whose portfolio was fetched
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_fetched()).count()
    }

    /// Holders that failed or never reported back, in rank order
    pub fn failed_addresses(&self, holders: &[Holder]) -> Vec<String> {
        let mut seen = HashSet::new();
        holders
            .iter()
            .filter(|h| seen.insert(h.address.as_str()))
            .filter(|h| !matches!(self.outcomes.get(&h.address), Some(FetchOutcome::Fetched(_))))
            .map(|h| h.address.clone())
            .collect()
    }

    /// Successful portfolios in holder rank order
    ///
    /// Failed holders are left out entirely rather than counted as empty.
    pub fn into_portfolios(mut self, holders: &[Holder]) -> Vec<HolderPortfolio> {
        let mut portfolios = Vec::with_capacity(holders.len());
        for holder in holders {
            if let Some(FetchOutcome::Fetched(holdings)) = self.outcomes.remove(&holder.address) {
                portfolios.push(HolderPortfolio::new(holder.clone(), holdings));
            }
        }
        portfolios
    }
}

/// Batch portfolio fetcher
pub struct PortfolioFetcher {
    provider: Arc<dyn PortfolioProvider>,
    config: FetcherConfig,
}

impl PortfolioFetcher {
    /// Create a new fetcher
    pub fn new(provider: Arc<dyn PortfolioProvider>, config: FetcherConfig) -> Self {
        Self { provider, config }
    }

    /// Fetch all portfolios with the configured concurrency
    pub async fn fetch_all(&self, holders: &[Holder]) -> PortfolioBatch {
        self.fetch_all_with(holders, self.config.concurrency).await
    }

    /// Fetch all portfolios with an explicit concurrency bound
    pub async fn fetch_all_with(&self, holders: &[Holder], concurrency: usize) -> PortfolioBatch {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut dispatched = HashSet::new();

        for holder in holders {
            if !dispatched.insert(holder.address.clone()) {
                continue;
            }

            let permits = semaphore.clone();
            let provider = self.provider.clone();
            let config = self.config.clone();
            let address = holder.address.clone();

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let reason = "fetch pool closed".to_string();
                        return (address, FetchOutcome::Failed { attempts: 0, reason });
                    }
                };
                let outcome = fetch_portfolio(provider.as_ref(), &address, &config).await;
                (address, outcome)
            });
        }

        info!(
            holders = dispatched.len(),
            concurrency = concurrency.max(1),
            "Fetching holder portfolios"
        );

        let mut batch = PortfolioBatch::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((address, outcome)) => batch.record(address, outcome),
                Err(e) => warn!(error = %e, "Portfolio fetch task aborted"),
            }
        }

        info!(
            fetched = batch.succeeded(),
            failed = dispatched.len() - batch.succeeded(),
            "Portfolio fetch complete"
        );
        batch
    }
}

/// Fetch one portfolio with retries and convert it into holdings
async fn fetch_portfolio(
    provider: &dyn PortfolioProvider,
    address: &str,
    config: &FetcherConfig,
) -> FetchOutcome {
    let (result, attempts) = with_retry(config, address, || provider.get_portfolio(address)).await;

    match result {
        Ok(entries) => {
            debug!(
                holder = %short_address(address),
                holdings = entries.len(),
                attempts,
                "Fetched portfolio"
            );
            FetchOutcome::Fetched(into_holdings(address, entries))
        }
        Err(e) => {
            let failure = Error::FetchFailed {
                address: address.to_string(),
                attempts,
                reason: e.to_string(),
            };
            warn!(holder = %short_address(address), error = %failure, "Giving up on holder");
            FetchOutcome::Failed {
                attempts,
                reason: e.to_string(),
            }
        }
    }
}

fn into_holdings(address: &str, entries: Vec<PortfolioEntry>) -> Vec<Holding> {
    entries
        .into_iter()
        .map(|e| Holding {
            holder_address: address.to_string(),
            token_address: e.token_address,
            symbol: e.symbol,
            name: e.name,
            balance: e.balance,
            price_usd: e.price_usd,
            value_usd: e.value_usd,
        })
        .collect()
}

/// Run a provider call with per-call timeout and bounded retries
///
/// Returns the final result and the number of attempts made. Transient
/// errors follow a jittered exponential schedule starting inside the
/// configured delay window; 429s carry an explicit, escalating delay.
pub async fn with_retry<T, F, Fut>(config: &FetcherConfig, label: &str, mut call: F) -> (Result<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let (lo, hi) = config.delay_bounds();
    let midpoint = (lo + hi) as f64 / 2.0;
    let spread = if lo + hi == 0 {
        0.0
    } else {
        (hi - lo) as f64 / (hi + lo) as f64
    };

    let schedule = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(midpoint as u64))
        .with_randomization_factor(spread)
        .with_multiplier(1.5)
        .with_max_interval(config.max_delay())
        .with_max_elapsed_time(None)
        .build();

    let attempts = AtomicU32::new(0);
    let rate_limit_hits = AtomicU32::new(0);
    let max_attempts = config.max_attempts.max(1);
    let call_timeout = config.call_timeout();

    let result = retry(schedule, || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = call();
        let rate_limit_hits = &rate_limit_hits;

        async move {
            let outcome = match timeout(call_timeout, pending).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout(call_timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    if e.is_rate_limit() {
                        let hits = rate_limit_hits.fetch_add(1, Ordering::Relaxed) + 1;
                        let delay = config.rate_limit_delay(hits);
                        warn!(
                            address = %short_address(label),
                            attempt,
                            hits,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limited, backing off"
                        );
                        Err(backoff::Error::retry_after(e, delay))
                    } else {
                        debug!(
                            address = %short_address(label),
                            attempt,
                            error = %e,
                            "Transient provider error, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    }
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await;

    (result, attempts.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::sync::atomic::AtomicUsize;

    /// Provider with scripted per-address failures
    struct ScriptedProvider {
        /// address -> errors to return before succeeding
        failures: DashMap<String, Vec<Error>>,
        calls: DashMap<String, u32>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                failures: DashMap::new(),
                calls: DashMap::new(),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        fn fail_with(self, address: &str, errors: Vec<Error>) -> Self {
            self.failures.insert(address.to_string(), errors);
            self
        }

        fn calls_for(&self, address: &str) -> u32 {
            self.calls.get(address).map(|c| *c).unwrap_or(0)
        }
    }

    #[async_trait]
    impl PortfolioProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn get_portfolio(&self, address: &str) -> Result<Vec<PortfolioEntry>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            *self.calls.entry(address.to_string()).or_insert(0) += 1;

            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let next_error = self
                .failures
                .get_mut(address)
                .and_then(|mut errs| if errs.is_empty() { None } else { Some(errs.remove(0)) });

            match next_error {
                Some(error) => Err(error),
                None => Ok(vec![PortfolioEntry {
                    token_address: "TARGET".into(),
                    symbol: "TGT".into(),
                    name: "Target".into(),
                    balance: 10.0,
                    price_usd: 1.0,
                    value_usd: 10.0,
                }]),
            }
        }
    }

    fn fast_config() -> FetcherConfig {
        FetcherConfig {
            retry_min_delay_ms: 1,
            retry_max_delay_ms: 2,
            ..Default::default()
        }
    }

    fn holders(n: usize) -> Vec<Holder> {
        (1..=n)
            .map(|i| Holder {
                address: format!("holder{}", i),
                rank: i,
                hold_amount: 100.0,
                hold_supply_percentage: 1.0,
                tags: vec![],
                excluded: false,
            })
            .collect()
    }

    fn rate_limited() -> Error {
        Error::RateLimited("too many requests".into())
    }

    fn reset() -> Error {
        Error::TransientNetwork("connection reset".into())
    }

    fn not_found() -> Error {
        Error::Http {
            status: 404,
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn test_one_holder_rate_limited_out() {
        let provider = Arc::new(ScriptedProvider::new().fail_with(
            "holder7",
            vec![rate_limited(), rate_limited(), rate_limited()],
        ));
        let fetcher = PortfolioFetcher::new(provider.clone(), fast_config());
        let list = holders(20);

        let batch = fetcher.fetch_all(&list).await;

        assert_eq!(batch.succeeded(), 19);
        assert_eq!(batch.failed_addresses(&list), vec!["holder7".to_string()]);
        assert_eq!(provider.calls_for("holder7"), 3);
        match batch.outcome("holder7") {
            Some(FetchOutcome::Failed { attempts, .. }) => assert_eq!(*attempts, 3),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let portfolios = batch.into_portfolios(&list);
        assert_eq!(portfolios.len(), 19);
        assert!(portfolios.iter().all(|p| p.holder.address != "holder7"));
        assert_eq!(portfolios[0].holdings[0].holder_address, "holder1");
    }

    #[tokio::test]
    async fn test_transient_error_recovers() {
        let provider = Arc::new(ScriptedProvider::new().fail_with("holder1", vec![reset(), rate_limited()]));
        let fetcher = PortfolioFetcher::new(provider.clone(), fast_config());

        let batch = fetcher.fetch_all(&holders(1)).await;

        assert_eq!(batch.succeeded(), 1);
        assert_eq!(provider.calls_for("holder1"), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let provider = Arc::new(ScriptedProvider::new().fail_with("holder2", vec![not_found()]));
        let fetcher = PortfolioFetcher::new(provider.clone(), fast_config());
        let list = holders(3);

        let batch = fetcher.fetch_all(&list).await;

        assert_eq!(batch.succeeded(), 2);
        assert_eq!(provider.calls_for("holder2"), 1);
        assert_eq!(batch.failed_addresses(&list), vec!["holder2".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let provider = Arc::new(ScriptedProvider::new());
        let fetcher = PortfolioFetcher::new(provider.clone(), fast_config());

        let batch = fetcher.fetch_all_with(&holders(12), 3).await;

        assert_eq!(batch.succeeded(), 12);
        assert!(provider.peak_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_duplicate_holders_fetched_once() {
        let provider = Arc::new(ScriptedProvider::new());
        let fetcher = PortfolioFetcher::new(provider.clone(), fast_config());
        let mut list = holders(2);
        list.push(list[0].clone());

        let batch = fetcher.fetch_all(&list).await;

        assert_eq!(provider.calls_for("holder1"), 1);
        assert_eq!(batch.succeeded(), 2);
    }

    #[test]
    fn test_rate_limit_delay_escalates() {
        let config = FetcherConfig {
            retry_min_delay_ms: 2_000,
            retry_max_delay_ms: 5_000,
            ..Default::default()
        };
        for _ in 0..20 {
            let first = config.rate_limit_delay(1);
            assert!(first >= Duration::from_secs(2) && first <= Duration::from_secs(5));
            let third = config.rate_limit_delay(3);
            assert!(third >= Duration::from_secs(8) && third <= Duration::from_secs(20));
        }
    }

    #[test]
    fn test_rate_limit_delay_is_capped() {
        let config = FetcherConfig {
            retry_min_delay_ms: 2_000,
            retry_max_delay_ms: 5_000,
            rate_limit_multiplier: 1e300,
            ..Default::default()
        };
        assert_eq!(config.rate_limit_delay(2), Duration::from_secs(20));
        assert_eq!(config.rate_limit_delay(u32::MAX), Duration::from_secs(20));

        let config = FetcherConfig {
            rate_limit_multiplier: f64::NAN,
            ..config
        };
        let delay = config.rate_limit_delay(5);
        assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(5));
    }
}
