//! Analysis pipeline - one sequential run per requested token
//!
//! blacklist check -> holder list -> filter -> portfolio fetch -> aggregate
//! -> cluster -> rank -> cache (-> audit)
//!
//! The portfolio fetch is the only parallel phase. Every other stage runs on
//! the coordinating task over the collected results.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::aggregator::TokenAggregator;
use crate::analysis::cache::ResultCache;
use crate::analysis::clustering::ClusterEngine;
use crate::analysis::fetcher::{with_retry, PortfolioFetcher};
use crate::analysis::holder_filter::HolderFilter;
use crate::analysis::ranking::RankingEngine;
use crate::analysis::report::{write_audit, AnalysisResult, AnalysisStats};
use crate::analysis::types::short_address;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::{BlacklistProvider, HolderListProvider, PortfolioProvider};

/// A cached analysis and the id it is stored under
#[derive(Debug, Clone)]
pub struct AnalysisHandle {
    pub request_id: String,
    pub result: Arc<AnalysisResult>,
}

/// Runs whale analyses and stores them in the result cache
pub struct Analyzer {
    config: Arc<Config>,
    holders: Arc<dyn HolderListProvider>,
    blacklist: Arc<dyn BlacklistProvider>,
    filter: HolderFilter,
    fetcher: PortfolioFetcher,
    aggregator: TokenAggregator,
    clusters: ClusterEngine,
    ranking: RankingEngine,
    cache: Arc<ResultCache>,
}

impl Analyzer {
    pub fn new(
        config: Arc<Config>,
        holders: Arc<dyn HolderListProvider>,
        portfolios: Arc<dyn PortfolioProvider>,
        blacklist: Arc<dyn BlacklistProvider>,
        cache: Arc<ResultCache>,
    ) -> Result<Self> {
        Ok(Self {
            filter: HolderFilter::new(&config.holder_filter)?,
            fetcher: PortfolioFetcher::new(portfolios, config.fetcher.clone()),
            aggregator: TokenAggregator::new(config.aggregator.clone()),
            clusters: ClusterEngine::new(config.clustering.clone(), config.chain.gas_token.clone()),
            ranking: RankingEngine::new(
                config.ranking.clone(),
                &config.chain,
                config.provider.portfolio_limit as usize,
            ),
            config,
            holders,
            blacklist,
            cache,
        })
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Run a full analysis of `token_address`
    ///
    /// Fails only when the holder list cannot be fetched or leaves nothing to
    /// analyze. Individual portfolio failures are counted, not raised.
    pub async fn analyze(&self, token_address: &str) -> Result<AnalysisHandle> {
        let request_id = Uuid::new_v4().to_string();
        info!(token = %short_address(token_address), request_id = %request_id, "Starting analysis");

        if self.blacklist.is_blacklisted(token_address).await {
            warn!(token = %short_address(token_address), "Token is blacklisted, skipping analysis");
            let mut result = AnalysisResult::empty(token_address);
            result.blacklisted = true;
            return Ok(self.store(request_id, result));
        }

        let (records, attempts) = with_retry(&self.config.fetcher, token_address, || {
            self.holders.get_holders(token_address)
        })
        .await;
        let records = records?;
        info!(
            provider = self.holders.name(),
            holders = records.len(),
            attempts,
            "Fetched holder list"
        );
        if records.is_empty() {
            return Err(Error::EmptyResult(format!("No holders returned for {}", token_address)));
        }

        let holders = self.filter.classify(records);
        let analyzable = HolderFilter::analyzable(&holders);
        if analyzable.is_empty() {
            return Err(Error::EmptyResult(format!(
                "No analyzable holders for {} after filtering",
                token_address
            )));
        }

        let batch = self.fetcher.fetch_all(&analyzable).await;
        let failed_addresses = batch.failed_addresses(&analyzable);
        let portfolios = batch.into_portfolios(&analyzable);

        let folded = self.aggregator.fold(token_address, &portfolios);
        let tokens_before_filter = folded.len();
        let tokens = self.aggregator.filter_noise(folded);

        let clusters = self.clusters.find_clusters(&tokens);
        let rankings = self.ranking.rank_target(token_address, &portfolios, &holders);
        let ranking_stats = self.ranking.statistics(&rankings);

        let stats = AnalysisStats {
            total_holders_fetched: holders.len(),
            holders_excluded: holders.len() - analyzable.len(),
            holders_after_filter: analyzable.len(),
            total_holders_analyzed: portfolios.len(),
            failed_fetches: failed_addresses.len(),
            failed_addresses,
            tokens_before_filter,
            tokens_after_filter: tokens.len(),
            cluster_count: clusters.len(),
            conspiracy_count: ranking_stats.conspiracy_count,
            ranking: ranking_stats,
        };

        info!(
            token = %short_address(token_address),
            analyzed = stats.total_holders_analyzed,
            failed = stats.failed_fetches,
            tokens = stats.tokens_after_filter,
            clusters = stats.cluster_count,
            conspiracy = stats.conspiracy_count,
            "Analysis complete"
        );

        let mut result = AnalysisResult::empty(token_address);
        result.holders = holders;
        result.tokens = tokens;
        result.clusters = clusters;
        result.rankings = rankings;
        result.stats = stats;

        let handle = self.store(request_id, result);

        if let Some(dir) = self.config.audit.target_dir() {
            if let Err(e) = write_audit(dir, &handle.result).await {
                warn!(error = %e, "Failed to write analysis audit");
            }
        }

        Ok(handle)
    }

    /// Reuse the newest live cached analysis of `token_address`, or run one
    pub async fn analyze_cached(&self, token_address: &str) -> Result<AnalysisHandle> {
        if let Some((request_id, result)) = self.cache.latest_for_token(token_address) {
            info!(
                token = %short_address(token_address),
                request_id = %request_id,
                "Reusing cached analysis"
            );
            return Ok(AnalysisHandle { request_id, result });
        }
        self.analyze(token_address).await
    }

    fn store(&self, request_id: String, result: AnalysisResult) -> AnalysisHandle {
        let result = Arc::new(result);
        self.cache.insert(&request_id, result.clone());
        AnalysisHandle { request_id, result }
    }
}
