//! Completed analysis and the views presentation layers read from it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::analysis::aggregator::{sorted_view, TokenSortKey};
use crate::analysis::clustering::Cluster;
use crate::analysis::ranking::{filter_bucket, RankBucket, RankingRecord, RankingStats};
use crate::analysis::types::{Holder, TokenAggregate, TokenSummary};
use crate::error::{Error, Result};

/// Counters describing one analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub total_holders_fetched: usize,
    pub holders_excluded: usize,
    pub holders_after_filter: usize,
    /// Holders whose portfolio fetch succeeded
    pub total_holders_analyzed: usize,
    pub failed_fetches: usize,
    pub failed_addresses: Vec<String>,
    pub tokens_before_filter: usize,
    pub tokens_after_filter: usize,
    pub cluster_count: usize,
    pub conspiracy_count: usize,
    pub ranking: RankingStats,
}

/// One page of clusters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPage {
    pub clusters: Vec<Cluster>,
    /// 1-based; 0 when there are no clusters
    pub current_page: usize,
    pub total_pages: usize,
}

/// Everything produced for one token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub token_address: String,
    pub timestamp: DateTime<Utc>,
    pub blacklisted: bool,
    /// Source holder list, excluded holders included
    pub holders: Vec<Holder>,
    /// Noise-filtered aggregates, largest value first
    pub tokens: Vec<TokenAggregate>,
    pub clusters: Vec<Cluster>,
    pub rankings: Vec<RankingRecord>,
    pub stats: AnalysisStats,
}

impl AnalysisResult {
    /// Empty result, used for blacklisted tokens
    pub fn empty(token_address: &str) -> Self {
        Self {
            token_address: token_address.to_string(),
            timestamp: Utc::now(),
            blacklisted: false,
            holders: Vec::new(),
            tokens: Vec::new(),
            clusters: Vec::new(),
            rankings: Vec::new(),
            stats: AnalysisStats::default(),
        }
    }

    /// Token table rows in the requested order
    pub fn token_table(&self, sort: TokenSortKey) -> Vec<TokenSummary> {
        sorted_view(&self.tokens, sort).iter().map(TokenAggregate::summary).collect()
    }

    /// A page of clusters; out-of-range pages clamp to the nearest valid one
    pub fn clusters_page(&self, page: usize, page_size: usize) -> ClusterPage {
        let page_size = page_size.max(1);
        if self.clusters.is_empty() {
            return ClusterPage {
                clusters: Vec::new(),
                current_page: 0,
                total_pages: 0,
            };
        }

        let total_pages = self.clusters.len().div_ceil(page_size);
        let current_page = page.clamp(1, total_pages);
        let clusters = self
            .clusters
            .iter()
            .skip((current_page - 1) * page_size)
            .take(page_size)
            .cloned()
            .collect();

        ClusterPage {
            clusters,
            current_page,
            total_pages,
        }
    }

    /// Ranking records falling in one bucket
    pub fn ranking_bucket(&self, bucket: RankBucket) -> Vec<RankingRecord> {
        filter_bucket(&self.rankings, bucket)
    }

    /// Aggregate for the analyzed token, if any holder had it
    pub fn target_aggregate(&self) -> Option<&TokenAggregate> {
        self.tokens.iter().find(|t| t.is_target_token)
    }
}

/// Persist a result as pretty JSON under `dir`, returning the file path
pub async fn write_audit(dir: &Path, result: &AnalysisResult) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("Failed to create audit dir {}: {}", dir.display(), e)))?;

    let path = dir.join(format!(
        "{}_{}.json",
        audit_file_stem(&result.token_address),
        result.timestamp.timestamp()
    ));
    let data = serde_json::to_string_pretty(result)?;

    tokio::fs::write(&path, data)
        .await
        .map_err(|e| Error::Io(format!("Failed to write audit file {}: {}", path.display(), e)))?;

    debug!(path = %path.display(), "Saved analysis audit");
    Ok(path)
}

/// Token address reduced to `[A-Za-z0-9_-]` so it stays one path component
fn audit_file_stem(token_address: &str) -> String {
    let stem: String = token_address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "token".to_string()
    } else {
        stem
    }
}
