//! Whale holder analysis
//!
//! Given the ranked holders of a token, this module:
//! 1. Filters out pools and exchanges
//! 2. Fetches every remaining holder's portfolio in parallel
//! 3. Aggregates holdings per token
//! 4. Detects address clusters with shared holdings
//! 5. Ranks the target token inside each portfolio
//!
//! Completed analyses are kept in a TTL-bounded `ResultCache`.

pub mod aggregator;
pub mod cache;
pub mod clustering;
pub mod fetcher;
pub mod holder_filter;
pub mod pipeline;
pub mod ranking;
pub mod report;
pub mod types;

pub use aggregator::{TokenAggregator, TokenSortKey};
pub use cache::ResultCache;
pub use clustering::{Cluster, ClusterEngine};
pub use fetcher::{FetchOutcome, PortfolioBatch, PortfolioFetcher};
pub use holder_filter::HolderFilter;
pub use pipeline::{AnalysisHandle, Analyzer};
pub use ranking::{RankBucket, RankingEngine, RankingRecord, RankingStats, TargetRank};
pub use report::{AnalysisResult, AnalysisStats, ClusterPage};
pub use types::{Holder, HolderDetail, HolderPortfolio, Holding, TokenAggregate, TokenSummary};
