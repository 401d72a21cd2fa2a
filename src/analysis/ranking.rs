//! Target ranking - where the analyzed token sits in each whale's portfolio
//!
//! For every holder with a fetched portfolio we record the 1-based position
//! of the target token by USD value and how much of the portfolio it makes
//! up. Holders overexposed to the target are flagged:
//! - alpha: target value over the whole portfolio
//! - beta: target value over the portfolio without gas and stablecoins

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::analysis::aggregator::collapse_holdings;
use crate::analysis::types::{short_address, Holder, HolderPortfolio};
use crate::config::ChainConfig;
use crate::error::{Error, Result};

/// Configuration for target ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Target positions up to this rank feed the average/median statistics
    #[serde(default = "default_holder_detail_cutoff")]
    pub holder_detail_cutoff: usize,

    /// Share of portfolio value above which a wallet is flagged (exclusive)
    #[serde(default = "default_conspiracy_threshold")]
    pub conspiracy_threshold: f64,
}

fn default_holder_detail_cutoff() -> usize {
    15
}
fn default_conspiracy_threshold() -> f64 {
    0.5
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            holder_detail_cutoff: default_holder_detail_cutoff(),
            conspiracy_threshold: default_conspiracy_threshold(),
        }
    }
}

/// Position of the target token inside one portfolio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRank {
    /// 1-based position by value
    Position(usize),
    /// Not among the fetched holdings; the holdings were capped at this depth
    Beyond(usize),
}

impl TargetRank {
    pub fn position(&self) -> Option<usize> {
        match self {
            TargetRank::Position(p) => Some(*p),
            TargetRank::Beyond(_) => None,
        }
    }
}

impl fmt::Display for TargetRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRank::Position(p) => write!(f, "{}", p),
            TargetRank::Beyond(n) => write!(f, ">{}", n),
        }
    }
}

/// Per-holder ranking of the target token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRecord {
    pub holder_address: String,
    pub holder_rank: usize,
    pub target_rank: TargetRank,
    pub target_value_usd: f64,
    pub target_supply_percentage: f64,
    pub portfolio_total_value: f64,
    pub portfolio_value_excl_gas_and_stable: f64,
    pub is_conspiracy_alpha: bool,
    pub is_conspiracy_beta: bool,
}

impl RankingRecord {
    pub fn is_conspiracy(&self) -> bool {
        self.is_conspiracy_alpha || self.is_conspiracy_beta
    }
}

/// Ranking view selector: `1`..`10`, `>10` or `conspiracy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RankBucket {
    Rank(u8),
    Beyond,
    Conspiracy,
}

impl RankBucket {
    /// Histogram buckets in display order
    pub fn histogram() -> Vec<RankBucket> {
        (1..=10).map(RankBucket::Rank).chain(std::iter::once(RankBucket::Beyond)).collect()
    }

    /// Histogram bucket a target rank falls into
    pub fn for_rank(rank: TargetRank) -> RankBucket {
        match rank {
            TargetRank::Position(p) if (1..=10).contains(&p) => RankBucket::Rank(p as u8),
            _ => RankBucket::Beyond,
        }
    }

    pub fn matches(&self, record: &RankingRecord) -> bool {
        match self {
            RankBucket::Conspiracy => record.is_conspiracy(),
            bucket => RankBucket::for_rank(record.target_rank) == *bucket,
        }
    }
}

impl FromStr for RankBucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("conspiracy") {
            return Ok(RankBucket::Conspiracy);
        }
        if s == ">10" {
            return Ok(RankBucket::Beyond);
        }
        match s.parse::<u8>() {
            Ok(n) if (1..=10).contains(&n) => Ok(RankBucket::Rank(n)),
            _ => Err(Error::InvalidBucket(s.to_string())),
        }
    }
}

impl fmt::Display for RankBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankBucket::Rank(n) => write!(f, "{}", n),
            RankBucket::Beyond => write!(f, ">10"),
            RankBucket::Conspiracy => write!(f, "conspiracy"),
        }
    }
}

impl From<RankBucket> for String {
    fn from(bucket: RankBucket) -> Self {
        bucket.to_string()
    }
}

impl TryFrom<String> for RankBucket {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Aggregate of one ranking bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub bucket: RankBucket,
    pub holders: usize,
    pub value_usd: f64,
    pub supply_percentage: f64,
}

impl BucketSummary {
    fn empty(bucket: RankBucket) -> Self {
        Self {
            bucket,
            holders: 0,
            value_usd: 0.0,
            supply_percentage: 0.0,
        }
    }

    fn add(&mut self, record: &RankingRecord) {
        self.holders += 1;
        self.value_usd += record.target_value_usd;
        self.supply_percentage += record.target_supply_percentage;
    }
}

/// Derived statistics over all ranking records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingStats {
    /// `1`..`10` then `>10`
    pub buckets: Vec<BucketSummary>,
    pub conspiracy: BucketSummary,
    pub average_rank: Option<f64>,
    pub median_rank: Option<f64>,
    /// Records that fed the average and median
    pub ranked_within_cutoff: usize,
    pub conspiracy_count: usize,
    pub total_target_value_usd: f64,
}

impl Default for RankingStats {
    fn default() -> Self {
        Self {
            buckets: RankBucket::histogram().into_iter().map(BucketSummary::empty).collect(),
            conspiracy: BucketSummary::empty(RankBucket::Conspiracy),
            average_rank: None,
            median_rank: None,
            ranked_within_cutoff: 0,
            conspiracy_count: 0,
            total_target_value_usd: 0.0,
        }
    }
}

/// Computes ranking records and their statistics
pub struct RankingEngine {
    config: RankingConfig,
    chain: ChainConfig,
    portfolio_depth: usize,
}

impl RankingEngine {
    /// `portfolio_depth` is how many holdings the portfolio provider returns
    pub fn new(config: RankingConfig, chain: &ChainConfig, portfolio_depth: usize) -> Self {
        Self {
            config,
            chain: chain.clone(),
            portfolio_depth,
        }
    }

    /// Rank the target token inside each fetched portfolio, in holder order
    pub fn rank_target(
        &self,
        target_token: &str,
        portfolios: &[HolderPortfolio],
        holders: &[Holder],
    ) -> Vec<RankingRecord> {
        let by_address: HashMap<&str, &Holder> = holders.iter().map(|h| (h.address.as_str(), h)).collect();
        let fallback_price = median_target_price(target_token, portfolios);
        let target_excluded_from_beta = self.chain.is_gas_or_stable(target_token);

        let mut records: Vec<RankingRecord> = portfolios
            .iter()
            .map(|portfolio| {
                let holder = by_address
                    .get(portfolio.holder.address.as_str())
                    .copied()
                    .unwrap_or(&portfolio.holder);

                let mut holdings = collapse_holdings(&portfolio.holdings);
                holdings.sort_by(|a, b| {
                    b.value_usd
                        .partial_cmp(&a.value_usd)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.token_address.cmp(&b.token_address))
                });

                let mut total: f64 = holdings.iter().map(|h| h.value_usd).sum();
                let mut excl_gas_stable: f64 = holdings
                    .iter()
                    .filter(|h| !self.chain.is_gas_or_stable(&h.token_address))
                    .map(|h| h.value_usd)
                    .sum();

                let (target_rank, target_value) =
                    match holdings.iter().position(|h| h.token_address == target_token) {
                        Some(idx) => (TargetRank::Position(idx + 1), holdings[idx].value_usd),
                        None => {
                            let value = holder.hold_amount * fallback_price;
                            total += value;
                            if !target_excluded_from_beta {
                                excl_gas_stable += value;
                            }
                            debug!(
                                holder = %short_address(&holder.address),
                                value,
                                "Target not in fetched holdings, using holder list amount"
                            );
                            (TargetRank::Beyond(self.portfolio_depth.max(holdings.len())), value)
                        }
                    };

                let beta_value = if target_excluded_from_beta { 0.0 } else { target_value };

                RankingRecord {
                    holder_address: holder.address.clone(),
                    holder_rank: holder.rank,
                    target_rank,
                    target_value_usd: target_value,
                    target_supply_percentage: holder.hold_supply_percentage,
                    portfolio_total_value: total,
                    portfolio_value_excl_gas_and_stable: excl_gas_stable,
                    is_conspiracy_alpha: self.exceeds(target_value, total),
                    is_conspiracy_beta: self.exceeds(beta_value, excl_gas_stable),
                }
            })
            .collect();

        records.sort_by_key(|r| r.holder_rank);

        info!(
            holders = records.len(),
            conspiracy = records.iter().filter(|r| r.is_conspiracy()).count(),
            "Target ranking complete"
        );
        records
    }

    fn exceeds(&self, part: f64, whole: f64) -> bool {
        if whole <= 0.0 || !whole.is_finite() {
            return false;
        }
        part / whole > self.config.conspiracy_threshold
    }

    /// Bucket histogram, conspiracy summary and rank statistics
    pub fn statistics(&self, records: &[RankingRecord]) -> RankingStats {
        let mut stats = RankingStats::default();

        for record in records {
            let bucket = RankBucket::for_rank(record.target_rank);
            if let Some(summary) = stats.buckets.iter_mut().find(|b| b.bucket == bucket) {
                summary.add(record);
            }
            if record.is_conspiracy() {
                stats.conspiracy.add(record);
            }
            stats.total_target_value_usd += record.target_value_usd;
        }
        stats.conspiracy_count = stats.conspiracy.holders;

        let mut ranks: Vec<usize> = records
            .iter()
            .filter_map(|r| r.target_rank.position())
            .filter(|&p| p <= self.config.holder_detail_cutoff)
            .collect();
        ranks.sort_unstable();

        stats.ranked_within_cutoff = ranks.len();
        if !ranks.is_empty() {
            stats.average_rank = Some(ranks.iter().sum::<usize>() as f64 / ranks.len() as f64);
            let mid = ranks.len() / 2;
            stats.median_rank = Some(if ranks.len() % 2 == 0 {
                (ranks[mid - 1] + ranks[mid]) as f64 / 2.0
            } else {
                ranks[mid] as f64
            });
        }

        stats
    }
}

/// Records in one bucket, holder order preserved
pub fn filter_bucket(records: &[RankingRecord], bucket: RankBucket) -> Vec<RankingRecord> {
    records.iter().filter(|r| bucket.matches(r)).cloned().collect()
}

/// Median positive target price seen across portfolios, 0 if none
fn median_target_price(target_token: &str, portfolios: &[HolderPortfolio]) -> f64 {
    let mut prices: Vec<f64> = portfolios
        .iter()
        .flat_map(|p| p.holdings.iter())
        .filter(|h| h.token_address == target_token && h.price_usd.is_finite() && h.price_usd > 0.0)
        .map(|h| h.price_usd)
        .collect();
    if prices.is_empty() {
        return 0.0;
    }
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = prices.len() / 2;
    if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::Holding;

    const TARGET: &str = "target_mint";

    fn chain() -> ChainConfig {
        ChainConfig::default()
    }

    fn holder(rank: usize, address: &str, amount: f64) -> Holder {
        Holder {
            address: address.to_string(),
            rank,
            hold_amount: amount,
            hold_supply_percentage: 2.0,
            tags: vec![],
            excluded: false,
        }
    }

    fn holding(holder: &str, token: &str, value: f64, price: f64) -> Holding {
        Holding {
            holder_address: holder.to_string(),
            token_address: token.to_string(),
            symbol: String::new(),
            name: String::new(),
            balance: if price > 0.0 { value / price } else { 0.0 },
            price_usd: price,
            value_usd: value,
        }
    }

    fn engine() -> RankingEngine {
        RankingEngine::new(RankingConfig::default(), &chain(), 50)
    }

    #[test]
    fn test_target_is_largest_holding() {
        let h = holder(1, "w1", 500.0);
        let portfolios = vec![HolderPortfolio::new(
            h.clone(),
            vec![holding("w1", "other", 400.0, 1.0), holding("w1", TARGET, 500.0, 1.0)],
        )];

        let records = engine().rank_target(TARGET, &portfolios, &[h]);
        let r = &records[0];

        assert_eq!(r.target_rank, TargetRank::Position(1));
        assert_eq!(r.portfolio_total_value, 900.0);
        assert!(r.is_conspiracy_alpha);
        assert!(r.is_conspiracy_beta);
    }

    #[test]
    fn test_gas_target_never_beta() {
        let gas = chain().gas_token;
        let usdc = chain().stablecoins[0].clone();
        let holders: Vec<Holder> = (1..=3).map(|i| holder(i, &format!("w{}", i), 10.0)).collect();
        let portfolios: Vec<HolderPortfolio> = holders
            .iter()
            .map(|h| {
                HolderPortfolio::new(
                    h.clone(),
                    vec![
                        holding(&h.address, &gas, 900.0, 150.0),
                        holding(&h.address, &usdc, 50.0, 1.0),
                        holding(&h.address, "meme", 50.0, 0.1),
                    ],
                )
            })
            .collect();

        let records = engine().rank_target(&gas, &portfolios, &holders);
        assert_eq!(records.len(), 3);
        for r in &records {
            assert!(r.is_conspiracy_alpha);
            assert!(!r.is_conspiracy_beta);
            assert_eq!(r.portfolio_value_excl_gas_and_stable, 50.0);
        }
    }

    #[test]
    fn test_zero_value_portfolio_not_flagged() {
        let h = holder(1, "w1", 0.0);
        let portfolios = vec![HolderPortfolio::new(h.clone(), vec![holding("w1", TARGET, 0.0, 0.0)])];

        let records = engine().rank_target(TARGET, &portfolios, &[h]);
        assert_eq!(records[0].portfolio_total_value, 0.0);
        assert!(!records[0].is_conspiracy_alpha);
        assert!(!records[0].is_conspiracy_beta);
    }

    #[test]
    fn test_missing_target_uses_holder_list_fallback() {
        let holders = vec![holder(1, "w1", 100.0), holder(2, "w2", 1_000.0)];
        let portfolios = vec![
            HolderPortfolio::new(holders[0].clone(), vec![holding("w1", TARGET, 200.0, 2.0)]),
            HolderPortfolio::new(holders[1].clone(), vec![holding("w2", "big", 10_000.0, 1.0)]),
        ];

        let records = engine().rank_target(TARGET, &portfolios, &holders);
        let r = &records[1];

        assert_eq!(r.target_rank, TargetRank::Beyond(50));
        assert_eq!(r.target_rank.to_string(), ">50");
        assert_eq!(r.target_value_usd, 2_000.0);
        assert_eq!(r.portfolio_total_value, 12_000.0);
        assert!(!r.is_conspiracy_alpha);
    }

    #[test]
    fn test_ties_break_on_token_address() {
        let h = holder(1, "w1", 1.0);
        let portfolios = vec![HolderPortfolio::new(
            h.clone(),
            vec![holding("w1", "zzz", 10.0, 1.0), holding("w1", "aaa", 10.0, 1.0), holding("w1", TARGET, 10.0, 1.0)],
        )];

        let records = engine().rank_target(TARGET, &portfolios, &[h]);
        assert_eq!(records[0].target_rank, TargetRank::Position(2));
    }

    #[test]
    fn test_statistics_buckets_and_median() {
        let ranks = [1, 1, 3, 12];
        let holders: Vec<Holder> = (1..=4).map(|i| holder(i, &format!("w{}", i), 1.0)).collect();
        let records: Vec<RankingRecord> = holders
            .iter()
            .zip(ranks)
            .map(|(h, rank)| RankingRecord {
                holder_address: h.address.clone(),
                holder_rank: h.rank,
                target_rank: TargetRank::Position(rank),
                target_value_usd: 100.0,
                target_supply_percentage: 1.5,
                portfolio_total_value: 1_000.0,
                portfolio_value_excl_gas_and_stable: 100.0,
                is_conspiracy_alpha: false,
                is_conspiracy_beta: rank == 1,
            })
            .collect();

        let stats = engine().statistics(&records);

        assert_eq!(stats.buckets.len(), 11);
        assert_eq!(stats.buckets[0].holders, 2);
        assert_eq!(stats.buckets[0].value_usd, 200.0);
        assert_eq!(stats.buckets[0].supply_percentage, 3.0);
        assert_eq!(stats.buckets[2].holders, 1);
        assert_eq!(stats.buckets[10].bucket, RankBucket::Beyond);
        assert_eq!(stats.buckets[10].holders, 1);
        assert_eq!(stats.conspiracy_count, 2);
        assert_eq!(stats.average_rank, Some(17.0 / 4.0));
        assert_eq!(stats.median_rank, Some(2.0));
        assert_eq!(stats.total_target_value_usd, 400.0);

        assert_eq!(filter_bucket(&records, RankBucket::Rank(1)).len(), 2);
        assert_eq!(filter_bucket(&records, RankBucket::Conspiracy).len(), 2);
        assert_eq!(filter_bucket(&records, RankBucket::Rank(7)).len(), 0);
    }

    #[test]
    fn test_average_uses_target_position_cutoff() {
        let record = |holder_rank: usize, position: usize| RankingRecord {
            holder_address: format!("w{}", holder_rank),
            holder_rank,
            target_rank: TargetRank::Position(position),
            target_value_usd: 10.0,
            target_supply_percentage: 0.5,
            portfolio_total_value: 100.0,
            portfolio_value_excl_gas_and_stable: 100.0,
            is_conspiracy_alpha: false,
            is_conspiracy_beta: false,
        };

        // Top holder with a deep target position, low holder with a shallow one
        let stats = engine().statistics(&[record(1, 40), record(20, 2)]);

        assert_eq!(stats.ranked_within_cutoff, 1);
        assert_eq!(stats.average_rank, Some(2.0));
        assert_eq!(stats.median_rank, Some(2.0));
        assert_eq!(stats.buckets[10].holders, 1);
    }

    #[test]
    fn test_empty_statistics() {
        let stats = engine().statistics(&[]);
        assert_eq!(stats.average_rank, None);
        assert_eq!(stats.median_rank, None);
        assert!(stats.buckets.iter().all(|b| b.holders == 0));
    }

    #[test]
    fn test_bucket_parsing() {
        assert_eq!("3".parse::<RankBucket>().unwrap(), RankBucket::Rank(3));
        assert_eq!(">10".parse::<RankBucket>().unwrap(), RankBucket::Beyond);
        assert_eq!("Conspiracy".parse::<RankBucket>().unwrap(), RankBucket::Conspiracy);
        assert!(matches!("0".parse::<RankBucket>(), Err(Error::InvalidBucket(_))));
        assert!(matches!("11".parse::<RankBucket>(), Err(Error::InvalidBucket(_))));

        let json = serde_json::to_string(&RankBucket::Beyond).unwrap();
        assert_eq!(json, "\">10\"");
    }
}
