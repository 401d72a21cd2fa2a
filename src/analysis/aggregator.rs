//! Token aggregator - fold whale portfolios into per-token statistics
//!
//! Each holder's duplicate entries for a token are collapsed first, so a
//! holder counts exactly once per token. The fold then builds one aggregate
//! per token and a noise filter drops thinly held or low-value tokens. The
//! target token always survives the filter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::analysis::types::{short_address, HolderDetail, HolderPortfolio, Holding, TokenAggregate};
use crate::error::{Error, Result};

/// Configuration for the noise filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Tokens held by fewer whales are dropped
    #[serde(default = "default_min_holder_count")]
    pub min_holder_count: usize,

    /// Tokens with less combined value are dropped
    #[serde(default = "default_min_total_value_usd")]
    pub min_total_value_usd: f64,
}

fn default_min_holder_count() -> usize {
    5
}
fn default_min_total_value_usd() -> f64 {
    50.0
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_holder_count: default_min_holder_count(),
            min_total_value_usd: default_min_total_value_usd(),
        }
    }
}

/// Ordering for token table views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSortKey {
    /// Combined USD value, largest first
    #[default]
    Value,
    /// Number of whales holding the token, most first
    Holders,
}

impl FromStr for TokenSortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "value" | "total_value" => Ok(TokenSortKey::Value),
            "holders" | "holder_count" => Ok(TokenSortKey::Holders),
            other => Err(Error::Config(format!("Unknown token sort key: {}", other))),
        }
    }
}

impl fmt::Display for TokenSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSortKey::Value => write!(f, "value"),
            TokenSortKey::Holders => write!(f, "holders"),
        }
    }
}

/// Merges holder portfolios into token aggregates
pub struct TokenAggregator {
    config: AggregatorConfig,
}

impl TokenAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Aggregate portfolios and apply the noise filter, ordered by value
    pub fn aggregate(&self, target_token: &str, portfolios: &[HolderPortfolio]) -> Vec<TokenAggregate> {
        let folded = self.fold(target_token, portfolios);
        self.filter_noise(folded)
    }

    /// Aggregate portfolios without the noise filter, ordered by value
    pub fn fold(&self, target_token: &str, portfolios: &[HolderPortfolio]) -> Vec<TokenAggregate> {
        let mut tokens: HashMap<String, TokenAggregate> = HashMap::new();

        for portfolio in portfolios {
            for holding in collapse_holdings(&portfolio.holdings) {
                let entry = tokens.entry(holding.token_address.clone()).or_insert_with(|| {
                    TokenAggregate::new(
                        &holding.token_address,
                        &holding.symbol,
                        &holding.name,
                        holding.token_address == target_token,
                    )
                });

                if entry.symbol.is_empty() && !holding.symbol.is_empty() {
                    entry.symbol = holding.symbol.clone();
                }
                if entry.name.is_empty() && !holding.name.is_empty() {
                    entry.name = holding.name.clone();
                }

                entry.holder_count += 1;
                entry.total_value_usd += holding.value_usd;
                entry.holders.push(HolderDetail {
                    holder_rank: portfolio.holder.rank,
                    holder_address: portfolio.holder.address.clone(),
                    balance: holding.balance,
                    value_usd: holding.value_usd,
                });
            }
        }

        let mut aggregates: Vec<TokenAggregate> = tokens.into_values().collect();
        sort_aggregates(&mut aggregates, TokenSortKey::Value);
        aggregates
    }

    /// Drop tokens below the holder-count or value floor (never the target)
    pub fn filter_noise(&self, aggregates: Vec<TokenAggregate>) -> Vec<TokenAggregate> {
        let before = aggregates.len();
        let kept: Vec<TokenAggregate> = aggregates
            .into_iter()
            .filter(|t| {
                t.is_target_token
                    || (t.holder_count >= self.config.min_holder_count
                        && t.total_value_usd >= self.config.min_total_value_usd)
            })
            .collect();

        debug!(before, after = kept.len(), "Token noise filter applied");
        kept
    }
}

/// Collapse one holder's entries so each token appears once
///
/// Balances and values are summed; the first non-zero price is kept. Order
/// follows first appearance. Entries with non-finite numbers are dropped.
pub fn collapse_holdings(holdings: &[Holding]) -> Vec<Holding> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut merged: Vec<Holding> = Vec::with_capacity(holdings.len());

    for holding in holdings {
        if !holding.balance.is_finite() || !holding.value_usd.is_finite() {
            warn!(
                holder = %short_address(&holding.holder_address),
                token = %short_address(&holding.token_address),
                "Skipping holding with non-finite values"
            );
            continue;
        }

        match index.get(holding.token_address.as_str()) {
            Some(&pos) => {
                let existing = &mut merged[pos];
                existing.balance += holding.balance;
                existing.value_usd += holding.value_usd;
                if existing.price_usd <= 0.0 && holding.price_usd > 0.0 {
                    existing.price_usd = holding.price_usd;
                }
            }
            None => {
                index.insert(holding.token_address.as_str(), merged.len());
                merged.push(holding.clone());
            }
        }
    }

    merged
}

/// Sort aggregates in place by the given key
///
/// Ties fall back to the other metric and then the token address, so the
/// order is stable across runs.
pub fn sort_aggregates(aggregates: &mut [TokenAggregate], key: TokenSortKey) {
    aggregates.sort_by(|a, b| {
        let by_value = b
            .total_value_usd
            .partial_cmp(&a.total_value_usd)
            .unwrap_or(std::cmp::Ordering::Equal);
        let by_holders = b.holder_count.cmp(&a.holder_count);
        let primary = match key {
            TokenSortKey::Value => by_value.then(by_holders),
            TokenSortKey::Holders => by_holders.then(by_value),
        };
        primary.then_with(|| a.token_address.cmp(&b.token_address))
    });
}

/// Ordered view over aggregates without touching the underlying list
pub fn sorted_view(aggregates: &[TokenAggregate], key: TokenSortKey) -> Vec<TokenAggregate> {
    let mut view = aggregates.to_vec();
    sort_aggregates(&mut view, key);
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::Holder;
    use std::collections::HashSet;

    fn holding(holder: &str, token: &str, value: f64) -> Holding {
        Holding {
            holder_address: holder.to_string(),
            token_address: token.to_string(),
            symbol: token.to_uppercase(),
            name: format!("{} token", token),
            balance: value,
            price_usd: 1.0,
            value_usd: value,
        }
    }

    fn portfolio(rank: usize, address: &str, holdings: &[(&str, f64)]) -> HolderPortfolio {
        HolderPortfolio::new(
            Holder {
                address: address.to_string(),
                rank,
                hold_amount: 1000.0,
                hold_supply_percentage: 1.0,
                tags: vec![],
                excluded: false,
            },
            holdings.iter().map(|(t, v)| holding(address, t, *v)).collect(),
        )
    }

    fn relaxed() -> TokenAggregator {
        TokenAggregator::new(AggregatorConfig {
            min_holder_count: 1,
            min_total_value_usd: 0.0,
        })
    }

    #[test]
    fn test_split_balances_count_once() {
        let portfolios = vec![
            portfolio(1, "w1", &[("tgt", 100.0), ("abc", 10.0), ("abc", 15.0)]),
            portfolio(2, "w2", &[("abc", 5.0)]),
        ];

        let tokens = relaxed().aggregate("tgt", &portfolios);
        let abc = tokens.iter().find(|t| t.token_address == "abc").unwrap();

        assert_eq!(abc.holder_count, 2);
        assert_eq!(abc.total_value_usd, 30.0);
        assert_eq!(abc.holders[0].value_usd, 25.0);
        assert_eq!(abc.holders[0].holder_rank, 1);
    }

    #[test]
    fn test_holder_count_matches_distinct_holders() {
        let portfolios = vec![
            portfolio(1, "w1", &[("a", 1.0), ("a", 1.0), ("b", 2.0)]),
            portfolio(2, "w2", &[("a", 3.0), ("b", 1.0), ("b", 1.0)]),
            portfolio(3, "w3", &[("a", 4.0)]),
        ];

        for token in relaxed().aggregate("tgt", &portfolios) {
            let distinct: HashSet<_> = token.holders.iter().map(|h| &h.holder_address).collect();
            assert_eq!(token.holder_count, distinct.len());
            assert_eq!(token.holder_count, token.holders.len());
        }
    }

    #[test]
    fn test_noise_filter_keeps_target() {
        let aggregator = TokenAggregator::new(AggregatorConfig::default());
        let mut portfolios = Vec::new();
        for i in 1..=5 {
            portfolios.push(portfolio(i, &format!("w{}", i), &[("popular", 20.0), ("dust", 0.5)]));
        }
        portfolios.push(portfolio(6, "w6", &[("tgt", 1.0), ("rare", 1_000.0)]));

        let tokens = aggregator.aggregate("tgt", &portfolios);
        let names: Vec<&str> = tokens.iter().map(|t| t.token_address.as_str()).collect();

        assert!(names.contains(&"popular"));
        assert!(names.contains(&"tgt"));
        assert!(!names.contains(&"dust"), "5 holders but only $2.50 total");
        assert!(!names.contains(&"rare"), "single holder");
        assert!(tokens.iter().find(|t| t.token_address == "tgt").unwrap().is_target_token);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let portfolios = vec![
            portfolio(1, "w1", &[("a", 10.0), ("b", 2.5)]),
            portfolio(2, "w2", &[("a", 7.0), ("c", 1.0)]),
        ];
        let aggregator = relaxed();

        let first = aggregator.aggregate("a", &portfolios);
        let second = aggregator.aggregate("a", &portfolios);

        assert_eq!(first, second);
    }

    #[test]
    fn test_sort_views_do_not_mutate() {
        let portfolios = vec![
            portfolio(1, "w1", &[("big", 1_000.0), ("wide", 1.0)]),
            portfolio(2, "w2", &[("wide", 1.0)]),
            portfolio(3, "w3", &[("wide", 1.0)]),
        ];
        let tokens = relaxed().aggregate("tgt", &portfolios);
        let original = tokens.clone();

        let by_holders = sorted_view(&tokens, TokenSortKey::Holders);
        let by_value = sorted_view(&tokens, TokenSortKey::Value);

        assert_eq!(by_holders[0].token_address, "wide");
        assert_eq!(by_value[0].token_address, "big");
        assert_eq!(tokens, original);
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!("value".parse::<TokenSortKey>().unwrap(), TokenSortKey::Value);
        assert_eq!("Holders".parse::<TokenSortKey>().unwrap(), TokenSortKey::Holders);
        assert!("price".parse::<TokenSortKey>().is_err());
    }
}
