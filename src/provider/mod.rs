//! Data provider seams
//!
//! The analysis engine never talks to an API directly. It consumes:
//! - a holder list provider (ranked holders of a token)
//! - a portfolio provider (token holdings of one address)
//! - a blacklist provider (tokens that must not be analyzed)
//!
//! `HttpProvider` implements the first two against JSON endpoints;
//! tests plug in scripted mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::Result;

pub mod http;

pub use http::HttpProvider;

/// Holder row as returned by a holder list provider, in rank order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderRecord {
    pub address: String,
    pub hold_amount: f64,
    pub hold_supply_percentage: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Portfolio row as returned by a portfolio provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    pub balance: f64,
    pub price_usd: f64,
    pub value_usd: f64,
}

/// Source of ranked holder lists
#[async_trait]
pub trait HolderListProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Fetch holders of a token, largest first
    async fn get_holders(&self, token_address: &str) -> Result<Vec<HolderRecord>>;
}

/// Source of per-address portfolios
#[async_trait]
pub trait PortfolioProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Fetch the token holdings of one address
    async fn get_portfolio(&self, address: &str) -> Result<Vec<PortfolioEntry>>;
}

/// Token blacklist lookup
#[async_trait]
pub trait BlacklistProvider: Send + Sync {
    async fn is_blacklisted(&self, token_address: &str) -> bool;
}

/// Fixed blacklist loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticBlacklist {
    tokens: HashSet<String>,
}

impl StaticBlacklist {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.trim().is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl BlacklistProvider for StaticBlacklist {
    async fn is_blacklisted(&self, token_address: &str) -> bool {
        self.tokens.contains(token_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_blacklist() {
        let blacklist = StaticBlacklist::new(vec!["scam_mint", "", "rug_mint"]);
        assert_eq!(blacklist.len(), 2);
        assert!(blacklist.is_blacklisted("scam_mint").await);
        assert!(blacklist.is_blacklisted("rug_mint").await);
        assert!(!blacklist.is_blacklisted("good_mint").await);
    }
}
