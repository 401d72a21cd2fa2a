//! Shared data structures for holder analysis

use serde::{Deserialize, Serialize};

/// A ranked holder of the target token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub address: String,
    /// 1-based position in the provider's list (by supply held)
    pub rank: usize,
    pub hold_amount: f64,
    /// Share of circulating supply, in percent
    pub hold_supply_percentage: f64,
    /// Provider labels (pool, exchange, ...)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Set by the holder filter for pools, exchanges and known pool addresses
    pub excluded: bool,
}

/// One token position inside a holder's portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub holder_address: String,
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    pub balance: f64,
    pub price_usd: f64,
    pub value_usd: f64,
}

/// A holder together with the portfolio that was fetched for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderPortfolio {
    pub holder: Holder,
    pub holdings: Vec<Holding>,
}

impl HolderPortfolio {
    pub fn new(holder: Holder, holdings: Vec<Holding>) -> Self {
        Self { holder, holdings }
    }
}

/// Per-holder contribution to a token aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderDetail {
    pub holder_rank: usize,
    pub holder_address: String,
    pub balance: f64,
    pub value_usd: f64,
}

/// Cross-holder statistics for one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAggregate {
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    pub total_value_usd: f64,
    /// Always equals the number of distinct addresses in `holders`
    pub holder_count: usize,
    pub holders: Vec<HolderDetail>,
    pub is_target_token: bool,
}

impl TokenAggregate {
    pub fn new(token_address: &str, symbol: &str, name: &str, is_target_token: bool) -> Self {
        Self {
            token_address: token_address.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            total_value_usd: 0.0,
            holder_count: 0,
            holders: Vec::new(),
            is_target_token,
        }
    }

    /// Average value held per contributing holder
    pub fn avg_value_per_holder(&self) -> f64 {
        if self.holder_count == 0 {
            0.0
        } else {
            self.total_value_usd / self.holder_count as f64
        }
    }

    /// Lightweight row for table views
    pub fn summary(&self) -> TokenSummary {
        TokenSummary {
            token_address: self.token_address.clone(),
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            total_value_usd: self.total_value_usd,
            holder_count: self.holder_count,
            avg_value_per_holder: self.avg_value_per_holder(),
            is_target_token: self.is_target_token,
        }
    }
}

/// Token table row handed to presentation layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSummary {
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    pub total_value_usd: f64,
    pub holder_count: usize,
    pub avg_value_per_holder: f64,
    pub is_target_token: bool,
}

/// Shorten an address for log fields
pub fn short_address(address: &str) -> &str {
    match address.char_indices().nth(8) {
        Some((idx, _)) => &address[..idx],
        None => address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_address() {
        assert_eq!(short_address("So11111111111111111111111111111111111111112"), "So111111");
        assert_eq!(short_address("abc"), "abc");
    }

    #[test]
    fn test_avg_value_per_holder_empty() {
        let agg = TokenAggregate::new("mint", "SYM", "Name", false);
        assert_eq!(agg.avg_value_per_holder(), 0.0);
    }
}
