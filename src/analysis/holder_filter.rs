//! Holder filter - drop non-investor accounts before portfolio fetching
//!
//! Liquidity pools, exchange hot wallets and known pool addresses dominate
//! holder lists but say nothing about whale behaviour. They are marked as
//! excluded and skipped by every later stage.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::analysis::types::{short_address, Holder};
use crate::error::{Error, Result};
use crate::provider::HolderRecord;

/// Configuration for holder filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderFilterConfig {
    /// Provider tags (regex) that mark a holder as pool/exchange
    #[serde(default = "default_excluded_tag_patterns")]
    pub excluded_tag_patterns: Vec<String>,

    /// Addresses always treated as pools
    #[serde(default)]
    pub known_pools: Vec<String>,
}

fn default_excluded_tag_patterns() -> Vec<String> {
    vec![r"(?i)^(liquidity[_ -]?pool|lp|pool|amm|dex)$".into(), r"(?i)^(exchange|cex)$".into()]
}

impl Default for HolderFilterConfig {
    fn default() -> Self {
        Self {
            excluded_tag_patterns: default_excluded_tag_patterns(),
            known_pools: Vec::new(),
        }
    }
}

/// Marks pool and exchange holders as excluded
pub struct HolderFilter {
    tag_patterns: Vec<Regex>,
    known_pools: HashSet<String>,
}

impl HolderFilter {
    /// Build a filter, compiling the tag patterns
    pub fn new(config: &HolderFilterConfig) -> Result<Self> {
        let tag_patterns = config
            .excluded_tag_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| Error::Config(format!("Invalid excluded tag pattern {}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tag_patterns,
            known_pools: config.known_pools.iter().cloned().collect(),
        })
    }

    /// Check whether a holder record is a pool or exchange
    pub fn is_excluded(&self, record: &HolderRecord) -> bool {
        if self.known_pools.contains(&record.address) {
            return true;
        }
        record
            .tags
            .iter()
            .any(|tag| self.tag_patterns.iter().any(|p| p.is_match(tag.trim())))
    }

    /// Turn provider rows into ranked holders with the excluded flag set
    ///
    /// Ranks follow provider order and are assigned before filtering, so a
    /// whale keeps its supply rank even when pools above it are dropped.
    pub fn classify(&self, records: Vec<HolderRecord>) -> Vec<Holder> {
        let holders: Vec<Holder> = records
            .into_iter()
            .enumerate()
            .map(|(idx, record)| {
                let excluded = self.is_excluded(&record);
                if excluded {
                    debug!(holder = %short_address(&record.address), tags = ?record.tags, "Excluding non-investor holder");
                }
                Holder {
                    address: record.address,
                    rank: idx + 1,
                    hold_amount: record.hold_amount,
                    hold_supply_percentage: record.hold_supply_percentage,
                    tags: record.tags,
                    excluded,
                }
            })
            .collect();

        let excluded = holders.iter().filter(|h| h.excluded).count();
        info!(
            total = holders.len(),
            excluded,
            remaining = holders.len() - excluded,
            "Holder list filtered"
        );
        holders
    }

    /// Holders that survive filtering, in original rank order
    pub fn analyzable(holders: &[Holder]) -> Vec<Holder> {
        holders.iter().filter(|h| !h.excluded).cloned().collect()
    }
}
