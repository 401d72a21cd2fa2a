//! Address clustering - group whales that hold the same set of tokens
//!
//! Clusters are built greedily from the addresses with the widest portfolios:
//! - the seed gathers every unassigned address sharing enough tokens with it
//! - the common set is recomputed over all members, not just against the seed
//! - a candidate that falls below either bound is discarded whole
//!
//! The native gas token is held by nearly everyone and is ignored.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use crate::analysis::types::{short_address, TokenAggregate};

/// Configuration for cluster detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Tokens every member must hold
    #[serde(default = "default_min_common_tokens")]
    pub min_common_tokens: usize,

    /// Smallest accepted cluster
    #[serde(default = "default_min_addresses")]
    pub min_addresses: usize,

    /// Largest cluster (prevent runaway growth)
    #[serde(default = "default_max_addresses")]
    pub max_addresses: usize,
}

fn default_min_common_tokens() -> usize {
    3
}
fn default_min_addresses() -> usize {
    2
}
fn default_max_addresses() -> usize {
    50
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_common_tokens: default_min_common_tokens(),
            min_addresses: default_min_addresses(),
            max_addresses: default_max_addresses(),
        }
    }
}

/// Combined value of one common token across cluster members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTokenValue {
    pub token_address: String,
    pub symbol: String,
    pub value_usd: f64,
}

/// A group of addresses sharing a set of tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Position-based id, `cluster-1` is the strongest
    pub id: String,
    pub addresses: BTreeSet<String>,
    pub common_tokens: BTreeSet<String>,
    /// Per common token, largest first
    pub token_values: Vec<ClusterTokenValue>,
    pub total_value_usd: f64,
    pub avg_value_per_address: f64,
    /// `|common_tokens| * |addresses|`
    pub score: usize,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.addresses.len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }
}

/// Exact intersection of the token sets of every member
///
/// Returns a fresh set; members without a known token set make the result
/// empty.
pub fn common_tokens(
    members: &BTreeSet<String>,
    address_tokens: &HashMap<String, BTreeSet<String>>,
) -> BTreeSet<String> {
    let mut sets = members.iter().map(|m| address_tokens.get(m));

    let mut common = match sets.next() {
        Some(Some(first)) => first.clone(),
        _ => return BTreeSet::new(),
    };

    for set in sets {
        match set {
            Some(tokens) => common.retain(|t| tokens.contains(t)),
            None => return BTreeSet::new(),
        }
        if common.is_empty() {
            break;
        }
    }

    common
}

/// Detects clusters of addresses with overlapping holdings
pub struct ClusterEngine {
    config: ClusterConfig,
    gas_token: String,
}

impl ClusterEngine {
    pub fn new(config: ClusterConfig, gas_token: impl Into<String>) -> Self {
        Self {
            config,
            gas_token: gas_token.into(),
        }
    }

    /// Find clusters using the configured bounds
    pub fn find_clusters(&self, tokens: &[TokenAggregate]) -> Vec<Cluster> {
        self.find_clusters_with(
            tokens,
            self.config.min_common_tokens,
            self.config.min_addresses,
            self.config.max_addresses,
        )
    }

    /// Find clusters with explicit bounds
    pub fn find_clusters_with(
        &self,
        tokens: &[TokenAggregate],
        min_common_tokens: usize,
        min_addresses: usize,
        max_addresses: usize,
    ) -> Vec<Cluster> {
        let min_common_tokens = min_common_tokens.max(1);
        let address_tokens = self.address_tokens(tokens);
        let values = token_values(tokens, &self.gas_token);

        let mut seeds: Vec<(&String, &BTreeSet<String>)> = address_tokens.iter().collect();
        seeds.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

        let mut assigned: HashSet<String> = HashSet::new();
        let mut clusters = Vec::new();

        for (seed, seed_tokens) in &seeds {
            if assigned.contains(*seed) || seed_tokens.len() < min_common_tokens {
                continue;
            }

            let mut members: BTreeSet<String> = BTreeSet::new();
            members.insert((*seed).clone());

            for (other, other_tokens) in &seeds {
                if members.len() >= max_addresses {
                    break;
                }
                if other == seed || assigned.contains(*other) {
                    continue;
                }
                if seed_tokens.intersection(other_tokens).count() >= min_common_tokens {
                    members.insert((*other).clone());
                }
            }

            let common = common_tokens(&members, &address_tokens);
            if common.len() < min_common_tokens || members.len() < min_addresses {
                debug!(
                    seed = %short_address(seed),
                    candidates = members.len(),
                    common = common.len(),
                    "Discarding cluster candidate"
                );
                continue;
            }

            assigned.extend(members.iter().cloned());
            clusters.push(build_cluster(members, common, &values));
        }

        clusters.sort_by(|a, b| {
            b.score.cmp(&a.score).then_with(|| {
                b.total_value_usd
                    .partial_cmp(&a.total_value_usd)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        for (idx, cluster) in clusters.iter_mut().enumerate() {
            cluster.id = format!("cluster-{}", idx + 1);
        }

        info!(
            addresses = address_tokens.len(),
            clusters = clusters.len(),
            "Cluster detection complete"
        );
        clusters
    }

    /// Token set per address, gas token excluded
    fn address_tokens(&self, tokens: &[TokenAggregate]) -> HashMap<String, BTreeSet<String>> {
        let mut map: HashMap<String, BTreeSet<String>> = HashMap::new();
        for token in tokens {
            if token.token_address == self.gas_token {
                continue;
            }
            for holder in &token.holders {
                map.entry(holder.holder_address.clone())
                    .or_default()
                    .insert(token.token_address.clone());
            }
        }
        map
    }
}

/// (token, holder) -> (symbol, value) lookup used for per-token breakdowns
type ValueIndex = BTreeMap<String, (String, HashMap<String, f64>)>;

fn token_values(tokens: &[TokenAggregate], gas_token: &str) -> ValueIndex {
    tokens
        .iter()
        .filter(|t| t.token_address != gas_token)
        .map(|t| {
            let per_holder = t
                .holders
                .iter()
                .map(|h| (h.holder_address.clone(), h.value_usd))
                .collect();
            (t.token_address.clone(), (t.symbol.clone(), per_holder))
        })
        .collect()
}

fn build_cluster(addresses: BTreeSet<String>, common: BTreeSet<String>, values: &ValueIndex) -> Cluster {
    let mut token_values: Vec<ClusterTokenValue> = common
        .iter()
        .map(|token| {
            let (symbol, value_usd) = match values.get(token) {
                Some((symbol, per_holder)) => (
                    symbol.clone(),
                    addresses.iter().filter_map(|a| per_holder.get(a)).sum::<f64>(),
                ),
                None => (String::new(), 0.0),
            };
            ClusterTokenValue {
                token_address: token.clone(),
                symbol,
                value_usd,
            }
        })
        .collect();
    token_values.sort_by(|a, b| {
        b.value_usd
            .partial_cmp(&a.value_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.token_address.cmp(&b.token_address))
    });

    let total_value_usd: f64 = token_values.iter().map(|t| t.value_usd).sum();
    let score = common.len() * addresses.len();

    Cluster {
        id: String::new(),
        avg_value_per_address: total_value_usd / addresses.len() as f64,
        addresses,
        common_tokens: common,
        token_values,
        total_value_usd,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::HolderDetail;

    const GAS: &str = "gas";

    /// Build aggregates from (address, tokens) rows, each holding worth $10
    fn aggregates(rows: &[(&str, &[&str])]) -> Vec<TokenAggregate> {
        let mut by_token: BTreeMap<String, TokenAggregate> = BTreeMap::new();
        for (rank, (address, tokens)) in rows.iter().enumerate() {
            for token in tokens.iter() {
                let agg = by_token
                    .entry(token.to_string())
                    .or_insert_with(|| TokenAggregate::new(token, &token.to_uppercase(), token, false));
                agg.holder_count += 1;
                agg.total_value_usd += 10.0;
                agg.holders.push(HolderDetail {
                    holder_rank: rank + 1,
                    holder_address: address.to_string(),
                    balance: 1.0,
                    value_usd: 10.0,
                });
            }
        }
        by_token.into_values().collect()
    }

    fn engine() -> ClusterEngine {
        ClusterEngine::new(ClusterConfig::default(), GAS)
    }

    #[test]
    fn test_pairwise_overlap_is_not_enough() {
        let tokens = aggregates(&[
            ("w1", &["A", "B", "C"]),
            ("w2", &["A", "B", "C", "D"]),
            ("w3", &["A", "B", "E"]),
        ]);

        let clusters = engine().find_clusters_with(&tokens, 3, 3, 50);
        assert!(clusters.is_empty());

        let pairs = engine().find_clusters_with(&tokens, 3, 2, 50);
        assert_eq!(pairs.len(), 1);
        assert!(!pairs[0].contains("w3"));
        assert_eq!(
            pairs[0].common_tokens,
            ["A", "B", "C"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn test_candidate_rejected_when_intersection_shrinks() {
        let tokens = aggregates(&[
            ("w1", &["A", "B", "C", "D"]),
            ("w2", &["A", "B", "C"]),
            ("w3", &["B", "C", "D"]),
        ]);

        // Both share 3 with the seed, but all three only share {B, C}
        let clusters = engine().find_clusters_with(&tokens, 3, 3, 50);
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_common_tokens_is_exact_intersection() {
        let tokens = aggregates(&[
            ("w1", &["A", "B", "C", "D", "E"]),
            ("w2", &["A", "B", "C", "D"]),
            ("w3", &["A", "B", "C", "E"]),
            ("w4", &["X", "Y"]),
        ]);
        let engine = engine();
        let address_tokens = engine.address_tokens(&tokens);

        for cluster in engine.find_clusters(&tokens) {
            let expected = common_tokens(&cluster.addresses, &address_tokens);
            assert_eq!(cluster.common_tokens, expected);
            for address in &cluster.addresses {
                assert!(cluster.common_tokens.is_subset(&address_tokens[address]));
            }
            assert_eq!(cluster.score, cluster.common_tokens.len() * cluster.size());
        }
    }

    #[test]
    fn test_no_address_in_two_clusters() {
        let tokens = aggregates(&[
            ("w1", &["A", "B", "C", "D"]),
            ("w2", &["A", "B", "C", "D"]),
            ("w3", &["A", "B", "C"]),
            ("w4", &["E", "F", "G"]),
            ("w5", &["E", "F", "G"]),
            ("w6", &["A", "B", "C", "E", "F", "G"]),
        ]);

        let clusters = engine().find_clusters(&tokens);
        assert!(!clusters.is_empty());

        let mut seen = HashSet::new();
        for cluster in &clusters {
            assert!(cluster.size() >= 2);
            assert!(cluster.common_tokens.len() >= 3);
            for address in &cluster.addresses {
                assert!(seen.insert(address.clone()), "{} in two clusters", address);
            }
        }
    }

    #[test]
    fn test_gas_token_ignored() {
        let tokens = aggregates(&[("w1", &["A", "B", GAS]), ("w2", &["A", "B", GAS])]);

        assert!(engine().find_clusters(&tokens).is_empty());

        let clusters = engine().find_clusters_with(&tokens, 2, 2, 50);
        assert_eq!(clusters.len(), 1);
        assert!(!clusters[0].common_tokens.contains(GAS));
    }

    #[test]
    fn test_max_addresses_caps_cluster() {
        let rows: Vec<(String, Vec<&str>)> = (0..10)
            .map(|i| (format!("w{:02}", i), vec!["A", "B", "C"]))
            .collect();
        let borrowed: Vec<(&str, &[&str])> = rows.iter().map(|(a, t)| (a.as_str(), t.as_slice())).collect();
        let tokens = aggregates(&borrowed);

        let clusters = engine().find_clusters_with(&tokens, 3, 2, 4);
        let sizes: Vec<usize> = clusters.iter().map(|c| c.size()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(clusters[0].id, "cluster-1");
        assert_eq!(clusters[2].id, "cluster-3");
    }

    #[test]
    fn test_cluster_values_and_ordering() {
        let tokens = aggregates(&[
            ("w1", &["A", "B", "C", "D"]),
            ("w2", &["A", "B", "C", "D"]),
            ("w3", &["A", "B", "C", "D"]),
            ("w4", &["X", "Y", "Z"]),
            ("w5", &["X", "Y", "Z"]),
        ]);

        let clusters = engine().find_clusters(&tokens);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].score, 12);
        assert_eq!(clusters[1].score, 6);
        assert_eq!(clusters[0].total_value_usd, 120.0);
        assert_eq!(clusters[0].avg_value_per_address, 40.0);
        assert_eq!(clusters[0].token_values.len(), 4);
        assert_eq!(clusters[0].token_values[0].value_usd, 30.0);
    }
}
