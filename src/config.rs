//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Re-export component configs
pub use crate::analysis::aggregator::AggregatorConfig;
pub use crate::analysis::cache::CacheConfig;
pub use crate::analysis::clustering::ClusterConfig;
pub use crate::analysis::fetcher::FetcherConfig;
pub use crate::analysis::holder_filter::HolderFilterConfig;
pub use crate::analysis::ranking::RankingConfig;
pub use crate::provider::http::ProviderConfig;

/// Main configuration structure
///
/// Loaded once and shared as an immutable snapshot; reloading builds a new one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub holder_filter: HolderFilterConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub clustering: ClusterConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Tokens that are never analyzed
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// Chain-specific token identities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Native gas token (wrapped SOL)
    #[serde(default = "default_gas_token")]
    pub gas_token: String,

    /// Stablecoin mints excluded from beta concentration
    #[serde(default = "default_stablecoins")]
    pub stablecoins: Vec<String>,
}

fn default_gas_token() -> String {
    "So11111111111111111111111111111111111111112".to_string()
}

fn default_stablecoins() -> Vec<String> {
    vec![
        // USDC
        "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
        // USDT
        "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB".to_string(),
    ]
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            gas_token: default_gas_token(),
            stablecoins: default_stablecoins(),
        }
    }
}

impl ChainConfig {
    pub fn is_gas_or_stable(&self, token_address: &str) -> bool {
        token_address == self.gas_token || self.stablecoins.iter().any(|s| s == token_address)
    }
}

/// Audit trail of completed analyses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory for `{token}_{unix_ts}.json` files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl AuditConfig {
    /// Directory to write to, if auditing is on
    pub fn target_dir(&self) -> Option<&Path> {
        if self.enabled {
            self.dir.as_deref()
        } else {
            None
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WHALE__)
            .add_source(
                config::Environment::with_prefix("WHALE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("blacklist")
                    .with_list_parse_key("chain.stablecoins")
                    .with_list_parse_key("holder_filter.known_pools"),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.concurrency == 0 {
            anyhow::bail!("fetcher.concurrency must be at least 1");
        }

        if self.fetcher.max_attempts == 0 || self.fetcher.max_attempts > 10 {
            anyhow::bail!(
                "fetcher.max_attempts must be between 1 and 10, got {}",
                self.fetcher.max_attempts
            );
        }

        let multiplier = self.fetcher.rate_limit_multiplier;
        if !(1.0..=10.0).contains(&multiplier) {
            anyhow::bail!(
                "fetcher.rate_limit_multiplier must be between 1 and 10, got {}",
                multiplier
            );
        }

        if self.fetcher.retry_min_delay_ms > self.fetcher.retry_max_delay_ms {
            anyhow::bail!(
                "fetcher.retry_min_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.fetcher.retry_min_delay_ms,
                self.fetcher.retry_max_delay_ms
            );
        }

        if self.clustering.min_common_tokens == 0 {
            anyhow::bail!("clustering.min_common_tokens must be at least 1");
        }

        if self.clustering.min_addresses < 2 {
            anyhow::bail!("clustering.min_addresses must be at least 2");
        }

        if self.clustering.max_addresses < self.clustering.min_addresses {
            anyhow::bail!(
                "clustering.max_addresses ({}) is below min_addresses ({})",
                self.clustering.max_addresses,
                self.clustering.min_addresses
            );
        }

        let threshold = self.ranking.conspiracy_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            anyhow::bail!("ranking.conspiracy_threshold must be between 0 and 1, got {}", threshold);
        }

        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be positive");
        }

        // Compile regex to check
        for pattern in &self.holder_filter.excluded_tag_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid excluded_tag_pattern regex: {}", pattern))?;
        }

        if self.audit.enabled && self.audit.dir.is_none() {
            tracing::warn!("Audit enabled without audit.dir, nothing will be written");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Provider:
    holders_url: {}
    portfolio_url: {}
    api_key: {}
    holder_limit: {}
    portfolio_limit: {}
    timeout: {}ms
  Chain:
    gas_token: {}
    stablecoins: {}
  Fetcher:
    concurrency: {}
    max_attempts: {}
    retry_delay: {}-{}ms
    call_timeout: {}s
  Aggregator:
    min_holder_count: {}
    min_total_value: ${}
  Clustering:
    min_common_tokens: {}
    addresses: {}-{}
  Ranking:
    holder_detail_cutoff: {}
    conspiracy_threshold: {}
  Cache:
    ttl: {}s
    sweep_interval: {}s
  Audit:
    enabled: {}
    dir: {}
  Blacklist: {} tokens
"#,
            mask_url(&self.provider.holders_url),
            mask_url(&self.provider.portfolio_url),
            if self.provider.api_key.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.provider.holder_limit,
            self.provider.portfolio_limit,
            self.provider.request_timeout_ms,
            self.chain.gas_token,
            self.chain.stablecoins.len(),
            self.fetcher.concurrency,
            self.fetcher.max_attempts,
            self.fetcher.retry_min_delay_ms,
            self.fetcher.retry_max_delay_ms,
            self.fetcher.call_timeout_secs,
            self.aggregator.min_holder_count,
            self.aggregator.min_total_value_usd,
            self.clustering.min_common_tokens,
            self.clustering.min_addresses,
            self.clustering.max_addresses,
            self.ranking.holder_detail_cutoff,
            self.ranking.conspiracy_threshold,
            self.cache.ttl_secs,
            self.cache.sweep_interval_secs,
            self.audit.enabled,
            self.audit
                .dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string()),
            self.blacklist.len(),
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetcher.concurrency, 5);
        assert_eq!(config.aggregator.min_holder_count, 5);
        assert_eq!(config.clustering.min_common_tokens, 3);
        assert_eq!(config.ranking.holder_detail_cutoff, 15);
        assert!(config.chain.is_gas_or_stable("So11111111111111111111111111111111111111112"));
        assert!(!config.chain.is_gas_or_stable("random_mint"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.fetcher.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetcher.retry_min_delay_ms = 10_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetcher.max_attempts = 100;
        assert!(config.validate().is_err());

        for multiplier in [0.5, 1e300, f64::NAN, f64::INFINITY] {
            let mut config = Config::default();
            config.fetcher.rate_limit_multiplier = multiplier;
            assert!(config.validate().is_err(), "accepted multiplier {}", multiplier);
        }

        let mut config = Config::default();
        config.clustering.max_addresses = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ranking.conspiracy_threshold = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.holder_filter.excluded_tag_patterns = vec!["[".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
blacklist = ["scam_mint"]

[fetcher]
concurrency = 3

[clustering]
min_common_tokens = 4
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.fetcher.concurrency, 3);
        assert_eq!(config.fetcher.max_attempts, 3);
        assert_eq!(config.clustering.min_common_tokens, 4);
        assert_eq!(config.blacklist, vec!["scam_mint".to_string()]);
    }

    #[test]
    fn test_masked_display_hides_key() {
        let mut config = Config::default();
        config.provider.api_key = "super-secret".into();
        config.provider.holders_url = "https://api.example.com/holders?key=secret".into();

        let shown = config.masked_display();
        assert!(!shown.contains("super-secret"));
        assert!(!shown.contains("key=secret"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }
}
