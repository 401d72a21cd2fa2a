//! JSON-over-HTTP provider client
//!
//! Talks to two endpoints:
//! - `GET {holders_url}/{token}?limit=N` for ranked holders
//! - `GET {portfolio_url}/{address}?limit=N` for portfolio holdings
//!
//! Both respond with either a bare JSON array or an envelope
//! `{"data": {"items": [...]}}`. Items are decoded one at a time so a single
//! malformed record is skipped instead of failing the whole call.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::{HolderListProvider, HolderRecord, PortfolioEntry, PortfolioProvider};

/// Configuration for the HTTP providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the holder list endpoint
    #[serde(default = "default_holders_url")]
    pub holders_url: String,

    /// Base URL of the portfolio endpoint
    #[serde(default = "default_portfolio_url")]
    pub portfolio_url: String,

    /// API key sent with every request (empty = none)
    #[serde(default)]
    pub api_key: String,

    /// Header carrying the API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Number of holders requested per token
    #[serde(default = "default_holder_limit")]
    pub holder_limit: u32,

    /// Number of top holdings requested per address
    #[serde(default = "default_portfolio_limit")]
    pub portfolio_limit: u32,

    /// Client-level request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_holders_url() -> String {
    std::env::var("WHALE_HOLDERS_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/v1/holders".into())
}
fn default_portfolio_url() -> String {
    std::env::var("WHALE_PORTFOLIO_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8080/v1/portfolio".into())
}
fn default_api_key_header() -> String {
    "x-api-key".to_string()
}
fn default_holder_limit() -> u32 {
    100
}
fn default_portfolio_limit() -> u32 {
    50
}
fn default_request_timeout_ms() -> u64 {
    120_000
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            holders_url: default_holders_url(),
            portfolio_url: default_portfolio_url(),
            api_key: String::new(),
            api_key_header: default_api_key_header(),
            holder_limit: default_holder_limit(),
            portfolio_limit: default_portfolio_limit(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// HTTP client implementing both holder and portfolio providers
pub struct HttpProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpProvider {
    /// Create a new HTTP provider
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Fetch and decode a list of items from `{base}/{key}`
    async fn get_items<T: DeserializeOwned>(
        &self,
        base: &str,
        key: &str,
        limit: u32,
        kind: &str,
    ) -> Result<Vec<T>> {
        let url = item_url(base, key, limit)?;
        debug!(url = %url, limit, "Fetching {}", kind);

        let mut request = self.client.get(url);
        if !self.config.api_key.is_empty() {
            request = request.header(
                self.config.api_key_header.as_str(),
                self.config.api_key.as_str(),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let body: ItemsResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("{} response: {}", kind, e)))?;

        Ok(decode_items(body.into_items(), kind))
    }
}

/// `{base}/{key}?limit=N` with `key` escaped as a single path segment
fn item_url(base: &str, key: &str, limit: u32) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| Error::Config(format!("Invalid provider url {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("Provider url cannot take a path: {}", base)))?
        .pop_if_empty()
        .push(key);
    url.query_pairs_mut().append_pair("limit", &limit.to_string());
    Ok(url)
}

#[async_trait]
impl HolderListProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http-holders"
    }

    async fn get_holders(&self, token_address: &str) -> Result<Vec<HolderRecord>> {
        let wire: Vec<WireHolder> = self
            .get_items(
                &self.config.holders_url,
                token_address,
                self.config.holder_limit,
                "holder",
            )
            .await?;
        Ok(keep_valid(wire, "holder"))
    }
}

#[async_trait]
impl PortfolioProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http-portfolio"
    }

    async fn get_portfolio(&self, address: &str) -> Result<Vec<PortfolioEntry>> {
        let wire: Vec<WireHolding> = self
            .get_items(
                &self.config.portfolio_url,
                address,
                self.config.portfolio_limit,
                "portfolio",
            )
            .await?;
        Ok(keep_valid(wire, "portfolio"))
    }
}

/// Map a non-success status to the error taxonomy
fn status_error(status: StatusCode, body: String) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimited(body)
    } else {
        Error::Http {
            status: status.as_u16(),
            body,
        }
    }
}

/// Response body: a bare array, or the `data.items` envelope as the one fallback shape
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemsResponse {
    Bare(Vec<serde_json::Value>),
    Envelope { data: ItemsData },
}

#[derive(Debug, Deserialize)]
struct ItemsData {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl ItemsResponse {
    fn into_items(self) -> Vec<serde_json::Value> {
        match self {
            ItemsResponse::Bare(items) => items,
            ItemsResponse::Envelope { data } => data.items,
        }
    }
}

/// Decode items one by one, skipping records that do not match the schema
fn decode_items<T: DeserializeOwned>(items: Vec<serde_json::Value>, kind: &str) -> Vec<T> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| match serde_json::from_value::<T>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(index = idx, error = %e, "Skipping malformed {} record", kind);
                None
            }
        })
        .collect();

    if decoded.len() < total {
        debug!(kept = decoded.len(), total, "Partially decoded {} response", kind);
    }
    decoded
}

/// Convert wire records, dropping ones that fail validation
fn keep_valid<W, T>(wire: Vec<W>, kind: &str) -> Vec<T>
where
    W: TryInto<T, Error = Error>,
{
    wire.into_iter()
        .filter_map(|w| match w.try_into() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping invalid {} record", kind);
                None
            }
        })
        .collect()
}

// ============ Wire Types ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHolder {
    address: String,
    #[serde(deserialize_with = "de_f64")]
    hold_amount: f64,
    #[serde(deserialize_with = "de_f64")]
    hold_supply_percentage: f64,
    #[serde(default)]
    tags: Vec<String>,
}

impl TryFrom<WireHolder> for HolderRecord {
    type Error = Error;

    fn try_from(w: WireHolder) -> Result<Self> {
        if w.address.trim().is_empty() {
            return Err(Error::MalformedResponse("holder without address".into()));
        }
        if !w.hold_amount.is_finite() || !w.hold_supply_percentage.is_finite() {
            return Err(Error::MalformedResponse(format!(
                "non-finite amounts for holder {}",
                w.address
            )));
        }
        Ok(HolderRecord {
            address: w.address,
            hold_amount: w.hold_amount,
            hold_supply_percentage: w.hold_supply_percentage,
            tags: w.tags,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHolding {
    token_address: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    name: String,
    #[serde(deserialize_with = "de_f64")]
    balance: f64,
    #[serde(default, deserialize_with = "de_opt_f64")]
    price_usd: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    value_usd: Option<f64>,
}

impl TryFrom<WireHolding> for PortfolioEntry {
    type Error = Error;

    fn try_from(w: WireHolding) -> Result<Self> {
        if w.token_address.trim().is_empty() {
            return Err(Error::MalformedResponse("holding without token address".into()));
        }
        let price_usd = w.price_usd.unwrap_or(0.0);
        let value_usd = w.value_usd.unwrap_or(w.balance * price_usd);
        if !w.balance.is_finite() || !price_usd.is_finite() || !value_usd.is_finite() {
            return Err(Error::MalformedResponse(format!(
                "non-finite values for token {}",
                w.token_address
            )));
        }
        Ok(PortfolioEntry {
            token_address: w.token_address,
            symbol: w.symbol,
            name: w.name,
            balance: w.balance,
            price_usd,
            value_usd: value_usd.max(0.0),
        })
    }
}

/// Numbers arrive either as JSON numbers or numeric strings
#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn into_f64<E: serde::de::Error>(self) -> std::result::Result<f64, E> {
        match self {
            Numeric::Number(n) => Ok(n),
            Numeric::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| E::custom(format!("invalid number {:?}: {}", s, e))),
        }
    }
}

fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Numeric::deserialize(deserializer)?.into_f64()
}

fn de_opt_f64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    match Option::<Numeric>::deserialize(deserializer)? {
        Some(n) => n.into_f64().map(Some),
        None => Ok(None),
    }
}
