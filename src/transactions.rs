use crate::{
    cache_db::CacheStore,
    config::Config,
    helper::{parse_amount, scale_down, RateLimiter, DEFAULT_DECIMALS},
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{future::Future, sync::Arc};
use thiserror::Error as ThisError;
use tokio::{
    sync::Mutex,
    time::{sleep, Duration},
};
use tracing::{debug, error, warn};

const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(10);

///
/// FetchError
///

#[derive(Debug, ThisError)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(String),
}

///
/// Etherscan record shapes
/// every numeric field arrives as an optional string
///

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TxCommon {
    pub hash: Option<String>,
    pub time_stamp: Option<String>,
    pub block_number: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub gas_used: Option<String>,
    pub gas_price: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NativeTransfer {
    #[serde(flatten)]
    pub common: TxCommon,
    pub value: Option<String>,
    pub is_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenTransfer {
    #[serde(flatten)]
    pub common: TxCommon,
    pub contract_address: Option<String>,
    pub value: Option<String>,
    pub token_decimal: Option<String>,
    pub token_symbol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NftTransfer {
    #[serde(flatten)]
    pub common: TxCommon,
    pub contract_address: Option<String>,
    #[serde(rename = "tokenID")]
    pub token_id: Option<String>,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
}

///
/// RawTx
///

#[derive(Debug, Clone, PartialEq)]
pub enum RawTx {
    Native(NativeTransfer),
    Token(TokenTransfer),
    Nft(NftTransfer),
}

impl RawTx {
    pub fn common(&self) -> &TxCommon {
        match self {
            Self::Native(tx) => &tx.common,
            Self::Token(tx) => &tx.common,
            Self::Nft(tx) => &tx.common,
        }
    }
}

///
/// Capabilities
///

#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn fetch_native_transfers(&self, address: &str) -> Result<Vec<RawTx>, FetchError>;

    async fn fetch_token_transfers(&self, address: &str, contract: Option<&str>) -> Result<Vec<RawTx>, FetchError>;

    async fn fetch_nft_transfers(&self, address: &str, contract: Option<&str>) -> Result<Vec<RawTx>, FetchError>;
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Native balance in wei.
    async fn get_native_balance(&self, address: &str) -> Result<u128, FetchError>;

    /// Decimal-adjusted token balance.
    async fn get_token_balance(&self, address: &str, contract: &str) -> Result<f64, FetchError>;
}

///
/// EtherscanResponse
///

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    result: Value,
}

impl EtherscanResponse {
    fn into_result(self) -> Result<Value, FetchError> {
        if self.status == "1" {
            return Ok(self.result);
        }

        // an empty history comes back as status 0
        let empty = matches!(&self.result, Value::Array(items) if items.is_empty());
        if empty || self.message.starts_with("No transactions found") || self.message.starts_with("No token transfers found")
        {
            return Ok(Value::Array(Vec::new()));
        }

        let detail = match &self.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Err(FetchError::Api(format!("{}: {}", self.message, detail)))
    }
}

// malformed records are dropped one by one rather than failing the whole list
fn parse_records<T: DeserializeOwned>(label: &str, value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("skipping malformed {} record: {}", label, e);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub async fn fetch_with_retry<T, F, Fut>(
    label: &str,
    max_retries: usize,
    delay: Duration,
    mut fetch: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempts = 0;
    loop {
        match fetch().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                if attempts >= max_retries.max(1) {
                    return Err(e);
                }
                warn!("Error fetching {}: {}. Retrying {}/{}...", label, e, attempts, max_retries);
                sleep(delay).await;
            }
        }
    }
}

/// Logs a failed fetch and substitutes an empty list.
pub fn or_empty(label: &str, result: Result<Vec<RawTx>, FetchError>) -> Vec<RawTx> {
    match result {
        Ok(records) => records,
        Err(e) => {
            error!("failed to fetch {}: {}", label, e);
            Vec::new()
        }
    }
}

/// Every native, token and NFT transfer touching one wallet.
pub async fn collect_wallet_transfers(source: &dyn TransactionSource, name: &str, address: &str) -> Vec<RawTx> {
    let mut raw = or_empty(&format!("{} native transfers", name), source.fetch_native_transfers(address).await);
    raw.extend(or_empty(&format!("{} token transfers", name), source.fetch_token_transfers(address, None).await));
    raw.extend(or_empty(&format!("{} NFT transfers", name), source.fetch_nft_transfers(address, None).await));

    debug!("collected {} raw transfers for {}", raw.len(), name);
    raw
}

///
/// EtherscanClient
///

pub struct EtherscanClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Mutex<RateLimiter>,
    cache: Option<Arc<CacheStore>>,
    force_refresh: bool,
    cache_max_age: Duration,
    max_retries: usize,
    retry_delay: Duration,
}

impl EtherscanClient {
    pub fn new(config: &Config, cache: Option<Arc<CacheStore>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.etherscan_url.clone(),
            api_key: config.etherscan_api_key.clone(),
            limiter: Mutex::new(RateLimiter::per_second(config.etherscan_rate_limit)),
            cache,
            force_refresh: config.force_refresh,
            cache_max_age: config.cache_max_age,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }

    async fn call(&self, params: &[(&str, String)]) -> Result<Value, FetchError> {
        self.limiter.lock().await.wait().await;

        let mut query = params.to_vec();
        query.push(("apikey", self.api_key.clone()));

        let response: EtherscanResponse =
            self.http.get(&self.base_url).query(&query).send().await?.error_for_status()?.json().await?;

        response.into_result()
    }

    async fn call_with_retry(&self, label: &str, params: &[(&str, String)]) -> Result<Value, FetchError> {
        fetch_with_retry(label, self.max_retries, self.retry_delay, || self.call(params)).await
    }

    fn cached(&self, key: &str) -> Option<Value> {
        if self.force_refresh {
            return None;
        }
        let cache = self.cache.as_ref()?;

        match cache.get_raw(key, self.cache_max_age) {
            Ok(Some(body)) => match serde_json::from_str(&body) {
                Ok(value) => {
                    debug!("cache hit: {}", key);
                    Some(value)
                }
                Err(e) => {
                    warn!("discarding unreadable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    fn store(&self, key: &str, value: &Value) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put_raw(key, &value.to_string()) {
                warn!("cache write failed for {}: {}", key, e);
            }
        }
    }

    async fn fetch_list<T: DeserializeOwned>(
        &self,
        action: &str,
        address: &str,
        contract: Option<&str>,
    ) -> Result<Vec<T>, FetchError> {
        let key = format!("{}:{}:{}", action, address.to_ascii_lowercase(), contract.unwrap_or("all").to_ascii_lowercase());

        if let Some(value) = self.cached(&key) {
            return Ok(parse_records(action, value));
        }

        let mut params = vec![
            ("module", "account".to_string()),
            ("action", action.to_string()),
            ("address", address.to_string()),
            ("startblock", "0".to_string()),
            ("endblock", "99999999".to_string()),
            ("sort", "asc".to_string()),
        ];
        if let Some(contract) = contract {
            params.push(("contractaddress", contract.to_string()));
        }

        let value = self.call_with_retry(&key, &params).await?;
        self.store(&key, &value);

        Ok(parse_records(action, value))
    }
}

#[async_trait]
impl TransactionSource for EtherscanClient {
    async fn fetch_native_transfers(&self, address: &str) -> Result<Vec<RawTx>, FetchError> {
        let records: Vec<NativeTransfer> = self.fetch_list("txlist", address, None).await?;
        Ok(records.into_iter().map(RawTx::Native).collect())
    }

    async fn fetch_token_transfers(&self, address: &str, contract: Option<&str>) -> Result<Vec<RawTx>, FetchError> {
        let records: Vec<TokenTransfer> = self.fetch_list("tokentx", address, contract).await?;
        Ok(records.into_iter().map(RawTx::Token).collect())
    }

    async fn fetch_nft_transfers(&self, address: &str, contract: Option<&str>) -> Result<Vec<RawTx>, FetchError> {
        let records: Vec<NftTransfer> = self.fetch_list("tokennfttx", address, contract).await?;
        Ok(records.into_iter().map(RawTx::Nft).collect())
    }
}

#[async_trait]
impl BalanceSource for EtherscanClient {
    async fn get_native_balance(&self, address: &str) -> Result<u128, FetchError> {
        let params = [
            ("module", "account".to_string()),
            ("action", "balance".to_string()),
            ("address", address.to_string()),
            ("tag", "latest".to_string()),
        ];
        let value = self.call_with_retry(&format!("balance:{}", address), &params).await?;

        value
            .as_str()
            .and_then(|s| s.trim().parse::<u128>().ok())
            .ok_or_else(|| FetchError::Api(format!("unexpected balance result for {}: {}", address, value)))
    }

    // tokenbalance carries no decimals field; tracked tokens use 18
    async fn get_token_balance(&self, address: &str, contract: &str) -> Result<f64, FetchError> {
        let params = [
            ("module", "account".to_string()),
            ("action", "tokenbalance".to_string()),
            ("contractaddress", contract.to_string()),
            ("address", address.to_string()),
            ("tag", "latest".to_string()),
        ];
        let value = self.call_with_retry(&format!("tokenbalance:{}:{}", address, contract), &params).await?;

        parse_amount(value.as_str())
            .map(|raw| scale_down(raw, DEFAULT_DECIMALS))
            .ok_or_else(|| FetchError::Api(format!("unexpected token balance for {}: {}", address, value)))
    }
}
