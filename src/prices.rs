// Price lookups against CoinGecko
// Historical prices are cached per (symbol, day) in the SQLite store.

use crate::{cache_db::CacheStore, config::Config, helper::RateLimiter, normalizer::LedgerEntry, transactions::FetchError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::{sync::Mutex, time::Duration};
use tracing::{debug, error, info, warn};

// (symbol, CoinGecko coin id)
pub const TRACKED_COINS: &[(&str, &str)] = &[("ETH", "ethereum"), ("WILD", "wilder-world")];

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);
const NEARBY_OFFSETS: [i64; 6] = [1, -1, 2, -2, 3, -3];

pub fn coin_id(symbol: &str) -> Option<&'static str> {
    TRACKED_COINS.iter().find(|(s, _)| s.eq_ignore_ascii_case(symbol)).map(|(_, id)| *id)
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_current_price(&self, symbol: &str) -> Result<f64, FetchError>;

    /// USD prices for every tracked coin; coins without a quote are left out.
    async fn get_current_prices(&self) -> Result<BTreeMap<String, f64>, FetchError> {
        let mut prices = BTreeMap::new();
        for (symbol, _) in TRACKED_COINS {
            match self.get_current_price(symbol).await {
                Ok(price) => {
                    prices.insert(symbol.to_string(), price);
                }
                Err(e) => error!("Error fetching current {} price: {}", symbol, e),
            }
        }
        Ok(prices)
    }

    async fn get_historical_price(&self, symbol: &str, date: NaiveDate) -> Result<Option<f64>, FetchError>;
}

fn parse_simple_prices(value: &Value) -> BTreeMap<String, f64> {
    TRACKED_COINS
        .iter()
        .filter_map(|(symbol, id)| value.get(id)?.get("usd")?.as_f64().map(|p| (symbol.to_string(), p)))
        .collect()
}

fn parse_history_price(value: &Value) -> Option<f64> {
    value.get("market_data")?.get("current_price")?.get("usd")?.as_f64()
}

///
/// CoinGeckoClient
///

pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Mutex<RateLimiter>,
    cache: Option<Arc<CacheStore>>,
}

impl CoinGeckoClient {
    pub fn new(config: &Config, cache: Option<Arc<CacheStore>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.coingecko_url.trim_end_matches('/').to_string(),
            limiter: Mutex::new(RateLimiter::new(MIN_REQUEST_INTERVAL)),
            cache,
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        self.limiter.lock().await.wait().await;

        let url = format!("{}{}", self.base_url, path);
        let value = self.http.get(&url).query(query).send().await?.error_for_status()?.json().await?;
        Ok(value)
    }

    fn cached_price(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        let cache = self.cache.as_ref()?;
        match cache.get_price(symbol, date) {
            Ok(price) => price,
            Err(e) => {
                warn!("price cache read failed for {} on {}: {}", symbol, date, e);
                None
            }
        }
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoClient {
    async fn get_current_price(&self, symbol: &str) -> Result<f64, FetchError> {
        let prices = self.get_current_prices().await?;
        prices
            .get(&symbol.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| FetchError::Api(format!("no current price for {}", symbol)))
    }

    // one /simple/price request covers every tracked coin
    async fn get_current_prices(&self) -> Result<BTreeMap<String, f64>, FetchError> {
        let ids: Vec<&str> = TRACKED_COINS.iter().map(|(_, id)| *id).collect();
        let value = self
            .get_json("/simple/price", &[("ids", ids.join(",")), ("vs_currencies", "usd".to_string())])
            .await?;

        Ok(parse_simple_prices(&value))
    }

    async fn get_historical_price(&self, symbol: &str, date: NaiveDate) -> Result<Option<f64>, FetchError> {
        let Some(id) = coin_id(symbol) else {
            warn!("unknown coin: {}", symbol);
            return Ok(None);
        };
        let symbol = symbol.to_ascii_uppercase();

        if let Some(price) = self.cached_price(&symbol, date) {
            debug!("Using cached price for {} on {}", symbol, date);
            return Ok(Some(price));
        }

        let value = self
            .get_json(
                &format!("/coins/{}/history", id),
                &[("date", date.format("%d-%m-%Y").to_string()), ("localization", "false".to_string())],
            )
            .await?;

        let price = parse_history_price(&value);
        match (price, &self.cache) {
            (Some(p), Some(cache)) => {
                if let Err(e) = cache.put_price(&symbol, date, p) {
                    warn!("price cache write failed for {} on {}: {}", symbol, date, e);
                }
            }
            (None, _) => warn!("No price data found for {} on {}", symbol, date),
            _ => {}
        }

        Ok(price)
    }
}

pub async fn current_prices(oracle: &dyn PriceOracle) -> BTreeMap<String, f64> {
    match oracle.get_current_prices().await {
        Ok(prices) => prices,
        Err(e) => {
            error!("Error fetching current prices: {}", e);
            BTreeMap::new()
        }
    }
}

async fn historical_or_none(oracle: &dyn PriceOracle, symbol: &str, date: NaiveDate) -> Option<f64> {
    match oracle.get_historical_price(symbol, date).await {
        Ok(price) => price,
        Err(e) => {
            error!("Error fetching price for {} on {}: {}", symbol, date, e);
            None
        }
    }
}

/// Prices for the requested days, borrowing from up to three days either side
/// when a day has no data.
pub async fn fill_missing_prices(oracle: &dyn PriceOracle, symbol: &str, dates: &[NaiveDate]) -> BTreeMap<NaiveDate, f64> {
    let mut filled = BTreeMap::new();

    for date in dates {
        if let Some(price) = historical_or_none(oracle, symbol, *date).await {
            filled.insert(*date, price);
            continue;
        }

        for offset in NEARBY_OFFSETS {
            let Some(nearby) = date.checked_add_signed(ChronoDuration::days(offset)) else {
                continue;
            };
            if let Some(price) = historical_or_none(oracle, symbol, nearby).await {
                info!("Using price from {} for {}", nearby, date);
                filled.insert(*date, price);
                break;
            }
        }
    }

    filled
}

/// USD value of the gas paid by `entries` at each transaction day's ETH price.
/// Days with no price within three days are left out.
pub async fn gas_spend_usd(oracle: &dyn PriceOracle, entries: &[&LedgerEntry]) -> f64 {
    let paid: Vec<(NaiveDate, &LedgerEntry)> = entries
        .iter()
        .filter(|e| e.gas_cost > 0.0)
        .filter_map(|e| Some((e.datetime()?.date_naive(), *e)))
        .collect();

    let days: Vec<NaiveDate> = paid.iter().map(|(day, _)| *day).collect::<BTreeSet<_>>().into_iter().collect();
    let eth_prices = fill_missing_prices(oracle, "ETH", &days).await;

    let mut total = 0.0;
    for (day, entry) in paid {
        match eth_prices.get(&day) {
            Some(price) => total += entry.gas_cost * price,
            None => warn!("No ETH price near {}, gas for {} left unvalued", day, entry.hash),
        }
    }
    total
}
