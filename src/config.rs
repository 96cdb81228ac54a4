// Runtime configuration
// Built once at startup from the environment (and .env) plus an optional TOML
// parameter file, then passed by reference to every component.

use crate::{
    addresses::{NFT_COLLECTION_VARS, OWNED_WALLET_VARS},
    helper::{normalize_address, AddressError},
    monitor::MonitorThresholds,
    signal::PhaseTimeline,
};
use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error as ThisError;

pub const ETHERSCAN_URL: &str = "https://api.etherscan.io/api";
pub const COINGECKO_URL: &str = "https://api.coingecko.com/api/v3";
const DEFAULT_ETHERSCAN_RATE_LIMIT: u32 = 5;
const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(3600);

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),

    #[error("invalid address in {var}: {source}")]
    InvalidAddress {
        var: String,
        #[source]
        source: AddressError,
    },

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("owned wallets {first} and {second} share address {address}")]
    DuplicateWallet { first: String, second: String, address: String },

    #[error("failed to read parameter file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse parameter file: {0}")]
    Toml(#[from] toml::de::Error),
}

///
/// ModelParams
/// market assumptions and coefficients for the impact and risk models
///

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub eth_price_usd: f64,
    pub daily_volume_usd: f64,
    pub volume_impact_coefficient: f64,
    pub supply_reduction_weight: f64,
    pub monthly_burn_estimate: f64,
    pub liquidity_risk_threshold_pct: f64,
    pub fallback_wild_price: f64,
    pub total_supply: f64,
    pub circulating_supply: f64,
    pub otc_locked: f64,
    pub estimated_burns: f64,
    pub lp_wild_share: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            eth_price_usd: 3300.0,
            daily_volume_usd: 5_000_000.0,
            volume_impact_coefficient: 0.5,
            supply_reduction_weight: 0.3,
            monthly_burn_estimate: 0.005,
            liquidity_risk_threshold_pct: 20.0,
            fallback_wild_price: 0.38,
            total_supply: 500_000_000.0,
            circulating_supply: 200_000_000.0,
            otc_locked: 20_000_000.0,
            estimated_burns: 0.0,
            lp_wild_share: 0.5,
        }
    }
}

///
/// ParamsFile
///

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParamsFile {
    pub model: ModelParams,
    pub timeline: PhaseTimeline,
    pub monitor: MonitorThresholds,
}

impl ParamsFile {
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

///
/// Config
///

#[derive(Debug, Clone)]
pub struct Config {
    pub etherscan_api_key: String,
    pub etherscan_url: String,
    pub coingecko_url: String,
    pub etherscan_rate_limit: u32,
    pub owned_wallets: Vec<(String, String)>,
    pub wild_token: String,
    pub uniswap_lp: Option<String>,
    pub nft_collections: Vec<(String, String)>,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub force_refresh: bool,
    pub cache_max_age: Duration,
    pub model: ModelParams,
    pub timeline: PhaseTimeline,
    pub monitor: MonitorThresholds,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));
        let address = |key: &str, value: &str| {
            normalize_address(value).map_err(|source| ConfigError::InvalidAddress { var: key.to_string(), source })
        };

        let etherscan_api_key = required("ETHERSCAN_API_KEY")?;

        let mut owned_wallets: Vec<(String, String)> = Vec::new();
        for (name, var) in OWNED_WALLET_VARS {
            let addr = address(var, &required(var)?)?;
            if let Some((first, _)) = owned_wallets.iter().find(|(_, a)| *a == addr) {
                return Err(ConfigError::DuplicateWallet {
                    first: first.clone(),
                    second: name.to_string(),
                    address: addr,
                });
            }
            owned_wallets.push((name.to_string(), addr));
        }

        let wild_token = address("WILD_TOKEN_CONTRACT", &required("WILD_TOKEN_CONTRACT")?)?;
        let uniswap_lp = match get("UNISWAP_V2_WILD_ETH_LP") {
            Some(v) => Some(address("UNISWAP_V2_WILD_ETH_LP", &v)?),
            None => None,
        };

        let mut nft_collections = Vec::new();
        for (name, var) in NFT_COLLECTION_VARS {
            if let Some(v) = get(var) {
                nft_collections.push((name.to_string(), address(var, &v)?));
            }
        }

        let etherscan_rate_limit = match get("ETHERSCAN_RATE_LIMIT") {
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|r| *r > 0)
                .ok_or(ConfigError::InvalidValue { var: "ETHERSCAN_RATE_LIMIT".to_string(), value: v })?,
            None => DEFAULT_ETHERSCAN_RATE_LIMIT,
        };

        let params = match get("TITAN_PARAMS_FILE") {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
                ParamsFile::parse(&contents)?
            }
            None => ParamsFile::default(),
        };

        let force_refresh = matches!(get("TITAN_FORCE_REFRESH").as_deref(), Some("1" | "true" | "yes"));

        let cache_max_age = match get("TITAN_CACHE_MAX_AGE_SECS") {
            Some(v) => v
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidValue { var: "TITAN_CACHE_MAX_AGE_SECS".to_string(), value: v })?,
            None => DEFAULT_CACHE_MAX_AGE,
        };

        Ok(Self {
            etherscan_api_key,
            etherscan_url: get("ETHERSCAN_API_URL").unwrap_or_else(|| ETHERSCAN_URL.to_string()),
            coingecko_url: get("COINGECKO_API_URL").unwrap_or_else(|| COINGECKO_URL.to_string()),
            etherscan_rate_limit,
            owned_wallets,
            wild_token,
            uniswap_lp,
            nft_collections,
            data_dir: PathBuf::from(get("TITAN_DATA_DIR").unwrap_or_else(|| "./data".to_string())),
            output_dir: PathBuf::from(get("TITAN_OUTPUT_DIR").unwrap_or_else(|| "./output".to_string())),
            force_refresh,
            cache_max_age,
            model: params.model,
            timeline: params.timeline,
            monitor: params.monitor,
        })
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("titan_cache.db")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub const HOT: &str = "0x1111111111111111111111111111111111111111";
    pub const DIGITAL_RE: &str = "0x2222222222222222222222222222222222222222";
    pub const ETH_STAKE: &str = "0x3333333333333333333333333333333333333333";
    pub const WARM: &str = "0x4444444444444444444444444444444444444444";
    pub const WILD: &str = "0x2a3bff78b79a009976eea096a51a948a3dc00e34";
    pub const LP: &str = "0xcaa004418eb42cdf00cb057b7c9e28f0ffd840a5";
    pub const WHEELS_NFT: &str = "0x5555555555555555555555555555555555555555";

    pub fn base_env() -> HashMap<String, String> {
        [
            ("ETHERSCAN_API_KEY", "test-key"),
            ("HOT_WALLET_ADDRESS", HOT),
            ("DIGITAL_RE_ADDRESS", DIGITAL_RE),
            ("ETH_STAKE_ADDRESS", ETH_STAKE),
            ("WARM_WALLET_ADDRESS", WARM),
            ("WILD_TOKEN_CONTRACT", WILD),
            ("UNISWAP_V2_WILD_ETH_LP", LP),
            ("WHEELS_CONTRACT", WHEELS_NFT),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    pub fn test_config() -> Config {
        let env = base_env();
        Config::from_lookup(|k| env.get(k).cloned()).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = test_config();
        assert_eq!(config.etherscan_rate_limit, 5);
        assert_eq!(config.owned_wallets.len(), 4);
        assert_eq!(config.owned_wallets[0], ("hot_wallet".to_string(), HOT.to_string()));
        assert_eq!(config.uniswap_lp.as_deref(), Some(LP));
        assert_eq!(config.nft_collections, vec![("wheels".to_string(), WHEELS_NFT.to_string())]);
        assert_eq!(config.model, ModelParams::default());
        assert!(!config.force_refresh);
        assert_eq!(config.cache_max_age, DEFAULT_CACHE_MAX_AGE);
    }

    #[test]
    fn test_cache_max_age_override() {
        let mut env = base_env();
        env.insert("TITAN_CACHE_MAX_AGE_SECS".to_string(), "0".to_string());
        let config = Config::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.cache_max_age, Duration::ZERO);

        env.insert("TITAN_CACHE_MAX_AGE_SECS".to_string(), "an hour".to_string());
        assert!(matches!(Config::from_lookup(|k| env.get(k).cloned()), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_missing_required_var() {
        let mut env = base_env();
        env.remove("WARM_WALLET_ADDRESS");
        let err = Config::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(var) if var == "WARM_WALLET_ADDRESS"));

        env.insert("WARM_WALLET_ADDRESS".to_string(), "   ".to_string());
        assert!(matches!(Config::from_lookup(|k| env.get(k).cloned()), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_invalid_and_duplicate_addresses() {
        let mut env = base_env();
        env.insert("HOT_WALLET_ADDRESS".to_string(), "0xnope".to_string());
        assert!(matches!(Config::from_lookup(|k| env.get(k).cloned()), Err(ConfigError::InvalidAddress { .. })));

        let mut env = base_env();
        env.insert("WARM_WALLET_ADDRESS".to_string(), HOT.to_uppercase().replace("0X", "0x"));
        assert!(matches!(Config::from_lookup(|k| env.get(k).cloned()), Err(ConfigError::DuplicateWallet { .. })));
    }

    #[test]
    fn test_invalid_rate_limit() {
        let mut env = base_env();
        env.insert("ETHERSCAN_RATE_LIMIT".to_string(), "0".to_string());
        assert!(matches!(Config::from_lookup(|k| env.get(k).cloned()), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_params_file_overrides() {
        let params = ParamsFile::parse(
            r#"
            [model]
            daily_volume_usd = 2500000.0
            volume_impact_coefficient = 0.4

            [timeline]
            phase2_deadline = "2024-08-10T00:00:00Z"

            [monitor]
            dao_eth_outflow_eth = 25.0
            "#,
        )
        .unwrap();

        assert_eq!(params.model.daily_volume_usd, 2_500_000.0);
        assert_eq!(params.model.volume_impact_coefficient, 0.4);
        assert_eq!(params.model.supply_reduction_weight, 0.3);
        assert_eq!(params.timeline.phase2_deadline.to_rfc3339(), "2024-08-10T00:00:00+00:00");
        assert_eq!(params.timeline.phase1_start, PhaseTimeline::default().phase1_start);
        assert_eq!(params.monitor.dao_eth_outflow_eth, 25.0);
        assert_eq!(params.monitor.wild_inflow, 100_000.0);
    }
}
