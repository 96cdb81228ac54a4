use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;
use tiny_keccak::{Hasher, Keccak};
use tokio::time::{sleep, Instant};
use tracing::debug;

pub const WEI_PER_ETH: f64 = 1e18;
pub const DEFAULT_DECIMALS: u32 = 18;

// 10^77 is the largest power of ten that fits a uint256
const MAX_DECIMALS: u32 = 77;

///
/// AddressError
///

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is missing the 0x prefix: {0}")]
    MissingPrefix(String),

    #[error("address must be 40 hex characters: {0}")]
    InvalidLength(String),

    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

// returns the 40 lower-case hex characters after the prefix
fn address_body(address: &str) -> Result<String, AddressError> {
    let trimmed = address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| AddressError::MissingPrefix(trimmed.to_string()))?;

    if body.len() != 40 {
        return Err(AddressError::InvalidLength(trimmed.to_string()));
    }

    let lower = body.to_ascii_lowercase();
    hex::decode(&lower).map_err(|_| AddressError::InvalidHex(trimmed.to_string()))?;

    Ok(lower)
}

pub fn is_valid_address(address: &str) -> bool {
    address_body(address).is_ok()
}

/// Lower-cased `0x` form used for every comparison inside the crate.
pub fn normalize_address(address: &str) -> Result<String, AddressError> {
    Ok(format!("0x{}", address_body(address)?))
}

/// EIP-55 mixed-case checksum encoding.
pub fn to_checksum_address(address: &str) -> Result<String, AddressError> {
    let lower = address_body(address)?;

    let mut hasher = Keccak::v256();
    hasher.update(lower.as_bytes());
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    let hash_hex = hex::encode(hash);

    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");
    for (c, h) in lower.chars().zip(hash_hex.chars()) {
        let nibble = h.to_digit(16).unwrap_or(0);
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }

    Ok(checksummed)
}

/// Parses an integer or decimal string. Anything unparsable, negative or
/// non-finite comes back as `None`.
pub fn parse_amount(raw: Option<&str>) -> Option<f64> {
    let s = raw?.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(v) = s.parse::<u128>() {
        return Some(v as f64);
    }

    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => None,
    }
}

pub fn parse_decimals(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|d| *d <= MAX_DECIMALS)
        .unwrap_or(DEFAULT_DECIMALS)
}

pub fn scale_down(raw: f64, decimals: u32) -> f64 {
    raw / 10f64.powi(decimals as i32)
}

///
/// RateLimiter
/// sleeps before a call until `min_interval` has passed since the previous one
///

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_call: None }
    }

    pub fn per_second(requests: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / f64::from(requests.max(1))))
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                debug!("rate limit: sleeping {:?}", pause);
                sleep(pause).await;
            }
        }
        self.last_call = Some(Instant::now());
    }
}

///
/// DataPoint
/// records whether a figure was observed live or is an assumption
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum DataPoint<T> {
    Observed(T),
    Fallback(T),
    Unavailable,
}

impl<T> DataPoint<T> {
    pub fn observed_or(observed: Option<T>, fallback: T) -> Self {
        match observed {
            Some(v) => Self::Observed(v),
            None => Self::Fallback(fallback),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Observed(v) | Self::Fallback(v) => Some(v),
            Self::Unavailable => None,
        }
    }

    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Observed(_))
    }
}

impl<T: Copy> DataPoint<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}
