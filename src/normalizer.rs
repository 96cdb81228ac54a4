use crate::{
    addresses::AddressRegistry,
    helper::{parse_amount, parse_decimals, scale_down, WEI_PER_ETH},
    transactions::{RawTx, TxCommon},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

///
/// AssetKind
///

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    #[display("native")]
    Native,
    #[display("fungible token")]
    FungibleToken,
    #[display("non-fungible token")]
    NonFungibleToken,
}

///
/// LedgerEntry
/// one transfer with decimal-adjusted amount and addresses lower-cased
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub hash: String,
    pub timestamp: i64,
    pub block_number: u64,
    pub from: String,
    pub to: String,
    pub kind: AssetKind,
    pub contract: Option<String>,
    pub token_id: Option<String>,
    pub symbol: Option<String>,
    pub amount: f64,
    pub gas_cost: f64,
    pub is_inter_owned: bool,
}

type DedupKey = (String, AssetKind, Option<String>, Option<String>, String, String);

impl LedgerEntry {
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }

    /// `contract = None` selects native transfers.
    pub fn is_asset(&self, contract: Option<&str>) -> bool {
        match contract {
            None => self.kind == AssetKind::Native,
            Some(c) => self.kind != AssetKind::Native && self.contract.as_deref() == Some(c),
        }
    }

    // one transaction can carry several transfer events, so the hash alone is not enough
    fn dedup_key(&self) -> DedupKey {
        (
            self.hash.clone(),
            self.kind,
            self.contract.clone(),
            self.token_id.clone(),
            self.from.clone(),
            self.to.clone(),
        )
    }
}

/// Drops repeated entries, keeping the first occurrence.
pub fn dedup_entries(entries: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    entries.into_iter().filter(|entry| seen.insert(entry.dedup_key())).collect()
}

fn lower(field: &Option<String>) -> String {
    field.as_deref().map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default()
}

fn gas_cost(common: &TxCommon) -> f64 {
    match (parse_amount(common.gas_used.as_deref()), parse_amount(common.gas_price.as_deref())) {
        (Some(used), Some(price)) => used * price / WEI_PER_ETH,
        _ => 0.0,
    }
}

///
/// Normalizer
///

pub struct Normalizer<'a> {
    registry: &'a AddressRegistry,
}

impl<'a> Normalizer<'a> {
    pub fn new(registry: &'a AddressRegistry) -> Self {
        Self { registry }
    }

    pub fn normalize(&self, raw: &[RawTx]) -> Vec<LedgerEntry> {
        raw.iter().map(|tx| self.normalize_one(tx)).collect()
    }

    pub fn normalize_one(&self, raw: &RawTx) -> LedgerEntry {
        let common = raw.common();
        let from = lower(&common.from);
        let to = lower(&common.to);

        let (kind, contract, token_id, symbol, amount) = match raw {
            RawTx::Native(tx) => {
                // a reverted call still pays gas but moves no value
                let reverted = tx.is_error.as_deref().map(str::trim) == Some("1");
                let amount = if reverted { 0.0 } else { parse_amount(tx.value.as_deref()).unwrap_or(0.0) / WEI_PER_ETH };
                (AssetKind::Native, None, None, Some("ETH".to_string()), amount)
            }
            RawTx::Token(tx) => {
                let decimals = parse_decimals(tx.token_decimal.as_deref());
                let amount = scale_down(parse_amount(tx.value.as_deref()).unwrap_or(0.0), decimals);
                (AssetKind::FungibleToken, Some(lower(&tx.contract_address)), None, tx.token_symbol.clone(), amount)
            }
            RawTx::Nft(tx) => (
                AssetKind::NonFungibleToken,
                Some(lower(&tx.contract_address)),
                tx.token_id.as_deref().map(|id| id.trim().to_string()),
                tx.token_symbol.clone(),
                1.0,
            ),
        };

        LedgerEntry {
            hash: lower(&common.hash),
            timestamp: common.time_stamp.as_deref().and_then(|s| s.trim().parse::<i64>().ok()).filter(|t| *t >= 0).unwrap_or(0),
            block_number: common.block_number.as_deref().and_then(|s| s.trim().parse::<u64>().ok()).unwrap_or(0),
            is_inter_owned: self.registry.is_inter_owned(&from, &to),
            from,
            to,
            kind,
            contract,
            token_id,
            symbol,
            amount,
            gas_cost: gas_cost(common),
        }
    }
}
