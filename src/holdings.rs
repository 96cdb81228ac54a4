// Wallet-level reconciliation of normalized ledgers
// Everything is recomputed from the full ledger on each run.

use crate::{
    addresses::AddressRegistry,
    normalizer::{dedup_entries, AssetKind, LedgerEntry},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

///
/// WalletHoldingsSnapshot
///

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletHoldingsSnapshot {
    pub wallet: String,
    pub current_balance: f64,
    pub total_received: f64,
    pub total_sent: f64,
    pub external_received: f64,
    pub external_sent: f64,
    pub net_flow: f64,
    pub transaction_count: usize,
    pub inter_owned_transfers: usize,
}

///
/// NftHoldingsSnapshot
///

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NftHoldingsSnapshot {
    pub wallet: String,
    pub collection: String,
    pub current_holdings: usize,
    pub token_ids: Vec<String>,
    pub total_received: usize,
    pub total_sent: usize,
    pub gas_cost: f64,
    pub transaction_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GasCostSummary {
    pub native: f64,
    pub token: f64,
    pub nft: f64,
    pub total: f64,
}

/// Gross and external flows of one fungible asset; `contract = None` is native ETH.
pub fn reconcile_fungible(wallet: &str, contract: Option<&str>, entries: &[LedgerEntry]) -> WalletHoldingsSnapshot {
    let wallet = wallet.to_ascii_lowercase();
    let mut snapshot = WalletHoldingsSnapshot { wallet: wallet.clone(), ..Default::default() };

    for entry in entries.iter().filter(|e| e.is_asset(contract)) {
        let received = entry.to == wallet;
        let sent = entry.from == wallet;
        if !received && !sent {
            continue;
        }

        snapshot.transaction_count += 1;
        if entry.is_inter_owned {
            snapshot.inter_owned_transfers += 1;
        }

        if received {
            snapshot.total_received += entry.amount;
            if !entry.is_inter_owned {
                snapshot.external_received += entry.amount;
            }
        }
        if sent {
            snapshot.total_sent += entry.amount;
            if !entry.is_inter_owned {
                snapshot.external_sent += entry.amount;
            }
        }
    }

    snapshot.current_balance = snapshot.total_received - snapshot.total_sent;
    snapshot.net_flow = snapshot.external_received - snapshot.external_sent;
    snapshot
}

// numeric ids sort numerically, anything else falls back to string order
fn token_id_order(a: &String, b: &String) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Replays one collection's transfers in block order to find the token IDs
/// the wallet holds now.
pub fn reconcile_nft(wallet: &str, collection: &str, entries: &[LedgerEntry]) -> NftHoldingsSnapshot {
    let wallet = wallet.to_ascii_lowercase();
    let collection = collection.to_ascii_lowercase();

    let relevant: Vec<LedgerEntry> = entries
        .iter()
        .filter(|e| e.kind == AssetKind::NonFungibleToken && e.contract.as_deref() == Some(collection.as_str()))
        .filter(|e| e.to == wallet || e.from == wallet)
        .cloned()
        .collect();
    let mut relevant = dedup_entries(relevant);
    relevant.sort_by_key(|e| (e.timestamp, e.block_number));

    let mut owned: BTreeSet<String> = BTreeSet::new();
    let mut received: HashSet<String> = HashSet::new();
    let mut sent: HashSet<String> = HashSet::new();
    let mut gas_cost = 0.0;

    for entry in &relevant {
        let Some(id) = entry.token_id.clone() else {
            continue;
        };

        if entry.to == wallet {
            owned.insert(id.clone());
            received.insert(id.clone());
            gas_cost += entry.gas_cost;
        }
        if entry.from == wallet {
            sent.insert(id.clone());
            if entry.to != wallet {
                owned.remove(&id);
            }
        }
    }

    let mut token_ids: Vec<String> = owned.into_iter().collect();
    token_ids.sort_by(token_id_order);

    NftHoldingsSnapshot {
        wallet,
        collection,
        current_holdings: token_ids.len(),
        token_ids,
        total_received: received.len(),
        total_sent: sent.len(),
        gas_cost,
        transaction_count: relevant.len(),
    }
}

/// Entries whose gas the wallet paid, one per transaction within each asset kind.
pub fn gas_paid_entries<'a>(wallet: &str, entries: &'a [LedgerEntry]) -> Vec<&'a LedgerEntry> {
    let wallet = wallet.to_ascii_lowercase();
    let mut seen: HashSet<(AssetKind, &str)> = HashSet::new();

    entries.iter().filter(|e| e.from == wallet && seen.insert((e.kind, e.hash.as_str()))).collect()
}

pub fn gas_costs(wallet: &str, entries: &[LedgerEntry]) -> GasCostSummary {
    let mut summary = GasCostSummary::default();

    for entry in gas_paid_entries(wallet, entries) {
        match entry.kind {
            AssetKind::Native => summary.native += entry.gas_cost,
            AssetKind::FungibleToken => summary.token += entry.gas_cost,
            AssetKind::NonFungibleToken => summary.nft += entry.gas_cost,
        }
    }

    summary.total = summary.native + summary.token + summary.nft;
    summary
}

/// Inter-owned transfers across every supplied ledger, deduplicated and in time order.
pub fn inter_owned_transfers<'a, I>(ledgers: I) -> Vec<LedgerEntry>
where
    I: IntoIterator<Item = &'a [LedgerEntry]>,
{
    let transfers: Vec<LedgerEntry> =
        ledgers.into_iter().flat_map(|l| l.iter().filter(|e| e.is_inter_owned).cloned()).collect();

    let mut transfers = dedup_entries(transfers);
    transfers.sort_by_key(|e| (e.timestamp, e.block_number));
    transfers
}

///
/// PortfolioHoldings
/// keyed by owned wallet name
///

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioHoldings {
    pub wild: BTreeMap<String, WalletHoldingsSnapshot>,
    pub lp: BTreeMap<String, WalletHoldingsSnapshot>,
    pub nfts: BTreeMap<String, BTreeMap<String, NftHoldingsSnapshot>>,
    pub gas: BTreeMap<String, GasCostSummary>,
    pub inter_owned_transfers: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NftCollectionSummary {
    pub total: usize,
    pub by_wallet: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_wallets: usize,
    pub wild_total: f64,
    pub wild_by_wallet: BTreeMap<String, f64>,
    pub lp_total: f64,
    pub lp_by_wallet: BTreeMap<String, f64>,
    pub nft_holdings: BTreeMap<String, NftCollectionSummary>,
    pub gas_total_eth: f64,
    pub gas_by_wallet: BTreeMap<String, f64>,
    pub gas_by_type: GasCostSummary,
    pub inter_owned_transfer_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioExposure {
    pub total_wild_holdings: f64,
    pub wild_by_wallet: BTreeMap<String, f64>,
    pub lp_exposure: f64,
    pub total_exposure_wild: f64,
}

pub fn reconcile_portfolio(registry: &AddressRegistry, ledgers: &BTreeMap<String, Vec<LedgerEntry>>) -> PortfolioHoldings {
    let mut holdings = PortfolioHoldings::default();
    let wild_token = registry.contract("wild_token");
    let lp_token = registry.contract("uniswap_v2_wild_eth_lp");

    for (name, address) in registry.owned_wallets() {
        let empty = Vec::new();
        let entries = ledgers.get(name).unwrap_or(&empty);

        if let Some(wild) = wild_token {
            holdings.wild.insert(name.clone(), reconcile_fungible(address, Some(wild), entries));
        }
        if let Some(lp) = lp_token {
            holdings.lp.insert(name.clone(), reconcile_fungible(address, Some(lp), entries));
        }

        let mut collections = BTreeMap::new();
        for (collection_name, contract) in registry.nft_collections() {
            let snapshot = reconcile_nft(address, contract, entries);
            if snapshot.transaction_count > 0 {
                collections.insert(collection_name.clone(), snapshot);
            }
        }
        holdings.nfts.insert(name.clone(), collections);

        holdings.gas.insert(name.clone(), gas_costs(address, entries));
    }

    holdings.inter_owned_transfers = inter_owned_transfers(ledgers.values().map(Vec::as_slice));
    holdings
}

impl PortfolioHoldings {
    pub fn summary(&self) -> PortfolioSummary {
        let wild_by_wallet: BTreeMap<String, f64> =
            self.wild.iter().map(|(k, v)| (k.clone(), v.current_balance)).collect();
        let lp_by_wallet: BTreeMap<String, f64> = self.lp.iter().map(|(k, v)| (k.clone(), v.current_balance)).collect();

        let mut nft_holdings: BTreeMap<String, NftCollectionSummary> = BTreeMap::new();
        for (wallet, collections) in &self.nfts {
            for (collection, snapshot) in collections {
                if snapshot.current_holdings > 0 {
                    let entry = nft_holdings.entry(collection.clone()).or_default();
                    entry.total += snapshot.current_holdings;
                    entry.by_wallet.insert(wallet.clone(), snapshot.current_holdings);
                }
            }
        }

        let mut gas_by_type = GasCostSummary::default();
        for gas in self.gas.values() {
            gas_by_type.native += gas.native;
            gas_by_type.token += gas.token;
            gas_by_type.nft += gas.nft;
            gas_by_type.total += gas.total;
        }

        PortfolioSummary {
            total_wallets: self.gas.len(),
            wild_total: wild_by_wallet.values().sum(),
            wild_by_wallet,
            lp_total: lp_by_wallet.values().sum(),
            lp_by_wallet,
            nft_holdings,
            gas_total_eth: gas_by_type.total,
            gas_by_wallet: self.gas.iter().map(|(k, v)| (k.clone(), v.total)).collect(),
            gas_by_type,
            inter_owned_transfer_count: self.inter_owned_transfers.len(),
        }
    }

    /// WILD held directly plus the WILD side of LP positions.
    pub fn exposure(&self, lp_wild_share: f64) -> PortfolioExposure {
        let wild_by_wallet: BTreeMap<String, f64> =
            self.wild.iter().map(|(k, v)| (k.clone(), v.current_balance)).collect();
        let total_wild_holdings: f64 = wild_by_wallet.values().sum();
        let lp_exposure = self.lp.values().map(|s| s.current_balance).sum::<f64>() * lp_wild_share;

        PortfolioExposure {
            total_wild_holdings,
            wild_by_wallet,
            lp_exposure,
            total_exposure_wild: total_wild_holdings + lp_exposure,
        }
    }
}
