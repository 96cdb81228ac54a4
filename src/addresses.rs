use crate::{
    config::Config,
    helper::{normalize_address, to_checksum_address, AddressError},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const WILD_TOKEN: &str = "0x2a3bff78b79a009976eea096a51a948a3dc00e34";
pub const PROJECT_TREASURY: &str = "0x24089292d5e5b4e487b07c8df44f973a0aab7d7b";

// (name, env var)
pub const OWNED_WALLET_VARS: &[(&str, &str)] = &[
    ("hot_wallet", "HOT_WALLET_ADDRESS"),
    ("digital_re", "DIGITAL_RE_ADDRESS"),
    ("eth_stake", "ETH_STAKE_ADDRESS"),
    ("warm_wallet", "WARM_WALLET_ADDRESS"),
];

pub const NFT_COLLECTION_VARS: &[(&str, &str)] = &[
    ("airwild_s0", "AIRWILD_S0_CONTRACT"),
    ("airwild_s1", "AIRWILD_S1_CONTRACT"),
    ("airwild_s2", "AIRWILD_S2_CONTRACT"),
    ("wheels", "WHEELS_CONTRACT"),
    ("cribs", "CRIBS_CONTRACT"),
    ("crafts", "CRAFTS_CONTRACT"),
    ("land", "LAND_CONTRACT"),
    ("beasts_wolves", "BEASTS_WOLVES_CONTRACT"),
    ("beasts_wapes", "BEASTS_WAPES_CONTRACT"),
    ("moto", "MOTO_CONTRACT"),
    ("pals_gens", "PALS_GENS_CONTRACT"),
];

// (name, treasury, ETH allocation, expected WILD acquisition)
// The buyback target is the sum of this table (7.91M WILD), not the rounded
// 8.01M headline figure.
pub const DAO_TREASURIES: &[(&str, &str, f64, f64)] = &[
    ("Wheels DAO", "0xc2e9678a71e50e5aed036e00e9c5caeb1ac5987d", 414.0, 3_595_000.0),
    ("Beasts DAO", "0x1a178cfd768f74b3308cbca9998c767f4e5b2cf8", 314.0, 2_726_000.0),
    ("Kicks DAO", "0x1c42576aca321a590a809cd8b18492aafc1f3909", 52.0, 452_000.0),
    ("Cribs DAO", "0xcE2d2421ce6275b7A221F62eC5fA10A9c13E92f7", 24.0, 208_000.0),
    ("Crafts DAO", "0x48c0E0C0A266255BE9E5E26C0aDc18991b893a86", 26.0, 226_000.0),
    ("Moto DAO", "0x624fb845A6b2C64ea10fF9EBe710f747853022B3", 38.0, 330_000.0),
    ("Land DAO", "0x2105694E890678D3eB9340CfFB5eD43b0fA6474b", 25.0, 217_000.0),
    ("PALs DAO", "0x700F189E8756c60206E4D759272c0c2d57D9b343", 6.0, 52_000.0),
    ("Wilder World DAO", "0xAf968D74e79fd2ad24e366bFf96E91F769e0AaEA", 12.0, 104_000.0),
];

///
/// AddressClass
///

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressClass {
    #[display("owned wallet")]
    OwnedWallet,
    #[display("DAO treasury")]
    DaoTreasury,
    #[display("external")]
    External,
}

///
/// AddressRegistry
/// every address is stored lower-cased; lookups normalize their input
///

#[derive(Debug, Clone)]
pub struct AddressRegistry {
    wallets: Vec<(String, String)>,
    wallet_names: HashMap<String, String>,
    daos: HashMap<String, String>,
    contracts: BTreeMap<String, String>,
    collections: Vec<(String, String)>,
}

impl AddressRegistry {
    pub fn from_config(config: &Config) -> Result<Self, AddressError> {
        let mut contracts = BTreeMap::new();
        contracts.insert("wild_token".to_string(), config.wild_token.clone());
        contracts.insert("project_treasury".to_string(), normalize_address(PROJECT_TREASURY)?);
        if let Some(lp) = &config.uniswap_lp {
            contracts.insert("uniswap_v2_wild_eth_lp".to_string(), lp.clone());
        }

        Self::new(&config.owned_wallets, &config.nft_collections, contracts)
    }

    pub fn new(
        owned_wallets: &[(String, String)],
        nft_collections: &[(String, String)],
        mut contracts: BTreeMap<String, String>,
    ) -> Result<Self, AddressError> {
        let mut wallets = Vec::new();
        let mut wallet_names = HashMap::new();
        for (name, address) in owned_wallets {
            let address = normalize_address(address)?;
            wallet_names.insert(address.clone(), name.clone());
            wallets.push((name.clone(), address));
        }

        let mut daos = HashMap::new();
        for (name, address, _, _) in DAO_TREASURIES {
            daos.insert(normalize_address(address)?, name.to_string());
        }

        let mut collections = Vec::new();
        for (name, address) in nft_collections {
            let address = normalize_address(address)?;
            contracts.insert(name.clone(), address.clone());
            collections.push((name.clone(), address));
        }

        for address in contracts.values_mut() {
            *address = normalize_address(address)?;
        }

        Ok(Self { wallets, wallet_names, daos, contracts, collections })
    }

    /// Looks up a wallet, contract or DAO by name and returns its checksummed address.
    pub fn resolve(&self, name: &str) -> Option<String> {
        let address = self
            .wallets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
            .or_else(|| self.contracts.get(name))
            .or_else(|| self.daos.iter().find(|(_, n)| n.as_str() == name).map(|(a, _)| a))?;

        to_checksum_address(address).ok()
    }

    pub fn classify(&self, address: &str) -> AddressClass {
        let address = address.trim().to_ascii_lowercase();
        if self.wallet_names.contains_key(&address) {
            AddressClass::OwnedWallet
        } else if self.daos.contains_key(&address) {
            AddressClass::DaoTreasury
        } else {
            AddressClass::External
        }
    }

    pub fn is_owned(&self, address: &str) -> bool {
        self.wallet_names.contains_key(&address.trim().to_ascii_lowercase())
    }

    pub fn is_inter_owned(&self, from: &str, to: &str) -> bool {
        self.is_owned(from) && self.is_owned(to)
    }

    pub fn wallet_name(&self, address: &str) -> Option<&str> {
        self.wallet_names.get(&address.trim().to_ascii_lowercase()).map(String::as_str)
    }

    pub fn dao_name(&self, address: &str) -> Option<&str> {
        self.daos.get(&address.trim().to_ascii_lowercase()).map(String::as_str)
    }

    pub fn owned_wallets(&self) -> &[(String, String)] {
        &self.wallets
    }

    pub fn nft_collections(&self) -> &[(String, String)] {
        &self.collections
    }

    pub fn collection_name(&self, contract: &str) -> Option<&str> {
        let contract = contract.trim().to_ascii_lowercase();
        self.collections.iter().find(|(_, a)| *a == contract).map(|(n, _)| n.as_str())
    }

    pub fn contract(&self, name: &str) -> Option<&str> {
        self.contracts.get(name).map(String::as_str)
    }
}
