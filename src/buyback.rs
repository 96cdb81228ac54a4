use crate::{
    addresses::DAO_TREASURIES,
    helper::WEI_PER_ETH,
    normalizer::{dedup_entries, AssetKind, LedgerEntry, Normalizer},
    signal::PhaseTimeline,
    transactions::{or_empty, BalanceSource, FetchError, TransactionSource},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

pub const DEADLINE_ANOMALY: &str = "Phase 2 deadline passed with no detected buyback activity";

///
/// DaoTreasuryEntry
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaoTreasuryEntry {
    pub name: String,
    pub address: String,
    pub eth_allocation: f64,
    pub expected_wild: f64,
}

impl DaoTreasuryEntry {
    pub fn defaults() -> Vec<Self> {
        DAO_TREASURIES
            .iter()
            .map(|(name, address, eth_allocation, expected_wild)| Self {
                name: name.to_string(),
                address: address.to_ascii_lowercase(),
                eth_allocation: *eth_allocation,
                expected_wild: *expected_wild,
            })
            .collect()
    }
}

pub fn total_eth_allocation(entries: &[DaoTreasuryEntry]) -> f64 {
    entries.iter().map(|e| e.eth_allocation).sum()
}

pub fn total_expected_wild(entries: &[DaoTreasuryEntry]) -> f64 {
    entries.iter().map(|e| e.expected_wild).sum()
}

/// Percentage of the expected WILD acquisition already held; 0 for a zero target.
pub fn buyback_progress(wild_balance: f64, expected_wild: f64) -> f64 {
    if expected_wild > 0.0 {
        wild_balance.max(0.0) / expected_wild * 100.0
    } else {
        0.0
    }
}

///
/// DaoBalance
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaoBalance {
    pub name: String,
    pub address: String,
    pub eth_balance: f64,
    pub wild_balance: f64,
    pub eth_allocation: f64,
    pub expected_wild: f64,
    pub eth_remaining: f64,
    pub buyback_progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DaoBalanceRecord {
    Ok(DaoBalance),
    Error { name: String, address: String, error: String },
}

impl DaoBalanceRecord {
    pub fn name(&self) -> &str {
        match self {
            Self::Ok(balance) => &balance.name,
            Self::Error { name, .. } => name,
        }
    }

    pub fn balance(&self) -> Option<&DaoBalance> {
        match self {
            Self::Ok(balance) => Some(balance),
            Self::Error { .. } => None,
        }
    }
}

///
/// BuybackCompletion
///

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuybackCompletion {
    pub by_dao: BTreeMap<String, f64>,
    pub overall: f64,
}

/// Mean progress over the DAOs whose lookup succeeded.
pub fn buyback_completion(records: &[DaoBalanceRecord]) -> BuybackCompletion {
    let by_dao: BTreeMap<String, f64> =
        records.iter().filter_map(|r| r.balance()).map(|b| (b.name.clone(), b.buyback_progress)).collect();

    let overall = if by_dao.is_empty() { 0.0 } else { by_dao.values().sum::<f64>() / by_dao.len() as f64 };

    BuybackCompletion { by_dao, overall }
}

///
/// DaoTransactions
///

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DaoTransactions {
    pub eth_outflows: Vec<LedgerEntry>,
    pub wild_inflows: Vec<LedgerEntry>,
    pub wild_outflows: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaoActivity {
    pub eth_spent: f64,
    pub wild_acquired: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl DaoTransactions {
    pub fn activity(&self) -> Option<DaoActivity> {
        if self.eth_outflows.is_empty() && self.wild_inflows.is_empty() {
            return None;
        }

        let last = self.eth_outflows.iter().chain(&self.wild_inflows).map(|e| e.timestamp).max();

        Some(DaoActivity {
            eth_spent: self.eth_outflows.iter().fold(0.0, |total, e| total + e.amount),
            wild_acquired: self.wild_inflows.iter().fold(0.0, |total, e| total + e.amount),
            last_activity: last.and_then(|t| DateTime::from_timestamp(t, 0)),
        })
    }
}

/// Splits a DAO ledger into ETH spent and WILD moved since `since`.
pub fn classify_dao_transactions(
    dao: &str,
    wild_token: &str,
    entries: &[LedgerEntry],
    since: DateTime<Utc>,
) -> DaoTransactions {
    let dao = dao.to_ascii_lowercase();
    let wild_token = wild_token.to_ascii_lowercase();
    let mut txs = DaoTransactions::default();

    for entry in entries.iter().filter(|e| e.timestamp >= since.timestamp()) {
        match entry.kind {
            AssetKind::Native if entry.from == dao && entry.amount > 0.0 => txs.eth_outflows.push(entry.clone()),
            AssetKind::FungibleToken if entry.contract.as_deref() == Some(wild_token.as_str()) => {
                // zero-value transfers are address poisoning, not buybacks
                if entry.amount <= 0.0 {
                    continue;
                }
                if entry.to == dao {
                    txs.wild_inflows.push(entry.clone());
                } else if entry.from == dao {
                    txs.wild_outflows.push(entry.clone());
                }
            }
            _ => {}
        }
    }

    txs
}

///
/// BuybackPatterns
///

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[display("pending")]
    Pending,
    #[display("active")]
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuybackPatterns {
    pub dao_activity: BTreeMap<String, DaoActivity>,
    pub execution_status: ExecutionStatus,
    pub anomalies: Vec<String>,
}

pub fn detect_buyback_patterns(
    transactions: &BTreeMap<String, DaoTransactions>,
    timeline: &PhaseTimeline,
    now: DateTime<Utc>,
) -> BuybackPatterns {
    let dao_activity: BTreeMap<String, DaoActivity> =
        transactions.iter().filter_map(|(name, txs)| txs.activity().map(|a| (name.clone(), a))).collect();

    let execution_status = if dao_activity.is_empty() { ExecutionStatus::Pending } else { ExecutionStatus::Active };

    let mut anomalies = Vec::new();
    if now > timeline.phase2_deadline && execution_status == ExecutionStatus::Pending {
        anomalies.push(DEADLINE_ANOMALY.to_string());
    }

    BuybackPatterns { dao_activity, execution_status, anomalies }
}

///
/// BuybackModel
///

pub struct BuybackModel {
    entries: Vec<DaoTreasuryEntry>,
    wild_token: String,
}

impl BuybackModel {
    pub fn new(entries: Vec<DaoTreasuryEntry>, wild_token: &str) -> Self {
        Self { entries, wild_token: wild_token.to_ascii_lowercase() }
    }

    pub fn entries(&self) -> &[DaoTreasuryEntry] {
        &self.entries
    }

    pub fn total_eth_allocation(&self) -> f64 {
        total_eth_allocation(&self.entries)
    }

    pub fn total_expected_wild(&self) -> f64 {
        total_expected_wild(&self.entries)
    }

    /// One record per DAO; a failed lookup is reported on its own record.
    pub async fn check_balances(&self, source: &dyn BalanceSource) -> Vec<DaoBalanceRecord> {
        let mut records = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            match self.check_balance(source, entry).await {
                Ok(balance) => {
                    info!(
                        "{}: {:.2} ETH, {:.0} WILD ({:.1}% of target)",
                        entry.name, balance.eth_balance, balance.wild_balance, balance.buyback_progress
                    );
                    records.push(DaoBalanceRecord::Ok(balance));
                }
                Err(e) => {
                    error!("Error checking balance for {}: {}", entry.name, e);
                    records.push(DaoBalanceRecord::Error {
                        name: entry.name.clone(),
                        address: entry.address.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        records
    }

    async fn check_balance(&self, source: &dyn BalanceSource, entry: &DaoTreasuryEntry) -> Result<DaoBalance, FetchError> {
        let wei = source.get_native_balance(&entry.address).await?;
        let eth_balance = wei as f64 / WEI_PER_ETH;
        let wild_balance = source.get_token_balance(&entry.address, &self.wild_token).await?;

        Ok(DaoBalance {
            name: entry.name.clone(),
            address: entry.address.clone(),
            eth_balance,
            wild_balance,
            eth_allocation: entry.eth_allocation,
            expected_wild: entry.expected_wild,
            eth_remaining: eth_balance,
            buyback_progress: buyback_progress(wild_balance, entry.expected_wild),
        })
    }

    /// ETH outflows and WILD movements of every DAO since `since`.
    pub async fn scan_activity(
        &self,
        source: &dyn TransactionSource,
        normalizer: &Normalizer<'_>,
        since: DateTime<Utc>,
    ) -> BTreeMap<String, DaoTransactions> {
        let mut activity = BTreeMap::new();

        for entry in &self.entries {
            let mut raw =
                or_empty(&format!("{} native transfers", entry.name), source.fetch_native_transfers(&entry.address).await);
            raw.extend(or_empty(
                &format!("{} WILD transfers", entry.name),
                source.fetch_token_transfers(&entry.address, Some(&self.wild_token)).await,
            ));

            let ledger = dedup_entries(normalizer.normalize(&raw));
            activity.insert(entry.name.clone(), classify_dao_transactions(&entry.address, &self.wild_token, &ledger, since));
        }

        activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::{AddressRegistry, WILD_TOKEN};
    use crate::config::tests::test_config;
    use crate::transactions::tests::{native, token, FakeChain};
    use chrono::TimeZone;

    const WHEELS_DAO: &str = "0xc2e9678a71e50e5aed036e00e9c5caeb1ac5987d";
    const CRIBS_DAO: &str = "0xce2d2421ce6275b7a221f62ec5fa10a9c13e92f7";
    const SELLER: &str = "0x9999999999999999999999999999999999999999";

    fn greenlit() -> DateTime<Utc> {
        PhaseTimeline::default().phase2_greenlit
    }

    #[test]
    fn test_default_table() {
        let entries = DaoTreasuryEntry::defaults();
        assert_eq!(entries.len(), 9);
        assert_eq!(total_eth_allocation(&entries), 911.0);
        assert_eq!(total_expected_wild(&entries), 7_910_000.0);
        assert!(entries.iter().all(|e| e.address == e.address.to_ascii_lowercase()));
    }

    #[test]
    fn test_buyback_progress() {
        assert_eq!(buyback_progress(250.0, 1000.0), 25.0);
        assert_eq!(buyback_progress(500.0, 0.0), 0.0);
        assert_eq!(buyback_progress(-10.0, 1000.0), 0.0);
        assert_eq!(buyback_progress(1_797_500.0, 3_595_000.0), 50.0);
    }

    #[test]
    fn test_completion_skips_failed_lookups() {
        let ok = |name: &str, progress: f64| {
            DaoBalanceRecord::Ok(DaoBalance {
                name: name.to_string(),
                address: String::new(),
                eth_balance: 0.0,
                wild_balance: 0.0,
                eth_allocation: 0.0,
                expected_wild: 0.0,
                eth_remaining: 0.0,
                buyback_progress: progress,
            })
        };
        let records = vec![
            ok("Wheels DAO", 20.0),
            DaoBalanceRecord::Error { name: "Kicks DAO".to_string(), address: String::new(), error: "timeout".to_string() },
            ok("Moto DAO", 40.0),
        ];

        let completion = buyback_completion(&records);
        assert_eq!(completion.overall, 30.0);
        assert_eq!(completion.by_dao.len(), 2);
        assert!(!completion.by_dao.contains_key("Kicks DAO"));

        assert_eq!(buyback_completion(&records[1..2]).overall, 0.0);
        assert_eq!(buyback_completion(&[]).overall, 0.0);
    }

    #[tokio::test]
    async fn test_check_balances_isolates_failures() {
        let mut chain = FakeChain::default();
        chain.native_balances.insert(WHEELS_DAO.to_string(), 414_000_000_000_000_000_000);
        chain.token_balances.insert(WHEELS_DAO.to_string(), 898_750.0);
        chain.failing.push(CRIBS_DAO.to_string());

        let model = BuybackModel::new(DaoTreasuryEntry::defaults(), WILD_TOKEN);
        let records = model.check_balances(&chain).await;

        assert_eq!(records.len(), 9);
        let wheels = records[0].balance().unwrap();
        assert_eq!(wheels.eth_balance, 414.0);
        assert_eq!(wheels.eth_remaining, 414.0);
        assert_eq!(wheels.buyback_progress, 25.0);

        let cribs = records.iter().find(|r| r.name() == "Cribs DAO").unwrap();
        assert!(matches!(cribs, DaoBalanceRecord::Error { error, .. } if error.contains("rate limited")));

        let json = serde_json::to_value(cribs).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(buyback_completion(&records).by_dao.len(), 8);
    }

    #[test]
    fn test_classify_dao_transactions() {
        let registry = AddressRegistry::from_config(&test_config()).unwrap();
        let normalizer = Normalizer::new(&registry);
        let since = greenlit().timestamp();

        let ledger = normalizer.normalize(&[
            native("0x1", since - 10, WHEELS_DAO, SELLER, "5000000000000000000"),
            native("0x2", since + 10, WHEELS_DAO, SELLER, "7000000000000000000"),
            native("0x3", since + 20, SELLER, WHEELS_DAO, "1000000000000000000"),
            native("0x4", since + 30, WHEELS_DAO, SELLER, "0"),
            token("0x5", since + 40, SELLER, WHEELS_DAO, WILD_TOKEN, "60000000000000000000000"),
            token("0x6", since + 50, WHEELS_DAO, SELLER, WILD_TOKEN, "1000000000000000000"),
            token("0x7", since + 60, SELLER, WHEELS_DAO, "0x7777777777777777777777777777777777777777", "1"),
        ]);

        let txs = classify_dao_transactions(WHEELS_DAO, WILD_TOKEN, &ledger, greenlit());
        assert_eq!(txs.eth_outflows.len(), 1);
        assert_eq!(txs.eth_outflows[0].hash, "0x2");
        assert_eq!(txs.wild_inflows.len(), 1);
        assert_eq!(txs.wild_outflows.len(), 1);

        let activity = txs.activity().unwrap();
        assert_eq!(activity.eth_spent, 7.0);
        assert_eq!(activity.wild_acquired, 60_000.0);
        assert_eq!(activity.last_activity.unwrap().timestamp(), since + 40);
    }

    #[test]
    fn test_deadline_anomaly_when_nothing_executed() {
        let timeline = PhaseTimeline::default();
        let mut transactions = BTreeMap::new();
        transactions.insert("Wheels DAO".to_string(), DaoTransactions::default());

        let after = Utc.with_ymd_and_hms(2024, 8, 5, 0, 0, 0).unwrap();
        let patterns = detect_buyback_patterns(&transactions, &timeline, after);
        assert_eq!(patterns.execution_status, ExecutionStatus::Pending);
        assert_eq!(patterns.anomalies, vec![DEADLINE_ANOMALY.to_string()]);

        let before = Utc.with_ymd_and_hms(2024, 8, 3, 0, 0, 0).unwrap();
        assert!(detect_buyback_patterns(&transactions, &timeline, before).anomalies.is_empty());
    }

    #[test]
    fn test_activity_marks_execution_active() {
        let registry = AddressRegistry::from_config(&test_config()).unwrap();
        let normalizer = Normalizer::new(&registry);
        let since = greenlit().timestamp();
        let ledger = normalizer.normalize(&[native("0x1", since + 1, WHEELS_DAO, SELLER, "1000000000000000000")]);

        let mut transactions = BTreeMap::new();
        transactions.insert("Wheels DAO".to_string(), classify_dao_transactions(WHEELS_DAO, WILD_TOKEN, &ledger, greenlit()));
        transactions.insert("Kicks DAO".to_string(), DaoTransactions::default());

        let after = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let patterns = detect_buyback_patterns(&transactions, &PhaseTimeline::default(), after);
        assert_eq!(patterns.execution_status, ExecutionStatus::Active);
        assert_eq!(patterns.dao_activity.len(), 1);
        assert!(patterns.anomalies.is_empty());
    }

    #[test]
    fn test_zero_value_wild_transfer_is_not_execution() {
        let registry = AddressRegistry::from_config(&test_config()).unwrap();
        let normalizer = Normalizer::new(&registry);
        let since = greenlit().timestamp();
        let ledger = normalizer.normalize(&[token("0x1", since + 100, SELLER, WHEELS_DAO, WILD_TOKEN, "0")]);

        let txs = classify_dao_transactions(WHEELS_DAO, WILD_TOKEN, &ledger, greenlit());
        assert!(txs.wild_inflows.is_empty());
        assert_eq!(txs.activity(), None);

        let mut transactions = BTreeMap::new();
        transactions.insert("Wheels DAO".to_string(), txs);
        let after = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let patterns = detect_buyback_patterns(&transactions, &PhaseTimeline::default(), after);
        assert_eq!(patterns.execution_status, ExecutionStatus::Pending);
        assert_eq!(patterns.anomalies, vec![DEADLINE_ANOMALY.to_string()]);
    }

    #[test]
    fn test_wild_only_activity_reports_positive_zero_spend() {
        let registry = AddressRegistry::from_config(&test_config()).unwrap();
        let normalizer = Normalizer::new(&registry);
        let since = greenlit().timestamp();
        let ledger =
            normalizer.normalize(&[token("0x1", since + 100, SELLER, WHEELS_DAO, WILD_TOKEN, "5000000000000000000000")]);

        let activity = classify_dao_transactions(WHEELS_DAO, WILD_TOKEN, &ledger, greenlit()).activity().unwrap();
        assert!(activity.eth_spent.is_sign_positive());
        assert_eq!(serde_json::to_string(&activity.eth_spent).unwrap(), "0.0");
        assert_eq!(activity.wild_acquired, 5000.0);
    }

    #[tokio::test]
    async fn test_scan_activity_reads_each_dao() {
        let registry = AddressRegistry::from_config(&test_config()).unwrap();
        let normalizer = Normalizer::new(&registry);
        let since = greenlit().timestamp();

        let mut chain = FakeChain::default();
        chain.transfers.insert(
            WHEELS_DAO.to_string(),
            vec![
                native("0x1", since + 5, WHEELS_DAO, SELLER, "2000000000000000000"),
                native("0x1", since + 5, WHEELS_DAO, SELLER, "2000000000000000000"),
            ],
        );
        chain.failing.push(CRIBS_DAO.to_string());

        let model = BuybackModel::new(DaoTreasuryEntry::defaults(), WILD_TOKEN);
        let activity = model.scan_activity(&chain, &normalizer, greenlit()).await;

        assert_eq!(activity.len(), 9);
        assert_eq!(activity["Wheels DAO"].eth_outflows.len(), 1);
        assert!(activity["Cribs DAO"].eth_outflows.is_empty());
    }
}
