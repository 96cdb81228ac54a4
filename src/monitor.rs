// One-shot monitoring cycle
// Compares a fresh report against the state persisted by the previous cycle
// and raises alerts. Scheduling is left to cron or similar.

use crate::{
    buyback::{DaoBalanceRecord, ExecutionStatus},
    cache_db::CacheStore,
    helper::DataPoint,
    report::SummaryReport,
    signal::{DeadlineStatus, PhaseStatus},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

const STATE_KEY: &str = "monitor";
const COMPLETION_MILESTONES: [u32; 4] = [25, 50, 75, 100];
const LATEST_ALERT_COUNT: usize = 10;

///
/// MonitorThresholds
///

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorThresholds {
    pub dao_eth_outflow_eth: f64,
    pub wild_inflow: f64,
    pub price_change_pct: f64,
    pub high_price_change_pct: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            dao_eth_outflow_eth: 10.0,
            wild_inflow: 100_000.0,
            price_change_pct: 5.0,
            high_price_change_pct: 10.0,
        }
    }
}

///
/// Alert
///

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    #[display("dao_eth_outflow")]
    DaoEthOutflow,
    #[display("dao_wild_inflow")]
    DaoWildInflow,
    #[display("price_movement")]
    PriceMovement,
    #[display("execution_delay")]
    ExecutionDelay,
    #[display("completion_milestone")]
    CompletionMilestone,
}

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[display("medium")]
    Medium,
    #[display("high")]
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dao: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    fn new(kind: AlertKind, severity: Severity, message: String, now: DateTime<Utc>) -> Self {
        Self { kind, severity, message, dao: None, amount: None, timestamp: now }
    }

    fn for_dao(mut self, dao: &str, amount: f64) -> Self {
        self.dao = Some(dao.to_string());
        self.amount = Some(amount);
        self
    }
}

///
/// MonitorState
///

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DaoSnapshot {
    pub eth_balance: f64,
    pub wild_balance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorState {
    pub last_check: Option<DateTime<Utc>>,
    pub dao_balances: BTreeMap<String, DaoSnapshot>,
    pub last_wild_price: Option<f64>,
    pub alerts_sent: BTreeSet<String>,
}

impl MonitorState {
    /// Previous state, or a fresh one on the first run.
    pub fn load(store: &CacheStore) -> Result<Self> {
        match store.get_state(STATE_KEY)? {
            Some(json) => serde_json::from_str(&json).context("corrupt monitor state"),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, store: &CacheStore) -> Result<()> {
        store.put_state(STATE_KEY, &serde_json::to_string(self)?)
    }
}

/// Balance movements since the last snapshot. Errored records are skipped
/// and keep their previous snapshot.
pub fn check_dao_activity(
    state: &mut MonitorState,
    records: &[DaoBalanceRecord],
    thresholds: &MonitorThresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for balance in records.iter().filter_map(DaoBalanceRecord::balance) {
        if let Some(previous) = state.dao_balances.get(&balance.name) {
            let eth_change = previous.eth_balance - balance.eth_balance;
            if eth_change >= thresholds.dao_eth_outflow_eth {
                alerts.push(
                    Alert::new(
                        AlertKind::DaoEthOutflow,
                        Severity::High,
                        format!("{} sent {:.2} ETH (potential buyback)", balance.name, eth_change),
                        now,
                    )
                    .for_dao(&balance.name, eth_change),
                );
            }

            let wild_change = balance.wild_balance - previous.wild_balance;
            if wild_change > thresholds.wild_inflow {
                alerts.push(
                    Alert::new(
                        AlertKind::DaoWildInflow,
                        Severity::Medium,
                        format!("{} received {:.0} WILD tokens", balance.name, wild_change),
                        now,
                    )
                    .for_dao(&balance.name, wild_change),
                );
            }
        }

        state.dao_balances.insert(
            balance.name.clone(),
            DaoSnapshot { eth_balance: balance.eth_balance, wild_balance: balance.wild_balance },
        );
    }

    alerts
}

/// `current_price` is only the live quote; fallbacks never move the baseline.
pub fn check_price_movement(
    state: &mut MonitorState,
    current_price: Option<f64>,
    thresholds: &MonitorThresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let Some(price) = current_price else {
        return Vec::new();
    };
    let previous = state.last_wild_price.unwrap_or(price);
    state.last_wild_price = Some(price);

    if previous <= 0.0 {
        return Vec::new();
    }

    let change_pct = (price - previous) / previous * 100.0;
    if change_pct.abs() < thresholds.price_change_pct {
        return Vec::new();
    }

    let severity = if change_pct.abs() > thresholds.high_price_change_pct { Severity::High } else { Severity::Medium };
    let direction = if change_pct > 0.0 { "surged" } else { "dropped" };
    let mut alert = Alert::new(
        AlertKind::PriceMovement,
        severity,
        format!("WILD price {} {:.1}% to ${:.4}", direction, change_pct.abs(), price),
        now,
    );
    alert.amount = Some(change_pct);

    vec![alert]
}

pub fn check_buyback_progress(
    state: &mut MonitorState,
    phase: &PhaseStatus,
    execution_status: ExecutionStatus,
    overall_completion: f64,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if phase.phase2_deadline_status == DeadlineStatus::Passed && execution_status == ExecutionStatus::Pending {
        alerts.push(Alert::new(
            AlertKind::ExecutionDelay,
            Severity::High,
            "Phase 2 deadline passed without detected buyback execution".to_string(),
            now,
        ));
    }

    for milestone in COMPLETION_MILESTONES {
        let key = format!("completion_{}", milestone);
        if overall_completion >= f64::from(milestone) && !state.alerts_sent.contains(&key) {
            alerts.push(Alert::new(
                AlertKind::CompletionMilestone,
                Severity::Medium,
                format!("Operation Titan buybacks reached {}% completion", milestone),
                now,
            ));
            state.alerts_sent.insert(key);
        }
    }

    alerts
}

/// Runs every check against `report` and stamps the state.
pub fn run_cycle(
    state: &mut MonitorState,
    report: &SummaryReport,
    thresholds: &MonitorThresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    info!("Running monitoring cycle...");

    let live_price = match report.price_targets.current_price {
        DataPoint::Observed(price) => Some(price),
        _ => None,
    };

    let mut alerts = check_dao_activity(state, &report.dao_balances, thresholds, now);
    alerts.extend(check_price_movement(state, live_price, thresholds, now));
    alerts.extend(check_buyback_progress(
        state,
        &report.phase_status,
        report.buyback_patterns.execution_status,
        report.buyback_completion.overall,
        now,
    ));

    for alert in &alerts {
        match alert.severity {
            Severity::High => warn!("[{}] {}", alert.kind, alert.message),
            Severity::Medium => info!("[{}] {}", alert.kind, alert.message),
        }
    }

    state.last_check = Some(now);
    alerts
}

/// Appends to the day's alert file and rewrites `alerts_latest.json` with
/// the newest alerts of this batch.
pub fn write_alerts(dir: &Path, alerts: &[Alert], now: DateTime<Utc>) -> Result<Option<PathBuf>> {
    if alerts.is_empty() {
        return Ok(None);
    }
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let daily = dir.join(format!("alerts_{}.json", now.format("%Y%m%d")));
    let mut existing: Vec<Alert> = match fs::read_to_string(&daily) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("unreadable alert file {}, starting fresh: {}", daily.display(), e);
            Vec::new()
        }),
        Err(_) => Vec::new(),
    };
    existing.extend_from_slice(alerts);
    fs::write(&daily, serde_json::to_string_pretty(&existing)?)?;

    let start = alerts.len().saturating_sub(LATEST_ALERT_COUNT);
    fs::write(dir.join("alerts_latest.json"), serde_json::to_string_pretty(&alerts[start..])?)?;

    info!("Wrote {} alerts to {}", alerts.len(), daily.display());
    Ok(Some(daily))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buyback::DaoBalance, signal::Phase};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 10, 12, 0, 0).unwrap()
    }

    fn record(name: &str, eth: f64, wild: f64) -> DaoBalanceRecord {
        DaoBalanceRecord::Ok(DaoBalance {
            name: name.to_string(),
            address: "0xc2e9678a71e50e5aed036e00e9c5caeb1ac5987d".to_string(),
            eth_balance: eth,
            wild_balance: wild,
            eth_allocation: 414.0,
            expected_wild: 1_000_000.0,
            eth_remaining: eth,
            buyback_progress: wild / 1_000_000.0 * 100.0,
        })
    }

    fn phase(deadline: DeadlineStatus) -> PhaseStatus {
        PhaseStatus { current_phase: Phase::Phase2, days_since_phase2_greenlit: 13, phase2_deadline_status: deadline }
    }

    #[test]
    fn test_first_cycle_only_records_snapshot() {
        let mut state = MonitorState::default();
        let alerts = check_dao_activity(&mut state, &[record("Wheels DAO", 414.0, 0.0)], &MonitorThresholds::default(), now());

        assert!(alerts.is_empty());
        assert_eq!(state.dao_balances["Wheels DAO"].eth_balance, 414.0);
    }

    #[test]
    fn test_dao_outflow_and_inflow_alerts() {
        let mut state = MonitorState::default();
        state.dao_balances.insert("Wheels DAO".to_string(), DaoSnapshot { eth_balance: 414.0, wild_balance: 0.0 });

        let alerts =
            check_dao_activity(&mut state, &[record("Wheels DAO", 400.0, 250_000.0)], &MonitorThresholds::default(), now());

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, AlertKind::DaoEthOutflow);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].message, "Wheels DAO sent 14.00 ETH (potential buyback)");
        assert_eq!(alerts[1].kind, AlertKind::DaoWildInflow);
        assert_eq!(alerts[1].message, "Wheels DAO received 250000 WILD tokens");
        assert_eq!(state.dao_balances["Wheels DAO"].wild_balance, 250_000.0);
    }

    #[test]
    fn test_errored_record_keeps_previous_snapshot() {
        let mut state = MonitorState::default();
        state.dao_balances.insert("Cribs DAO".to_string(), DaoSnapshot { eth_balance: 93.0, wild_balance: 5.0 });

        let failed = DaoBalanceRecord::Error {
            name: "Cribs DAO".to_string(),
            address: "0xce2d2421ce6275b7a221f62ec5fa10a9c13e92f7".to_string(),
            error: "timeout".to_string(),
        };
        let alerts = check_dao_activity(&mut state, &[failed], &MonitorThresholds::default(), now());

        assert!(alerts.is_empty());
        assert_eq!(state.dao_balances["Cribs DAO"], DaoSnapshot { eth_balance: 93.0, wild_balance: 5.0 });
    }

    #[test]
    fn test_price_movement() {
        let thresholds = MonitorThresholds::default();
        let mut state = MonitorState::default();

        assert!(check_price_movement(&mut state, Some(0.5), &thresholds, now()).is_empty());
        assert_eq!(state.last_wild_price, Some(0.5));

        assert!(check_price_movement(&mut state, Some(0.5078125), &thresholds, now()).is_empty());

        let alerts = check_price_movement(&mut state, Some(0.546875), &thresholds, now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].message, "WILD price surged 7.7% to $0.5469");

        let alerts = check_price_movement(&mut state, Some(0.2734375), &thresholds, now());
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].message, "WILD price dropped 50.0% to $0.2734");

        assert!(check_price_movement(&mut state, None, &thresholds, now()).is_empty());
        assert_eq!(state.last_wild_price, Some(0.2734375));
    }

    #[test]
    fn test_execution_delay_and_milestones_fire_once() {
        let mut state = MonitorState::default();

        let alerts = check_buyback_progress(&mut state, &phase(DeadlineStatus::Passed), ExecutionStatus::Pending, 55.0, now());
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![AlertKind::ExecutionDelay, AlertKind::CompletionMilestone, AlertKind::CompletionMilestone]
        );
        assert!(state.alerts_sent.contains("completion_25"));
        assert!(state.alerts_sent.contains("completion_50"));

        let alerts = check_buyback_progress(&mut state, &phase(DeadlineStatus::Pending), ExecutionStatus::Active, 80.0, now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "Operation Titan buybacks reached 75% completion");
    }

    #[test]
    fn test_state_persists_in_cache() {
        let store = CacheStore::open_in_memory().unwrap();
        assert_eq!(MonitorState::load(&store).unwrap(), MonitorState::default());

        let mut state = MonitorState::default();
        state.last_wild_price = Some(0.38);
        state.alerts_sent.insert("completion_25".to_string());
        state.last_check = Some(now());
        state.save(&store).unwrap();

        assert_eq!(MonitorState::load(&store).unwrap(), state);
    }

    #[test]
    fn test_write_alerts_appends_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let alert = |n: usize| {
            Alert::new(AlertKind::PriceMovement, Severity::Medium, format!("alert {}", n), now())
        };

        assert_eq!(write_alerts(dir.path(), &[], now()).unwrap(), None);

        let first: Vec<Alert> = (0..3).map(alert).collect();
        let daily = write_alerts(dir.path(), &first, now()).unwrap().unwrap();
        assert!(daily.ends_with("alerts_20240810.json"));

        let second: Vec<Alert> = (3..15).map(alert).collect();
        write_alerts(dir.path(), &second, now()).unwrap();

        let all: Vec<Alert> = serde_json::from_str(&fs::read_to_string(&daily).unwrap()).unwrap();
        assert_eq!(all.len(), 15);

        let latest: Vec<Alert> =
            serde_json::from_str(&fs::read_to_string(dir.path().join("alerts_latest.json")).unwrap()).unwrap();
        assert_eq!(latest.len(), 10);
        assert_eq!(latest[0].message, "alert 5");
        assert_eq!(latest[9].message, "alert 14");
    }
}
