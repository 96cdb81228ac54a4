// Summary report assembly
// Runs the whole pipeline against the injected sources and writes the JSON
// report consumed by the dashboard renderer.

use crate::{
    addresses::AddressRegistry,
    buyback::{
        buyback_completion, detect_buyback_patterns, BuybackCompletion, BuybackModel, BuybackPatterns, DaoBalanceRecord,
        DaoTreasuryEntry,
    },
    config::Config,
    helper::DataPoint,
    holdings::{gas_paid_entries, reconcile_portfolio, PortfolioExposure, PortfolioHoldings, PortfolioSummary},
    impact::{price_targets, BuybackImpact, ImpactEstimator, PriceImpact, PriceTargets, SupplyDynamics},
    normalizer::{dedup_entries, LedgerEntry, Normalizer},
    prices::{current_prices, gas_spend_usd, PriceOracle},
    signal::{assess_risks, generate_signal, phase_status, PhaseStatus, RiskAssessment, TradingSignal},
    transactions::{collect_wallet_transfers, BalanceSource, TransactionSource},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

///
/// SummaryReport
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub timestamp: DateTime<Utc>,
    pub dao_balances: Vec<DaoBalanceRecord>,
    pub buyback_completion: BuybackCompletion,
    pub supply_dynamics: SupplyDynamics,
    pub buyback_patterns: BuybackPatterns,
    pub price_impact: PriceImpact,
    pub phase_status: PhaseStatus,
    pub portfolio_exposure: DataPoint<PortfolioExposure>,
    pub portfolio: Option<PortfolioSummary>,
    pub price_targets: PriceTargets,
    pub buyback_impact: BuybackImpact,
    pub risk_assessment: RiskAssessment,
    pub trading_signal: TradingSignal,
    pub key_findings: Vec<String>,
}

///
/// HoldingsReport
///

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingsReport {
    #[serde(flatten)]
    pub summary: PortfolioSummary,
    pub exposure: PortfolioExposure,
    pub gas_total_usd: f64,
    pub gas_usd_by_wallet: BTreeMap<String, f64>,
}

///
/// TitanTracker
///

pub struct TitanTracker<'a> {
    config: &'a Config,
    registry: &'a AddressRegistry,
    transactions: &'a dyn TransactionSource,
    balances: &'a dyn BalanceSource,
    prices: &'a dyn PriceOracle,
    model: BuybackModel,
}

impl<'a> TitanTracker<'a> {
    pub fn new(
        config: &'a Config,
        registry: &'a AddressRegistry,
        transactions: &'a dyn TransactionSource,
        balances: &'a dyn BalanceSource,
        prices: &'a dyn PriceOracle,
    ) -> Self {
        Self {
            config,
            registry,
            transactions,
            balances,
            prices,
            model: BuybackModel::new(DaoTreasuryEntry::defaults(), &config.wild_token),
        }
    }

    /// Normalized, deduplicated ledger per owned wallet.
    pub async fn collect_ledgers(&self) -> BTreeMap<String, Vec<LedgerEntry>> {
        let normalizer = Normalizer::new(self.registry);
        let mut ledgers = BTreeMap::new();

        for (name, address) in self.registry.owned_wallets() {
            info!("Processing {}", name);
            let raw = collect_wallet_transfers(self.transactions, name, address).await;
            let ledger = dedup_entries(normalizer.normalize(&raw));
            info!("{}: {} ledger entries", name, ledger.len());
            ledgers.insert(name.clone(), ledger);
        }

        ledgers
    }

    /// Fetches and reconciles every owned wallet.
    pub async fn collect_portfolio(&self) -> PortfolioHoldings {
        reconcile_portfolio(self.registry, &self.collect_ledgers().await)
    }

    /// Portfolio summary with gas valued at the ETH price of each transaction day.
    pub async fn generate_holdings_report(&self) -> HoldingsReport {
        let ledgers = self.collect_ledgers().await;
        let holdings = reconcile_portfolio(self.registry, &ledgers);

        let mut gas_usd_by_wallet = BTreeMap::new();
        for (name, address) in self.registry.owned_wallets() {
            let paid = ledgers.get(name).map(|l| gas_paid_entries(address, l)).unwrap_or_default();
            gas_usd_by_wallet.insert(name.clone(), gas_spend_usd(self.prices, &paid).await);
        }

        HoldingsReport {
            summary: holdings.summary(),
            exposure: holdings.exposure(self.config.model.lp_wild_share),
            gas_total_usd: gas_usd_by_wallet.values().fold(0.0, |total, usd| total + usd),
            gas_usd_by_wallet,
        }
    }

    /// Portfolio exposure is reported as unavailable when `portfolio` is `None`.
    pub async fn generate_summary_report(
        &self,
        now: DateTime<Utc>,
        portfolio: Option<&PortfolioHoldings>,
    ) -> SummaryReport {
        let model_params = &self.config.model;
        let timeline = &self.config.timeline;
        let estimator = ImpactEstimator::new(model_params);

        info!("Checking DAO treasury balances...");
        let dao_balances = self.model.check_balances(self.balances).await;
        let completion = buyback_completion(&dao_balances);

        info!("Scanning DAO activity since {}", timeline.phase2_greenlit);
        let normalizer = Normalizer::new(self.registry);
        let activity = self.model.scan_activity(self.transactions, &normalizer, timeline.phase2_greenlit).await;
        let buyback_patterns = detect_buyback_patterns(&activity, timeline, now);

        let market = current_prices(self.prices).await;
        let supply_dynamics = estimator.supply_dynamics(self.model.total_expected_wild());
        let price_impact =
            estimator.price_impact(self.model.total_eth_allocation(), &supply_dynamics, market.get("ETH").copied());
        let phase_status = phase_status(timeline, now);

        let price_targets = price_targets(
            estimator.current_price(market.get("WILD").copied()),
            price_impact.combined_impact_estimate,
            estimator.deflationary_rate(&supply_dynamics),
        );
        let buyback_impact = estimator.buyback_impact(&supply_dynamics, &price_impact, completion.clone());
        let risk_assessment =
            assess_risks(&buyback_patterns, &phase_status, &price_impact, model_params.liquidity_risk_threshold_pct);
        let trading_signal = generate_signal(completion.overall, &risk_assessment, &price_targets);

        let portfolio_exposure = match portfolio {
            Some(holdings) => DataPoint::Observed(holdings.exposure(model_params.lp_wild_share)),
            None => DataPoint::Unavailable,
        };

        SummaryReport {
            timestamp: now,
            key_findings: trading_signal.key_findings(),
            dao_balances,
            buyback_completion: completion,
            supply_dynamics,
            buyback_patterns,
            price_impact,
            phase_status,
            portfolio_exposure,
            portfolio: portfolio.map(PortfolioHoldings::summary),
            price_targets,
            buyback_impact,
            risk_assessment,
            trading_signal,
        }
    }
}

/// Writes `titan_analysis_<timestamp>.json` and refreshes
/// `titan_analysis_latest.json`. Returns the timestamped path.
pub fn write_report(report: &SummaryReport, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;

    let json = serde_json::to_string_pretty(report)?;
    let path = output_dir.join(format!("titan_analysis_{}.json", report.timestamp.format("%Y%m%d_%H%M%S")));
    fs::write(&path, &json).with_context(|| format!("writing {}", path.display()))?;
    fs::write(output_dir.join("titan_analysis_latest.json"), &json)?;

    info!("Analysis saved to {}", path.display());
    Ok(path)
}
