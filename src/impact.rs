// Supply dynamics, price impact and price targets
// All figures are point-in-time estimates driven by ModelParams.

use crate::{buyback::BuybackCompletion, config::ModelParams, helper::DataPoint};
use serde::{Deserialize, Serialize};

const MONTHS_PER_YEAR: f64 = 12.0;

///
/// SupplyDynamics
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyDynamics {
    pub total_supply: f64,
    pub circulating_supply: f64,
    pub otc_locked: f64,
    pub dao_buyback_target: f64,
    pub total_locked: f64,
    pub estimated_burns: f64,
    pub effective_circulating: f64,
    pub supply_reduction_pct: f64,
}

pub fn supply_reduction_pct(otc_locked: f64, dao_buyback_target: f64, circulating_supply: f64) -> f64 {
    if circulating_supply > 0.0 {
        (otc_locked + dao_buyback_target) / circulating_supply * 100.0
    } else {
        0.0
    }
}

/// Annualized supply reduction: the monthly burn estimate plus the one-off lock-up.
pub fn deflationary_rate(monthly_burn_estimate: f64, supply_reduction_pct: f64) -> f64 {
    (monthly_burn_estimate * MONTHS_PER_YEAR + supply_reduction_pct / 100.0) * 100.0
}

///
/// PriceImpact
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceImpact {
    pub eth_price: DataPoint<f64>,
    pub total_buyback_usd: f64,
    pub estimated_daily_volume: DataPoint<f64>,
    pub buyback_volume_percentage: f64,
    pub estimated_price_impact_pct: f64,
    pub supply_reduction_impact: f64,
    pub combined_impact_estimate: f64,
}

///
/// PriceTargets
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTargets {
    pub current_price: DataPoint<f64>,
    pub conservative: f64,
    pub base_case: f64,
    pub optimistic: f64,
    pub one_year_target: f64,
    pub methodology: String,
}

pub fn price_targets(current_price: DataPoint<f64>, combined_impact_pct: f64, deflationary_rate: f64) -> PriceTargets {
    let price = current_price.get().unwrap_or(0.0);
    let impact = combined_impact_pct / 100.0;

    PriceTargets {
        conservative: price * (1.0 + impact * 0.5),
        base_case: price * (1.0 + impact),
        optimistic: price * (1.0 + impact * 1.5),
        one_year_target: price * (1.0 + deflationary_rate / 100.0),
        current_price,
        methodology: "Based on supply reduction and buyback impact analysis".to_string(),
    }
}

///
/// BuybackImpact
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuybackImpact {
    pub supply_reduction_benefit: f64,
    pub estimated_price_appreciation: f64,
    pub deflationary_rate: f64,
    pub buyback_completion: BuybackCompletion,
}

///
/// ImpactEstimator
///

pub struct ImpactEstimator<'a> {
    params: &'a ModelParams,
}

impl<'a> ImpactEstimator<'a> {
    pub fn new(params: &'a ModelParams) -> Self {
        Self { params }
    }

    pub fn supply_dynamics(&self, dao_buyback_target: f64) -> SupplyDynamics {
        let p = self.params;
        let total_locked = p.otc_locked + dao_buyback_target;

        SupplyDynamics {
            total_supply: p.total_supply,
            circulating_supply: p.circulating_supply,
            otc_locked: p.otc_locked,
            dao_buyback_target,
            total_locked,
            estimated_burns: p.estimated_burns,
            effective_circulating: p.circulating_supply - total_locked,
            supply_reduction_pct: supply_reduction_pct(p.otc_locked, dao_buyback_target, p.circulating_supply),
        }
    }

    /// `live_eth_price` falls back to the configured assumption when absent.
    pub fn price_impact(&self, total_eth_allocation: f64, supply: &SupplyDynamics, live_eth_price: Option<f64>) -> PriceImpact {
        let p = self.params;
        let eth_price = DataPoint::observed_or(live_eth_price, p.eth_price_usd);
        let total_buyback_usd = total_eth_allocation * eth_price.get().unwrap_or(p.eth_price_usd);

        let buyback_volume_percentage =
            if p.daily_volume_usd > 0.0 { total_buyback_usd / p.daily_volume_usd * 100.0 } else { 0.0 };
        let estimated_price_impact_pct = buyback_volume_percentage * p.volume_impact_coefficient;

        PriceImpact {
            eth_price,
            total_buyback_usd,
            estimated_daily_volume: DataPoint::Fallback(p.daily_volume_usd),
            buyback_volume_percentage,
            estimated_price_impact_pct,
            supply_reduction_impact: supply.supply_reduction_pct,
            combined_impact_estimate: estimated_price_impact_pct
                + supply.supply_reduction_pct * p.supply_reduction_weight,
        }
    }

    pub fn deflationary_rate(&self, supply: &SupplyDynamics) -> f64 {
        deflationary_rate(self.params.monthly_burn_estimate, supply.supply_reduction_pct)
    }

    /// Current WILD price, or the configured fallback when no live quote exists.
    pub fn current_price(&self, live_price: Option<f64>) -> DataPoint<f64> {
        DataPoint::observed_or(live_price, self.params.fallback_wild_price)
    }

    pub fn buyback_impact(
        &self,
        supply: &SupplyDynamics,
        impact: &PriceImpact,
        completion: BuybackCompletion,
    ) -> BuybackImpact {
        BuybackImpact {
            supply_reduction_benefit: supply.supply_reduction_pct,
            estimated_price_appreciation: impact.combined_impact_estimate,
            deflationary_rate: self.deflationary_rate(supply),
            buyback_completion: completion,
        }
    }
}
