use crate::{
    buyback::{BuybackPatterns, ExecutionStatus},
    impact::{PriceImpact, PriceTargets},
};
use chrono::{DateTime, TimeZone, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

pub const DEADLINE_CONCERN: &str = "Phase 2 deadline passed without detected execution";

fn utc_midnight(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single().unwrap_or_default()
}

///
/// PhaseTimeline
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeline {
    pub otc_start: DateTime<Utc>,
    pub phase1_start: DateTime<Utc>,
    pub phase2_greenlit: DateTime<Utc>,
    pub phase2_deadline: DateTime<Utc>,
}

impl Default for PhaseTimeline {
    fn default() -> Self {
        Self {
            otc_start: utc_midnight(2024, 1, 1),
            phase1_start: utc_midnight(2024, 7, 23),
            phase2_greenlit: utc_midnight(2024, 7, 28),
            phase2_deadline: utc_midnight(2024, 8, 4),
        }
    }
}

///
/// PhaseStatus
///

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[display("OTC")]
    #[serde(rename = "OTC")]
    Otc,
    #[display("Phase 1")]
    #[serde(rename = "Phase 1")]
    Phase1,
    #[display("Phase 2")]
    #[serde(rename = "Phase 2")]
    Phase2,
}

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineStatus {
    #[display("pending")]
    Pending,
    #[display("passed")]
    Passed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStatus {
    pub current_phase: Phase,
    pub days_since_phase2_greenlit: i64,
    pub phase2_deadline_status: DeadlineStatus,
}

pub fn phase_status(timeline: &PhaseTimeline, now: DateTime<Utc>) -> PhaseStatus {
    let current_phase = if now < timeline.phase1_start {
        Phase::Otc
    } else if now < timeline.phase2_greenlit {
        Phase::Phase1
    } else {
        Phase::Phase2
    };

    let phase2_deadline_status =
        if now < timeline.phase2_deadline { DeadlineStatus::Pending } else { DeadlineStatus::Passed };

    PhaseStatus {
        current_phase,
        days_since_phase2_greenlit: (now - timeline.phase2_greenlit).num_days(),
        phase2_deadline_status,
    }
}

///
/// RiskAssessment
///

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[display("low")]
    Low,
    #[display("medium")]
    Medium,
    #[display("high")]
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub execution_risk: RiskLevel,
    pub timing_risk: RiskLevel,
    pub liquidity_risk: RiskLevel,
    pub front_running_risk: RiskLevel,
    pub specific_concerns: Vec<String>,
}

pub fn assess_risks(
    patterns: &BuybackPatterns,
    phase: &PhaseStatus,
    impact: &PriceImpact,
    liquidity_threshold_pct: f64,
) -> RiskAssessment {
    let mut risks = RiskAssessment {
        execution_risk: RiskLevel::Low,
        timing_risk: RiskLevel::Medium,
        liquidity_risk: RiskLevel::Medium,
        front_running_risk: RiskLevel::High,
        specific_concerns: Vec::new(),
    };

    if phase.phase2_deadline_status == DeadlineStatus::Passed && patterns.execution_status == ExecutionStatus::Pending {
        risks.execution_risk = RiskLevel::High;
        risks.specific_concerns.push(DEADLINE_CONCERN.to_string());
    }
    risks.specific_concerns.extend(patterns.anomalies.iter().cloned());

    if impact.buyback_volume_percentage > liquidity_threshold_pct {
        risks.liquidity_risk = RiskLevel::High;
        risks
            .specific_concerns
            .push(format!("Buyback volume exceeds {}% of daily volume", liquidity_threshold_pct));
    }

    risks
}

///
/// TradingSignal
///

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    #[display("bullish")]
    Bullish,
    #[display("neutral")]
    Neutral,
    #[display("bearish")]
    Bearish,
}

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[display("accumulate")]
    Accumulate,
    #[display("hold")]
    Hold,
    #[display("reduce")]
    Reduce,
}

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[display("low")]
    Low,
    #[display("medium")]
    Medium,
    #[display("high")]
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub overall_sentiment: Sentiment,
    pub action: Action,
    pub confidence: Confidence,
    pub rationale: Vec<String>,
}

impl TradingSignal {
    /// The first three rationale lines.
    pub fn key_findings(&self) -> Vec<String> {
        self.rationale.iter().take(3).cloned().collect()
    }
}

/// Rules are applied in order and each one appends its rationale.
pub fn generate_signal(overall_completion: f64, risks: &RiskAssessment, targets: &PriceTargets) -> TradingSignal {
    let mut signal = TradingSignal {
        overall_sentiment: Sentiment::Neutral,
        action: Action::Hold,
        confidence: Confidence::Medium,
        rationale: Vec::new(),
    };

    if overall_completion < 50.0 && risks.execution_risk == RiskLevel::Low {
        signal.overall_sentiment = Sentiment::Bullish;
        signal.action = Action::Accumulate;
        signal.rationale.push("Buybacks less than 50% complete with low execution risk".to_string());
    }

    if let Some(price) = targets.current_price.get() {
        if price < targets.conservative {
            if signal.overall_sentiment != Sentiment::Bearish {
                signal.overall_sentiment = Sentiment::Bullish;
            }
            signal.rationale.push("Price below conservative target".to_string());
        }
    }

    if risks.execution_risk == RiskLevel::High {
        signal.confidence = Confidence::Low;
        signal.rationale.push("High execution risk detected".to_string());
    }

    signal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buyback::DEADLINE_ANOMALY, helper::DataPoint, impact::price_targets};
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn patterns(status: ExecutionStatus, anomalies: &[&str]) -> BuybackPatterns {
        BuybackPatterns {
            dao_activity: BTreeMap::new(),
            execution_status: status,
            anomalies: anomalies.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn impact(volume_pct: f64) -> PriceImpact {
        PriceImpact {
            eth_price: DataPoint::Fallback(3300.0),
            total_buyback_usd: 0.0,
            estimated_daily_volume: DataPoint::Fallback(5_000_000.0),
            buyback_volume_percentage: volume_pct,
            estimated_price_impact_pct: volume_pct * 0.5,
            supply_reduction_impact: 0.0,
            combined_impact_estimate: volume_pct * 0.5,
        }
    }

    #[test]
    fn test_phase_boundaries() {
        let timeline = PhaseTimeline::default();
        let second = Duration::seconds(1);

        assert_eq!(phase_status(&timeline, timeline.phase1_start - second).current_phase, Phase::Otc);
        assert_eq!(phase_status(&timeline, timeline.phase1_start).current_phase, Phase::Phase1);
        assert_eq!(phase_status(&timeline, timeline.phase1_start + second).current_phase, Phase::Phase1);
        assert_eq!(phase_status(&timeline, timeline.phase2_greenlit - second).current_phase, Phase::Phase1);
        assert_eq!(phase_status(&timeline, timeline.phase2_greenlit).current_phase, Phase::Phase2);
        assert_eq!(phase_status(&timeline, timeline.phase2_greenlit + second).current_phase, Phase::Phase2);

        let before = phase_status(&timeline, timeline.phase2_deadline - second);
        assert_eq!(before.phase2_deadline_status, DeadlineStatus::Pending);
        let at = phase_status(&timeline, timeline.phase2_deadline);
        assert_eq!(at.phase2_deadline_status, DeadlineStatus::Passed);
        assert_eq!(at.days_since_phase2_greenlit, 7);
        let after = phase_status(&timeline, timeline.phase2_deadline + second);
        assert_eq!(after.phase2_deadline_status, DeadlineStatus::Passed);
        assert_eq!(after.current_phase, Phase::Phase2);
    }

    #[test]
    fn test_phase_serializes_as_label() {
        assert_eq!(serde_json::to_value(Phase::Phase1).unwrap(), "Phase 1");
        assert_eq!(Phase::Otc.to_string(), "OTC");
        assert_eq!(serde_json::to_value(DeadlineStatus::Passed).unwrap(), "passed");
    }

    #[test]
    fn test_deadline_passed_without_execution_is_high_risk() {
        let timeline = PhaseTimeline::default();
        let phase = phase_status(&timeline, timeline.phase2_deadline + Duration::days(1));
        let risks = assess_risks(&patterns(ExecutionStatus::Pending, &[DEADLINE_ANOMALY]), &phase, &impact(10.0), 20.0);

        assert_eq!(risks.execution_risk, RiskLevel::High);
        assert_eq!(risks.timing_risk, RiskLevel::Medium);
        assert_eq!(risks.liquidity_risk, RiskLevel::Medium);
        assert_eq!(risks.front_running_risk, RiskLevel::High);
        assert_eq!(risks.specific_concerns, vec![DEADLINE_CONCERN.to_string(), DEADLINE_ANOMALY.to_string()]);
    }

    #[test]
    fn test_active_execution_keeps_risk_low() {
        let timeline = PhaseTimeline::default();
        let phase = phase_status(&timeline, timeline.phase2_deadline + Duration::days(1));
        let risks = assess_risks(&patterns(ExecutionStatus::Active, &[]), &phase, &impact(60.126), 20.0);

        assert_eq!(risks.execution_risk, RiskLevel::Low);
        assert_eq!(risks.liquidity_risk, RiskLevel::High);
        assert_eq!(risks.specific_concerns, vec!["Buyback volume exceeds 20% of daily volume".to_string()]);
    }

    #[test]
    fn test_signal_accumulate_when_early_and_low_risk() {
        let risks = RiskAssessment {
            execution_risk: RiskLevel::Low,
            timing_risk: RiskLevel::Medium,
            liquidity_risk: RiskLevel::High,
            front_running_risk: RiskLevel::High,
            specific_concerns: Vec::new(),
        };
        let targets = price_targets(DataPoint::Fallback(0.38), 10.0, 20.0);
        let signal = generate_signal(25.0, &risks, &targets);

        assert_eq!(signal.overall_sentiment, Sentiment::Bullish);
        assert_eq!(signal.action, Action::Accumulate);
        assert_eq!(signal.confidence, Confidence::Medium);
        assert_eq!(
            signal.rationale,
            vec![
                "Buybacks less than 50% complete with low execution risk".to_string(),
                "Price below conservative target".to_string(),
            ]
        );
    }

    #[test]
    fn test_signal_with_high_execution_risk() {
        let risks = RiskAssessment {
            execution_risk: RiskLevel::High,
            timing_risk: RiskLevel::Medium,
            liquidity_risk: RiskLevel::Medium,
            front_running_risk: RiskLevel::High,
            specific_concerns: Vec::new(),
        };
        let targets = price_targets(DataPoint::Observed(0.38), 10.0, 20.0);
        let signal = generate_signal(10.0, &risks, &targets);

        assert_eq!(signal.action, Action::Hold);
        assert_eq!(signal.overall_sentiment, Sentiment::Bullish);
        assert_eq!(signal.confidence, Confidence::Low);
        assert_eq!(signal.key_findings().last().map(String::as_str), Some("High execution risk detected"));
    }

    #[test]
    fn test_signal_neutral_when_complete_and_no_upside() {
        let risks = RiskAssessment {
            execution_risk: RiskLevel::Low,
            timing_risk: RiskLevel::Medium,
            liquidity_risk: RiskLevel::Medium,
            front_running_risk: RiskLevel::High,
            specific_concerns: Vec::new(),
        };
        let targets = price_targets(DataPoint::Observed(0.38), 0.0, 20.0);
        let signal = generate_signal(80.0, &risks, &targets);

        assert_eq!(signal.overall_sentiment, Sentiment::Neutral);
        assert_eq!(signal.action, Action::Hold);
        assert!(signal.rationale.is_empty());
    }
}
