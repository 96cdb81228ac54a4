pub mod addresses;
pub mod buyback;
pub mod cache_db;
pub mod config;
pub mod helper;
pub mod holdings;
pub mod impact;
pub mod monitor;
pub mod normalizer;
pub mod prices;
pub mod report;
pub mod signal;
pub mod transactions;

use addresses::AddressRegistry;
use cache_db::CacheStore;
use chrono::Utc;
use config::{Config, ConfigError};
use helper::{AddressError, DataPoint};
use monitor::MonitorState;
use prices::CoinGeckoClient;
use report::{write_report, HoldingsReport, SummaryReport, TitanTracker};
use signal::phase_status;
use std::{env, sync::Arc};
use thiserror::Error as ThisError;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transactions::EtherscanClient;

///
/// Error
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("address error: {0}")]
    Address(#[from] AddressError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

//
// main
//

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("report");

    if mode == "phase" {
        run_phase_mode()?;
        return Ok(());
    }

    let config = Config::from_env()?;
    let registry = AddressRegistry::from_config(&config)?;
    let cache = Arc::new(CacheStore::new(config.cache_path())?);
    let etherscan = EtherscanClient::new(&config, Some(cache.clone()));
    let coingecko = CoinGeckoClient::new(&config, Some(cache.clone()));
    let tracker = TitanTracker::new(&config, &registry, &etherscan, &etherscan, &coingecko);

    match mode {
        "report" => run_report_mode(&config, &tracker).await?,
        "holdings" => run_holdings_mode(&config, &tracker).await?,
        "monitor" => run_monitor_mode(&config, &tracker, &cache).await?,
        _ => {
            eprintln!("Unknown mode: {}. Use 'report', 'holdings', 'monitor' or 'phase'", mode);
            std::process::exit(1);
        }
    }

    if let Ok(stats) = cache.stats() {
        info!("cache: {} raw responses, {} prices", stats.raw_responses, stats.prices);
    }

    Ok(())
}

fn run_phase_mode() -> Result<(), Error> {
    // only the timeline is needed, so a partial environment is fine here
    let timeline = match Config::from_env() {
        Ok(config) => config.timeline,
        Err(e) => {
            info!("using default timeline ({})", e);
            Default::default()
        }
    };
    let status = phase_status(&timeline, Utc::now());

    println!("Current phase: {}", status.current_phase);
    println!("Days since Phase 2 greenlit: {}", status.days_since_phase2_greenlit);
    println!("Phase 2 deadline: {}", status.phase2_deadline_status);
    println!("{}", serde_json::to_string_pretty(&status)?);

    Ok(())
}

async fn run_report_mode(config: &Config, tracker: &TitanTracker<'_>) -> Result<(), Error> {
    println!("Starting Operation Titan analysis...");

    let holdings = tracker.collect_portfolio().await;
    let report = tracker.generate_summary_report(Utc::now(), Some(&holdings)).await;
    let path = write_report(&report, &config.output_dir)?;

    print_summary(&report);
    println!("\nAnalysis saved to {}", path.display());

    Ok(())
}

async fn run_holdings_mode(config: &Config, tracker: &TitanTracker<'_>) -> Result<(), Error> {
    println!("Reconciling owned wallet holdings...");

    let report = tracker.generate_holdings_report().await;
    print_holdings(&report);

    std::fs::create_dir_all(&config.output_dir)?;
    let file_name = config.output_dir.join("titan_holdings_latest.json");
    std::fs::write(&file_name, serde_json::to_string_pretty(&report)?)?;
    println!("\nHoldings saved to {}", file_name.display());

    Ok(())
}

async fn run_monitor_mode(config: &Config, tracker: &TitanTracker<'_>, cache: &CacheStore) -> Result<(), Error> {
    let mut state = MonitorState::load(cache)?;
    let now = Utc::now();

    let report = tracker.generate_summary_report(now, None).await;
    let alerts = monitor::run_cycle(&mut state, &report, &config.monitor, now);
    let alert_dir = config.output_dir.join("alerts");
    monitor::write_alerts(&alert_dir, &alerts, now)?;
    state.save(cache)?;

    if alerts.is_empty() {
        println!("No alerts this cycle");
    }
    for alert in &alerts {
        println!("[{}] {}", alert.severity.to_string().to_uppercase(), alert.message);
    }

    Ok(())
}

fn print_summary(report: &SummaryReport) {
    let signal = &report.trading_signal;
    let targets = &report.price_targets;

    println!("\n=== Operation Titan Summary ===");
    println!("Phase: {} ({} days since Phase 2 greenlit)", report.phase_status.current_phase, report.phase_status.days_since_phase2_greenlit);
    println!("Buyback completion: {:.1}%", report.buyback_completion.overall);
    println!("Execution status: {}", report.buyback_patterns.execution_status);
    println!("Supply reduction: {:.2}%", report.supply_dynamics.supply_reduction_pct);
    println!("Combined impact estimate: {:.2}%", report.price_impact.combined_impact_estimate);

    match &targets.current_price {
        DataPoint::Observed(price) => println!("WILD price: ${:.4}", price),
        DataPoint::Fallback(price) => println!("WILD price: ${:.4} (fallback)", price),
        DataPoint::Unavailable => println!("WILD price: unavailable"),
    }
    println!(
        "Targets: conservative ${:.4}, base ${:.4}, optimistic ${:.4}, 1y ${:.4}",
        targets.conservative, targets.base_case, targets.optimistic, targets.one_year_target
    );

    if let DataPoint::Observed(exposure) = &report.portfolio_exposure {
        println!("Portfolio exposure: {:.0} WILD", exposure.total_exposure_wild);
    }

    println!("\nSignal: {} / {} (confidence {})", signal.overall_sentiment, signal.action, signal.confidence);
    println!("Key findings:");
    for finding in &report.key_findings {
        println!("  - {}", finding);
    }

    if !report.risk_assessment.specific_concerns.is_empty() {
        println!("Concerns:");
        for concern in &report.risk_assessment.specific_concerns {
            println!("  ! {}", concern);
        }
    }
}

fn print_holdings(report: &HoldingsReport) {
    let summary = &report.summary;
    let exposure = &report.exposure;

    println!("\n=== Holdings ===");
    for (wallet, balance) in &summary.wild_by_wallet {
        println!("{:<14} {:>16.2} WILD", wallet, balance);
    }
    println!("Total WILD: {:.2}", summary.wild_total);
    println!("Total LP: {:.6}", summary.lp_total);
    println!("Total exposure: {:.2} WILD", exposure.total_exposure_wild);

    for (collection, nfts) in &summary.nft_holdings {
        println!("{}: {} NFTs", collection, nfts.total);
    }

    println!("Gas spent: {:.4} ETH (${:.2})", summary.gas_total_eth, report.gas_total_usd);
    println!("Inter-wallet transfers: {}", summary.inter_owned_transfer_count);
}
