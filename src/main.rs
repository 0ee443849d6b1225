//! basisvault CLI.
//!
//! The `simulate` subcommand wires the strategy engine to the sandbox
//! collaborators and runs a full lifecycle — deposit, utilization, keeper
//! cycles, withdrawal, claim — printing the strategy snapshot at each phase.

use anyhow::{Context, Result};
use basisvault::config::SimConfig;
use basisvault::logging::LogThrottle;
use basisvault::math::decimal_to_wad;
use basisvault::sandbox::{SimRig, SimRigParams};
use basisvault::strategy::{ExecutionOutcome, WithdrawOutcome};
use basisvault::types::TokenInfo;
use alloy_primitives::{Address, U256};
use clap::Parser;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    verbose: String,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a full vault lifecycle against the sandbox collaborators
    Simulate {
        /// Path to a simulator TOML config; defaults are used if omitted
        #[arg(short, long)]
        config: Option<String>,
        /// Use the manual-path swap adapter instead of the aggregator
        #[arg(long, default_value_t = false)]
        manual_path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.verbose)),
        )
        .init();

    match &cli.command {
        Commands::Simulate {
            config,
            manual_path,
        } => {
            let sim_config = match config {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("reading simulator config {path}"))?;
                    Some(SimConfig::from_toml(&raw).context("parsing simulator config")?)
                }
                None => None,
            };
            run_simulation(sim_config, *manual_path).await?;
        }
    }

    Ok(())
}

fn rig_params(config: Option<&SimConfig>, manual_path: bool) -> Result<SimRigParams> {
    let mut params = SimRigParams {
        manual_path,
        ..SimRigParams::default()
    };
    let Some(config) = config else {
        return Ok(params);
    };

    params.asset = TokenInfo::new(
        Address::repeat_byte(0xA1),
        config.asset.decimals,
        config.asset.symbol.clone(),
    );
    params.product = TokenInfo::new(
        Address::repeat_byte(0xB1),
        config.product.decimals,
        config.product.symbol.clone(),
    );
    params.asset_price_wad = decimal_to_wad(config.asset.price)?;
    params.product_price_wad = decimal_to_wad(config.product.price)?;
    params.min_leverage = decimal_to_wad(config.leverage.min)?;
    params.target_leverage = decimal_to_wad(config.leverage.target)?;
    params.max_leverage = decimal_to_wad(config.leverage.max)?;
    params.safe_margin_leverage = decimal_to_wad(config.leverage.safe_margin)?;
    params.rebalance_threshold = decimal_to_wad(config.thresholds.rebalance)?;
    params.hedge_deviation_threshold = decimal_to_wad(config.thresholds.hedge_deviation)?;
    params.response_deviation_threshold = decimal_to_wad(config.thresholds.response_deviation)?;
    params.min_decrease_collateral = SimConfig::to_token_units(
        config.thresholds.min_decrease_collateral,
        config.asset.decimals,
    )?;
    params.slippage_bps = config.run.slippage_bps;
    Ok(params)
}

async fn run_simulation(config: Option<SimConfig>, manual_path: bool) -> Result<()> {
    let params = rig_params(config.as_ref(), manual_path)?;
    let asset_decimals = params.asset.decimals;
    let mut rig = SimRig::build(params).await?;

    let (deposit, withdraw, keeper_cycles) = match &config {
        Some(c) => (
            SimConfig::to_token_units(c.run.deposit, asset_decimals)?,
            SimConfig::to_token_units(c.run.withdraw, asset_decimals)?,
            c.run.keeper_cycles,
        ),
        None => (
            U256::from(12_000_000_000u64), // 12,000 units at 6 decimals
            U256::from(3_000_000_000u64),
            3,
        ),
    };
    let user = rig.actors.user;
    let operator = rig.actors.operator;

    info!("--- phase 1: deposit ---");
    let shares = rig.protocol.deposit(deposit, user).await?;
    info!(deposit = %deposit, shares = %shares, "user deposited");
    print_snapshot(&rig, "after deposit").await?;

    info!("--- phase 2: utilize ---");
    let pending = rig.protocol.strategy().pending_utilization().await?;
    match rig.protocol.strategy_mut().utilize(operator, pending).await? {
        ExecutionOutcome::Requested(request) => {
            info!(size = %request.size_delta_in_tokens, "utilization requested")
        }
        ExecutionOutcome::SwapFailed => info!("utilization swap failed"),
    }
    rig.deliver().await?;
    print_snapshot(&rig, "after utilize").await?;

    info!("--- phase 3: keeper cycles ---");
    let mut quiet = LogThrottle::new(Duration::from_secs(5));
    for cycle in 0..keeper_cycles {
        rig.clock.advance_secs(60);
        match rig.run_keeper_cycle().await? {
            Some(action) => info!(cycle, action = ?action, "keeper acted"),
            None => {
                if quiet.should_log() {
                    info!(
                        cycle,
                        suppressed = quiet.get_and_reset_suppressed_count(),
                        "no upkeep needed"
                    );
                }
            }
        }
    }
    print_snapshot(&rig, "after keeper cycles").await?;

    info!("--- phase 4: withdraw request ---");
    let total_assets = rig.protocol.total_assets().await?;
    let user_shares = rig.protocol.share_balance_of(user).await;
    let vault = rig.protocol.vault();
    let shares_to_burn = vault
        .read()
        .await
        .preview_withdraw(withdraw, total_assets)?
        .min(user_shares);
    let outcome = rig
        .protocol
        .request_withdraw(user, shares_to_burn, user)
        .await?;
    let key = match outcome {
        WithdrawOutcome::Paid { assets } => {
            info!(assets = %assets, "withdraw paid instantly");
            None
        }
        WithdrawOutcome::Queued { key } => {
            info!(key = %key, "withdraw queued");
            Some(key)
        }
    };

    if let Some(key) = key {
        info!("--- phase 5: deutilize and claim ---");
        let pending = rig.protocol.strategy().pending_deutilization().await?;
        match rig
            .protocol
            .strategy_mut()
            .deutilize(operator, pending)
            .await?
        {
            ExecutionOutcome::Requested(request) => {
                info!(size = %request.size_delta_in_tokens, "deutilization requested")
            }
            ExecutionOutcome::SwapFailed => info!("deutilization swap failed"),
        }
        rig.deliver().await?;
        let claimed = rig.protocol.claim(user, key).await?;
        info!(claimed = %claimed, "withdraw claimed");
    }
    print_snapshot(&rig, "final").await?;

    Ok(())
}

async fn print_snapshot(rig: &SimRig, label: &str) -> Result<()> {
    let snapshot = rig.protocol.strategy().snapshot().await?;
    println!(
        "--- {label} ---\n{}",
        serde_json::to_string_pretty(&snapshot)?
    );
    Ok(())
}
