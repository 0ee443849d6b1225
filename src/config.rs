//! Strategy and simulator configuration.
//!
//! `StrategyConfig` is the validated, immutable parameter set handed to the
//! engine at construction; `SimConfig` is the human-editable TOML consumed by
//! the CLI simulator, using decimal strings for ratios and amounts.

use crate::math::MathError;
use crate::types::TokenInfo;
use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} must not be the zero address")]
    ZeroAddress(&'static str),
    #[error("leverage ordering violated: require min < target < max < safe_margin")]
    LeverageOrdering,
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("asset and product must be distinct tokens")]
    SameToken,
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Immutable strategy parameters, validated at build time.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// This strategy's own identity (withdraw-key derivation, logging).
    pub strategy: Address,
    pub operator: Address,
    pub forwarder: Address,
    pub owner: Address,
    pub vault: Address,
    pub position_manager: Address,
    pub asset: TokenInfo,
    pub product: TokenInfo,
    /// WAD leverage ratios; `min < target < max < safe_margin`.
    pub target_leverage: U256,
    pub min_leverage: U256,
    pub max_leverage: U256,
    pub safe_margin_leverage: U256,
    /// Relative band (WAD) within which `processing_rebalance` clears.
    pub rebalance_threshold: U256,
    /// Relative spot-vs-hedge drift (WAD) that triggers a size correction.
    pub hedge_deviation_threshold: U256,
    /// Relative request-vs-response drift (WAD) treated as a partial fill.
    pub response_deviation_threshold: U256,
    /// Accrued collateral decrease (asset units) worth flushing in one go.
    pub min_decrease_collateral: U256,
}

/// Fluent builder for [`StrategyConfig`]; `build()` performs all validation.
#[derive(Debug, Clone, Default)]
pub struct StrategyConfigBuilder {
    strategy: Option<Address>,
    operator: Option<Address>,
    forwarder: Option<Address>,
    owner: Option<Address>,
    vault: Option<Address>,
    position_manager: Option<Address>,
    asset: Option<TokenInfo>,
    product: Option<TokenInfo>,
    target_leverage: Option<U256>,
    min_leverage: Option<U256>,
    max_leverage: Option<U256>,
    safe_margin_leverage: Option<U256>,
    rebalance_threshold: Option<U256>,
    hedge_deviation_threshold: Option<U256>,
    response_deviation_threshold: Option<U256>,
    min_decrease_collateral: Option<U256>,
}

impl StrategyConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, address: Address) -> Self {
        self.strategy = Some(address);
        self
    }

    pub fn operator(mut self, address: Address) -> Self {
        self.operator = Some(address);
        self
    }

    pub fn forwarder(mut self, address: Address) -> Self {
        self.forwarder = Some(address);
        self
    }

    pub fn owner(mut self, address: Address) -> Self {
        self.owner = Some(address);
        self
    }

    pub fn vault(mut self, address: Address) -> Self {
        self.vault = Some(address);
        self
    }

    pub fn position_manager(mut self, address: Address) -> Self {
        self.position_manager = Some(address);
        self
    }

    pub fn asset(mut self, token: TokenInfo) -> Self {
        self.asset = Some(token);
        self
    }

    pub fn product(mut self, token: TokenInfo) -> Self {
        self.product = Some(token);
        self
    }

    /// Set all four leverage bounds at once (WAD).
    pub fn leverage(mut self, min: U256, target: U256, max: U256, safe_margin: U256) -> Self {
        self.min_leverage = Some(min);
        self.target_leverage = Some(target);
        self.max_leverage = Some(max);
        self.safe_margin_leverage = Some(safe_margin);
        self
    }

    pub fn rebalance_threshold(mut self, value: U256) -> Self {
        self.rebalance_threshold = Some(value);
        self
    }

    pub fn hedge_deviation_threshold(mut self, value: U256) -> Self {
        self.hedge_deviation_threshold = Some(value);
        self
    }

    pub fn response_deviation_threshold(mut self, value: U256) -> Self {
        self.response_deviation_threshold = Some(value);
        self
    }

    pub fn min_decrease_collateral(mut self, value: U256) -> Self {
        self.min_decrease_collateral = Some(value);
        self
    }

    pub fn build(self) -> Result<StrategyConfig, ConfigError> {
        let strategy = self.strategy.ok_or(ConfigError::Missing("strategy"))?;
        let operator = self.operator.ok_or(ConfigError::Missing("operator"))?;
        let forwarder = self.forwarder.ok_or(ConfigError::Missing("forwarder"))?;
        let owner = self.owner.ok_or(ConfigError::Missing("owner"))?;
        let vault = self.vault.ok_or(ConfigError::Missing("vault"))?;
        let position_manager = self
            .position_manager
            .ok_or(ConfigError::Missing("position_manager"))?;
        let asset = self.asset.ok_or(ConfigError::Missing("asset"))?;
        let product = self.product.ok_or(ConfigError::Missing("product"))?;

        for (name, address) in [
            ("strategy", strategy),
            ("operator", operator),
            ("forwarder", forwarder),
            ("owner", owner),
            ("vault", vault),
            ("position_manager", position_manager),
            ("asset", asset.address),
            ("product", product.address),
        ] {
            if address.is_zero() {
                return Err(ConfigError::ZeroAddress(name));
            }
        }
        if asset.address == product.address {
            return Err(ConfigError::SameToken);
        }

        let min_leverage = self.min_leverage.ok_or(ConfigError::Missing("min_leverage"))?;
        let target_leverage = self
            .target_leverage
            .ok_or(ConfigError::Missing("target_leverage"))?;
        let max_leverage = self.max_leverage.ok_or(ConfigError::Missing("max_leverage"))?;
        let safe_margin_leverage = self
            .safe_margin_leverage
            .ok_or(ConfigError::Missing("safe_margin_leverage"))?;
        if min_leverage.is_zero() {
            return Err(ConfigError::NotPositive("min_leverage"));
        }
        if !(min_leverage < target_leverage
            && target_leverage < max_leverage
            && max_leverage < safe_margin_leverage)
        {
            return Err(ConfigError::LeverageOrdering);
        }

        let rebalance_threshold = self
            .rebalance_threshold
            .ok_or(ConfigError::Missing("rebalance_threshold"))?;
        if rebalance_threshold.is_zero() {
            return Err(ConfigError::NotPositive("rebalance_threshold"));
        }
        let hedge_deviation_threshold = self
            .hedge_deviation_threshold
            .ok_or(ConfigError::Missing("hedge_deviation_threshold"))?;
        let response_deviation_threshold = self
            .response_deviation_threshold
            .ok_or(ConfigError::Missing("response_deviation_threshold"))?;
        let min_decrease_collateral = self.min_decrease_collateral.unwrap_or(U256::ZERO);

        Ok(StrategyConfig {
            strategy,
            operator,
            forwarder,
            owner,
            vault,
            position_manager,
            asset,
            product,
            target_leverage,
            min_leverage,
            max_leverage,
            safe_margin_leverage,
            rebalance_threshold,
            hedge_deviation_threshold,
            response_deviation_threshold,
            min_decrease_collateral,
        })
    }
}

// --- Simulator configuration (TOML) ---

#[derive(Debug, Clone, Deserialize)]
pub struct SimTokenConfig {
    pub symbol: String,
    pub decimals: u8,
    /// USD price per whole token, human decimal.
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimLeverageConfig {
    pub min: Decimal,
    pub target: Decimal,
    pub max: Decimal,
    pub safe_margin: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimThresholdConfig {
    pub rebalance: Decimal,
    pub hedge_deviation: Decimal,
    pub response_deviation: Decimal,
    /// Asset units (whole tokens, human decimal).
    pub min_decrease_collateral: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimRunConfig {
    /// Whole asset tokens deposited by the simulated user.
    pub deposit: Decimal,
    /// Whole asset tokens requested back mid-run.
    pub withdraw: Decimal,
    /// Keeper cycles to run after each phase.
    pub keeper_cycles: u32,
    /// Swap slippage in basis points applied by the simulated venue.
    #[serde(default)]
    pub slippage_bps: u32,
}

/// Root of the simulator TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    pub asset: SimTokenConfig,
    pub product: SimTokenConfig,
    pub leverage: SimLeverageConfig,
    pub thresholds: SimThresholdConfig,
    pub run: SimRunConfig,
}

impl SimConfig {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Scale a whole-token decimal amount into native token units.
    pub fn to_token_units(amount: Decimal, decimals: u8) -> Result<U256, MathError> {
        use rust_decimal::prelude::ToPrimitive;
        let scale = Decimal::from(
            10u64
                .checked_pow(decimals as u32)
                .ok_or_else(|| MathError::Unrepresentable(format!("decimals too large: {decimals}")))?,
        );
        let scaled = amount
            .checked_mul(scale)
            .ok_or_else(|| MathError::Unrepresentable(format!("amount too large: {amount}")))?;
        scaled
            .trunc()
            .to_u128()
            .map(U256::from)
            .ok_or_else(|| MathError::Unrepresentable(format!("amount too large: {amount}")))
    }
}
