//! Pure accounting arithmetic.
//!
//! Everything here is a function of explicit inputs so the formulas can be
//! unit-tested without collaborators. Rounding directions are deliberate:
//! share-favoring conversions floor, collateral requirements ceiling (the
//! hedge must never be under-collateralized by a rounding step).

use crate::math::{self, mul_div, saturating_sub, wad, MathError, Rounding};
use alloy_primitives::U256;

/// Cash available for utilization or instant withdraw.
pub fn idle_assets(vault_asset_balance: U256, assets_to_claim: U256) -> U256 {
    saturating_sub(vault_asset_balance, assets_to_claim).0
}

/// Spot leg valued through the oracle plus the hedge's net claim.
pub fn utilized_assets(product_value_in_assets: U256, position_net_balance: U256) -> U256 {
    product_value_in_assets + position_net_balance
}

/// Net asset value. Saturates at zero: oracle volatility can push the
/// subtraction negative and the policy is to floor, never revert.
pub fn total_assets(
    utilized: U256,
    idle: U256,
    pending_deutilized_assets: U256,
    acc_requested_withdraw: U256,
    processed_withdraw: U256,
) -> U256 {
    let gross = utilized + idle + pending_deutilized_assets;
    let (outstanding, _) = saturating_sub(acc_requested_withdraw, processed_withdraw);
    saturating_sub(gross, outstanding).0
}

/// Idle assets destined for the spot leg: `idle * L / (1 + L)` (floor).
/// Zero while a rebalance is being processed: new utilization would fight
/// the keeper's leverage correction.
pub fn pending_utilization(
    idle: U256,
    target_leverage: U256,
    processing_rebalance: bool,
) -> Result<U256, MathError> {
    if processing_rebalance || idle.is_zero() {
        return Ok(U256::ZERO);
    }
    mul_div(idle, target_leverage, wad() + target_leverage, Rounding::Floor)
}

/// Idle assets destined for hedge collateral: `idle * 1 / (1 + L)`,
/// rounded up so the position is never under-collateralized.
pub fn pending_increase_collateral(idle: U256, target_leverage: U256) -> Result<U256, MathError> {
    if idle.is_zero() {
        return Ok(U256::ZERO);
    }
    mul_div(idle, wad(), wad() + target_leverage, Rounding::Ceil)
}

/// Inputs for the deutilization sizing formula.
#[derive(Debug, Clone, Copy)]
pub struct DeutilizationInputs {
    /// Open hedge size in product tokens.
    pub position_size_in_tokens: U256,
    /// The same size valued in asset terms through the oracle.
    pub position_size_in_assets: U256,
    /// Hedge net claim (collateral + PnL) in asset terms.
    pub position_net_balance: U256,
    /// `acc_requested_withdraw - processed_withdraw`.
    pub total_pending_withdraw: U256,
    pub pending_decrease_collateral: U256,
    /// Spot product tokens held by the strategy.
    pub product_balance: U256,
    pub processing_rebalance: bool,
    /// Current leverage, WAD.
    pub current_leverage: U256,
    /// Target leverage, WAD.
    pub target_leverage: U256,
}

/// Product tokens that must be unwound.
///
/// Withdraw mode solves the per-unit economics: deutilizing `d` tokens
/// releases `d * price + net_balance * d / size` asset-side, which must meet
/// the outstanding withdrawal demand net of collateral already pending
/// decrease. Rebalance mode ignores demand and sizes a pure deleverage:
/// `size * (1 - target/current)`.
pub fn pending_deutilization(inputs: &DeutilizationInputs) -> Result<U256, MathError> {
    let size = inputs.position_size_in_tokens;
    if size.is_zero() {
        return Ok(U256::ZERO);
    }

    if inputs.processing_rebalance && inputs.current_leverage > inputs.target_leverage {
        let keep_fraction = mul_div(
            inputs.target_leverage,
            wad(),
            inputs.current_leverage,
            Rounding::Floor,
        )?;
        let (unwind_fraction, _) = saturating_sub(wad(), keep_fraction);
        return math::mul_wad(size, unwind_fraction, Rounding::Floor);
    }

    let (demand, _) = saturating_sub(
        inputs.total_pending_withdraw,
        inputs.pending_decrease_collateral,
    );
    if demand.is_zero() {
        return Ok(U256::ZERO);
    }
    let (denominator, underflowed) = saturating_sub(
        inputs.position_size_in_assets + inputs.position_net_balance,
        inputs.pending_decrease_collateral,
    );
    if underflowed || denominator.is_zero() {
        return Ok(U256::ZERO);
    }
    let d = mul_div(size, demand, denominator, Rounding::Floor)?;
    Ok(d.min(inputs.product_balance))
}
