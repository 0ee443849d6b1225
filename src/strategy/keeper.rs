//! Keeper cycle: `check_upkeep` / `perform_upkeep`.
//!
//! The keeper is triggered permissionlessly through an authorized forwarder
//! and evaluates a strict priority ladder; exactly one action fires per
//! cycle. Rebalance actions set `processing_rebalance`, which stays sticky
//! across cycles until a reconciliation callback observes leverage back
//! within the configured band of target.

use crate::math::{mul_div, relative_deviation, saturating_sub, wad, Rounding};
use crate::position::AdjustPositionRequest;
use alloy_primitives::{Address, U256};
use tracing::{debug, info, instrument};

use super::accounting::{self, DeutilizationInputs};
use super::engine::{BasisStrategy, ExecutionOutcome};
use super::state::RequestOrigin;
use super::StrategyError;

/// One keeper action, in ladder priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpkeepAction {
    /// Leverage below min: withdraw collateral to pull leverage up to
    /// target. Tried first — under-leverage is the safer failure mode.
    RebalanceUp { collateral_delta: U256 },
    /// Leverage above max (but within the safe margin): top up collateral
    /// from idle.
    RebalanceDown { collateral_delta: U256 },
    /// Leverage above the safe margin: emergency direct size decrease
    /// instead of waiting for a collateral top-up.
    Deleverage { size_delta_in_products: U256 },
    /// Spot vs. hedge notional drift beyond threshold: size-only correction.
    HedgeAdjust {
        size_delta_in_tokens: U256,
        is_increase: bool,
    },
    /// Venue-intrinsic maintenance (e.g. funding settlement), delegated.
    DelegatedKeep,
    /// Accrued pending collateral decrease crossed its minimum: flush it as
    /// one batched decrease.
    CollateralFlush { amount: U256 },
}

/// Result of the view-side evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpkeepCheck {
    pub upkeep_needed: bool,
    pub action: Option<UpkeepAction>,
}

impl UpkeepCheck {
    fn none() -> Self {
        Self {
            upkeep_needed: false,
            action: None,
        }
    }

    fn some(action: UpkeepAction) -> Self {
        Self {
            upkeep_needed: true,
            action: Some(action),
        }
    }
}

impl BasisStrategy {
    /// Evaluate the ladder without executing. View-only and permissionless;
    /// reports no upkeep while an operation is in flight.
    pub async fn check_upkeep(&self) -> Result<UpkeepCheck, StrategyError> {
        if !self.state.is_idle() {
            return Ok(UpkeepCheck::none());
        }

        let size_in_tokens = self.position_manager.position_size_in_tokens().await?;
        let leverage = self.position_manager.current_leverage().await?;
        let net_balance = self.position_manager.position_net_balance().await?;
        let has_position = !size_in_tokens.is_zero() && !leverage.is_zero();
        let notional = if has_position {
            self.oracle
                .convert_token_amount(
                    self.config.product.address,
                    self.config.asset.address,
                    size_in_tokens,
                )
                .await?
        } else {
            U256::ZERO
        };

        // While a rebalance is processing, keep pushing toward target even
        // once leverage is back inside [min, max]; the flag only clears when
        // a callback sees leverage within the threshold band.
        let target_deviation = relative_deviation(
            leverage,
            self.config.target_leverage,
            self.config.target_leverage,
        );
        let continuing = self.state.processing_rebalance
            && target_deviation > self.config.rebalance_threshold;
        let rebalance_up_needed = has_position
            && (leverage < self.config.min_leverage
                || (continuing && leverage < self.config.target_leverage));
        let rebalance_down_needed = has_position
            && (leverage > self.config.max_leverage
                || (continuing && leverage > self.config.target_leverage));

        // (1) Rebalance up: leverage below min.
        if rebalance_up_needed {
            let target_collateral =
                mul_div(notional, wad(), self.config.target_leverage, Rounding::Ceil)?;
            let (mut delta, _) = saturating_sub(net_balance, target_collateral);
            let bounds = self.position_manager.decrease_collateral_min_max().await?;
            let limit = self.position_manager.limit_decrease_collateral().await?;
            delta = bounds.clamp(delta).min(limit);
            if !delta.is_zero() {
                return Ok(UpkeepCheck::some(UpkeepAction::RebalanceUp {
                    collateral_delta: delta,
                }));
            }
        }

        // (2) Rebalance down / emergency deleverage: leverage above max.
        if rebalance_down_needed {
            if leverage > self.config.safe_margin_leverage {
                let inputs = DeutilizationInputs {
                    position_size_in_tokens: size_in_tokens,
                    position_size_in_assets: notional,
                    position_net_balance: net_balance,
                    total_pending_withdraw: self.withdrawals.gap(),
                    pending_decrease_collateral: self.state.pending_decrease_collateral,
                    product_balance: self.state.product_balance,
                    processing_rebalance: true,
                    current_leverage: leverage,
                    target_leverage: self.config.target_leverage,
                };
                let size_delta =
                    accounting::pending_deutilization(&inputs)?.min(self.state.product_balance);
                if !size_delta.is_zero() {
                    return Ok(UpkeepCheck::some(UpkeepAction::Deleverage {
                        size_delta_in_products: size_delta,
                    }));
                }
            } else {
                let needed_collateral =
                    mul_div(notional, wad(), self.config.target_leverage, Rounding::Ceil)?;
                let (mut delta, _) = saturating_sub(needed_collateral, net_balance);
                let idle = self.idle_assets().await;
                let bounds = self.position_manager.increase_collateral_min_max().await?;
                delta = bounds.clamp(delta).min(idle);
                if !delta.is_zero() {
                    return Ok(UpkeepCheck::some(UpkeepAction::RebalanceDown {
                        collateral_delta: delta,
                    }));
                }
            }
        }

        // (3) Spot vs. hedge drift.
        let spot = self.state.product_balance;
        let reference = spot.max(size_in_tokens);
        if !reference.is_zero() {
            let deviation = relative_deviation(spot, size_in_tokens, reference);
            if deviation > self.config.hedge_deviation_threshold {
                let delta = if spot > size_in_tokens {
                    spot - size_in_tokens
                } else {
                    size_in_tokens - spot
                };
                return Ok(UpkeepCheck::some(UpkeepAction::HedgeAdjust {
                    size_delta_in_tokens: delta,
                    is_increase: size_in_tokens < spot,
                }));
            }
        }

        // (4) Venue-intrinsic keep need.
        if self.position_manager.need_keep().await? {
            return Ok(UpkeepCheck::some(UpkeepAction::DelegatedKeep));
        }

        // (5) Batched collateral-decrease flush.
        let accrued = self.state.pending_decrease_collateral;
        if !accrued.is_zero()
            && !self.config.min_decrease_collateral.is_zero()
            && accrued >= self.config.min_decrease_collateral
        {
            let limit = self.position_manager.limit_decrease_collateral().await?;
            let bounds = self.position_manager.decrease_collateral_min_max().await?;
            let amount = bounds.clamp(accrued).min(limit);
            if !amount.is_zero() {
                return Ok(UpkeepCheck::some(UpkeepAction::CollateralFlush { amount }));
            }
        }

        Ok(UpkeepCheck::none())
    }

    /// Execute the highest-priority action. Forwarder-gated, Idle-only;
    /// exactly one action fires per cycle.
    #[instrument(skip(self), fields(caller = %caller))]
    pub async fn perform_upkeep(
        &mut self,
        caller: Address,
    ) -> Result<Option<UpkeepAction>, StrategyError> {
        self.ensure_forwarder(caller)?;
        self.ensure_idle()?;

        let check = self.check_upkeep().await?;
        let Some(action) = check.action else {
            debug!("no upkeep needed");
            return Ok(None);
        };
        info!(action = ?action, "performing upkeep");

        match action {
            UpkeepAction::RebalanceUp { collateral_delta } => {
                self.state.processing_rebalance = true;
                let request = AdjustPositionRequest {
                    size_delta_in_tokens: U256::ZERO,
                    collateral_delta_amount: collateral_delta,
                    is_increase: false,
                };
                self.submit_request(request, RequestOrigin::Rebalance).await?;
            }
            UpkeepAction::RebalanceDown { collateral_delta } => {
                self.state.processing_rebalance = true;
                self.vault.write().await.debit(collateral_delta)?;
                let request = AdjustPositionRequest {
                    size_delta_in_tokens: U256::ZERO,
                    collateral_delta_amount: collateral_delta,
                    is_increase: true,
                };
                if let Err(e) = self.submit_request(request, RequestOrigin::Rebalance).await {
                    self.vault.write().await.credit(collateral_delta);
                    return Err(e);
                }
            }
            UpkeepAction::Deleverage {
                size_delta_in_products,
            } => {
                self.state.processing_rebalance = true;
                let outcome = self
                    .deutilize_inner(
                        size_delta_in_products,
                        size_delta_in_products,
                        RequestOrigin::Deleverage,
                    )
                    .await?;
                if matches!(outcome, ExecutionOutcome::SwapFailed) {
                    // Status is back to Idle; the sticky flag keeps the
                    // ladder pointed at deleverage for the next cycle.
                    debug!("deleverage swap failed; will retry next cycle");
                }
            }
            UpkeepAction::HedgeAdjust {
                size_delta_in_tokens,
                is_increase,
            } => {
                let request = AdjustPositionRequest {
                    size_delta_in_tokens,
                    collateral_delta_amount: U256::ZERO,
                    is_increase,
                };
                self.submit_request(request, RequestOrigin::HedgeAdjust).await?;
            }
            UpkeepAction::DelegatedKeep => {
                // Venue-side maintenance completes synchronously; no
                // adjustment round trip, status stays Idle.
                self.position_manager.keep().await?;
            }
            UpkeepAction::CollateralFlush { amount } => {
                let request = AdjustPositionRequest {
                    size_delta_in_tokens: U256::ZERO,
                    collateral_delta_amount: amount,
                    is_increase: false,
                };
                self.submit_request(request, RequestOrigin::CollateralFlush)
                    .await?;
            }
        }
        Ok(Some(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;
    use crate::sandbox::{SimRig, SimRigParams};

    fn units(v: u64) -> U256 {
        U256::from(v) * U256::from(1_000_000u64) // 6-decimal asset
    }

    fn tokens(milli: u64) -> U256 {
        U256::from(milli) * U256::from(WAD / 1000) // 18-decimal product
    }

    /// Rig with the leverage band from the rebalance scenario:
    /// target 6x, max 11x, safe margin 15x.
    async fn scenario_rig() -> SimRig {
        let params = SimRigParams {
            min_leverage: U256::from(2 * WAD),
            target_leverage: U256::from(6 * WAD),
            max_leverage: U256::from(11 * WAD),
            safe_margin_leverage: U256::from(15 * WAD),
            ..SimRigParams::default()
        };
        SimRig::build(params).await.unwrap()
    }

    #[tokio::test]
    async fn above_max_below_safe_margin_rebalances_down() {
        let mut rig = scenario_rig().await;
        rig.protocol.deposit(units(5_000), rig.actors.user).await.unwrap();
        // 6 WETH short at $2000 = 12,000 notional; net 1,000 => 12x.
        rig.position_manager
            .set_position(units(1_000), tokens(6_000), units(12_000));
        rig.protocol.strategy_mut().state.product_balance = tokens(6_000);

        let check = rig.protocol.strategy().check_upkeep().await.unwrap();
        assert!(check.upkeep_needed);
        assert!(
            matches!(check.action, Some(UpkeepAction::RebalanceDown { .. })),
            "expected rebalance-down, got {:?}",
            check.action
        );
    }

    #[tokio::test]
    async fn above_safe_margin_deleverages() {
        let mut rig = scenario_rig().await;
        rig.protocol.deposit(units(5_000), rig.actors.user).await.unwrap();
        // net 750 against 12,000 notional => 16x, beyond the 15x margin.
        rig.position_manager
            .set_position(units(750), tokens(6_000), units(12_000));
        rig.protocol.strategy_mut().state.product_balance = tokens(6_000);

        let check = rig.protocol.strategy().check_upkeep().await.unwrap();
        match check.action {
            Some(UpkeepAction::Deleverage {
                size_delta_in_products,
            }) => {
                // Unwind 1 - 6/16 = 62.5% of the 6-token position.
                assert_eq!(size_delta_in_products, tokens(3_750));
            }
            other => panic!("expected deleverage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rebalance_up_takes_priority_over_delegated_keep() {
        let mut rig = scenario_rig().await;
        // 1 WETH at $2000 with net 2000 => 1x, below the 2x minimum.
        rig.position_manager
            .set_position(units(2_000), tokens(1_000), units(2_000));
        rig.protocol.strategy_mut().state.product_balance = tokens(1_000);
        rig.position_manager.set_need_keep(true);

        let check = rig.protocol.strategy().check_upkeep().await.unwrap();
        match check.action {
            Some(UpkeepAction::RebalanceUp { collateral_delta }) => {
                // Collateral at 6x target for 2000 notional is 334 (ceil);
                // withdraw the 1666 excess.
                assert_eq!(collateral_delta, units(2_000) - U256::from(333_333_334u64));
            }
            other => panic!("expected rebalance-up, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delegated_keep_fires_when_nothing_else_pending() {
        let mut rig = scenario_rig().await;
        rig.position_manager.set_need_keep(true);
        let action = rig
            .protocol
            .strategy_mut()
            .perform_upkeep(rig.actors.forwarder)
            .await
            .unwrap();
        assert_eq!(action, Some(UpkeepAction::DelegatedKeep));
        assert!(!rig.position_manager.has_pending());

        let check = rig.protocol.strategy().check_upkeep().await.unwrap();
        assert!(!check.upkeep_needed);
    }

    #[tokio::test]
    async fn hedge_drift_triggers_size_only_adjustment() {
        let mut rig = scenario_rig().await;
        // Spot 5 WETH vs hedge 4.5 WETH: 10% drift at a 2% threshold.
        rig.position_manager
            .set_position(units(1_500), tokens(4_500), units(9_000));
        rig.protocol.strategy_mut().state.product_balance = tokens(5_000);

        let check = rig.protocol.strategy().check_upkeep().await.unwrap();
        assert_eq!(
            check.action,
            Some(UpkeepAction::HedgeAdjust {
                size_delta_in_tokens: tokens(500),
                is_increase: true,
            })
        );
    }

    #[tokio::test]
    async fn accrued_collateral_decrease_flushes_above_minimum() {
        let mut rig = scenario_rig().await;
        rig.position_manager
            .set_position(units(2_000), tokens(5_000), units(10_000));
        rig.protocol.strategy_mut().state.product_balance = tokens(5_000);
        // Below the 50-unit minimum: no flush.
        rig.protocol.strategy_mut().state.pending_decrease_collateral = units(10);
        let check = rig.protocol.strategy().check_upkeep().await.unwrap();
        assert!(!check.upkeep_needed);

        rig.protocol.strategy_mut().state.pending_decrease_collateral = units(100);
        let action = rig.run_keeper_cycle().await.unwrap();
        assert_eq!(
            action,
            Some(UpkeepAction::CollateralFlush {
                amount: units(100)
            })
        );
        // Returned collateral offsets the accrual and lands in the pipeline.
        assert_eq!(
            rig.protocol.strategy().pending_decrease_collateral(),
            U256::ZERO
        );
        assert_eq!(rig.protocol.strategy().idle_assets().await, units(100));
    }

    #[tokio::test]
    async fn processing_rebalance_spans_cycles_until_converged() {
        let mut rig = scenario_rig().await;
        // Only 300 idle: the first top-up cannot reach target collateral.
        rig.protocol.deposit(units(300), rig.actors.user).await.unwrap();
        rig.position_manager
            .set_position(units(1_000), tokens(6_000), units(12_000));
        rig.protocol.strategy_mut().state.product_balance = tokens(6_000);

        let action = rig.run_keeper_cycle().await.unwrap();
        assert_eq!(
            action,
            Some(UpkeepAction::RebalanceDown {
                collateral_delta: units(300)
            })
        );
        // 12,000 / 1,300 ≈ 9.2x: inside [min, max] but far from target, so
        // the flag stays sticky and blocks new utilization.
        assert!(rig.protocol.strategy().is_processing_rebalance());
        assert_eq!(
            rig.protocol.strategy().pending_utilization().await.unwrap(),
            U256::ZERO
        );

        // More idle arrives; the next cycle continues toward target.
        rig.protocol.deposit(units(1_000), rig.actors.user).await.unwrap();
        let action = rig.run_keeper_cycle().await.unwrap();
        assert_eq!(
            action,
            Some(UpkeepAction::RebalanceDown {
                collateral_delta: units(700)
            })
        );
        // 12,000 / 2,000 = 6x: converged, flag cleared.
        assert!(!rig.protocol.strategy().is_processing_rebalance());
    }

    #[tokio::test]
    async fn perform_upkeep_is_forwarder_gated() {
        let mut rig = scenario_rig().await;
        let result = rig
            .protocol
            .strategy_mut()
            .perform_upkeep(rig.actors.user)
            .await;
        assert!(matches!(
            result,
            Err(StrategyError::CallerNotForwarder(_))
        ));
    }
}
