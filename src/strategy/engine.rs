//! The basis strategy engine.
//!
//! `BasisStrategy` orchestrates the two legs: operator-driven
//! utilize/deutilize, the keeper ladder (see `keeper`), the withdraw
//! pipeline, and the single reconciliation point `after_adjust_position`.
//! The status register enforces mutual exclusion across the asynchronous
//! position-venue round trip: any entry point that would start a second
//! in-flight operation is rejected with the current status embedded in the
//! error.

use crate::config::StrategyConfig;
use crate::math::{relative_deviation, saturating_sub};
use crate::oracle::{Oracle, OracleError};
use crate::position::{AdjustPositionRequest, AdjustPositionResponse, PositionManager};
use crate::swap::SwapExecutor;
use crate::types::Clock;
use crate::vault::Vault;
use alloy_primitives::{Address, B256, U256};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use super::accounting::{self, DeutilizationInputs};
use super::state::{ActiveRequest, RequestOrigin, StrategyState, StrategyStatus};
use super::withdraw::{ProcessOutcome, WithdrawQueue, WithdrawRequest};
use super::StrategyError;

/// Result of an operator action that may recover from an in-band swap
/// failure instead of erroring (retry-safe path).
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The swap executed and an adjustment request is now outstanding.
    Requested(AdjustPositionRequest),
    /// The venue reported the swap failed; no state was mutated and the
    /// status is back to Idle. The operator may retry.
    SwapFailed,
}

/// Result of a withdraw request.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// Idle assets covered the request; paid out synchronously.
    Paid { assets: U256 },
    /// Queued behind the deutilization pipeline.
    Queued { key: B256 },
}

/// Read-only view of the strategy for dashboards and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySnapshot {
    pub status: StrategyStatus,
    pub processing_rebalance: bool,
    pub product_balance: U256,
    pub pending_decrease_collateral: U256,
    pub pending_deutilized_assets: U256,
    pub acc_requested_withdraw_assets: U256,
    pub processed_withdraw_assets: U256,
    pub assets_to_claim: U256,
    pub idle_assets: U256,
    pub utilized_assets: U256,
    pub total_assets: U256,
    pub current_leverage: U256,
    pub position_size_in_tokens: U256,
}

/// The core engine. Owns its state exclusively; collaborators are consumed
/// through narrow async interfaces and every external entry point checks the
/// caller against the configured identity for its role.
pub struct BasisStrategy {
    pub(super) config: StrategyConfig,
    pub(super) state: StrategyState,
    pub(super) withdrawals: WithdrawQueue,
    pub(super) vault: Arc<RwLock<Vault>>,
    pub(super) oracle: Arc<dyn Oracle>,
    pub(super) swapper: SwapExecutor,
    pub(super) position_manager: Arc<dyn PositionManager>,
    pub(super) clock: Arc<dyn Clock>,
}

impl BasisStrategy {
    /// Construct the engine, rejecting unconfigured or stale price feeds up
    /// front: a zero price from either feed is a hard initialization error.
    pub async fn initialize(
        config: StrategyConfig,
        vault: Arc<RwLock<Vault>>,
        oracle: Arc<dyn Oracle>,
        swapper: SwapExecutor,
        position_manager: Arc<dyn PositionManager>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StrategyError> {
        for token in [&config.asset, &config.product] {
            let price = oracle.get_asset_price(token.address).await?;
            if price.is_zero() {
                return Err(OracleError::InvalidPrice {
                    token: token.address,
                    price,
                }
                .into());
            }
        }
        info!(
            asset = %config.asset,
            product = %config.product,
            target_leverage = %crate::math::wad_to_display(config.target_leverage),
            "basis strategy initialized"
        );
        Ok(Self {
            config,
            state: StrategyState::new(),
            withdrawals: WithdrawQueue::new(),
            vault,
            oracle,
            swapper,
            position_manager,
            clock,
        })
    }

    // --- Authorization gates ---

    fn ensure_operator(&self, caller: Address) -> Result<(), StrategyError> {
        if caller != self.config.operator {
            return Err(StrategyError::CallerNotOperator(caller));
        }
        Ok(())
    }

    pub(super) fn ensure_forwarder(&self, caller: Address) -> Result<(), StrategyError> {
        if caller != self.config.forwarder {
            return Err(StrategyError::CallerNotForwarder(caller));
        }
        Ok(())
    }

    fn ensure_position_manager(&self, caller: Address) -> Result<(), StrategyError> {
        if caller != self.config.position_manager {
            return Err(StrategyError::CallerNotPositionManager(caller));
        }
        Ok(())
    }

    fn ensure_vault(&self, caller: Address) -> Result<(), StrategyError> {
        if caller != self.config.vault {
            return Err(StrategyError::CallerNotVault(caller));
        }
        Ok(())
    }

    fn ensure_owner(&self, caller: Address) -> Result<(), StrategyError> {
        if caller != self.config.owner {
            return Err(StrategyError::CallerNotOwner(caller));
        }
        Ok(())
    }

    pub(super) fn ensure_idle(&self) -> Result<(), StrategyError> {
        if !self.state.is_idle() {
            return Err(StrategyError::InvalidStatus(self.state.status));
        }
        Ok(())
    }

    // --- Accounting views ---

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn status(&self) -> StrategyStatus {
        self.state.status
    }

    pub fn is_processing_rebalance(&self) -> bool {
        self.state.processing_rebalance
    }

    pub fn product_balance(&self) -> U256 {
        self.state.product_balance
    }

    pub fn pending_decrease_collateral(&self) -> U256 {
        self.state.pending_decrease_collateral
    }

    pub fn pending_deutilized_assets(&self) -> U256 {
        self.state.pending_deutilized_assets
    }

    pub fn acc_requested_withdraw_assets(&self) -> U256 {
        self.withdrawals.acc_requested()
    }

    pub fn processed_withdraw_assets(&self) -> U256 {
        self.withdrawals.processed()
    }

    pub fn assets_to_claim(&self) -> U256 {
        self.withdrawals.assets_to_claim()
    }

    pub fn withdraw_request(&self, key: &B256) -> Option<&WithdrawRequest> {
        self.withdrawals.get(key)
    }

    pub fn active_request(&self) -> Option<AdjustPositionRequest> {
        self.state.active_request.map(|a| a.request)
    }

    /// Cash immediately available: vault balance minus claim earmarks.
    pub async fn idle_assets(&self) -> U256 {
        let balance = self.vault.read().await.asset_balance();
        accounting::idle_assets(balance, self.withdrawals.assets_to_claim())
    }

    /// Spot leg valued through the oracle plus the hedge net balance.
    pub async fn utilized_assets(&self) -> Result<U256, StrategyError> {
        let product_value = if self.state.product_balance.is_zero() {
            U256::ZERO
        } else {
            self.oracle
                .convert_token_amount(
                    self.config.product.address,
                    self.config.asset.address,
                    self.state.product_balance,
                )
                .await?
        };
        let net_balance = self.position_manager.position_net_balance().await?;
        Ok(accounting::utilized_assets(product_value, net_balance))
    }

    /// Net asset value, floored at zero under oracle drift.
    pub async fn total_assets(&self) -> Result<U256, StrategyError> {
        let utilized = self.utilized_assets().await?;
        let idle = self.idle_assets().await;
        Ok(accounting::total_assets(
            utilized,
            idle,
            self.state.pending_deutilized_assets,
            self.withdrawals.acc_requested(),
            self.withdrawals.processed(),
        ))
    }

    pub async fn pending_utilization(&self) -> Result<U256, StrategyError> {
        let idle = self.idle_assets().await;
        Ok(accounting::pending_utilization(
            idle,
            self.config.target_leverage,
            self.state.processing_rebalance,
        )?)
    }

    pub async fn pending_increase_collateral(&self) -> Result<U256, StrategyError> {
        let idle = self.idle_assets().await;
        Ok(accounting::pending_increase_collateral(
            idle,
            self.config.target_leverage,
        )?)
    }

    pub(super) async fn deutilization_inputs(&self) -> Result<DeutilizationInputs, StrategyError> {
        let size_in_tokens = self.position_manager.position_size_in_tokens().await?;
        let size_in_assets = if size_in_tokens.is_zero() {
            U256::ZERO
        } else {
            self.oracle
                .convert_token_amount(
                    self.config.product.address,
                    self.config.asset.address,
                    size_in_tokens,
                )
                .await?
        };
        Ok(DeutilizationInputs {
            position_size_in_tokens: size_in_tokens,
            position_size_in_assets: size_in_assets,
            position_net_balance: self.position_manager.position_net_balance().await?,
            total_pending_withdraw: self.withdrawals.gap(),
            pending_decrease_collateral: self.state.pending_decrease_collateral,
            product_balance: self.state.product_balance,
            processing_rebalance: self.state.processing_rebalance,
            current_leverage: self.position_manager.current_leverage().await?,
            target_leverage: self.config.target_leverage,
        })
    }

    pub async fn pending_deutilization(&self) -> Result<U256, StrategyError> {
        let inputs = self.deutilization_inputs().await?;
        Ok(accounting::pending_deutilization(&inputs)?)
    }

    pub async fn snapshot(&self) -> Result<StrategySnapshot, StrategyError> {
        Ok(StrategySnapshot {
            status: self.state.status,
            processing_rebalance: self.state.processing_rebalance,
            product_balance: self.state.product_balance,
            pending_decrease_collateral: self.state.pending_decrease_collateral,
            pending_deutilized_assets: self.state.pending_deutilized_assets,
            acc_requested_withdraw_assets: self.withdrawals.acc_requested(),
            processed_withdraw_assets: self.withdrawals.processed(),
            assets_to_claim: self.withdrawals.assets_to_claim(),
            idle_assets: self.idle_assets().await,
            utilized_assets: self.utilized_assets().await?,
            total_assets: self.total_assets().await?,
            current_leverage: self.position_manager.current_leverage().await?,
            position_size_in_tokens: self.position_manager.position_size_in_tokens().await?,
        })
    }

    // --- Operator entry points ---

    /// Move idle assets into the spot+hedge position.
    ///
    /// Best-effort and retry-safe: a venue-reported swap failure resets the
    /// status without touching the position or any balances.
    #[instrument(skip(self), fields(caller = %caller, amount = %amount))]
    pub async fn utilize(
        &mut self,
        caller: Address,
        amount: U256,
    ) -> Result<ExecutionOutcome, StrategyError> {
        self.ensure_operator(caller)?;
        self.ensure_idle()?;

        let pending = self.pending_utilization().await?;
        if pending.is_zero() {
            return Err(StrategyError::ZeroPendingUtilization);
        }
        let idle = self.idle_assets().await;
        let amount = amount.min(pending).min(idle);
        // Venue sizing bounds are asset-denominated, same side as `amount`.
        let size_bounds = self.position_manager.increase_size_min_max().await?;
        let amount = amount.min(size_bounds.max);
        if amount.is_zero() || amount < size_bounds.min {
            return Err(StrategyError::ZeroAmountUtilization);
        }

        let outcome = self.swapper.swap_asset_to_product(amount).await?;
        if !outcome.success {
            info!("utilize swap failed at venue; staying Idle for retry");
            return Ok(ExecutionOutcome::SwapFailed);
        }

        // Collateral proportional to the fraction of pending utilization
        // actually swapped, ceiling-biased, capped by what's left idle and
        // the venue's per-adjustment bounds.
        let pending_collateral = self.pending_increase_collateral().await?;
        let collateral = crate::math::mul_div(
            pending_collateral,
            amount,
            pending,
            crate::math::Rounding::Ceil,
        )?;
        let (idle_after_swap, _) = saturating_sub(idle, amount);
        let bounds = self.position_manager.increase_collateral_min_max().await?;
        let collateral = bounds.clamp(collateral).min(idle_after_swap);

        {
            let mut vault = self.vault.write().await;
            vault.debit(amount)?;
            vault.debit(collateral)?;
        }
        self.state.product_balance += outcome.amount_out;

        let request = AdjustPositionRequest {
            size_delta_in_tokens: outcome.amount_out,
            collateral_delta_amount: collateral,
            is_increase: true,
        };
        info!(
            swapped_in = %amount,
            product_out = %outcome.amount_out,
            collateral = %collateral,
            "utilizing idle assets"
        );
        if let Err(e) = self.submit_request(request, RequestOrigin::Utilize).await {
            // The swap already went through (tracked as product balance);
            // only the unsent collateral returns to idle.
            self.vault.write().await.credit(collateral);
            return Err(e);
        }
        Ok(ExecutionOutcome::Requested(request))
    }

    /// Unwind product back to asset to serve withdrawals (or, while a
    /// rebalance is processing, to deleverage).
    #[instrument(skip(self), fields(caller = %caller, amount = %amount))]
    pub async fn deutilize(
        &mut self,
        caller: Address,
        amount: U256,
    ) -> Result<ExecutionOutcome, StrategyError> {
        self.ensure_operator(caller)?;
        self.ensure_idle()?;
        let pending = self.pending_deutilization().await?;
        self.deutilize_inner(amount.min(pending), pending, RequestOrigin::Deutilize { full_exit: false })
            .await
    }

    /// Shared deutilization body, also driven by the keeper's emergency
    /// deleverage. `amount` is pre-clamped to the pending demand.
    pub(super) async fn deutilize_inner(
        &mut self,
        amount: U256,
        pending: U256,
        origin: RequestOrigin,
    ) -> Result<ExecutionOutcome, StrategyError> {
        if amount.is_zero() {
            return Err(StrategyError::ZeroAmountDeutilization);
        }
        // Venue sizing bounds are asset-denominated; convert before clamping.
        let bounds = self.position_manager.decrease_size_min_max().await?;
        let min_products = self.asset_bound_to_products(bounds.min).await?;
        let max_products = self.asset_bound_to_products(bounds.max).await?;
        let amount = if amount < min_products {
            min_products
        } else if amount > max_products {
            max_products
        } else {
            amount
        };
        let amount = amount.min(self.state.product_balance);
        if amount.is_zero() {
            return Err(StrategyError::ZeroAmountDeutilization);
        }

        let size_in_tokens = self.position_manager.position_size_in_tokens().await?;
        let net_balance = self.position_manager.position_net_balance().await?;

        let outcome = self.swapper.swap_product_to_asset(amount).await?;
        if !outcome.success {
            info!("deutilize swap failed at venue; staying Idle for retry");
            return Ok(ExecutionOutcome::SwapFailed);
        }
        let (remaining_products, _) = saturating_sub(self.state.product_balance, amount);
        self.state.product_balance = remaining_products;
        self.state.pending_deutilized_assets += outcome.amount_out;

        // Collateral sizing: a full exit closes the hedge by the remaining
        // requested-minus-processed gap in one decrease; otherwise the
        // proportional collateral share accrues for a later batched flush.
        // A deleverage (keeper-driven or rebalance-mode operator call) keeps
        // its collateral — the whole point is to lower leverage, and
        // withdrawing collateral would undo it.
        let is_withdraw_driven = matches!(origin, RequestOrigin::Deutilize { .. })
            && !self.state.processing_rebalance;
        let total_supply = self.vault.read().await.total_supply();
        let full_exit = is_withdraw_driven && amount >= pending && total_supply.is_zero();
        let collateral_delta = if full_exit {
            self.withdrawals.gap()
        } else {
            if is_withdraw_driven && !size_in_tokens.is_zero() {
                let accrual = crate::math::mul_div(
                    net_balance,
                    amount,
                    size_in_tokens,
                    crate::math::Rounding::Floor,
                )?;
                self.state.pending_decrease_collateral += accrual;
                debug!(
                    accrual = %accrual,
                    pending_decrease_collateral = %self.state.pending_decrease_collateral,
                    "accrued collateral decrease"
                );
            }
            U256::ZERO
        };

        let origin = match origin {
            RequestOrigin::Deutilize { .. } => RequestOrigin::Deutilize { full_exit },
            other => other,
        };
        let request = AdjustPositionRequest {
            size_delta_in_tokens: amount,
            collateral_delta_amount: collateral_delta,
            is_increase: false,
        };
        info!(
            product_in = %amount,
            asset_out = %outcome.amount_out,
            collateral_delta = %collateral_delta,
            full_exit,
            "deutilizing"
        );
        self.submit_request(request, origin).await?;
        Ok(ExecutionOutcome::Requested(request))
    }

    async fn asset_bound_to_products(&self, bound: U256) -> Result<U256, StrategyError> {
        if bound.is_zero() {
            return Ok(U256::ZERO);
        }
        Ok(self
            .oracle
            .convert_token_amount(self.config.asset.address, self.config.product.address, bound)
            .await?)
    }

    /// Record the outstanding request and hand it to the venue. On a venue
    /// submission error the status is restored so the operator can retry;
    /// any already-executed swap leaves a spot/hedge drift for the keeper's
    /// hedge-deviation pass to correct.
    pub(super) async fn submit_request(
        &mut self,
        request: AdjustPositionRequest,
        origin: RequestOrigin,
    ) -> Result<(), StrategyError> {
        self.state.active_request = Some(ActiveRequest { request, origin });
        self.state.status = origin.status();
        if let Err(e) = self.position_manager.adjust_position(request).await {
            warn!(error = %e, "position venue rejected the adjustment request");
            self.state.active_request = None;
            self.state.status = StrategyStatus::Idle;
            return Err(e.into());
        }
        Ok(())
    }

    // --- Reconciliation callback ---

    /// The position venue's response to the outstanding request. The single
    /// point where pending state is reconciled and the status returns to
    /// Idle.
    #[instrument(skip(self, response), fields(caller = %caller))]
    pub async fn after_adjust_position(
        &mut self,
        caller: Address,
        response: AdjustPositionResponse,
    ) -> Result<(), StrategyError> {
        self.ensure_position_manager(caller)?;
        let active = self.state.active_request.ok_or(StrategyError::NoActiveRequest)?;
        match self.state.status {
            StrategyStatus::Utilizing | StrategyStatus::Deutilizing | StrategyStatus::Keeping => {}
            other => return Err(StrategyError::CallbackNotAllowed(other)),
        }

        debug!(
            origin = ?active.origin,
            requested_size = %active.request.size_delta_in_tokens,
            executed_size = %response.size_delta_in_tokens,
            requested_collateral = %active.request.collateral_delta_amount,
            executed_collateral = %response.collateral_delta_amount,
            "reconciling position adjustment"
        );

        let mut paused = false;
        if response.is_increase {
            paused = self.reconcile_increase(&active.request, &response).await?;
        } else {
            self.reconcile_decrease(&active.request, &response).await;
        }

        self.state.active_request = None;
        self.state.status = if paused {
            error!("reconciliation anomaly could not be compensated; pausing");
            StrategyStatus::Paused
        } else {
            StrategyStatus::Idle
        };

        if self.state.processing_rebalance {
            let leverage = self.position_manager.current_leverage().await?;
            let deviation = relative_deviation(
                leverage,
                self.config.target_leverage,
                self.config.target_leverage,
            );
            if deviation <= self.config.rebalance_threshold {
                self.state.processing_rebalance = false;
                info!(
                    leverage = %crate::math::wad_to_display(leverage),
                    "leverage re-converged; rebalance complete"
                );
            }
        }
        Ok(())
    }

    /// Increase reconciliation: an under-filled size beyond the deviation
    /// threshold is compensated by swapping the unhedged product back to
    /// asset, keeping spot and hedge notional aligned even under partial
    /// fills. Returns true if the compensation itself failed (anomaly).
    async fn reconcile_increase(
        &mut self,
        request: &AdjustPositionRequest,
        response: &AdjustPositionResponse,
    ) -> Result<bool, StrategyError> {
        let requested_size = request.size_delta_in_tokens;
        if !requested_size.is_zero() && response.size_delta_in_tokens < requested_size {
            let deviation = relative_deviation(
                requested_size,
                response.size_delta_in_tokens,
                requested_size,
            );
            if deviation > self.config.response_deviation_threshold {
                let (shortfall, _) =
                    saturating_sub(requested_size, response.size_delta_in_tokens);
                let shortfall = shortfall.min(self.state.product_balance);
                if !shortfall.is_zero() {
                    warn!(
                        shortfall = %shortfall,
                        "hedge under-filled beyond threshold; reverting unhedged spot"
                    );
                    match self.swapper.swap_product_to_asset(shortfall).await {
                        Ok(outcome) if outcome.success => {
                            let (remaining, _) =
                                saturating_sub(self.state.product_balance, shortfall);
                            self.state.product_balance = remaining;
                            self.route_incoming(outcome.amount_out).await;
                        }
                        _ => return Ok(true),
                    }
                }
            }
        }

        // Collateral the venue did not take comes straight back.
        let (unused_collateral, _) = saturating_sub(
            request.collateral_delta_amount,
            response.collateral_delta_amount,
        );
        if !unused_collateral.is_zero() {
            self.route_incoming(unused_collateral).await;
        }
        Ok(false)
    }

    /// Decrease reconciliation: returned collateral first offsets the
    /// accrued pending decrease, then — together with the parked
    /// deutilization proceeds — flows through the withdraw pipeline; the
    /// overflow lands idle.
    async fn reconcile_decrease(
        &mut self,
        request: &AdjustPositionRequest,
        response: &AdjustPositionResponse,
    ) {
        let returned = response.collateral_delta_amount;
        let offset = returned.min(self.state.pending_decrease_collateral);
        self.state.pending_decrease_collateral -= offset;

        let parked = self.state.pending_deutilized_assets;
        self.state.pending_deutilized_assets = U256::ZERO;

        let inbound = returned + parked;
        if !inbound.is_zero() {
            self.route_incoming(inbound).await;
        }

        if response.size_delta_in_tokens < request.size_delta_in_tokens {
            // Spot already sold; the hedge-deviation keeper pass trues up
            // the remainder on a later cycle.
            warn!(
                requested = %request.size_delta_in_tokens,
                executed = %response.size_delta_in_tokens,
                "size decrease under-filled; hedge deviation pass will correct"
            );
        }
    }

    /// New assets arriving at the strategy: credit the vault, fill the
    /// withdraw gap first, the remainder is idle.
    async fn route_incoming(&mut self, amount: U256) -> ProcessOutcome {
        self.vault.write().await.credit(amount);
        let outcome = self.withdrawals.process(amount);
        debug!(
            inbound = %amount,
            to_withdrawals = %outcome.processed_assets,
            to_idle = %outcome.remaining_assets,
            "routed incoming assets"
        );
        outcome
    }

    // --- Vault-gated withdraw surface ---

    /// Serve a withdrawal: synchronously if idle covers it, otherwise queue
    /// a request snapshotting the accumulated demand.
    #[instrument(skip(self), fields(receiver = %receiver, assets = %assets))]
    pub async fn request_withdraw(
        &mut self,
        caller: Address,
        receiver: Address,
        assets: U256,
    ) -> Result<WithdrawOutcome, StrategyError> {
        self.ensure_vault(caller)?;
        if assets.is_zero() {
            return Err(crate::vault::VaultError::ZeroAssets.into());
        }
        let idle = self.idle_assets().await;
        if idle >= assets {
            self.vault.write().await.payout(assets)?;
            info!("withdraw served from idle");
            return Ok(WithdrawOutcome::Paid { assets });
        }

        let (shortfall, _) = saturating_sub(assets, idle);
        let supply_zero = self.vault.read().await.total_supply().is_zero();
        let key = self.withdrawals.enqueue(
            self.config.strategy,
            receiver,
            assets,
            shortfall,
            self.clock.now(),
            supply_zero,
        );
        info!(key = %key, shortfall = %shortfall, "withdraw queued");
        Ok(WithdrawOutcome::Queued { key })
    }

    /// Route assets that arrived at the vault (deposits) through the
    /// withdraw pipeline. The assets are already credited to the vault.
    pub async fn process_pending_withdraw_requests(
        &mut self,
        caller: Address,
        assets: U256,
    ) -> Result<ProcessOutcome, StrategyError> {
        self.ensure_vault(caller)?;
        Ok(self.withdrawals.process(assets))
    }

    /// Pay out an executed request to its receiver, exactly once.
    pub async fn claim(
        &mut self,
        caller: Address,
        claimer: Address,
        key: B256,
    ) -> Result<U256, StrategyError> {
        self.ensure_vault(caller)?;
        let full_exit_complete = self.full_exit_complete().await?;
        let amount = self.withdrawals.claim(key, claimer, full_exit_complete)?;
        self.vault.write().await.payout(amount)?;
        Ok(amount)
    }

    async fn full_exit_complete(&self) -> Result<bool, StrategyError> {
        if !self.state.is_idle()
            || self.state.active_request.is_some()
            || !self.state.product_balance.is_zero()
            || !self.state.pending_deutilized_assets.is_zero()
        {
            return Ok(false);
        }
        let size = self.position_manager.position_size_in_tokens().await?;
        Ok(size.is_zero())
    }

    // --- Owner surface ---

    /// Clear a pause after manual inspection. Only valid from Paused.
    pub fn unpause(&mut self, caller: Address) -> Result<(), StrategyError> {
        self.ensure_owner(caller)?;
        if self.state.status != StrategyStatus::Paused {
            return Err(StrategyError::NotPaused);
        }
        self.state.status = StrategyStatus::Idle;
        info!("strategy unpaused");
        Ok(())
    }
}
