//! User-facing protocol front.
//!
//! `BasisProtocol` glues the passive share ledger to the strategy engine:
//! deposits are priced against the strategy's valuation *before* crediting
//! new assets, withdrawals burn shares and hand the asset claim to the
//! strategy's pipeline, and claims pay out executed requests. The strategy's
//! operator/keeper/venue surfaces are reached through `strategy_mut`.

use crate::strategy::{BasisStrategy, StrategyError, WithdrawOutcome};
use crate::vault::Vault;
use alloy_primitives::{Address, B256, U256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};

pub struct BasisProtocol {
    vault: Arc<RwLock<Vault>>,
    strategy: BasisStrategy,
}

impl BasisProtocol {
    pub fn new(vault: Arc<RwLock<Vault>>, strategy: BasisStrategy) -> Self {
        Self { vault, strategy }
    }

    pub fn strategy(&self) -> &BasisStrategy {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut BasisStrategy {
        &mut self.strategy
    }

    pub fn vault(&self) -> Arc<RwLock<Vault>> {
        self.vault.clone()
    }

    /// Deposit assets, minting shares at the pre-deposit valuation, then
    /// route the new assets through the withdraw pipeline (outstanding
    /// demand is served before anything becomes idle).
    #[instrument(skip(self), fields(receiver = %receiver, assets = %assets))]
    pub async fn deposit(
        &mut self,
        assets: U256,
        receiver: Address,
    ) -> Result<U256, StrategyError> {
        let total_assets = self.strategy.total_assets().await?;
        let shares = self
            .vault
            .write()
            .await
            .deposit(assets, receiver, total_assets)?;
        let vault_identity = self.strategy.config().vault;
        let routed = self
            .strategy
            .process_pending_withdraw_requests(vault_identity, assets)
            .await?;
        info!(
            shares = %shares,
            to_withdrawals = %routed.processed_assets,
            to_idle = %routed.remaining_assets,
            "deposit processed"
        );
        Ok(shares)
    }

    /// Preview the shares a deposit would mint right now (floor-biased).
    pub async fn preview_deposit(&self, assets: U256) -> Result<U256, StrategyError> {
        let total_assets = self.strategy.total_assets().await?;
        Ok(self.vault.read().await.preview_deposit(assets, total_assets)?)
    }

    /// Burn `shares` and withdraw their asset value: instantly if idle
    /// covers it, otherwise as a queued request claimable later.
    #[instrument(skip(self), fields(owner = %owner, shares = %shares, receiver = %receiver))]
    pub async fn request_withdraw(
        &mut self,
        owner: Address,
        shares: U256,
        receiver: Address,
    ) -> Result<WithdrawOutcome, StrategyError> {
        let total_assets = self.strategy.total_assets().await?;
        let assets = self
            .vault
            .write()
            .await
            .redeem_shares(shares, owner, total_assets)?;
        let vault_identity = self.strategy.config().vault;
        self.strategy
            .request_withdraw(vault_identity, receiver, assets)
            .await
    }

    /// Claim an executed withdraw request.
    pub async fn claim(&mut self, claimer: Address, key: B256) -> Result<U256, StrategyError> {
        let vault_identity = self.strategy.config().vault;
        self.strategy.claim(vault_identity, claimer, key).await
    }

    pub async fn total_assets(&self) -> Result<U256, StrategyError> {
        self.strategy.total_assets().await
    }

    pub async fn total_supply(&self) -> U256 {
        self.vault.read().await.total_supply()
    }

    pub async fn share_balance_of(&self, owner: Address) -> U256 {
        self.vault.read().await.balance_of(owner)
    }
}
