//! ERC-4626-style share accounting.
//!
//! The vault is a passive ledger: it holds the asset balance and the share
//! book, and converts between the two at an externally supplied
//! `total_assets` valuation (the strategy owns the valuation; querying it
//! involves oracle and venue calls the ledger must not make). Utilization
//! decisions are delegated entirely to the strategy, which moves funds
//! through the narrow `credit`/`debit`/`payout` mutators.
//!
//! Rounding is a first-class design decision here: share-favoring
//! conversions floor, obligations ceiling. Conversions use a +1 virtual
//! offset on both legs so an empty vault prices shares 1:1 and donation
//! attacks cannot zero out depositors.

use crate::math::{mul_div, MathError, Rounding};
use crate::types::TokenInfo;
use alloy_primitives::{Address, U256};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("zero assets")]
    ZeroAssets,
    #[error("zero shares")]
    ZeroShares,
    #[error("insufficient shares for {owner}: requested {requested}, available {available}")]
    InsufficientShares {
        owner: Address,
        requested: U256,
        available: U256,
    },
    #[error("insufficient vault balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: U256, available: U256 },
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Passive share ledger for a single asset token.
#[derive(Debug, Clone)]
pub struct Vault {
    asset: TokenInfo,
    asset_balance: U256,
    total_supply: U256,
    shares: HashMap<Address, U256>,
}

impl Vault {
    pub fn new(asset: TokenInfo) -> Self {
        Self {
            asset,
            asset_balance: U256::ZERO,
            total_supply: U256::ZERO,
            shares: HashMap::new(),
        }
    }

    pub fn asset(&self) -> &TokenInfo {
        &self.asset
    }

    /// All asset tokens held by the vault, including amounts earmarked for
    /// unclaimed withdrawals. Idle assets are derived by the strategy.
    pub fn asset_balance(&self) -> U256 {
        self.asset_balance
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn balance_of(&self, owner: Address) -> U256 {
        self.shares.get(&owner).copied().unwrap_or(U256::ZERO)
    }

    // --- Conversions ---

    fn one() -> U256 {
        U256::from(1u64)
    }

    pub fn convert_to_shares(
        &self,
        assets: U256,
        total_assets: U256,
        rounding: Rounding,
    ) -> Result<U256, VaultError> {
        Ok(mul_div(
            assets,
            self.total_supply + Self::one(),
            total_assets + Self::one(),
            rounding,
        )?)
    }

    pub fn convert_to_assets(
        &self,
        shares: U256,
        total_assets: U256,
        rounding: Rounding,
    ) -> Result<U256, VaultError> {
        Ok(mul_div(
            shares,
            total_assets + Self::one(),
            self.total_supply + Self::one(),
            rounding,
        )?)
    }

    /// Shares minted for a deposit: floor (never over-mints).
    pub fn preview_deposit(&self, assets: U256, total_assets: U256) -> Result<U256, VaultError> {
        self.convert_to_shares(assets, total_assets, Rounding::Floor)
    }

    /// Assets required to mint exact shares: ceiling (never under-charges).
    pub fn preview_mint(&self, shares: U256, total_assets: U256) -> Result<U256, VaultError> {
        self.convert_to_assets(shares, total_assets, Rounding::Ceil)
    }

    /// Shares burned to withdraw exact assets: ceiling (never under-burns).
    pub fn preview_withdraw(&self, assets: U256, total_assets: U256) -> Result<U256, VaultError> {
        self.convert_to_shares(assets, total_assets, Rounding::Ceil)
    }

    /// Assets returned for redeeming shares: floor.
    pub fn preview_redeem(&self, shares: U256, total_assets: U256) -> Result<U256, VaultError> {
        self.convert_to_assets(shares, total_assets, Rounding::Floor)
    }

    // --- User operations (driven by the protocol front) ---

    /// Mint shares for a deposit priced at `total_assets` (valued *before*
    /// the new assets are credited) and credit the asset balance.
    pub fn deposit(
        &mut self,
        assets: U256,
        receiver: Address,
        total_assets: U256,
    ) -> Result<U256, VaultError> {
        if assets.is_zero() {
            return Err(VaultError::ZeroAssets);
        }
        let shares = self.preview_deposit(assets, total_assets)?;
        if shares.is_zero() {
            return Err(VaultError::ZeroShares);
        }
        self.mint_to(receiver, shares);
        self.asset_balance += assets;
        debug!(
            receiver = %receiver,
            assets = %assets,
            shares = %shares,
            "vault deposit"
        );
        Ok(shares)
    }

    /// Burn `shares` from `owner` and return the asset value at
    /// `total_assets` (floor). Fund movement is the caller's concern.
    pub fn redeem_shares(
        &mut self,
        shares: U256,
        owner: Address,
        total_assets: U256,
    ) -> Result<U256, VaultError> {
        if shares.is_zero() {
            return Err(VaultError::ZeroShares);
        }
        let assets = self.preview_redeem(shares, total_assets)?;
        self.burn_from(owner, shares)?;
        debug!(owner = %owner, shares = %shares, assets = %assets, "vault redeem");
        Ok(assets)
    }

    // --- Narrow mutators for the strategy/protocol ---

    /// Add assets arriving at the vault (deutilization proceeds, returned
    /// collateral).
    pub fn credit(&mut self, amount: U256) {
        self.asset_balance += amount;
    }

    /// Remove assets the strategy is putting to work (swap input, collateral
    /// for the hedge).
    pub fn debit(&mut self, amount: U256) -> Result<(), VaultError> {
        if amount > self.asset_balance {
            return Err(VaultError::InsufficientBalance {
                requested: amount,
                available: self.asset_balance,
            });
        }
        self.asset_balance -= amount;
        Ok(())
    }

    /// Transfer assets out of the system (instant withdraw, claim payout).
    pub fn payout(&mut self, amount: U256) -> Result<(), VaultError> {
        self.debit(amount)
    }

    fn mint_to(&mut self, receiver: Address, shares: U256) {
        *self.shares.entry(receiver).or_insert(U256::ZERO) += shares;
        self.total_supply += shares;
    }

    fn burn_from(&mut self, owner: Address, shares: U256) -> Result<(), VaultError> {
        let balance = self.balance_of(owner);
        if shares > balance {
            return Err(VaultError::InsufficientShares {
                owner,
                requested: shares,
                available: balance,
            });
        }
        self.shares.insert(owner, balance - shares);
        self.total_supply -= shares;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        let asset = TokenInfo::new(Address::repeat_byte(0xAA), 6, "USDC");
        Vault::new(asset)
    }

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn first_deposit_prices_one_to_one() {
        let mut v = vault();
        let shares = v.deposit(u(1_000_000), Address::repeat_byte(1), U256::ZERO).unwrap();
        assert_eq!(shares, u(1_000_000));
        assert_eq!(v.total_supply(), u(1_000_000));
        assert_eq!(v.asset_balance(), u(1_000_000));
    }

    #[test]
    fn deposit_after_profit_mints_fewer_shares() {
        let mut v = vault();
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        v.deposit(u(1000), alice, U256::ZERO).unwrap();
        // Vault doubled in value: 1000 shares now back 2000 assets.
        let shares = v.deposit(u(1000), bob, u(2000)).unwrap();
        assert!(shares < u(1000), "expected dilution-adjusted mint, got {shares}");
    }

    #[test]
    fn deposit_never_exceeds_preview() {
        let mut v = vault();
        v.deposit(u(997), Address::repeat_byte(1), U256::ZERO).unwrap();
        let total = u(1013); // odd valuation to force remainders
        let preview = v.preview_deposit(u(331), total).unwrap();
        let minted = v.deposit(u(331), Address::repeat_byte(2), total).unwrap();
        assert!(minted <= preview);
        assert_eq!(minted, preview);
    }

    #[test]
    fn preview_mint_is_ceiling_biased() {
        let mut v = vault();
        v.deposit(u(1000), Address::repeat_byte(1), U256::ZERO).unwrap();
        let total = u(1500);
        let shares = u(7);
        let assets_in = v.preview_mint(shares, total).unwrap();
        let assets_out = v.preview_redeem(shares, total).unwrap();
        assert!(assets_in >= assets_out);
    }

    #[test]
    fn preview_withdraw_is_ceiling_biased() {
        let mut v = vault();
        v.deposit(u(1000), Address::repeat_byte(1), U256::ZERO).unwrap();
        let total = u(1500);
        let assets = u(100);
        let shares_burned = v.preview_withdraw(assets, total).unwrap();
        let shares_minted = v.preview_deposit(assets, total).unwrap();
        assert!(shares_burned >= shares_minted);
    }

    #[test]
    fn zero_amounts_rejected() {
        let mut v = vault();
        assert_eq!(
            v.deposit(U256::ZERO, Address::repeat_byte(1), U256::ZERO),
            Err(VaultError::ZeroAssets)
        );
        assert_eq!(
            v.redeem_shares(U256::ZERO, Address::repeat_byte(1), U256::ZERO),
            Err(VaultError::ZeroShares)
        );
    }

    #[test]
    fn redeem_requires_share_balance() {
        let mut v = vault();
        let alice = Address::repeat_byte(1);
        v.deposit(u(100), alice, U256::ZERO).unwrap();
        let err = v.redeem_shares(u(200), alice, u(100)).unwrap_err();
        assert!(matches!(err, VaultError::InsufficientShares { .. }));
    }

    #[test]
    fn debit_requires_balance() {
        let mut v = vault();
        v.credit(u(50));
        assert!(v.debit(u(60)).is_err());
        v.debit(u(50)).unwrap();
        assert_eq!(v.asset_balance(), U256::ZERO);
    }
}
