//! Hedge position manager abstraction.
//!
//! The short perpetual leg lives on an external venue behind an asynchronous
//! request/response protocol: the strategy submits an
//! [`AdjustPositionRequest`], the venue executes at its own pace, and the
//! executed deltas come back later through the strategy's
//! `after_adjust_position` entry point. Between the two calls the strategy
//! keeps the request stored and refuses any new operation.

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionManagerError {
    #[error("a position adjustment is already pending")]
    AlreadyPending,
    #[error("position venue rejected the request: {0}")]
    Rejected(String),
    #[error("position venue unavailable: {0}")]
    Unavailable(String),
}

/// A requested change to the hedge position. `size_delta_in_tokens` is
/// denominated in product tokens, `collateral_delta_amount` in asset tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustPositionRequest {
    pub size_delta_in_tokens: U256,
    pub collateral_delta_amount: U256,
    pub is_increase: bool,
}

impl AdjustPositionRequest {
    pub fn is_empty(&self) -> bool {
        self.size_delta_in_tokens.is_zero() && self.collateral_delta_amount.is_zero()
    }
}

/// The venue's executed deltas, echoed back for reconciliation. On a
/// decrease, `collateral_delta_amount` is the collateral actually returned
/// to the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustPositionResponse {
    pub size_delta_in_tokens: U256,
    pub collateral_delta_amount: U256,
    pub is_increase: bool,
}

/// Inclusive `[min, max]` bounds on a single adjustment, as enforced by the
/// venue. Size bounds are asset-denominated (venue sizing is in USD terms);
/// the engine converts through the oracle before clamping product amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentBounds {
    pub min: U256,
    pub max: U256,
}

impl AdjustmentBounds {
    pub fn clamp(&self, value: U256) -> U256 {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

/// External leveraged-hedge venue consumed by the strategy engine.
#[async_trait]
pub trait PositionManager: Send + Sync {
    /// Submit an adjustment. The executed result arrives later through the
    /// strategy's `after_adjust_position` callback.
    async fn adjust_position(
        &self,
        request: AdjustPositionRequest,
    ) -> Result<(), PositionManagerError>;

    /// Net claim on the venue in asset terms: collateral plus unrealized PnL.
    async fn position_net_balance(&self) -> Result<U256, PositionManagerError>;

    /// Current leverage, WAD-scaled (notional / net balance). Zero when no
    /// position is open.
    async fn current_leverage(&self) -> Result<U256, PositionManagerError>;

    /// Open short size in product tokens.
    async fn position_size_in_tokens(&self) -> Result<U256, PositionManagerError>;

    /// Bounds on a single size increase, asset-denominated.
    async fn increase_size_min_max(&self) -> Result<AdjustmentBounds, PositionManagerError>;

    /// Bounds on a single size decrease, asset-denominated.
    async fn decrease_size_min_max(&self) -> Result<AdjustmentBounds, PositionManagerError>;

    /// Bounds on a single collateral increase, asset-denominated.
    async fn increase_collateral_min_max(&self) -> Result<AdjustmentBounds, PositionManagerError>;

    /// Bounds on a single collateral decrease, asset-denominated.
    async fn decrease_collateral_min_max(&self) -> Result<AdjustmentBounds, PositionManagerError>;

    /// Largest collateral decrease the venue will honor right now without
    /// violating its own margin requirements.
    async fn limit_decrease_collateral(&self) -> Result<U256, PositionManagerError>;

    /// Venue-intrinsic maintenance need (e.g. funding settlement).
    async fn need_keep(&self) -> Result<bool, PositionManagerError>;

    /// Perform venue-intrinsic maintenance.
    async fn keep(&self) -> Result<(), PositionManagerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_clamp_inclusive() {
        let bounds = AdjustmentBounds {
            min: U256::from(10u64),
            max: U256::from(100u64),
        };
        assert_eq!(bounds.clamp(U256::from(5u64)), U256::from(10u64));
        assert_eq!(bounds.clamp(U256::from(50u64)), U256::from(50u64));
        assert_eq!(bounds.clamp(U256::from(500u64)), U256::from(100u64));
    }

    #[test]
    fn empty_request_detected() {
        let request = AdjustPositionRequest {
            size_delta_in_tokens: U256::ZERO,
            collateral_delta_amount: U256::ZERO,
            is_increase: true,
        };
        assert!(request.is_empty());
    }
}
