//! Strategy state register.
//!
//! One owned struct, passed nowhere implicitly: every field the engine
//! mutates lives here, and the status register doubles as the non-reentrant
//! lock spanning the asynchronous position-venue round trip.

use crate::position::AdjustPositionRequest;
use alloy_primitives::U256;
use serde::Serialize;

/// Global state-machine register. Only one non-`Idle` operation may be in
/// flight at a time; `Paused` is entered on an unrecoverable reconciliation
/// anomaly and cleared manually by the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrategyStatus {
    Idle,
    Keeping,
    Utilizing,
    Deutilizing,
    Paused,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyStatus::Idle => write!(f, "Idle"),
            StrategyStatus::Keeping => write!(f, "Keeping"),
            StrategyStatus::Utilizing => write!(f, "Utilizing"),
            StrategyStatus::Deutilizing => write!(f, "Deutilizing"),
            StrategyStatus::Paused => write!(f, "Paused"),
        }
    }
}

/// Why the active position-adjustment request was sent; determines status
/// mapping and how the callback reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Operator moved idle assets into the spot+hedge position.
    Utilize,
    /// Operator unwound product to serve withdrawals (or a full exit).
    Deutilize { full_exit: bool },
    /// Keeper collateral adjustment pulling leverage toward target.
    Rebalance,
    /// Keeper emergency size decrease above the safe leverage margin.
    Deleverage,
    /// Keeper size-only correction of spot-vs-hedge drift.
    HedgeAdjust,
    /// Keeper flush of the accrued pending collateral decrease.
    CollateralFlush,
}

impl RequestOrigin {
    pub fn status(&self) -> StrategyStatus {
        match self {
            RequestOrigin::Utilize => StrategyStatus::Utilizing,
            RequestOrigin::Deutilize { .. } => StrategyStatus::Deutilizing,
            RequestOrigin::Rebalance
            | RequestOrigin::Deleverage
            | RequestOrigin::HedgeAdjust
            | RequestOrigin::CollateralFlush => StrategyStatus::Keeping,
        }
    }
}

/// The outstanding request awaiting its `after_adjust_position` callback.
#[derive(Debug, Clone, Copy)]
pub struct ActiveRequest {
    pub request: AdjustPositionRequest,
    pub origin: RequestOrigin,
}

/// All mutable strategy state. Owned exclusively by the engine; no globals.
#[derive(Debug)]
pub struct StrategyState {
    pub status: StrategyStatus,
    /// Sticky across keeper cycles until leverage re-converges within the
    /// configured threshold of target.
    pub processing_rebalance: bool,
    /// Collateral decrease accrued over small deutilizations, flushed in one
    /// venue request once above the configured minimum.
    pub pending_decrease_collateral: U256,
    /// Asset proceeds of deutilization swaps, parked until the venue
    /// callback confirms the matching size decrease.
    pub pending_deutilized_assets: U256,
    /// Spot product tokens held by the strategy.
    pub product_balance: U256,
    /// The outstanding venue request. No timeout exists: if the venue never
    /// calls back, the status stays non-Idle permanently (known gap in the
    /// protocol; recovery policy is deliberately not invented here).
    pub active_request: Option<ActiveRequest>,
}

impl StrategyState {
    pub fn new() -> Self {
        Self {
            status: StrategyStatus::Idle,
            processing_rebalance: false,
            pending_decrease_collateral: U256::ZERO,
            pending_deutilized_assets: U256::ZERO,
            product_balance: U256::ZERO,
            active_request: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == StrategyStatus::Idle
    }
}

impl Default for StrategyState {
    fn default() -> Self {
        Self::new()
    }
}
