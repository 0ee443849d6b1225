//! # Basis Strategy Engine
//!
//! The core of the vault: splits idle deposits between a spot product leg and
//! a short hedge leg at a target leverage, and unwinds them to serve
//! withdrawals.
//!
//! ## Architecture
//! - `state`: the owned [`StrategyState`] register and status machine.
//! - `accounting`: pure pending/total asset arithmetic.
//! - `withdraw`: the snapshot-FIFO withdraw request pipeline.
//! - `engine`: [`BasisStrategy`] — utilize / deutilize / callback
//!   reconciliation around the asynchronous position venue.
//! - `keeper`: the `check_upkeep` / `perform_upkeep` priority ladder.
//!
//! ## Safety
//! The status register is the mutual-exclusion primitive: exactly one
//! utilize/deutilize/keep operation may be in flight, and every external
//! entry point is caller-gated.

pub mod accounting;
pub mod engine;
pub mod keeper;
pub mod state;
pub mod withdraw;

pub use engine::{BasisStrategy, ExecutionOutcome, StrategySnapshot, WithdrawOutcome};
pub use keeper::{UpkeepAction, UpkeepCheck};
pub use state::{RequestOrigin, StrategyState, StrategyStatus};
pub use withdraw::{ProcessOutcome, WithdrawQueue, WithdrawRequest};

use crate::math::MathError;
use crate::oracle::OracleError;
use crate::position::PositionManagerError;
use crate::swap::SwapError;
use crate::vault::VaultError;
use alloy_primitives::{Address, B256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    // --- status conflicts ---
    #[error("invalid strategy status: {0}")]
    InvalidStatus(StrategyStatus),
    #[error("strategy is not paused")]
    NotPaused,

    // --- zero amounts ---
    #[error("nothing pending utilization")]
    ZeroPendingUtilization,
    #[error("utilization amount resolved to zero")]
    ZeroAmountUtilization,
    #[error("deutilization amount resolved to zero")]
    ZeroAmountDeutilization,

    // --- authorization ---
    #[error("caller {0} is not the operator")]
    CallerNotOperator(Address),
    #[error("caller {0} is not the authorized forwarder")]
    CallerNotForwarder(Address),
    #[error("caller {0} is not the position manager")]
    CallerNotPositionManager(Address),
    #[error("caller {0} is not the vault")]
    CallerNotVault(Address),
    #[error("caller {0} is not the owner")]
    CallerNotOwner(Address),
    #[error("claimer {actual} is not the request receiver {expected}")]
    UnauthorizedClaimer { expected: Address, actual: Address },

    // --- withdraw requests ---
    #[error("unknown withdraw request {0}")]
    UnknownRequest(B256),
    #[error("withdraw request {0} is not executed yet")]
    RequestNotExecuted(B256),
    #[error("withdraw request {0} already claimed")]
    RequestAlreadyClaimed(B256),

    // --- callback ---
    #[error("no active position adjustment request")]
    NoActiveRequest,
    #[error("callback not allowed in status {0}")]
    CallbackNotAllowed(StrategyStatus),

    // --- configuration & collaborators ---
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Swap(#[from] SwapError),
    #[error(transparent)]
    Position(#[from] PositionManagerError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Math(#[from] MathError),
}
