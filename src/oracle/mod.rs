//! Price oracle abstraction.
//!
//! The strategy never computes prices itself; all asset<->product conversions
//! go through an [`Oracle`] implementation backed by two independent price
//! feeds. A zero price signals an unconfigured or stale feed and is always
//! rejected, including at initialization.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("price feed not configured for token {0}")]
    PriceFeedNotConfigured(Address),
    #[error("invalid feed price for token {token}: {price}")]
    InvalidPrice { token: Address, price: U256 },
    #[error("conversion overflow for {amount} units of {token_in}")]
    ConversionOverflow { token_in: Address, amount: U256 },
}

/// Two-feed price oracle consumed by the strategy engine.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Convert `amount` of `token_in` into the equivalent amount of
    /// `token_out`, accounting for both feed prices and token decimals.
    async fn convert_token_amount(
        &self,
        token_in: Address,
        token_out: Address,
        amount: U256,
    ) -> Result<U256, OracleError>;

    /// Current WAD-scaled USD price of one whole token. Implementations must
    /// return an error, never zero, for stale or unconfigured feeds.
    async fn get_asset_price(&self, token: Address) -> Result<U256, OracleError>;
}
