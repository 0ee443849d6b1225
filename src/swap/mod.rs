//! DEX swap abstraction.
//!
//! Two adapter families exist in production: a manual-path router that walks
//! an explicit token/pool path, and an aggregator router (1inch-style) that
//! reports failure in-band instead of reverting. The engine is parameterized
//! by [`SwapExecutor`], so the variant is configuration rather than a
//! subclassed strategy.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwapError {
    #[error("swap path must alternate token/pool and hold at least 3 entries, got {0}")]
    MalformedPath(usize),
    #[error("swap path endpoint mismatch: expected {expected}, found {found}")]
    PathEndpointMismatch { expected: Address, found: Address },
    #[error("swap path contains the zero address")]
    ZeroAddressInPath,
    #[error("swap venue rejected the trade: {0}")]
    VenueRejected(String),
    #[error("swap amount {requested} exceeds available balance {available}")]
    AmountExceedsBalance { requested: U256, available: U256 },
}

/// A validated manual swap path: alternating token and pool addresses,
/// `[token_in, pool, token, pool, ..., token_out]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPath {
    hops: Vec<Address>,
}

impl SwapPath {
    /// Validate and construct a path from `token_in` to `token_out`.
    ///
    /// The path must have odd length >= 3 (tokens at even indices, pools at
    /// odd indices), start at `token_in`, end at `token_out`, and contain no
    /// zero addresses.
    pub fn new(hops: Vec<Address>, token_in: Address, token_out: Address) -> Result<Self, SwapError> {
        if hops.len() < 3 || hops.len() % 2 == 0 {
            return Err(SwapError::MalformedPath(hops.len()));
        }
        if hops.iter().any(|a| a.is_zero()) {
            return Err(SwapError::ZeroAddressInPath);
        }
        let first = hops[0];
        if first != token_in {
            return Err(SwapError::PathEndpointMismatch {
                expected: token_in,
                found: first,
            });
        }
        let last = hops[hops.len() - 1];
        if last != token_out {
            return Err(SwapError::PathEndpointMismatch {
                expected: token_out,
                found: last,
            });
        }
        Ok(Self { hops })
    }

    pub fn token_in(&self) -> Address {
        self.hops[0]
    }

    pub fn token_out(&self) -> Address {
        self.hops[self.hops.len() - 1]
    }

    pub fn hops(&self) -> &[Address] {
        &self.hops
    }
}

/// Manual-path router: errors propagate to the caller.
#[async_trait]
pub trait SwapAdapter: Send + Sync {
    /// Swap `amount_in` along `path`, returning the output amount.
    async fn swap(&self, amount_in: U256, path: &SwapPath) -> Result<U256, SwapError>;
}

/// Aggregator router: failure is reported in-band as `success == false`
/// so the caller can recover locally instead of aborting the transaction.
#[async_trait]
pub trait AggregatorAdapter: Send + Sync {
    /// Swap `amount_in` of `token_in` for `token_out`.
    /// Returns `(amount_out, success)`.
    async fn swap(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<(U256, bool), SwapError>;
}

/// Outcome of a swap attempt through [`SwapExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    pub amount_out: U256,
    pub success: bool,
}

/// The engine's single swap entry point; the adapter variant is configuration.
pub enum SwapExecutor {
    /// Manual path router with pre-validated asset<->product paths.
    Manual {
        adapter: std::sync::Arc<dyn SwapAdapter>,
        asset_to_product: SwapPath,
        product_to_asset: SwapPath,
    },
    /// Aggregator router resolving the route off-chain.
    Aggregator {
        adapter: std::sync::Arc<dyn AggregatorAdapter>,
        asset: Address,
        product: Address,
    },
}

impl SwapExecutor {
    /// Swap asset -> product. Adapter-level rejection is surfaced as a
    /// non-success outcome; transport errors propagate.
    pub async fn swap_asset_to_product(&self, amount_in: U256) -> Result<SwapOutcome, SwapError> {
        self.swap(amount_in, true).await
    }

    /// Swap product -> asset.
    pub async fn swap_product_to_asset(&self, amount_in: U256) -> Result<SwapOutcome, SwapError> {
        self.swap(amount_in, false).await
    }

    async fn swap(&self, amount_in: U256, forward: bool) -> Result<SwapOutcome, SwapError> {
        match self {
            SwapExecutor::Manual {
                adapter,
                asset_to_product,
                product_to_asset,
            } => {
                let path = if forward {
                    asset_to_product
                } else {
                    product_to_asset
                };
                match adapter.swap(amount_in, path).await {
                    Ok(amount_out) => Ok(SwapOutcome {
                        amount_out,
                        success: true,
                    }),
                    Err(SwapError::VenueRejected(reason)) => {
                        warn!(reason = %reason, "manual swap rejected by venue");
                        Ok(SwapOutcome {
                            amount_out: U256::ZERO,
                            success: false,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            SwapExecutor::Aggregator {
                adapter,
                asset,
                product,
            } => {
                let (token_in, token_out) = if forward {
                    (*asset, *product)
                } else {
                    (*product, *asset)
                };
                let (amount_out, success) = adapter.swap(token_in, token_out, amount_in).await?;
                if !success {
                    warn!(amount_in = %amount_in, "aggregator swap reported failure");
                }
                Ok(SwapOutcome {
                    amount_out,
                    success,
                })
            }
        }
    }
}

impl std::fmt::Debug for SwapExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapExecutor::Manual { .. } => write!(f, "SwapExecutor::Manual"),
            SwapExecutor::Aggregator { .. } => write!(f, "SwapExecutor::Aggregator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn path_accepts_single_hop() {
        let path = SwapPath::new(vec![addr(1), addr(9), addr(2)], addr(1), addr(2)).unwrap();
        assert_eq!(path.token_in(), addr(1));
        assert_eq!(path.token_out(), addr(2));
    }

    #[test]
    fn path_accepts_multi_hop() {
        let hops = vec![addr(1), addr(9), addr(3), addr(8), addr(2)];
        assert!(SwapPath::new(hops, addr(1), addr(2)).is_ok());
    }

    #[test]
    fn path_rejects_even_length() {
        let hops = vec![addr(1), addr(9), addr(3), addr(2)];
        assert!(matches!(
            SwapPath::new(hops, addr(1), addr(2)),
            Err(SwapError::MalformedPath(4))
        ));
    }

    #[test]
    fn path_rejects_wrong_endpoints() {
        let hops = vec![addr(1), addr(9), addr(2)];
        assert!(matches!(
            SwapPath::new(hops.clone(), addr(5), addr(2)),
            Err(SwapError::PathEndpointMismatch { .. })
        ));
        assert!(matches!(
            SwapPath::new(hops, addr(1), addr(5)),
            Err(SwapError::PathEndpointMismatch { .. })
        ));
    }

    #[test]
    fn path_rejects_zero_address() {
        let hops = vec![addr(1), Address::ZERO, addr(2)];
        assert!(matches!(
            SwapPath::new(hops, addr(1), addr(2)),
            Err(SwapError::ZeroAddressInPath)
        ));
    }
}
