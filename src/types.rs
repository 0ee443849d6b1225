//! Common Types Module
//!
//! Shared types used across the codebase to avoid circular dependencies.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ERC-20-style token identity: address plus display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// On-chain token address.
    pub address: Address,
    /// Token decimals (e.g. 6 for USDC, 18 for WETH).
    pub decimals: u8,
    /// Human-readable symbol for logs.
    pub symbol: String,
}

impl TokenInfo {
    pub fn new(address: Address, decimals: u8, symbol: impl Into<String>) -> Self {
        Self {
            address,
            decimals,
            symbol: symbol.into(),
        }
    }
}

impl std::fmt::Display for TokenInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

// --- Time Abstraction ---

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
    fn now_ts_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_reports_milliseconds() {
        let clock = SystemClock;
        let millis = clock.now_ts_millis();
        assert!(millis > 0);
        assert_eq!(millis / 1000, clock.now().timestamp());
    }

    #[test]
    fn token_info_displays_symbol() {
        let token = TokenInfo::new(Address::repeat_byte(1), 6, "USDC");
        assert_eq!(token.to_string(), "USDC");
    }
}
