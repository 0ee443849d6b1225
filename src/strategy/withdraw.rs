//! Withdraw request pipeline.
//!
//! Requests that cannot be served from idle assets queue up behind two
//! monotone counters: `acc_requested_withdraw_assets` (demand) and
//! `processed_withdraw_assets` (supply applied against it). Each request
//! snapshots the demand counter at creation; it becomes executable once the
//! supply counter reaches its snapshot. Incoming assets close the gap with a
//! single comparison, so processing is O(1) regardless of queue depth and
//! requests execute strictly in accumulation (FIFO) order.

use super::StrategyError;
use crate::math::saturating_sub;
use alloy_primitives::{keccak256, Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// One queued withdraw request.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawRequest {
    /// Total assets owed to the receiver (idle-covered part + shortfall).
    pub requested_assets: U256,
    /// Value of `acc_requested_withdraw_assets` right after this request's
    /// shortfall was accrued; execution threshold.
    pub acc_snapshot: U256,
    pub timestamp: DateTime<Utc>,
    pub receiver: Address,
    pub claimed: bool,
    /// Created while total share supply was zero: the final exit. Executes
    /// only when deutilization has fully completed, not by counter.
    pub last_when_empty: bool,
}

/// Result of routing incoming assets through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Applied against the outstanding withdraw gap (earmarked for claims).
    pub processed_assets: U256,
    /// Overflow beyond the gap, available as idle.
    pub remaining_assets: U256,
}

/// Snapshot-FIFO queue of withdraw requests plus the earmark counters.
#[derive(Debug, Default)]
pub struct WithdrawQueue {
    acc_requested: U256,
    processed: U256,
    assets_to_claim: U256,
    request_counter: u64,
    requests: HashMap<B256, WithdrawRequest>,
}

impl WithdrawQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acc_requested(&self) -> U256 {
        self.acc_requested
    }

    pub fn processed(&self) -> U256 {
        self.processed
    }

    pub fn assets_to_claim(&self) -> U256 {
        self.assets_to_claim
    }

    pub fn request_counter(&self) -> u64 {
        self.request_counter
    }

    /// Outstanding demand: `acc_requested - processed`.
    pub fn gap(&self) -> U256 {
        saturating_sub(self.acc_requested, self.processed).0
    }

    pub fn get(&self, key: &B256) -> Option<&WithdrawRequest> {
        self.requests.get(key)
    }

    /// Deterministic request key: `keccak256(strategy || counter)`. The
    /// counter is monotonic, so keys are never reused.
    fn derive_key(strategy: Address, counter: u64) -> B256 {
        let mut preimage = [0u8; 28];
        preimage[..20].copy_from_slice(strategy.as_slice());
        preimage[20..].copy_from_slice(&counter.to_be_bytes());
        keccak256(preimage)
    }

    /// Queue a request that idle assets could not fully cover.
    ///
    /// `shortfall` is accrued into demand; the idle-covered remainder is
    /// earmarked for the claim immediately.
    pub fn enqueue(
        &mut self,
        strategy: Address,
        receiver: Address,
        requested_assets: U256,
        shortfall: U256,
        timestamp: DateTime<Utc>,
        last_when_empty: bool,
    ) -> B256 {
        debug_assert!(shortfall <= requested_assets);
        let idle_covered = saturating_sub(requested_assets, shortfall).0;
        self.assets_to_claim += idle_covered;
        self.acc_requested += shortfall;
        self.request_counter += 1;
        let key = Self::derive_key(strategy, self.request_counter);
        let request = WithdrawRequest {
            requested_assets,
            acc_snapshot: self.acc_requested,
            timestamp,
            receiver,
            claimed: false,
            last_when_empty,
        };
        debug!(
            key = %key,
            receiver = %receiver,
            requested = %requested_assets,
            shortfall = %shortfall,
            acc_snapshot = %self.acc_requested,
            "queued withdraw request"
        );
        self.requests.insert(key, request);
        key
    }

    /// Apply incoming assets against the gap first; overflow is idle.
    /// Earmarks the applied portion for claims.
    pub fn process(&mut self, assets: U256) -> ProcessOutcome {
        let gap = self.gap();
        let applied = assets.min(gap);
        self.processed += applied;
        self.assets_to_claim += applied;
        debug_assert!(self.processed <= self.acc_requested);
        ProcessOutcome {
            processed_assets: applied,
            remaining_assets: saturating_sub(assets, applied).0,
        }
    }

    /// Whether a request can be claimed. The final-exit request waits for
    /// full deutilization instead of the counter.
    pub fn is_executed(&self, request: &WithdrawRequest, full_exit_complete: bool) -> bool {
        if request.last_when_empty {
            full_exit_complete
        } else {
            self.processed >= request.acc_snapshot
        }
    }

    /// Claim an executed request exactly once. Returns the payout amount.
    pub fn claim(
        &mut self,
        key: B256,
        claimer: Address,
        full_exit_complete: bool,
    ) -> Result<U256, StrategyError> {
        let request = self
            .requests
            .get(&key)
            .ok_or(StrategyError::UnknownRequest(key))?;
        if request.receiver != claimer {
            return Err(StrategyError::UnauthorizedClaimer {
                expected: request.receiver,
                actual: claimer,
            });
        }
        if request.claimed {
            return Err(StrategyError::RequestAlreadyClaimed(key));
        }
        if !self.is_executed(request, full_exit_complete) {
            return Err(StrategyError::RequestNotExecuted(key));
        }
        let amount = request.requested_assets;
        if let Some(request) = self.requests.get_mut(&key) {
            request.claimed = true;
        }
        let (remaining, underflowed) = saturating_sub(self.assets_to_claim, amount);
        debug_assert!(!underflowed, "claim exceeded earmarked assets");
        self.assets_to_claim = remaining;
        debug!(key = %key, claimer = %claimer, amount = %amount, "withdraw claimed");
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    fn strategy() -> Address {
        Address::repeat_byte(0x51)
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn process_fills_gap_then_overflows_to_idle() {
        let mut queue = WithdrawQueue::new();
        queue.enqueue(strategy(), Address::repeat_byte(1), u(1000), u(1000), now(), false);
        let applied = queue.process(u(400));
        assert_eq!(applied.processed_assets, u(400));

        // acc=1000, processed=400; routing 700 fills the 600 gap and sends
        // 100 to idle.
        let outcome = queue.process(u(700));
        assert_eq!(outcome.processed_assets, u(600));
        assert_eq!(outcome.remaining_assets, u(100));
        assert_eq!(queue.processed(), u(1000));
        assert!(queue.processed() <= queue.acc_requested());
    }

    #[test]
    fn requests_execute_in_fifo_snapshot_order() {
        let mut queue = WithdrawQueue::new();
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        let first = queue.enqueue(strategy(), alice, u(300), u(300), now(), false);
        let second = queue.enqueue(strategy(), bob, u(200), u(200), now(), false);

        queue.process(u(300));
        assert!(queue.is_executed(queue.get(&first).unwrap(), false));
        assert!(!queue.is_executed(queue.get(&second).unwrap(), false));

        queue.process(u(200));
        assert!(queue.is_executed(queue.get(&second).unwrap(), false));
    }

    #[test]
    fn idle_covered_portion_earmarked_at_enqueue() {
        let mut queue = WithdrawQueue::new();
        // 500 requested, 200 covered by idle, 300 shortfall.
        queue.enqueue(strategy(), Address::repeat_byte(1), u(500), u(300), now(), false);
        assert_eq!(queue.assets_to_claim(), u(200));
        assert_eq!(queue.acc_requested(), u(300));
    }

    #[test]
    fn claim_is_idempotent_and_gated() {
        let mut queue = WithdrawQueue::new();
        let alice = Address::repeat_byte(1);
        let mallory = Address::repeat_byte(9);
        let key = queue.enqueue(strategy(), alice, u(100), u(100), now(), false);

        // Not executed yet.
        assert!(matches!(
            queue.claim(key, alice, false),
            Err(StrategyError::RequestNotExecuted(_))
        ));

        queue.process(u(100));

        // Wrong claimer.
        assert!(matches!(
            queue.claim(key, mallory, false),
            Err(StrategyError::UnauthorizedClaimer { .. })
        ));

        assert_eq!(queue.claim(key, alice, false).unwrap(), u(100));
        assert!(matches!(
            queue.claim(key, alice, false),
            Err(StrategyError::RequestAlreadyClaimed(_))
        ));
        assert_eq!(queue.assets_to_claim(), U256::ZERO);
    }

    #[test]
    fn unknown_key_rejected() {
        let mut queue = WithdrawQueue::new();
        assert!(matches!(
            queue.claim(B256::repeat_byte(7), Address::repeat_byte(1), false),
            Err(StrategyError::UnknownRequest(_))
        ));
    }

    #[test]
    fn last_request_when_supply_zero_waits_for_full_exit() {
        let mut queue = WithdrawQueue::new();
        let alice = Address::repeat_byte(1);
        let key = queue.enqueue(strategy(), alice, u(100), u(100), now(), true);
        queue.process(u(100));

        // Counter satisfied, but the final exit gates on deutilization.
        assert!(matches!(
            queue.claim(key, alice, false),
            Err(StrategyError::RequestNotExecuted(_))
        ));
        assert_eq!(queue.claim(key, alice, true).unwrap(), u(100));
    }

    #[test]
    fn keys_are_unique_per_counter() {
        let mut queue = WithdrawQueue::new();
        let a = queue.enqueue(strategy(), Address::repeat_byte(1), u(1), u(1), now(), false);
        let b = queue.enqueue(strategy(), Address::repeat_byte(1), u(1), u(1), now(), false);
        assert_ne!(a, b);
        assert_eq!(queue.request_counter(), 2);
    }
}
