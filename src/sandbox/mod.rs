//! Deterministic in-memory collaborators.
//!
//! Everything the engine consumes through an interface — oracle, swap venue,
//! position venue, clock — has a scriptable simulation here, used by the
//! test suite and the CLI simulator. The sims are deliberately simple: flat
//! prices unless moved, exact oracle-rate swaps minus configured slippage,
//! and a position venue that executes requests only when told to, so tests
//! control the asynchronous gap between request and callback.

use crate::config::{StrategyConfig, StrategyConfigBuilder};
use crate::math::{mul_div, Rounding, WAD};
use crate::oracle::{Oracle, OracleError};
use crate::position::{
    AdjustPositionRequest, AdjustPositionResponse, AdjustmentBounds, PositionManager,
    PositionManagerError,
};
use crate::protocol::BasisProtocol;
use crate::strategy::{BasisStrategy, StrategyError, UpkeepAction};
use crate::swap::{AggregatorAdapter, SwapAdapter, SwapError, SwapExecutor, SwapPath};
use crate::types::{Clock, TokenInfo};
use crate::vault::Vault;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

// --- Clock ---

/// Settable clock for deterministic timestamps.
#[derive(Debug)]
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(secs);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// --- Oracle ---

#[derive(Debug, Clone, Copy)]
struct Feed {
    price_wad: U256,
    decimals: u8,
}

/// Two-feed oracle over a static price table.
pub struct SimOracle {
    feeds: Mutex<HashMap<Address, Feed>>,
}

impl SimOracle {
    pub fn new() -> Self {
        Self {
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, token: Address, decimals: u8, price_wad: U256) {
        self.feeds.lock().unwrap().insert(
            token,
            Feed {
                price_wad,
                decimals,
            },
        );
    }

    pub fn set_price(&self, token: Address, price_wad: U256) {
        if let Some(feed) = self.feeds.lock().unwrap().get_mut(&token) {
            feed.price_wad = price_wad;
        }
    }

    fn feed(&self, token: Address) -> Result<Feed, OracleError> {
        let feed = self
            .feeds
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .ok_or(OracleError::PriceFeedNotConfigured(token))?;
        if feed.price_wad.is_zero() {
            return Err(OracleError::InvalidPrice {
                token,
                price: feed.price_wad,
            });
        }
        Ok(feed)
    }

    /// Synchronous conversion core, shared with the swap venue.
    pub fn convert_sync(
        &self,
        token_in: Address,
        token_out: Address,
        amount: U256,
    ) -> Result<U256, OracleError> {
        if amount.is_zero() {
            return Ok(U256::ZERO);
        }
        let feed_in = self.feed(token_in)?;
        let feed_out = self.feed(token_out)?;
        let value = mul_div(amount, feed_in.price_wad, feed_out.price_wad, Rounding::Floor)
            .map_err(|_| OracleError::ConversionOverflow { token_in, amount })?;
        let scale_out = 10u128
            .checked_pow(feed_out.decimals as u32)
            .ok_or(OracleError::ConversionOverflow { token_in, amount })?;
        let scale_in = 10u128
            .checked_pow(feed_in.decimals as u32)
            .ok_or(OracleError::ConversionOverflow { token_in, amount })?;
        mul_div(
            value,
            U256::from(scale_out),
            U256::from(scale_in),
            Rounding::Floor,
        )
        .map_err(|_| OracleError::ConversionOverflow { token_in, amount })
    }
}

impl Default for SimOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Oracle for SimOracle {
    async fn convert_token_amount(
        &self,
        token_in: Address,
        token_out: Address,
        amount: U256,
    ) -> Result<U256, OracleError> {
        self.convert_sync(token_in, token_out, amount)
    }

    async fn get_asset_price(&self, token: Address) -> Result<U256, OracleError> {
        Ok(self.feed(token)?.price_wad)
    }
}

// --- Swap venue ---

/// Swaps at oracle rates minus a configured slippage, with a one-shot
/// failure switch for testing the revert-free recovery path.
pub struct SimSwapVenue {
    oracle: Arc<SimOracle>,
    slippage_bps: AtomicU32,
    fail_next: AtomicBool,
}

impl SimSwapVenue {
    pub fn new(oracle: Arc<SimOracle>, slippage_bps: u32) -> Self {
        Self {
            oracle,
            slippage_bps: AtomicU32::new(slippage_bps),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn set_slippage_bps(&self, bps: u32) {
        self.slippage_bps.store(bps, Ordering::SeqCst);
    }

    /// Make the next swap fail (consumed on use).
    pub fn fail_next_swap(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.fail_next.swap(false, Ordering::SeqCst)
    }

    fn quote(&self, token_in: Address, token_out: Address, amount: U256) -> Result<U256, SwapError> {
        let fair = self
            .oracle
            .convert_sync(token_in, token_out, amount)
            .map_err(|e| SwapError::VenueRejected(e.to_string()))?;
        let bps = self.slippage_bps.load(Ordering::SeqCst);
        mul_div(
            fair,
            U256::from(10_000u64 - bps as u64),
            U256::from(10_000u64),
            Rounding::Floor,
        )
        .map_err(|e| SwapError::VenueRejected(e.to_string()))
    }
}

#[async_trait]
impl SwapAdapter for SimSwapVenue {
    async fn swap(&self, amount_in: U256, path: &SwapPath) -> Result<U256, SwapError> {
        if self.take_failure() {
            return Err(SwapError::VenueRejected("scripted failure".to_string()));
        }
        self.quote(path.token_in(), path.token_out(), amount_in)
    }
}

#[async_trait]
impl AggregatorAdapter for SimSwapVenue {
    async fn swap(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<(U256, bool), SwapError> {
        if self.take_failure() {
            return Ok((U256::ZERO, false));
        }
        Ok((self.quote(token_in, token_out, amount_in)?, true))
    }
}

// --- Position venue ---

#[derive(Debug)]
struct PmState {
    collateral: U256,
    size_in_tokens: U256,
    entry_notional: U256,
    pending: Option<AdjustPositionRequest>,
    fill_factor_bps: u64,
    need_keep: bool,
    decrease_size_bounds: AdjustmentBounds,
    increase_collateral_bounds: AdjustmentBounds,
    decrease_collateral_bounds: AdjustmentBounds,
}

/// Scriptable short-position venue. Requests sit pending until
/// [`SimPositionManager::execute_pending`] is called, modeling the
/// asynchronous gap between `adjust_position` and the strategy callback.
pub struct SimPositionManager {
    oracle: Arc<SimOracle>,
    asset: Address,
    product: Address,
    state: Mutex<PmState>,
}

impl SimPositionManager {
    pub fn new(oracle: Arc<SimOracle>, asset: Address, product: Address) -> Self {
        let wide = AdjustmentBounds {
            min: U256::ZERO,
            max: U256::from(1_000_000_000_000_000_000_000_000_000_000u128),
        };
        Self {
            oracle,
            asset,
            product,
            state: Mutex::new(PmState {
                collateral: U256::ZERO,
                size_in_tokens: U256::ZERO,
                entry_notional: U256::ZERO,
                pending: None,
                fill_factor_bps: 10_000,
                need_keep: false,
                decrease_size_bounds: wide,
                increase_collateral_bounds: wide,
                decrease_collateral_bounds: wide,
            }),
        }
    }

    /// Fraction of a requested size increase the venue fills, in bps.
    pub fn set_fill_factor_bps(&self, bps: u64) {
        self.state.lock().unwrap().fill_factor_bps = bps;
    }

    pub fn set_need_keep(&self, value: bool) {
        self.state.lock().unwrap().need_keep = value;
    }

    pub fn set_decrease_size_bounds(&self, bounds: AdjustmentBounds) {
        self.state.lock().unwrap().decrease_size_bounds = bounds;
    }

    /// Force the venue into a given position; `entry_notional` is the asset
    /// value the current size was opened at (equal to the current notional
    /// for a zero-PnL position).
    pub fn set_position(&self, collateral: U256, size_in_tokens: U256, entry_notional: U256) {
        let mut state = self.state.lock().unwrap();
        state.collateral = collateral;
        state.size_in_tokens = size_in_tokens;
        state.entry_notional = entry_notional;
    }

    pub fn collateral(&self) -> U256 {
        self.state.lock().unwrap().collateral
    }

    pub fn size_in_tokens_sync(&self) -> U256 {
        self.state.lock().unwrap().size_in_tokens
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().unwrap().pending.is_some()
    }

    fn current_notional(&self, size: U256) -> U256 {
        if size.is_zero() {
            return U256::ZERO;
        }
        self.oracle
            .convert_sync(self.product, self.asset, size)
            .unwrap_or(U256::ZERO)
    }

    fn net_balance_inner(&self, state: &PmState) -> U256 {
        let current = self.current_notional(state.size_in_tokens);
        // Short PnL: profit when the product fell below entry.
        if state.entry_notional >= current {
            state.collateral + (state.entry_notional - current)
        } else {
            let loss = current - state.entry_notional;
            state.collateral.saturating_sub(loss)
        }
    }

    /// Execute the pending request against the venue state and return the
    /// response the venue would deliver to the strategy callback.
    pub fn execute_pending(&self) -> Option<AdjustPositionResponse> {
        let mut state = self.state.lock().unwrap();
        let request = state.pending.take()?;
        if request.is_increase {
            let filled_size = request.size_delta_in_tokens * U256::from(state.fill_factor_bps)
                / U256::from(10_000u64);
            let notional_added = self.current_notional(filled_size);
            state.size_in_tokens += filled_size;
            state.entry_notional += notional_added;
            state.collateral += request.collateral_delta_amount;
            Some(AdjustPositionResponse {
                size_delta_in_tokens: filled_size,
                collateral_delta_amount: request.collateral_delta_amount,
                is_increase: true,
            })
        } else {
            let filled_size = request.size_delta_in_tokens.min(state.size_in_tokens);
            let mut returned = U256::ZERO;
            if !filled_size.is_zero() && !state.size_in_tokens.is_zero() {
                let released_entry = mul_div(
                    state.entry_notional,
                    filled_size,
                    state.size_in_tokens,
                    Rounding::Floor,
                )
                .unwrap_or(U256::ZERO);
                let closed_value = self.current_notional(filled_size);
                state.size_in_tokens -= filled_size;
                state.entry_notional = state.entry_notional.saturating_sub(released_entry);
                // Realized short PnL settles against collateral.
                if released_entry >= closed_value {
                    returned += released_entry - closed_value;
                } else {
                    let loss = closed_value - released_entry;
                    state.collateral = state.collateral.saturating_sub(loss);
                }
            }
            let collateral_out = request.collateral_delta_amount.min(state.collateral);
            state.collateral -= collateral_out;
            returned += collateral_out;
            Some(AdjustPositionResponse {
                size_delta_in_tokens: filled_size,
                collateral_delta_amount: returned,
                is_increase: false,
            })
        }
    }
}

#[async_trait]
impl PositionManager for SimPositionManager {
    async fn adjust_position(
        &self,
        request: AdjustPositionRequest,
    ) -> Result<(), PositionManagerError> {
        let mut state = self.state.lock().unwrap();
        if state.pending.is_some() {
            return Err(PositionManagerError::AlreadyPending);
        }
        state.pending = Some(request);
        Ok(())
    }

    async fn position_net_balance(&self) -> Result<U256, PositionManagerError> {
        let state = self.state.lock().unwrap();
        Ok(self.net_balance_inner(&state))
    }

    async fn current_leverage(&self) -> Result<U256, PositionManagerError> {
        let state = self.state.lock().unwrap();
        let net = self.net_balance_inner(&state);
        let notional = self.current_notional(state.size_in_tokens);
        if net.is_zero() || notional.is_zero() {
            return Ok(U256::ZERO);
        }
        Ok(mul_div(notional, U256::from(WAD), net, Rounding::Floor)
            .unwrap_or(U256::ZERO))
    }

    async fn position_size_in_tokens(&self) -> Result<U256, PositionManagerError> {
        Ok(self.state.lock().unwrap().size_in_tokens)
    }

    async fn increase_size_min_max(&self) -> Result<AdjustmentBounds, PositionManagerError> {
        Ok(AdjustmentBounds {
            min: U256::ZERO,
            max: U256::from(1_000_000_000_000_000_000_000_000_000_000u128),
        })
    }

    async fn decrease_size_min_max(&self) -> Result<AdjustmentBounds, PositionManagerError> {
        Ok(self.state.lock().unwrap().decrease_size_bounds)
    }

    async fn increase_collateral_min_max(&self) -> Result<AdjustmentBounds, PositionManagerError> {
        Ok(self.state.lock().unwrap().increase_collateral_bounds)
    }

    async fn decrease_collateral_min_max(&self) -> Result<AdjustmentBounds, PositionManagerError> {
        Ok(self.state.lock().unwrap().decrease_collateral_bounds)
    }

    async fn limit_decrease_collateral(&self) -> Result<U256, PositionManagerError> {
        Ok(self.state.lock().unwrap().collateral)
    }

    async fn need_keep(&self) -> Result<bool, PositionManagerError> {
        Ok(self.state.lock().unwrap().need_keep)
    }

    async fn keep(&self) -> Result<(), PositionManagerError> {
        self.state.lock().unwrap().need_keep = false;
        Ok(())
    }
}

// --- Full rig ---

/// The cast of the simulation.
#[derive(Debug, Clone, Copy)]
pub struct Actors {
    pub operator: Address,
    pub forwarder: Address,
    pub owner: Address,
    pub vault: Address,
    pub position_manager: Address,
    pub strategy: Address,
    pub user: Address,
}

impl Default for Actors {
    fn default() -> Self {
        Self {
            operator: Address::repeat_byte(0x0A),
            forwarder: Address::repeat_byte(0x0B),
            owner: Address::repeat_byte(0x0C),
            vault: Address::repeat_byte(0x0D),
            position_manager: Address::repeat_byte(0x0E),
            strategy: Address::repeat_byte(0x0F),
            user: Address::repeat_byte(0x11),
        }
    }
}

/// Parameters for assembling a full simulated deployment.
#[derive(Debug, Clone)]
pub struct SimRigParams {
    pub asset: TokenInfo,
    pub product: TokenInfo,
    pub asset_price_wad: U256,
    pub product_price_wad: U256,
    pub min_leverage: U256,
    pub target_leverage: U256,
    pub max_leverage: U256,
    pub safe_margin_leverage: U256,
    pub rebalance_threshold: U256,
    pub hedge_deviation_threshold: U256,
    pub response_deviation_threshold: U256,
    pub min_decrease_collateral: U256,
    pub slippage_bps: u32,
    /// Use the manual-path swap adapter instead of the aggregator.
    pub manual_path: bool,
}

impl Default for SimRigParams {
    fn default() -> Self {
        Self {
            asset: TokenInfo::new(Address::repeat_byte(0xA1), 6, "USDC"),
            product: TokenInfo::new(Address::repeat_byte(0xB1), 18, "WETH"),
            asset_price_wad: U256::from(WAD),
            product_price_wad: U256::from(2_000u128 * WAD),
            min_leverage: U256::from(2 * WAD),
            target_leverage: U256::from(5 * WAD),
            max_leverage: U256::from(8 * WAD),
            safe_margin_leverage: U256::from(12 * WAD),
            rebalance_threshold: U256::from(WAD / 20),
            hedge_deviation_threshold: U256::from(WAD / 50),
            response_deviation_threshold: U256::from(WAD / 50),
            min_decrease_collateral: U256::from(50_000_000u64),
            slippage_bps: 0,
            manual_path: false,
        }
    }
}

/// A fully wired simulated deployment: protocol front, strategy, and all
/// scriptable collaborators.
pub struct SimRig {
    pub protocol: BasisProtocol,
    pub oracle: Arc<SimOracle>,
    pub swap: Arc<SimSwapVenue>,
    pub position_manager: Arc<SimPositionManager>,
    pub clock: Arc<MockClock>,
    pub actors: Actors,
}

impl SimRig {
    pub async fn build(params: SimRigParams) -> Result<Self, StrategyError> {
        let actors = Actors::default();
        let oracle = Arc::new(SimOracle::new());
        oracle.register(params.asset.address, params.asset.decimals, params.asset_price_wad);
        oracle.register(
            params.product.address,
            params.product.decimals,
            params.product_price_wad,
        );

        let swap = Arc::new(SimSwapVenue::new(oracle.clone(), params.slippage_bps));
        let swapper = if params.manual_path {
            let pool = Address::repeat_byte(0xC1);
            SwapExecutor::Manual {
                adapter: swap.clone(),
                asset_to_product: SwapPath::new(
                    vec![params.asset.address, pool, params.product.address],
                    params.asset.address,
                    params.product.address,
                )?,
                product_to_asset: SwapPath::new(
                    vec![params.product.address, pool, params.asset.address],
                    params.product.address,
                    params.asset.address,
                )?,
            }
        } else {
            SwapExecutor::Aggregator {
                adapter: swap.clone(),
                asset: params.asset.address,
                product: params.product.address,
            }
        };

        let position_manager = Arc::new(SimPositionManager::new(
            oracle.clone(),
            params.asset.address,
            params.product.address,
        ));
        let clock = Arc::new(MockClock::new(DateTime::<Utc>::UNIX_EPOCH));

        let config: StrategyConfig = StrategyConfigBuilder::new()
            .strategy(actors.strategy)
            .operator(actors.operator)
            .forwarder(actors.forwarder)
            .owner(actors.owner)
            .vault(actors.vault)
            .position_manager(actors.position_manager)
            .asset(params.asset.clone())
            .product(params.product.clone())
            .leverage(
                params.min_leverage,
                params.target_leverage,
                params.max_leverage,
                params.safe_margin_leverage,
            )
            .rebalance_threshold(params.rebalance_threshold)
            .hedge_deviation_threshold(params.hedge_deviation_threshold)
            .response_deviation_threshold(params.response_deviation_threshold)
            .min_decrease_collateral(params.min_decrease_collateral)
            .build()?;

        let vault = Arc::new(RwLock::new(Vault::new(params.asset)));
        let strategy = BasisStrategy::initialize(
            config,
            vault.clone(),
            oracle.clone(),
            swapper,
            position_manager.clone(),
            clock.clone(),
        )
        .await?;

        Ok(Self {
            protocol: BasisProtocol::new(vault, strategy),
            oracle,
            swap,
            position_manager,
            clock,
            actors,
        })
    }

    /// Execute the venue's pending request and deliver the callback.
    /// Returns whether a callback was delivered.
    pub async fn deliver(&mut self) -> Result<bool, StrategyError> {
        match self.position_manager.execute_pending() {
            Some(response) => {
                self.protocol
                    .strategy_mut()
                    .after_adjust_position(self.actors.position_manager, response)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// One full keeper cycle: perform upkeep, then deliver any resulting
    /// venue response.
    pub async fn run_keeper_cycle(&mut self) -> Result<Option<UpkeepAction>, StrategyError> {
        let action = self
            .protocol
            .strategy_mut()
            .perform_upkeep(self.actors.forwarder)
            .await?;
        self.deliver().await?;
        Ok(action)
    }
}
