//! End-to-end lifecycle tests over the sandbox collaborators.
//!
//! These walk the full deposit -> utilize -> keeper -> withdraw -> claim
//! pipeline with flat prices and zero slippage, where every conversion is
//! exact and conservation can be asserted to the unit.

use alloy_primitives::U256;
use basisvault::math::WAD;
use basisvault::position::PositionManager;
use basisvault::sandbox::{SimRig, SimRigParams};
use basisvault::strategy::{
    ExecutionOutcome, StrategyError, StrategyStatus, UpkeepAction, WithdrawOutcome,
};

fn units(v: u64) -> U256 {
    U256::from(v) * U256::from(1_000_000u64)
}

fn weth(milli: u64) -> U256 {
    U256::from(milli) * U256::from(WAD / 1000)
}

async fn rig() -> SimRig {
    SimRig::build(SimRigParams::default()).await.unwrap()
}

#[tokio::test]
async fn full_lifecycle_conserves_assets() {
    let mut rig = rig().await;
    let user = rig.actors.user;
    let operator = rig.actors.operator;

    // Deposit 12,000 USDC; first deposit mints 1:1.
    let shares = rig.protocol.deposit(units(12_000), user).await.unwrap();
    assert_eq!(shares, units(12_000));

    // Utilize everything pending: 10,000 to spot (5 WETH), 2,000 collateral.
    let pending = rig.protocol.strategy().pending_utilization().await.unwrap();
    assert_eq!(pending, units(10_000));
    let _ = rig
        .protocol
        .strategy_mut()
        .utilize(operator, pending)
        .await
        .unwrap();
    rig.deliver().await.unwrap();
    assert_eq!(rig.protocol.strategy().product_balance(), weth(5_000));
    assert_eq!(rig.protocol.total_assets().await.unwrap(), units(12_000));

    // Withdraw 3,000 worth of shares; idle is empty so it queues.
    let vault = rig.protocol.vault();
    let shares_to_burn = vault
        .read()
        .await
        .preview_withdraw(units(3_000), units(12_000))
        .unwrap();
    let outcome = rig
        .protocol
        .request_withdraw(user, shares_to_burn, user)
        .await
        .unwrap();
    let key = match outcome {
        WithdrawOutcome::Queued { key } => key,
        other => panic!("expected queued withdrawal, got {other:?}"),
    };
    assert_eq!(
        rig.protocol.strategy().acc_requested_withdraw_assets(),
        units(3_000)
    );

    // Deutilize the pending demand: 1.25 WETH of the 5 WETH position.
    let pending = rig.protocol.strategy().pending_deutilization().await.unwrap();
    assert_eq!(pending, weth(1_250));
    let _ = rig
        .protocol
        .strategy_mut()
        .deutilize(operator, pending)
        .await
        .unwrap();
    rig.deliver().await.unwrap();

    // Spot proceeds (2,500) processed; the last 500 is accrued collateral
    // decrease that has not been flushed yet, so the claim must wait.
    assert_eq!(
        rig.protocol.strategy().processed_withdraw_assets(),
        units(2_500)
    );
    assert_eq!(
        rig.protocol.strategy().pending_decrease_collateral(),
        units(500)
    );
    assert!(matches!(
        rig.protocol.claim(user, key).await,
        Err(StrategyError::RequestNotExecuted(_))
    ));

    // The keeper flushes the batched collateral decrease.
    let action = rig.run_keeper_cycle().await.unwrap();
    assert_eq!(
        action,
        Some(UpkeepAction::CollateralFlush {
            amount: units(500)
        })
    );
    assert_eq!(
        rig.protocol.strategy().processed_withdraw_assets(),
        units(3_000)
    );

    // Claim pays out exactly the requested amount.
    let paid = rig.protocol.claim(user, key).await.unwrap();
    assert_eq!(paid, units(3_000));
    assert!(matches!(
        rig.protocol.claim(user, key).await,
        Err(StrategyError::RequestAlreadyClaimed(_))
    ));

    // Conservation: 12,000 in, 3,000 out, 9,000 remains in the system.
    assert_eq!(rig.protocol.total_assets().await.unwrap(), units(9_000));
    assert_eq!(rig.protocol.total_supply().await, units(9_000));
    assert_eq!(rig.protocol.strategy().status(), StrategyStatus::Idle);
    let strategy = rig.protocol.strategy();
    assert!(strategy.processed_withdraw_assets() <= strategy.acc_requested_withdraw_assets());
}

#[tokio::test]
async fn instant_withdraw_when_idle_covers() {
    let mut rig = rig().await;
    let user = rig.actors.user;
    rig.protocol.deposit(units(1_200), user).await.unwrap();

    let outcome = rig
        .protocol
        .request_withdraw(user, units(500), user)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WithdrawOutcome::Paid {
            assets: units(500)
        }
    );
    assert_eq!(rig.protocol.total_assets().await.unwrap(), units(700));
    // No request object is created on the synchronous path.
    assert_eq!(rig.protocol.strategy().acc_requested_withdraw_assets(), U256::ZERO);
}

#[tokio::test]
async fn deposits_service_pending_withdrawals_first() {
    let mut rig = rig().await;
    let user = rig.actors.user;
    let operator = rig.actors.operator;

    rig.protocol.deposit(units(1_200), user).await.unwrap();
    let _ = rig
        .protocol
        .strategy_mut()
        .utilize(operator, units(1_000))
        .await
        .unwrap();
    rig.deliver().await.unwrap();

    // Queue a 600 withdrawal with nothing idle.
    let vault = rig.protocol.vault();
    let shares = vault
        .read()
        .await
        .preview_withdraw(units(600), units(1_200))
        .unwrap();
    let outcome = rig.protocol.request_withdraw(user, shares, user).await.unwrap();
    let key = match outcome {
        WithdrawOutcome::Queued { key } => key,
        other => panic!("expected queued withdrawal, got {other:?}"),
    };

    // A fresh 700 deposit fills the 600 gap first; 100 becomes idle.
    rig.protocol.deposit(units(700), rig.actors.owner).await.unwrap();
    let strategy = rig.protocol.strategy();
    assert_eq!(strategy.processed_withdraw_assets(), units(600));
    assert_eq!(strategy.assets_to_claim(), units(600));
    assert_eq!(strategy.idle_assets().await, units(100));

    let paid = rig.protocol.claim(user, key).await.unwrap();
    assert_eq!(paid, units(600));
}

#[tokio::test]
async fn full_exit_closes_the_hedge_and_waits_for_completion() {
    let mut rig = rig().await;
    let user = rig.actors.user;
    let operator = rig.actors.operator;

    rig.protocol.deposit(units(1_200), user).await.unwrap();
    let _ = rig
        .protocol
        .strategy_mut()
        .utilize(operator, units(1_000))
        .await
        .unwrap();
    rig.deliver().await.unwrap();

    // Redeem every share: the burn leaves supply at zero, marking the
    // request as the final exit.
    let all_shares = rig.protocol.share_balance_of(user).await;
    let outcome = rig
        .protocol
        .request_withdraw(user, all_shares, user)
        .await
        .unwrap();
    let key = match outcome {
        WithdrawOutcome::Queued { key } => key,
        other => panic!("expected queued withdrawal, got {other:?}"),
    };
    assert_eq!(rig.protocol.total_supply().await, U256::ZERO);

    // The pending deutilization covers the whole position.
    let pending = rig.protocol.strategy().pending_deutilization().await.unwrap();
    assert_eq!(pending, weth(500));
    let outcome = rig
        .protocol
        .strategy_mut()
        .deutilize(operator, pending)
        .await
        .unwrap();
    match outcome {
        ExecutionOutcome::Requested(request) => {
            // Full exit: the collateral decrease closes the remaining gap.
            assert!(!request.is_increase);
            assert_eq!(request.collateral_delta_amount, units(1_200));
        }
        other => panic!("expected request, got {other:?}"),
    }

    // Not claimable while the venue response is outstanding.
    assert!(matches!(
        rig.protocol.claim(user, key).await,
        Err(StrategyError::RequestNotExecuted(_))
    ));

    rig.deliver().await.unwrap();
    let paid = rig.protocol.claim(user, key).await.unwrap();
    assert_eq!(paid, units(1_200));

    let strategy = rig.protocol.strategy();
    assert_eq!(strategy.product_balance(), U256::ZERO);
    assert_eq!(
        rig.position_manager.position_size_in_tokens().await.unwrap(),
        U256::ZERO
    );
    assert_eq!(rig.protocol.total_assets().await.unwrap(), U256::ZERO);
}

#[tokio::test]
async fn manual_path_variant_swaps_and_recovers() {
    let params = SimRigParams {
        manual_path: true,
        ..SimRigParams::default()
    };
    let mut rig = SimRig::build(params).await.unwrap();
    let user = rig.actors.user;
    let operator = rig.actors.operator;

    rig.protocol.deposit(units(1_200), user).await.unwrap();

    // A venue rejection on the manual path is still recovered in-band.
    rig.swap.fail_next_swap();
    let outcome = rig
        .protocol
        .strategy_mut()
        .utilize(operator, units(1_000))
        .await
        .unwrap();
    assert_eq!(outcome, ExecutionOutcome::SwapFailed);
    assert_eq!(rig.protocol.strategy().status(), StrategyStatus::Idle);

    let _ = rig
        .protocol
        .strategy_mut()
        .utilize(operator, units(1_000))
        .await
        .unwrap();
    rig.deliver().await.unwrap();
    assert_eq!(rig.protocol.strategy().product_balance(), weth(500));
    assert_eq!(rig.protocol.total_assets().await.unwrap(), units(1_200));
}

#[tokio::test]
async fn slippage_reduces_total_assets_but_never_panics() {
    let params = SimRigParams {
        slippage_bps: 30,
        ..SimRigParams::default()
    };
    let mut rig = SimRig::build(params).await.unwrap();
    let user = rig.actors.user;
    let operator = rig.actors.operator;

    rig.protocol.deposit(units(12_000), user).await.unwrap();
    let pending = rig.protocol.strategy().pending_utilization().await.unwrap();
    let _ = rig
        .protocol
        .strategy_mut()
        .utilize(operator, pending)
        .await
        .unwrap();
    rig.deliver().await.unwrap();

    // 30 bps on the 10,000 spot leg: total assets land just below par.
    let total = rig.protocol.total_assets().await.unwrap();
    assert!(total < units(12_000));
    assert!(total > units(11_900));
}
