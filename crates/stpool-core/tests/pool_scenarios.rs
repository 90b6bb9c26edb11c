//! End-to-end accounting scenarios: submission, delegation, reward
//! splits, delayed withdrawals, and slashing-aware settlement.

use std::sync::Arc;
use stpool_chain::{ManualEpoch, SimChain, ValidatorAccount};
use stpool_common::{Address, Error, OperatorId, PoolConfig, RegistryConfig, ValidatorId};
use stpool_core::StakePool;
use stpool_registry::NodeOperatorRegistry;

const DELAY: u64 = 10;

fn admin() -> Address {
    Address::from_low_u64(1)
}

fn insurance() -> Address {
    Address::from_low_u64(2)
}

fn dao() -> Address {
    Address::from_low_u64(3)
}

fn depositor(n: u64) -> Address {
    Address::from_low_u64(1_000 + n)
}

fn op_owner(n: u64) -> Address {
    Address::from_low_u64(2_000 + n)
}

fn op_reward(n: u64) -> Address {
    Address::from_low_u64(3_000 + n)
}

struct Harness {
    chain: Arc<SimChain>,
    epoch: Arc<ManualEpoch>,
    registry: Arc<NodeOperatorRegistry>,
    pool: Arc<StakePool>,
}

fn pool_config() -> PoolConfig {
    PoolConfig {
        insurance_address: insurance(),
        dao_address: dao(),
        withdrawal_delay_epochs: DELAY,
        protocol_fee_bps: 1_000,
        insurance_fee_bps: 5_000,
        pool_retention_bps: 0,
        ..PoolConfig::default()
    }
}

fn harness_with(pool_cfg: PoolConfig, max_delegation: u64) -> Harness {
    let chain = Arc::new(SimChain::new());
    let epoch = Arc::new(ManualEpoch::new(0));
    let registry = Arc::new(NodeOperatorRegistry::new(
        admin(),
        RegistryConfig {
            default_commission_bps: 500,
            default_max_delegation: max_delegation,
        },
        chain.clone(),
    ));
    let pool = Arc::new(StakePool::new(
        admin(),
        Address::from_low_u64(999),
        pool_cfg,
        registry.clone(),
        chain.clone(),
        epoch.clone(),
    ));
    Harness {
        chain,
        epoch,
        registry,
        pool,
    }
}

fn harness() -> Harness {
    harness_with(pool_config(), u64::MAX)
}

async fn staked_operator(h: &Harness, n: u64) -> (OperatorId, ValidatorId) {
    let id = h
        .registry
        .add_operator(admin(), &format!("op-{n}"), op_reward(n), op_owner(n), "0xpub")
        .await
        .unwrap();
    h.registry.stake(op_owner(n), 1_000, 10).await.unwrap();
    let validator = h.registry.operator(id).await.unwrap().validator;
    (id, validator)
}

#[tokio::test]
async fn submit_delegate_reward_withdraw_roundtrip() {
    let h = harness();
    let (_, validator) = staked_operator(&h, 1).await;

    // 100k submitted against an empty pool mints 1:1.
    let shares = h.pool.submit(depositor(1), 100_000).await.unwrap();
    assert_eq!(shares, 100_000);
    assert_eq!(h.pool.total_buffered().await, 100_000);
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 100_000);

    let delegated = h.pool.delegate(depositor(1)).await.unwrap();
    assert_eq!(delegated, 100_000);
    assert_eq!(h.pool.total_buffered().await, 0);
    let account = h.chain.sim_account(validator).await.unwrap();
    assert_eq!(account.delegated_balance().await.unwrap(), 100_000);

    // 10k reward, 10% protocol fee split evenly between insurance and
    // the DAO, the rest to the single operator's reward address.
    account.add_reward(10_000).await;
    let distributed = h.pool.distribute_rewards(admin()).await.unwrap();
    assert_eq!(distributed, 10_000);
    assert_eq!(h.pool.payout_of(insurance()).await, 500);
    assert_eq!(h.pool.payout_of(dao()).await, 500);
    assert_eq!(h.pool.payout_of(op_reward(1)).await, 9_000);
    assert_eq!(h.pool.total_buffered().await, 0);
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 100_000);

    // Withdrawal of 30k burns 30k shares and issues one
    // validator-backed ticket; pending value still counts as pooled.
    let tickets = h.pool.request_withdraw(depositor(1), 30_000).await.unwrap();
    assert_eq!(tickets.len(), 1);
    assert_eq!(h.pool.total_shares().await, 70_000);
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 100_000);
    assert_eq!(h.pool.ticket_value(tickets[0]).await.unwrap(), 30_000);

    let err = h.pool.claim_tokens(depositor(1), tickets[0]).await.unwrap_err();
    assert!(matches!(err, Error::ClaimDelayNotReached { .. }));

    h.epoch.advance(DELAY);
    let paid = h.pool.claim_tokens(depositor(1), tickets[0]).await.unwrap();
    assert_eq!(paid, 30_000);
    assert_eq!(h.pool.payout_of(depositor(1)).await, 30_000);
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 70_000);
}

#[tokio::test]
async fn slashed_validator_reduces_full_withdrawal() {
    let h = harness_with(pool_config(), 100_000);
    let (_, v1) = staked_operator(&h, 1).await;
    let (_, v2) = staked_operator(&h, 2).await;

    h.pool.submit(depositor(1), 200_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();
    let a1 = h.chain.sim_account(v1).await.unwrap();
    let a2 = h.chain.sim_account(v2).await.unwrap();
    assert_eq!(a1.delegated_balance().await.unwrap(), 100_000);
    assert_eq!(a2.delegated_balance().await.unwrap(), 100_000);

    // Half of the first validator's delegation is slashed away.
    a1.slash(50_000).await.unwrap();
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 150_000);

    // A full withdrawal drains both validators and pays the post-slash
    // total, not the pre-slash one.
    let tickets = h
        .pool
        .request_withdraw(depositor(1), 150_000)
        .await
        .unwrap();
    assert_eq!(tickets.len(), 2);
    assert_eq!(h.pool.total_shares().await, 0);

    h.epoch.advance(DELAY);
    let mut paid = 0;
    for ticket in tickets {
        paid += h.pool.claim_tokens(depositor(1), ticket).await.unwrap();
    }
    assert_eq!(paid, 150_000);
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 0);
}

#[tokio::test]
async fn conservation_over_mixed_backing_roundtrip() {
    let h = harness_with(pool_config(), 100_000);
    staked_operator(&h, 1).await;
    staked_operator(&h, 2).await;

    h.pool.submit(depositor(1), 120_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();
    h.pool.submit(depositor(1), 30_000).await.unwrap();
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 150_000);

    // Buffer (30k) cannot cover 50k: the request becomes one
    // validator-backed slice; pending value keeps the total intact.
    let tickets = h.pool.request_withdraw(depositor(1), 50_000).await.unwrap();
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 150_000);

    h.epoch.advance(DELAY);
    let mut claimed = 0;
    for ticket in tickets {
        claimed += h.pool.claim_tokens(depositor(1), ticket).await.unwrap();
    }
    assert_eq!(claimed, 50_000);

    // submitted - claimed == pooled, to the unit.
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 100_000);
    assert_eq!(h.pool.payout_of(depositor(1)).await, 50_000);
}

#[tokio::test]
async fn exchange_rate_non_decreasing_across_reward_rounds() {
    let mut config = pool_config();
    config.pool_retention_bps = 3_000;
    let h = harness_with(config, u64::MAX);
    let (_, validator) = staked_operator(&h, 1).await;

    h.pool.submit(depositor(1), 100_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();
    let account = h.chain.sim_account(validator).await.unwrap();

    let mut previous_rate = h.pool.amount_for_shares(10_000).await.unwrap();
    for _ in 0..5 {
        account.add_reward(7_777).await;
        h.pool.distribute_rewards(admin()).await.unwrap();
        let rate = h.pool.amount_for_shares(10_000).await.unwrap();
        assert!(rate >= previous_rate, "rate regressed: {rate} < {previous_rate}");
        previous_rate = rate;
    }
    assert!(previous_rate > 10_000);
}

#[tokio::test]
async fn slash_ordering_is_settlement_equivalent() {
    // Baseline: no slash, full withdrawal pays the full value.
    let h = harness();
    staked_operator(&h, 1).await;
    h.pool.submit(depositor(1), 100_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();
    let tickets = h
        .pool
        .request_withdraw(depositor(1), 100_000)
        .await
        .unwrap();
    h.epoch.advance(DELAY);
    let baseline = h.pool.claim_tokens(depositor(1), tickets[0]).await.unwrap();
    assert_eq!(baseline, 100_000);

    // Slash before the request: holdings are already devalued.
    let h = harness();
    let (_, v) = staked_operator(&h, 1).await;
    h.pool.submit(depositor(1), 100_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();
    h.chain
        .sim_account(v)
        .await
        .unwrap()
        .slash(50_000)
        .await
        .unwrap();
    let value = h.pool.amount_for_shares(100_000).await.unwrap();
    assert_eq!(value, 50_000);
    let tickets = h.pool.request_withdraw(depositor(1), value).await.unwrap();
    h.epoch.advance(DELAY);
    let slash_before = h.pool.claim_tokens(depositor(1), tickets[0]).await.unwrap();

    // Slash between request and claim: the pending ticket devalues.
    let h = harness();
    let (_, v) = staked_operator(&h, 1).await;
    h.pool.submit(depositor(1), 100_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();
    let tickets = h
        .pool
        .request_withdraw(depositor(1), 100_000)
        .await
        .unwrap();
    h.chain
        .sim_account(v)
        .await
        .unwrap()
        .slash(50_000)
        .await
        .unwrap();
    assert_eq!(h.pool.ticket_value(tickets[0]).await.unwrap(), 50_000);
    h.epoch.advance(DELAY);
    let slash_after = h.pool.claim_tokens(depositor(1), tickets[0]).await.unwrap();

    assert_eq!(slash_before, 50_000);
    assert_eq!(slash_after, 50_000);
    assert!(slash_before <= baseline && slash_after <= baseline);
}

#[tokio::test]
async fn forced_exit_becomes_pool_held_ticket() {
    let h = harness_with(pool_config(), 100_000);
    let (op1, v1) = staked_operator(&h, 1).await;
    let (_, v2) = staked_operator(&h, 2).await;

    h.pool.submit(depositor(1), 150_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();
    assert_eq!(
        h.chain
            .sim_account(v1)
            .await
            .unwrap()
            .delegated_balance()
            .await
            .unwrap(),
        100_000
    );
    assert_eq!(
        h.chain
            .sim_account(v2)
            .await
            .unwrap()
            .delegated_balance()
            .await
            .unwrap(),
        50_000
    );

    let ticket = h.pool.remove_operator(admin(), op1).await.unwrap().unwrap();
    assert_eq!(h.pool.tickets_of(h.pool.pool_address()).await, vec![ticket]);
    // The ejected operator's delegation is pending, still pooled value.
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 150_000);

    // The pool-held ticket is not claimable through the user path.
    let err = h.pool.claim_tokens(depositor(1), ticket).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));

    let err = h
        .pool
        .claim_tokens_to_pool(depositor(1), ticket)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClaimDelayNotReached { .. }));

    h.epoch.advance(DELAY);
    let recovered = h
        .pool
        .claim_tokens_to_pool(depositor(1), ticket)
        .await
        .unwrap();
    assert_eq!(recovered, 100_000);
    assert_eq!(h.pool.total_buffered().await, 100_000);
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 150_000);
    assert_eq!(h.registry.stats().await.exit, 1);
}

#[tokio::test]
async fn reward_round_respects_bounds() {
    let mut config = pool_config();
    config.reward_distribution_lower_bound = 100;
    config.min_reward_distribution = 2_000;
    let h = harness_with(config, u64::MAX);
    let (_, v1) = staked_operator(&h, 1).await;
    let (_, v2) = staked_operator(&h, 2).await;

    h.pool.submit(depositor(1), 100_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();

    // Nothing accrued anywhere: a no-op round, not an error.
    assert_eq!(h.pool.distribute_rewards(admin()).await.unwrap(), 0);

    // Only 1k eligible, floor is 2k.
    let a1 = h.chain.sim_account(v1).await.unwrap();
    a1.add_reward(1_000).await;
    let err = h.pool.distribute_rewards(admin()).await.unwrap_err();
    assert!(matches!(err, Error::BelowMinimumDistribution { .. }));
    // Atomic failure: the accrual is still with the validator.
    assert_eq!(a1.accrued_reward().await.unwrap(), 1_000);

    // The second operator's 50 stays below the per-operator bound and
    // is simply excluded from the round.
    let a2 = h.chain.sim_account(v2).await.unwrap();
    a2.add_reward(50).await;
    a1.add_reward(4_000).await;
    let distributed = h.pool.distribute_rewards(admin()).await.unwrap();
    assert_eq!(distributed, 5_000);
    assert_eq!(a2.accrued_reward().await.unwrap(), 50);
    assert_eq!(h.pool.payout_of(op_reward(1)).await, 4_500);
    assert_eq!(h.pool.payout_of(op_reward(2)).await, 0);
}

#[tokio::test]
async fn withdraw_request_validation() {
    let h = harness();
    staked_operator(&h, 1).await;
    h.pool.submit(depositor(1), 100_000).await.unwrap();
    h.pool.delegate(admin()).await.unwrap();

    assert!(matches!(
        h.pool.request_withdraw(depositor(1), 0).await.unwrap_err(),
        Error::ZeroAmount
    ));
    assert!(matches!(
        h.pool
            .request_withdraw(depositor(1), 100_001)
            .await
            .unwrap_err(),
        Error::TooMuchToWithdraw { .. }
    ));
    // A depositor without shares cannot burn against the pool.
    assert!(matches!(
        h.pool
            .request_withdraw(depositor(2), 10_000)
            .await
            .unwrap_err(),
        Error::InsufficientAmount(_)
    ));
}

#[tokio::test]
async fn approved_spender_claims_for_owner() {
    let h = harness();
    staked_operator(&h, 1).await;
    h.pool.submit(depositor(1), 50_000).await.unwrap();

    // Buffer-backed request: the buffer is reserved immediately.
    let tickets = h.pool.request_withdraw(depositor(1), 20_000).await.unwrap();
    assert_eq!(h.pool.total_buffered().await, 30_000);
    assert_eq!(h.pool.reserved_for_claims().await, 20_000);
    assert_eq!(h.pool.total_pooled_stake().await.unwrap(), 30_000);

    let friend = depositor(9);
    let err = h.pool.claim_tokens(friend, tickets[0]).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));

    h.pool
        .approve_ticket(depositor(1), friend, tickets[0])
        .await
        .unwrap();
    h.epoch.advance(DELAY);
    let paid = h.pool.claim_tokens(friend, tickets[0]).await.unwrap();
    assert_eq!(paid, 20_000);
    // Payment goes to the ticket owner, not the approved spender.
    assert_eq!(h.pool.payout_of(depositor(1)).await, 20_000);
    assert_eq!(h.pool.payout_of(friend).await, 0);
    assert_eq!(h.pool.reserved_for_claims().await, 0);
}

#[tokio::test]
async fn transferred_ticket_follows_its_new_owner() {
    let h = harness();
    staked_operator(&h, 1).await;
    h.pool.submit(depositor(1), 50_000).await.unwrap();
    let tickets = h.pool.request_withdraw(depositor(1), 10_000).await.unwrap();

    h.pool
        .transfer_ticket(depositor(1), depositor(2), tickets[0])
        .await
        .unwrap();
    h.epoch.advance(DELAY);
    // The former owner lost claim rights with the transfer.
    assert!(h.pool.claim_tokens(depositor(1), tickets[0]).await.is_err());
    let paid = h.pool.claim_tokens(depositor(2), tickets[0]).await.unwrap();
    assert_eq!(paid, 10_000);
    assert_eq!(h.pool.payout_of(depositor(2)).await, 10_000);
}
