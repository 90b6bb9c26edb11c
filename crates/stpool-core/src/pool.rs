//! The stake pool accounting engine.
//!
//! Owns the receipt-token supply, the undelegated buffer, and the
//! withdrawal ticket ledger; orchestrates delegation, reward
//! distribution, and slashing-aware withdrawal settlement across the
//! operator registry and the external validator accounts.
//!
//! Delegated balances are never cached locally: every valuation re-reads
//! them from the validator accounts, so slashing is always reflected at
//! the moment of the read.

use std::collections::HashMap;
use std::sync::Arc;
use stpool_chain::{EpochOracle, ValidatorAccount, ValidatorHub};
use stpool_common::{
    apply_bps, mul_div, Address, Error, OperatorId, PoolConfig, ReentrancyGuard, Result, TicketId,
    ValidatorId, BASIS_POINTS,
};
use stpool_registry::{ForcedExit, NodeOperatorRegistry};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::ticket::{TicketBacking, WithdrawalTicket, WithdrawalTicketLedger};

struct PoolState {
    params: PoolConfig,
    paused: bool,
    total_shares: u64,
    balances: HashMap<Address, u64>,
    total_buffered: u64,
    /// Buffer value backing pending buffer tickets; excluded from the
    /// pooled total until claimed.
    reserved_for_claims: u64,
    /// Cumulative amounts released out of the pool, per address.
    payouts: HashMap<Address, u64>,
    ledger: WithdrawalTicketLedger,
}

impl PoolState {
    fn ensure_live(&self) -> Result<()> {
        if self.paused {
            return Err(Error::Paused);
        }
        Ok(())
    }

    fn shares_from_amount(&self, amount: u64, pooled: u64) -> u64 {
        if self.total_shares == 0 {
            amount
        } else {
            mul_div(amount, self.total_shares, pooled)
        }
    }

    fn credit(&mut self, addr: Address, amount: u64) {
        if amount > 0 {
            *self.payouts.entry(addr).or_default() += amount;
        }
    }
}

pub struct StakePool {
    admin: Address,
    /// Owner identity for tickets the pool holds on its own behalf.
    self_address: Address,
    registry: Arc<NodeOperatorRegistry>,
    hub: Arc<dyn ValidatorHub>,
    epoch: Arc<dyn EpochOracle>,
    guard: ReentrancyGuard,
    state: RwLock<PoolState>,
}

impl StakePool {
    pub fn new(
        admin: Address,
        self_address: Address,
        config: PoolConfig,
        registry: Arc<NodeOperatorRegistry>,
        hub: Arc<dyn ValidatorHub>,
        epoch: Arc<dyn EpochOracle>,
    ) -> Self {
        Self {
            admin,
            self_address,
            registry,
            hub,
            epoch,
            guard: ReentrancyGuard::new(),
            state: RwLock::new(PoolState {
                params: config,
                paused: false,
                total_shares: 0,
                balances: HashMap::new(),
                total_buffered: 0,
                reserved_for_claims: 0,
                payouts: HashMap::new(),
                ledger: WithdrawalTicketLedger::new(),
            }),
        }
    }

    fn ensure_admin(&self, caller: Address) -> Result<()> {
        if caller != self.admin {
            return Err(Error::PermissionDenied(format!(
                "{caller} lacks the pool admin capability"
            )));
        }
        Ok(())
    }

    async fn account(&self, validator: ValidatorId) -> Result<Arc<dyn ValidatorAccount>> {
        self.hub
            .account(validator)
            .await
            .ok_or_else(|| Error::Validator(format!("validator account {validator} not found")))
    }

    /// Buffer + re-read delegated balances + outstanding validator-backed
    /// ticket value. Reserved buffer slices are already excluded.
    async fn pooled_value_locked(&self, state: &PoolState) -> Result<u64> {
        let mut total = state.total_buffered;
        for target in self.registry.settlement_targets().await {
            let account = self.account(target.validator).await?;
            total += account.delegated_balance().await?;
        }
        for ticket in state.ledger.iter() {
            if let TicketBacking::Validator {
                validator, nonce, ..
            } = ticket.backing
            {
                let account = self.account(validator).await?;
                total += account.unbond_value(nonce).await?;
            }
        }
        Ok(total)
    }

    /// Deposits `amount` into the pool, minting receipt shares at the
    /// current exchange rate. Returns the minted shares.
    pub async fn submit(&self, caller: Address, amount: u64) -> Result<u64> {
        let _token = self.guard.enter("submit")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        let pooled = self.pooled_value_locked(&state).await?;
        if state.params.submit_threshold_enabled
            && pooled + amount > state.params.submit_threshold
        {
            return Err(Error::ThresholdReached {
                cap: state.params.submit_threshold,
                requested: amount,
            });
        }
        let shares = state.shares_from_amount(amount, pooled);
        *state.balances.entry(caller).or_default() += shares;
        state.total_shares += shares;
        state.total_buffered += amount;
        info!(%caller, amount, shares, "stake submitted");
        Ok(shares)
    }

    /// Receipt-token transfer between holders.
    pub async fn transfer_shares(&self, caller: Address, to: Address, shares: u64) -> Result<()> {
        let _token = self.guard.enter("transfer_shares")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;
        let balance = state.balances.get(&caller).copied().unwrap_or(0);
        if balance < shares {
            return Err(Error::InsufficientAmount(format!(
                "share balance {balance} below transfer of {shares}"
            )));
        }
        *state.balances.entry(caller).or_default() -= shares;
        *state.balances.entry(to).or_default() += shares;
        Ok(())
    }

    /// Pushes the buffer out to eligible Staked operators, least-funded
    /// first, respecting per-operator delegation ceilings. Returns the
    /// delegated amount; undistributable remainder stays buffered.
    pub async fn delegate(&self, caller: Address) -> Result<u64> {
        let _token = self.guard.enter("delegate")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;
        if state.total_buffered == 0 || state.total_buffered < state.params.delegation_lower_bound
        {
            return Ok(0);
        }

        let mut eligible = Vec::new();
        for target in self.registry.delegation_targets().await {
            let account = self.account(target.validator).await?;
            if !account.accepts_delegation().await? {
                debug!(operator = target.operator_id, "not accepting delegation");
                continue;
            }
            let balance = account.delegated_balance().await?;
            if balance < target.max_delegation {
                eligible.push((target, account, balance));
            }
        }
        if eligible.is_empty() {
            debug!("no eligible operator, buffer stays");
            return Ok(0);
        }
        eligible.sort_by(|a, b| a.2.cmp(&b.2).then(a.0.operator_id.cmp(&b.0.operator_id)));

        let mut remaining = state.total_buffered;
        for (target, account, balance) in eligible {
            if remaining == 0 {
                break;
            }
            let headroom = target.max_delegation - balance;
            let portion = remaining.min(headroom);
            if portion == 0 {
                continue;
            }
            account.delegate(portion).await?;
            remaining -= portion;
            debug!(operator = target.operator_id, portion, "delegated");
        }
        let delegated = state.total_buffered - remaining;
        state.total_buffered = remaining;
        info!(%caller, delegated, buffered = remaining, "delegation round complete");
        Ok(delegated)
    }

    /// Collects accrued rewards from every Staked/Unstaked operator above
    /// the per-operator lower bound, splits the protocol fee between
    /// insurance and the DAO treasury, re-buffers the pool's retained
    /// cut, and pays the remainder evenly to the contributing operators'
    /// reward addresses. Returns the distributed total.
    pub async fn distribute_rewards(&self, caller: Address) -> Result<u64> {
        let _token = self.guard.enter("distribute_rewards")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;

        let mut contributors = Vec::new();
        let mut total = 0u64;
        for target in self.registry.reward_targets().await {
            let account = self.account(target.validator).await?;
            let accrued = account.accrued_reward().await?;
            if accrued == 0 || accrued < state.params.reward_distribution_lower_bound {
                debug!(
                    operator = target.operator_id,
                    accrued, "below reward lower bound, skipped"
                );
                continue;
            }
            total += accrued;
            contributors.push((target.reward_address, account));
        }
        if contributors.is_empty() {
            return Ok(0);
        }
        if total < state.params.min_reward_distribution {
            return Err(Error::BelowMinimumDistribution {
                total,
                floor: state.params.min_reward_distribution,
            });
        }

        let mut collected = 0u64;
        for (_, account) in &contributors {
            collected += account.collect_reward().await?;
        }

        let fee = apply_bps(collected, state.params.protocol_fee_bps);
        let insurance = apply_bps(fee, state.params.insurance_fee_bps);
        let treasury = fee - insurance;
        let retained = apply_bps(collected, state.params.pool_retention_bps);
        let operator_total = collected - fee - retained;
        let per_operator = operator_total / contributors.len() as u64;
        let leftover = operator_total - per_operator * contributors.len() as u64;

        let insurance_address = state.params.insurance_address;
        let dao_address = state.params.dao_address;
        state.credit(insurance_address, insurance);
        state.credit(dao_address, treasury);
        for (reward_address, _) in &contributors {
            state.credit(*reward_address, per_operator);
        }
        // The pool absorbs its retained cut plus the even-split rounding
        // remainder; neither is re-delegated here.
        state.total_buffered += retained + leftover;

        info!(
            %caller,
            collected,
            fee,
            retained,
            operators = contributors.len(),
            per_operator,
            "rewards distributed"
        );
        Ok(collected)
    }

    /// Burns shares worth `amount` and mints withdrawal tickets backing
    /// it: from the buffer when sufficient, otherwise validator-backed
    /// slices largest-balance-first with any residue from the buffer.
    pub async fn request_withdraw(&self, caller: Address, amount: u64) -> Result<Vec<TicketId>> {
        let _token = self.guard.enter("request_withdraw")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }

        let mut funded = Vec::new();
        let mut delegated_total = 0u64;
        for target in self.registry.settlement_targets().await {
            let account = self.account(target.validator).await?;
            let balance = account.delegated_balance().await?;
            delegated_total += balance;
            if balance > 0 {
                funded.push((target, account, balance));
            }
        }
        let available = state.total_buffered + delegated_total;
        if amount > available {
            return Err(Error::TooMuchToWithdraw {
                requested: amount,
                available,
            });
        }

        let pooled = self.pooled_value_locked(&state).await?;
        let shares_to_burn = state.shares_from_amount(amount, pooled);
        let balance = state.balances.get(&caller).copied().unwrap_or(0);
        if balance < shares_to_burn {
            return Err(Error::InsufficientAmount(format!(
                "share balance {balance} cannot cover burn of {shares_to_burn}"
            )));
        }

        let request_epoch = self.epoch.current_epoch();
        let mut tickets = Vec::new();
        if state.total_buffered >= amount {
            state.total_buffered -= amount;
            state.reserved_for_claims += amount;
            tickets.push(
                state
                    .ledger
                    .mint(caller, request_epoch, TicketBacking::Buffer { amount }),
            );
        } else {
            // Slices validated against balances read above; execution is
            // serialized, so the reads stay true through the loop.
            funded.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.operator_id.cmp(&b.0.operator_id)));
            let mut remaining = amount;
            for (target, account, balance) in funded {
                if remaining == 0 {
                    break;
                }
                let slice = remaining.min(balance);
                let shares = account.shares_for(slice).await?;
                if shares == 0 {
                    continue;
                }
                let nonce = account.undelegate(shares).await?;
                tickets.push(state.ledger.mint(
                    caller,
                    request_epoch,
                    TicketBacking::Validator {
                        operator: target.operator_id,
                        validator: target.validator,
                        shares,
                        nonce,
                    },
                ));
                remaining -= slice;
            }
            if remaining > 0 {
                state.total_buffered -= remaining;
                state.reserved_for_claims += remaining;
                tickets.push(state.ledger.mint(
                    caller,
                    request_epoch,
                    TicketBacking::Buffer { amount: remaining },
                ));
            }
        }

        *state.balances.entry(caller).or_default() -= shares_to_burn;
        state.total_shares -= shares_to_burn;
        info!(
            %caller,
            amount,
            shares_burned = shares_to_burn,
            tickets = tickets.len(),
            "withdrawal requested"
        );
        Ok(tickets)
    }

    /// Settles a matured ticket and pays its owner. Validator-backed
    /// tickets settle at the account's value at claim time, so slashing
    /// between request and claim is reflected in the payout.
    pub async fn claim_tokens(&self, caller: Address, ticket_id: TicketId) -> Result<u64> {
        let _token = self.guard.enter("claim_tokens")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;
        let ticket = state
            .ledger
            .ticket(ticket_id)
            .cloned()
            .ok_or(Error::TicketNotFound(ticket_id))?;
        if !state.ledger.is_approved_or_owner(caller, ticket_id) {
            return Err(Error::PermissionDenied(format!(
                "{caller} may not claim ticket {ticket_id}"
            )));
        }
        let paid = self.settle(&mut state, &ticket).await?;
        state.ledger.burn(ticket_id)?;
        state.credit(ticket.owner, paid);
        info!(ticket = ticket_id, owner = %ticket.owner, paid, "ticket claimed");
        Ok(paid)
    }

    /// Claim path for tickets the pool holds on its own behalf (from a
    /// forced operator exit): proceeds return to the buffer instead of
    /// leaving the pool.
    pub async fn claim_tokens_to_pool(&self, caller: Address, ticket_id: TicketId) -> Result<u64> {
        let _token = self.guard.enter("claim_tokens_to_pool")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;
        let ticket = state
            .ledger
            .ticket(ticket_id)
            .cloned()
            .ok_or(Error::TicketNotFound(ticket_id))?;
        if ticket.owner != self.self_address {
            return Err(Error::PermissionDenied(format!(
                "ticket {ticket_id} is not pool-held"
            )));
        }
        let paid = self.settle(&mut state, &ticket).await?;
        state.ledger.burn(ticket_id)?;
        state.total_buffered += paid;
        info!(ticket = ticket_id, %caller, paid, "pool-held ticket re-buffered");
        Ok(paid)
    }

    async fn settle(&self, state: &mut PoolState, ticket: &WithdrawalTicket) -> Result<u64> {
        let current = self.epoch.current_epoch();
        let unlock = ticket.request_epoch + state.params.withdrawal_delay_epochs;
        if current < unlock {
            return Err(Error::ClaimDelayNotReached { current, unlock });
        }
        match ticket.backing {
            TicketBacking::Buffer { amount } => {
                state.reserved_for_claims -= amount;
                Ok(amount)
            }
            TicketBacking::Validator {
                validator, nonce, ..
            } => self.account(validator).await?.claim(nonce).await,
        }
    }

    /// Approves `spender` to claim one ticket owned by the caller.
    pub async fn approve_ticket(
        &self,
        caller: Address,
        spender: Address,
        ticket_id: TicketId,
    ) -> Result<()> {
        let _token = self.guard.enter("approve_ticket")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;
        state.ledger.approve(caller, spender, ticket_id)
    }

    /// Transfers a ticket to a new owner, clearing any approval.
    pub async fn transfer_ticket(
        &self,
        caller: Address,
        to: Address,
        ticket_id: TicketId,
    ) -> Result<()> {
        let _token = self.guard.enter("transfer_ticket")?;
        let mut state = self.state.write().await;
        state.ensure_live()?;
        state.ledger.transfer(caller, to, ticket_id)
    }

    // Operator ejection orchestration: registry transition first, then
    // the operator's remaining delegation becomes a pool-held ticket.

    pub async fn remove_operator(
        &self,
        caller: Address,
        id: OperatorId,
    ) -> Result<Option<TicketId>> {
        let _token = self.guard.enter("remove_operator")?;
        let exit = self.registry.remove_operator(caller, id).await?;
        self.settle_forced_exit(exit).await
    }

    pub async fn stop_operator(
        &self,
        caller: Address,
        id: OperatorId,
    ) -> Result<Option<TicketId>> {
        let _token = self.guard.enter("stop_operator")?;
        let exit = self.registry.stop_operator(caller, id).await?;
        self.settle_forced_exit(exit).await
    }

    pub async fn exit_node_operator(&self, caller: Address) -> Result<Option<TicketId>> {
        let _token = self.guard.enter("exit_node_operator")?;
        let exit = self.registry.exit_node_operator(caller).await?;
        self.settle_forced_exit(exit).await
    }

    async fn settle_forced_exit(&self, exit: ForcedExit) -> Result<Option<TicketId>> {
        if !exit.was_staked {
            return Ok(None);
        }
        let account = self.account(exit.validator).await?;
        let balance = account.delegated_balance().await?;
        if balance == 0 {
            return Ok(None);
        }
        let shares = account.shares_for(balance).await?;
        let nonce = account.undelegate(shares).await?;
        let mut state = self.state.write().await;
        let ticket_id = state.ledger.mint(
            self.self_address,
            self.epoch.current_epoch(),
            TicketBacking::Validator {
                operator: exit.operator_id,
                validator: exit.validator,
                shares,
                nonce,
            },
        );
        warn!(
            operator = exit.operator_id,
            ticket = ticket_id,
            balance,
            "ejected operator's delegation held as pool ticket"
        );
        Ok(Some(ticket_id))
    }

    // Admin surface

    pub async fn set_submit_threshold(&self, caller: Address, amount: u64) -> Result<()> {
        let _token = self.guard.enter("set_submit_threshold")?;
        self.ensure_admin(caller)?;
        self.state.write().await.params.submit_threshold = amount;
        Ok(())
    }

    pub async fn enable_submit_threshold(&self, caller: Address) -> Result<()> {
        let _token = self.guard.enter("enable_submit_threshold")?;
        self.ensure_admin(caller)?;
        self.state.write().await.params.submit_threshold_enabled = true;
        Ok(())
    }

    pub async fn disable_submit_threshold(&self, caller: Address) -> Result<()> {
        let _token = self.guard.enter("disable_submit_threshold")?;
        self.ensure_admin(caller)?;
        self.state.write().await.params.submit_threshold_enabled = false;
        Ok(())
    }

    pub async fn set_delegation_lower_bound(&self, caller: Address, amount: u64) -> Result<()> {
        let _token = self.guard.enter("set_delegation_lower_bound")?;
        self.ensure_admin(caller)?;
        self.state.write().await.params.delegation_lower_bound = amount;
        Ok(())
    }

    pub async fn set_reward_distribution_lower_bound(
        &self,
        caller: Address,
        amount: u64,
    ) -> Result<()> {
        let _token = self.guard.enter("set_reward_distribution_lower_bound")?;
        self.ensure_admin(caller)?;
        self.state
            .write()
            .await
            .params
            .reward_distribution_lower_bound = amount;
        Ok(())
    }

    pub async fn set_min_reward_distribution(&self, caller: Address, amount: u64) -> Result<()> {
        let _token = self.guard.enter("set_min_reward_distribution")?;
        self.ensure_admin(caller)?;
        self.state.write().await.params.min_reward_distribution = amount;
        Ok(())
    }

    pub async fn set_protocol_fee(
        &self,
        caller: Address,
        fee_bps: u16,
        insurance_bps: u16,
    ) -> Result<()> {
        let _token = self.guard.enter("set_protocol_fee")?;
        self.ensure_admin(caller)?;
        if fee_bps as u64 > BASIS_POINTS || insurance_bps as u64 > BASIS_POINTS {
            return Err(Error::Config("fee rates exceed 100%".into()));
        }
        let mut state = self.state.write().await;
        if fee_bps as u64 + state.params.pool_retention_bps as u64 > BASIS_POINTS {
            return Err(Error::Config(
                "protocol fee plus pool retention exceeds 100%".into(),
            ));
        }
        state.params.protocol_fee_bps = fee_bps;
        state.params.insurance_fee_bps = insurance_bps;
        Ok(())
    }

    pub async fn set_pool_retention(&self, caller: Address, retention_bps: u16) -> Result<()> {
        let _token = self.guard.enter("set_pool_retention")?;
        self.ensure_admin(caller)?;
        let mut state = self.state.write().await;
        if retention_bps as u64 + state.params.protocol_fee_bps as u64 > BASIS_POINTS {
            return Err(Error::Config(
                "pool retention plus protocol fee exceeds 100%".into(),
            ));
        }
        state.params.pool_retention_bps = retention_bps;
        Ok(())
    }

    pub async fn set_dao_address(&self, caller: Address, dao: Address) -> Result<()> {
        let _token = self.guard.enter("set_dao_address")?;
        self.ensure_admin(caller)?;
        self.state.write().await.params.dao_address = dao;
        Ok(())
    }

    pub async fn set_insurance_address(&self, caller: Address, insurance: Address) -> Result<()> {
        let _token = self.guard.enter("set_insurance_address")?;
        self.ensure_admin(caller)?;
        self.state.write().await.params.insurance_address = insurance;
        Ok(())
    }

    pub async fn pause(&self, caller: Address) -> Result<()> {
        let _token = self.guard.enter("pause")?;
        self.ensure_admin(caller)?;
        self.state.write().await.paused = true;
        warn!("pool paused");
        Ok(())
    }

    pub async fn unpause(&self, caller: Address) -> Result<()> {
        let _token = self.guard.enter("unpause")?;
        self.ensure_admin(caller)?;
        self.state.write().await.paused = false;
        info!("pool unpaused");
        Ok(())
    }

    // Views. Each requires the guard to be clear so pooled value is never
    // observed mid-mutation.

    pub async fn total_pooled_stake(&self) -> Result<u64> {
        self.guard.ensure_clear("total_pooled_stake")?;
        let state = self.state.read().await;
        self.pooled_value_locked(&state).await
    }

    /// Current redeemable value of a ticket, without mutating anything.
    pub async fn ticket_value(&self, ticket_id: TicketId) -> Result<u64> {
        self.guard.ensure_clear("ticket_value")?;
        let state = self.state.read().await;
        let ticket = state
            .ledger
            .ticket(ticket_id)
            .ok_or(Error::TicketNotFound(ticket_id))?;
        match ticket.backing {
            TicketBacking::Buffer { amount } => Ok(amount),
            TicketBacking::Validator {
                validator, nonce, ..
            } => self.account(validator).await?.unbond_value(nonce).await,
        }
    }

    pub async fn shares_for_amount(&self, amount: u64) -> Result<u64> {
        self.guard.ensure_clear("shares_for_amount")?;
        let state = self.state.read().await;
        let pooled = self.pooled_value_locked(&state).await?;
        Ok(state.shares_from_amount(amount, pooled))
    }

    pub async fn amount_for_shares(&self, shares: u64) -> Result<u64> {
        self.guard.ensure_clear("amount_for_shares")?;
        let state = self.state.read().await;
        let pooled = self.pooled_value_locked(&state).await?;
        Ok(mul_div(shares, pooled, state.total_shares))
    }

    pub async fn share_balance_of(&self, addr: Address) -> u64 {
        self.state.read().await.balances.get(&addr).copied().unwrap_or(0)
    }

    pub async fn total_shares(&self) -> u64 {
        self.state.read().await.total_shares
    }

    pub async fn total_buffered(&self) -> u64 {
        self.state.read().await.total_buffered
    }

    pub async fn reserved_for_claims(&self) -> u64 {
        self.state.read().await.reserved_for_claims
    }

    pub async fn payout_of(&self, addr: Address) -> u64 {
        self.state.read().await.payouts.get(&addr).copied().unwrap_or(0)
    }

    pub async fn tickets_of(&self, owner: Address) -> Vec<TicketId> {
        self.state.read().await.ledger.tickets_of(owner).to_vec()
    }

    pub async fn ticket(&self, ticket_id: TicketId) -> Option<WithdrawalTicket> {
        self.state.read().await.ledger.ticket(ticket_id).cloned()
    }

    pub fn pool_address(&self) -> Address {
        self.self_address
    }
}
