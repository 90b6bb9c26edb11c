//! In-process validator account simulation.
//!
//! The delegation pool is share-priced: delegations mint shares at the
//! current asset/share rate, slashing reduces the asset total, so bonded
//! balances and pending unbonds devalue proportionally and every later
//! read observes the post-slash value.

use crate::validator::{ValidatorAccount, ValidatorHub};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stpool_common::{mul_div, Error, Result, UnbondNonce, ValidatorId};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct SimState {
    self_stake: u64,
    total_assets: u64,
    total_shares: u64,
    bonded_shares: u64,
    unbonds: HashMap<UnbondNonce, u64>,
    next_nonce: UnbondNonce,
    reward_accrued: u64,
    accepting: bool,
    exited: bool,
}

pub struct SimValidator {
    pub_key: String,
    state: RwLock<SimState>,
}

impl SimValidator {
    pub fn new(pub_key: &str) -> Self {
        Self {
            pub_key: pub_key.to_string(),
            state: RwLock::new(SimState {
                accepting: true,
                next_nonce: 1,
                ..SimState::default()
            }),
        }
    }

    pub fn pub_key(&self) -> &str {
        &self.pub_key
    }

    /// Accrues reward to the delegation pool (test/demo hook standing in
    /// for network reward issuance).
    pub async fn add_reward(&self, amount: u64) {
        let mut state = self.state.write().await;
        state.reward_accrued += amount;
    }

    /// Toggles delegation acceptance (test/demo hook for external
    /// refusal, e.g. a full or misbehaving validator).
    pub async fn set_accepting(&self, accepting: bool) {
        let mut state = self.state.write().await;
        state.accepting = accepting;
    }
}

#[async_trait]
impl ValidatorAccount for SimValidator {
    async fn delegate(&self, amount: u64) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.accepting || state.exited {
            return Err(Error::Validator(format!(
                "validator {} not accepting delegation",
                self.pub_key
            )));
        }
        let shares = if state.total_shares == 0 {
            amount
        } else {
            mul_div(amount, state.total_shares, state.total_assets)
        };
        state.total_assets += amount;
        state.total_shares += shares;
        state.bonded_shares += shares;
        debug!(validator = %self.pub_key, amount, shares, "delegated");
        Ok(())
    }

    async fn undelegate(&self, shares: u64) -> Result<UnbondNonce> {
        let mut state = self.state.write().await;
        if shares == 0 || shares > state.bonded_shares {
            return Err(Error::Validator(format!(
                "cannot unbond {} of {} bonded shares",
                shares, state.bonded_shares
            )));
        }
        state.bonded_shares -= shares;
        let nonce = state.next_nonce;
        state.next_nonce += 1;
        state.unbonds.insert(nonce, shares);
        debug!(validator = %self.pub_key, shares, nonce, "unbond started");
        Ok(nonce)
    }

    async fn claim(&self, nonce: UnbondNonce) -> Result<u64> {
        let mut state = self.state.write().await;
        let shares = state
            .unbonds
            .remove(&nonce)
            .ok_or_else(|| Error::Validator(format!("unknown unbond nonce {nonce}")))?;
        let value = mul_div(shares, state.total_assets, state.total_shares);
        state.total_shares -= shares;
        state.total_assets -= value;
        debug!(validator = %self.pub_key, nonce, value, "unbond claimed");
        Ok(value)
    }

    async fn unbond_value(&self, nonce: UnbondNonce) -> Result<u64> {
        let state = self.state.read().await;
        let shares = state
            .unbonds
            .get(&nonce)
            .ok_or_else(|| Error::Validator(format!("unknown unbond nonce {nonce}")))?;
        Ok(mul_div(*shares, state.total_assets, state.total_shares))
    }

    async fn accrued_reward(&self) -> Result<u64> {
        Ok(self.state.read().await.reward_accrued)
    }

    async fn collect_reward(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        Ok(std::mem::take(&mut state.reward_accrued))
    }

    async fn delegated_balance(&self) -> Result<u64> {
        let state = self.state.read().await;
        if state.total_shares == 0 {
            return Ok(0);
        }
        Ok(mul_div(
            state.bonded_shares,
            state.total_assets,
            state.total_shares,
        ))
    }

    async fn shares_for(&self, amount: u64) -> Result<u64> {
        let state = self.state.read().await;
        if state.total_shares == 0 {
            return Ok(amount);
        }
        Ok(mul_div(amount, state.total_shares, state.total_assets))
    }

    async fn accepts_delegation(&self) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.accepting && !state.exited)
    }

    async fn bond_self(&self, amount: u64) -> Result<()> {
        let mut state = self.state.write().await;
        state.self_stake += amount;
        Ok(())
    }

    async fn begin_exit(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.exited = true;
        Ok(())
    }

    async fn reinstate(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.exited = false;
        Ok(())
    }

    async fn release_self_stake(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        Ok(std::mem::take(&mut state.self_stake))
    }

    async fn slash(&self, amount: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let applied = amount.min(state.total_assets);
        state.total_assets -= applied;
        debug!(validator = %self.pub_key, applied, "slash applied");
        Ok(())
    }
}

/// Simulated network holding all validator accounts.
pub struct SimChain {
    accounts: RwLock<HashMap<ValidatorId, Arc<SimValidator>>>,
    next_id: AtomicU64,
}

impl SimChain {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Concrete-typed lookup for tests and the demo binary.
    pub async fn sim_account(&self, id: ValidatorId) -> Option<Arc<SimValidator>> {
        self.accounts.read().await.get(&id).cloned()
    }
}

impl Default for SimChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValidatorHub for SimChain {
    async fn create_account(&self, pub_key: &str) -> Result<ValidatorId> {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let account = Arc::new(SimValidator::new(pub_key));
        self.accounts.write().await.insert(id, account);
        Ok(id)
    }

    async fn account(&self, id: ValidatorId) -> Option<Arc<dyn ValidatorAccount>> {
        self.accounts
            .read()
            .await
            .get(&id)
            .cloned()
            .map(|account| account as Arc<dyn ValidatorAccount>)
    }
}
