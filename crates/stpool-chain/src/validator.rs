//! Operation contracts for the per-operator validator account service.

use async_trait::async_trait;
use std::sync::Arc;
use stpool_common::{Result, UnbondNonce, ValidatorId};

/// One delegation account per operator on the underlying network.
///
/// The delegator surface is consumed by the stake pool, the operator
/// surface by the registry. Slashing happens externally and is visible
/// only through subsequent balance and value reads.
#[async_trait]
pub trait ValidatorAccount: Send + Sync {
    // Delegator surface

    /// Moves `amount` of pooled stake into the delegation pool.
    async fn delegate(&self, amount: u64) -> Result<()>;

    /// Starts unbonding `shares` of delegated stake; the returned nonce
    /// identifies the pending unbond until it is claimed.
    async fn undelegate(&self, shares: u64) -> Result<UnbondNonce>;

    /// Settles a pending unbond at its current value and releases it.
    async fn claim(&self, nonce: UnbondNonce) -> Result<u64>;

    /// Current value of a pending unbond without settling it.
    async fn unbond_value(&self, nonce: UnbondNonce) -> Result<u64>;

    /// Reward accrued to the delegation pool since the last collection.
    async fn accrued_reward(&self) -> Result<u64>;

    /// Withdraws the accrued reward, zeroing the accrual.
    async fn collect_reward(&self) -> Result<u64>;

    /// Value of the bonded (non-unbonding) delegated stake.
    async fn delegated_balance(&self) -> Result<u64>;

    /// Shares currently worth `amount` of stake.
    async fn shares_for(&self, amount: u64) -> Result<u64>;

    /// Whether the account currently accepts new delegation.
    async fn accepts_delegation(&self) -> Result<bool>;

    // Operator surface

    /// Bonds operator principal, kept apart from the delegation pool.
    async fn bond_self(&self, amount: u64) -> Result<()>;

    /// Initiates consensus exit; the account stops accepting delegation.
    async fn begin_exit(&self) -> Result<()>;

    /// Cancels a previously initiated exit.
    async fn reinstate(&self) -> Result<()>;

    /// Releases the operator principal after an exit.
    async fn release_self_stake(&self) -> Result<u64>;

    // External events

    /// Slash applied by the network against the delegation pool.
    async fn slash(&self, amount: u64) -> Result<()>;
}

/// Factory and lookup for validator accounts.
#[async_trait]
pub trait ValidatorHub: Send + Sync {
    /// Provisions an account for a validator public key; no funds move.
    async fn create_account(&self, pub_key: &str) -> Result<ValidatorId>;

    /// Resolves a previously created account.
    async fn account(&self, id: ValidatorId) -> Option<Arc<dyn ValidatorAccount>>;
}
