//! The operator registry state machine.
//!
//! Records live in an id-keyed arena; the aggregate counters are updated
//! in the same critical section as every state change, so no observable
//! state has counts and records disagreeing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use stpool_common::{
    Address, Error, OperatorId, ReentrancyGuard, RegistryConfig, Result, ValidatorId,
};
use stpool_chain::{ValidatorAccount, ValidatorHub};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::operator::{OperatorRecord, OperatorState, RegistryStats};

/// Descriptor returned by a forced terminal transition so the pool can
/// settle any stake still delegated to the ejected operator.
#[derive(Debug, Clone, Copy)]
pub struct ForcedExit {
    pub operator_id: OperatorId,
    pub validator: ValidatorId,
    /// The operator held pool delegation at the time of the exit.
    pub was_staked: bool,
}

/// A Staked operator eligible to receive buffered stake.
#[derive(Debug, Clone)]
pub struct DelegationTarget {
    pub operator_id: OperatorId,
    pub validator: ValidatorId,
    /// Resolved ceiling: per-operator override or the global default.
    pub max_delegation: u64,
}

/// A Staked or Unstaked operator whose delegated balance can back
/// withdrawals.
#[derive(Debug, Clone)]
pub struct SettlementTarget {
    pub operator_id: OperatorId,
    pub validator: ValidatorId,
}

/// A Staked or Unstaked operator participating in reward distribution.
#[derive(Debug, Clone)]
pub struct RewardTarget {
    pub operator_id: OperatorId,
    pub validator: ValidatorId,
    pub reward_address: Address,
}

#[derive(Default)]
struct RegistryState {
    records: BTreeMap<OperatorId, OperatorRecord>,
    owners: HashMap<Address, OperatorId>,
    stats: RegistryStats,
    next_id: OperatorId,
    default_commission_bps: u16,
    default_max_delegation: u64,
    /// Auxiliary protocol fees recorded across all operators.
    total_aux_fees: u64,
    /// Accumulated fee amounts already claimed, per operator.
    fee_claims: HashMap<OperatorId, u64>,
}

impl RegistryState {
    fn transition(&mut self, id: OperatorId, to: OperatorState) {
        let record = self
            .records
            .get_mut(&id)
            .expect("transition target exists");
        let from = record.state;
        self.stats.shift(from, false);
        record.state = to;
        self.stats.shift(to, true);
        info!(operator = id, %from, %to, "operator transition");
    }

    fn record_by_owner(&self, owner: &Address) -> Result<&OperatorRecord> {
        let id = self
            .owners
            .get(owner)
            .ok_or_else(|| Error::OperatorNotFound(format!("no operator owned by {owner}")))?;
        Ok(&self.records[id])
    }
}

pub struct NodeOperatorRegistry {
    admin: Address,
    hub: Arc<dyn ValidatorHub>,
    guard: ReentrancyGuard,
    state: RwLock<RegistryState>,
}

impl NodeOperatorRegistry {
    pub fn new(admin: Address, config: RegistryConfig, hub: Arc<dyn ValidatorHub>) -> Self {
        Self {
            admin,
            hub,
            guard: ReentrancyGuard::new(),
            state: RwLock::new(RegistryState {
                next_id: 1,
                default_commission_bps: config.default_commission_bps,
                default_max_delegation: config.default_max_delegation,
                ..RegistryState::default()
            }),
        }
    }

    fn ensure_admin(&self, caller: Address) -> Result<()> {
        if caller != self.admin {
            return Err(Error::PermissionDenied(format!(
                "{caller} lacks the registry admin capability"
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

    /// Admits a new operator in Active state and provisions its
    /// validator account. No funds move.
    pub async fn add_operator(
        &self,
        caller: Address,
        name: &str,
        reward_address: Address,
        owner: Address,
        pub_key: &str,
    ) -> Result<OperatorId> {
        let _token = self.guard.enter("add_operator")?;
        self.ensure_admin(caller)?;
        let mut state = self.state.write().await;
        if state.owners.contains_key(&owner) {
            return Err(Error::InvalidState(format!(
                "owner {owner} already controls an operator"
            )));
        }
        let validator = self.hub.create_account(pub_key).await?;
        let id = state.next_id;
        state.next_id += 1;
        let record = OperatorRecord {
            id,
            state: OperatorState::Active,
            name: name.to_string(),
            reward_address,
            owner,
            validator_pub_key: pub_key.to_string(),
            validator,
            commission_bps: state.default_commission_bps,
            max_delegation: None,
            fees_paid: 0,
            registered_at: chrono::Utc::now().timestamp(),
        };
        state.records.insert(id, record);
        state.owners.insert(owner, id);
        state.stats.total += 1;
        state.stats.shift(OperatorState::Active, true);
        info!(operator = id, %owner, name, "operator admitted");
        Ok(id)
    }

    /// Bonds operator principal and moves the caller's operator from
    /// Active to Staked. `aux_fee` is the side-channel protocol fee the
    /// network requires to keep consensus participation alive.
    pub async fn stake(&self, caller: Address, amount: u64, aux_fee: u64) -> Result<()> {
        let _token = self.guard.enter("stake")?;
        let mut state = self.state.write().await;
        let record = state.record_by_owner(&caller)?;
        if record.state != OperatorState::Active {
            return Err(Error::InvalidState(format!(
                "stake requires an active operator, found {}",
                record.state
            )));
        }
        if amount == 0 || aux_fee == 0 {
            return Err(Error::InsufficientAmount(
                "stake amount and auxiliary fee must be non-zero".into(),
            ));
        }
        let (id, validator) = (record.id, record.validator);
        self.account(validator).await?.bond_self(amount).await?;
        state.transition(id, OperatorState::Staked);
        let record = state.records.get_mut(&id).expect("record exists");
        record.fees_paid += aux_fee;
        state.total_aux_fees += aux_fee;
        Ok(())
    }

    /// Initiates the operator's exit from consensus. Funds stay locked
    /// in the validator account until claimed.
    pub async fn unstake(&self, caller: Address) -> Result<()> {
        let _token = self.guard.enter("unstake")?;
        let mut state = self.state.write().await;
        let record = state.record_by_owner(&caller)?;
        if !matches!(record.state, OperatorState::Staked | OperatorState::Jailed) {
            return Err(Error::InvalidState(format!(
                "unstake requires a staked operator, found {}",
                record.state
            )));
        }
        let (id, validator) = (record.id, record.validator);
        self.account(validator).await?.begin_exit().await?;
        state.transition(id, OperatorState::Unstaked);
        Ok(())
    }

    /// Re-admits a previously penalized operator: Unstaked -> Active.
    pub async fn unjail(&self, caller: Address) -> Result<()> {
        let _token = self.guard.enter("unjail")?;
        let mut state = self.state.write().await;
        let record = state.record_by_owner(&caller)?;
        if record.state != OperatorState::Unstaked {
            return Err(Error::InvalidState(format!(
                "unjail requires an unstaked operator, found {}",
                record.state
            )));
        }
        let (id, validator) = (record.id, record.validator);
        self.account(validator).await?.reinstate().await?;
        state.transition(id, OperatorState::Active);
        Ok(())
    }

    /// Marks a misbehaving Staked operator as Jailed; it stops receiving
    /// delegation and rewards until it unstakes and unjails.
    pub async fn jail_operator(&self, caller: Address, id: OperatorId) -> Result<()> {
        let _token = self.guard.enter("jail_operator")?;
        self.ensure_admin(caller)?;
        let mut state = self.state.write().await;
        let record = state
            .records
            .get(&id)
            .ok_or_else(|| Error::OperatorNotFound(format!("operator {id}")))?;
        if record.state != OperatorState::Staked {
            return Err(Error::InvalidState(format!(
                "jail requires a staked operator, found {}",
                record.state
            )));
        }
        state.transition(id, OperatorState::Jailed);
        warn!(operator = id, "operator jailed");
        Ok(())
    }

    /// Tops up the auxiliary protocol fee for a Staked operator.
    pub async fn top_up_fee(&self, caller: Address, amount: u64) -> Result<()> {
        let _token = self.guard.enter("top_up_fee")?;
        let mut state = self.state.write().await;
        let record = state.record_by_owner(&caller)?;
        if record.state != OperatorState::Staked {
            return Err(Error::InvalidState(format!(
                "fee top-up requires a staked operator, found {}",
                record.state
            )));
        }
        if amount == 0 {
            return Err(Error::ZeroFee);
        }
        let id = record.id;
        let record = state.records.get_mut(&id).expect("record exists");
        record.fees_paid += amount;
        state.total_aux_fees += amount;
        Ok(())
    }

    /// Claims accumulated auxiliary fees for an Unstaked operator
    /// against an externally produced proof. Returns the newly claimed
    /// delta.
    pub async fn claim_fee(
        &self,
        caller: Address,
        index: u64,
        accum_fee_amount: u64,
        proof: &[u8],
    ) -> Result<u64> {
        let _token = self.guard.enter("claim_fee")?;
        let mut state = self.state.write().await;
        let record = state.record_by_owner(&caller)?;
        if record.state != OperatorState::Unstaked {
            return Err(Error::InvalidState(format!(
                "fee claim requires an unstaked operator, found {}",
                record.state
            )));
        }
        if proof.is_empty() {
            return Err(Error::EmptyProof);
        }
        if index == 0 {
            return Err(Error::ZeroIndex);
        }
        let id = record.id;
        let claimed_so_far = state.fee_claims.get(&id).copied().unwrap_or(0);
        if accum_fee_amount <= claimed_so_far {
            return Err(Error::InsufficientAmount(format!(
                "accumulated fee {accum_fee_amount} already claimed up to {claimed_so_far}"
            )));
        }
        state.fee_claims.insert(id, accum_fee_amount);
        Ok(accum_fee_amount - claimed_so_far)
    }

    /// Releases the operator principal after an exit:
    /// Unstaked -> UnstakedClaimed (terminal). Returns the released
    /// amount.
    pub async fn claim_stake(&self, caller: Address) -> Result<u64> {
        let _token = self.guard.enter("claim_stake")?;
        let mut state = self.state.write().await;
        let record = state.record_by_owner(&caller)?;
        if record.state != OperatorState::Unstaked {
            return Err(Error::InvalidState(format!(
                "stake claim requires an unstaked operator, found {}",
                record.state
            )));
        }
        let (id, validator) = (record.id, record.validator);
        let released = self.account(validator).await?.release_self_stake().await?;
        state.transition(id, OperatorState::UnstakedClaimed);
        Ok(released)
    }

    /// Admin-forced terminal transition.
    pub async fn remove_operator(&self, caller: Address, id: OperatorId) -> Result<ForcedExit> {
        let _token = self.guard.enter("remove_operator")?;
        self.ensure_admin(caller)?;
        self.force_exit(id).await
    }

    /// Admin-forced terminal transition for a degraded operator.
    pub async fn stop_operator(&self, caller: Address, id: OperatorId) -> Result<ForcedExit> {
        let _token = self.guard.enter("stop_operator")?;
        self.ensure_admin(caller)?;
        self.force_exit(id).await
    }

    /// Owner-initiated terminal transition of their own operator.
    pub async fn exit_node_operator(&self, caller: Address) -> Result<ForcedExit> {
        let _token = self.guard.enter("exit_node_operator")?;
        let id = {
            let state = self.state.read().await;
            state.record_by_owner(&caller)?.id
        };
        self.force_exit(id).await
    }

    async fn force_exit(&self, id: OperatorId) -> Result<ForcedExit> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get(&id)
            .ok_or_else(|| Error::OperatorNotFound(format!("operator {id}")))?;
        if record.state.is_terminal() {
            return Err(Error::InvalidState(format!(
                "operator {id} already terminal ({})",
                record.state
            )));
        }
        let exit = ForcedExit {
            operator_id: id,
            validator: record.validator,
            was_staked: record.state == OperatorState::Staked,
        };
        self.account(exit.validator).await?.begin_exit().await?;
        state.transition(id, OperatorState::Exit);
        warn!(operator = id, "operator force-exited");
        Ok(exit)
    }

    /// Updates one Staked operator's commission rate.
    pub async fn update_operator_commission(
        &self,
        caller: Address,
        id: OperatorId,
        commission_bps: u16,
    ) -> Result<()> {
        let _token = self.guard.enter("update_operator_commission")?;
        self.ensure_admin(caller)?;
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::OperatorNotFound(format!("operator {id}")))?;
        if record.state != OperatorState::Staked {
            return Err(Error::InvalidState(format!(
                "commission update requires a staked operator, found {}",
                record.state
            )));
        }
        record.commission_bps = commission_bps;
        Ok(())
    }

    /// Updates the default commission and every Staked operator.
    pub async fn update_commission_all(&self, caller: Address, commission_bps: u16) -> Result<()> {
        let _token = self.guard.enter("update_commission_all")?;
        self.ensure_admin(caller)?;
        let mut state = self.state.write().await;
        if state.stats.staked == 0 {
            return Err(Error::InvalidState(
                "commission update requires at least one staked operator".into(),
            ));
        }
        state.default_commission_bps = commission_bps;
        for record in state.records.values_mut() {
            if record.state == OperatorState::Staked {
                record.commission_bps = commission_bps;
            }
        }
        Ok(())
    }

    /// Sets a per-operator delegation ceiling.
    pub async fn set_max_delegation(
        &self,
        caller: Address,
        id: OperatorId,
        limit: u64,
    ) -> Result<()> {
        let _token = self.guard.enter("set_max_delegation")?;
        self.ensure_admin(caller)?;
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::OperatorNotFound(format!("operator {id}")))?;
        record.max_delegation = Some(limit);
        Ok(())
    }

    /// Sets the global delegation ceiling fallback.
    pub async fn set_default_max_delegation(&self, caller: Address, limit: u64) -> Result<()> {
        let _token = self.guard.enter("set_default_max_delegation")?;
        self.ensure_admin(caller)?;
        self.state.write().await.default_max_delegation = limit;
        Ok(())
    }

    // Views

    pub async fn operator(&self, id: OperatorId) -> Option<OperatorRecord> {
        self.state.read().await.records.get(&id).cloned()
    }

    pub async fn operator_by_owner(&self, owner: Address) -> Option<OperatorRecord> {
        let state = self.state.read().await;
        state
            .owners
            .get(&owner)
            .and_then(|id| state.records.get(id))
            .cloned()
    }

    pub async fn operator_ids(&self) -> Vec<OperatorId> {
        self.state.read().await.records.keys().copied().collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        self.state.read().await.stats
    }

    pub async fn total_aux_fees(&self) -> u64 {
        self.state.read().await.total_aux_fees
    }

    /// Fold over the record arena; tests compare this against the
    /// incrementally maintained counters to catch drift.
    pub async fn recompute_stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        let mut stats = RegistryStats {
            total: state.records.len() as u64,
            ..RegistryStats::default()
        };
        for record in state.records.values() {
            match record.state {
                OperatorState::Active => stats.active += 1,
                OperatorState::Staked => stats.staked += 1,
                OperatorState::Unstaked => stats.unstaked += 1,
                OperatorState::Exit => stats.exit += 1,
                OperatorState::Jailed | OperatorState::UnstakedClaimed => {}
            }
        }
        stats
    }

    /// Staked operators able to receive buffered stake.
    pub async fn delegation_targets(&self) -> Vec<DelegationTarget> {
        let state = self.state.read().await;
        state
            .records
            .values()
            .filter(|record| record.state == OperatorState::Staked)
            .map(|record| DelegationTarget {
                operator_id: record.id,
                validator: record.validator,
                max_delegation: record.max_delegation.unwrap_or(state.default_max_delegation),
            })
            .collect()
    }

    /// Staked and Unstaked operators whose delegated stake can back
    /// withdrawals.
    pub async fn settlement_targets(&self) -> Vec<SettlementTarget> {
        let state = self.state.read().await;
        state
            .records
            .values()
            .filter(|record| {
                matches!(record.state, OperatorState::Staked | OperatorState::Unstaked)
            })
            .map(|record| SettlementTarget {
                operator_id: record.id,
                validator: record.validator,
            })
            .collect()
    }

    /// Staked and Unstaked operators participating in a reward round.
    pub async fn reward_targets(&self) -> Vec<RewardTarget> {
        let state = self.state.read().await;
        state
            .records
            .values()
            .filter(|record| {
                matches!(record.state, OperatorState::Staked | OperatorState::Unstaked)
            })
            .map(|record| RewardTarget {
                operator_id: record.id,
                validator: record.validator,
                reward_address: record.reward_address,
            })
            .collect()
    }
}
