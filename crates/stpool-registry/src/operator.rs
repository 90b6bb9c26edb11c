//! Operator records and derived registry counters.

use serde::{Deserialize, Serialize};
use std::fmt;
use stpool_common::{Address, OperatorId, ValidatorId};

/// Lifecycle state of a registered operator.
///
/// Exit and UnstakedClaimed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorState {
    Active,
    Staked,
    Unstaked,
    UnstakedClaimed,
    Exit,
    Jailed,
}

impl OperatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperatorState::Exit | OperatorState::UnstakedClaimed)
    }
}

impl fmt::Display for OperatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorState::Active => "active",
            OperatorState::Staked => "staked",
            OperatorState::Unstaked => "unstaked",
            OperatorState::UnstakedClaimed => "unstaked-claimed",
            OperatorState::Exit => "exit",
            OperatorState::Jailed => "jailed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorRecord {
    pub id: OperatorId,
    pub state: OperatorState,
    pub name: String,
    pub reward_address: Address,
    pub owner: Address,
    pub validator_pub_key: String,
    /// Lookup key for the operator's validator account; the registry
    /// never owns the account itself.
    pub validator: ValidatorId,
    pub commission_bps: u16,
    /// Per-operator delegation ceiling; `None` falls back to the global
    /// default.
    pub max_delegation: Option<u64>,
    /// Auxiliary protocol fees paid alongside the principal.
    pub fees_paid: u64,
    pub registered_at: i64,
}

/// Aggregate counters maintained incrementally with every transition.
///
/// Jailed and UnstakedClaimed operators count toward `total` only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: u64,
    pub active: u64,
    pub staked: u64,
    pub unstaked: u64,
    pub exit: u64,
}

impl RegistryStats {
    /// Adjusts the counter tracking `state` by one in either direction.
    pub(crate) fn shift(&mut self, state: OperatorState, added: bool) {
        let counter = match state {
            OperatorState::Active => &mut self.active,
            OperatorState::Staked => &mut self.staked,
            OperatorState::Unstaked => &mut self.unstaked,
            OperatorState::Exit => &mut self.exit,
            OperatorState::Jailed | OperatorState::UnstakedClaimed => return,
        };
        if added {
            *counter += 1;
        } else {
            *counter -= 1;
        }
    }
}
