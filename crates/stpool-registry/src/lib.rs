//! Operator registry: validator lifecycle state machine and aggregate
//! counters for the stpool system.

mod operator;
mod registry;

pub use operator::{OperatorRecord, OperatorState, RegistryStats};
pub use registry::{
    DelegationTarget, ForcedExit, NodeOperatorRegistry, RewardTarget, SettlementTarget,
};
