//! Configuration types for the stpool system

use crate::errors::Result;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub pool: PoolConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Address receiving the insurance share of the protocol fee.
    pub insurance_address: Address,
    /// DAO treasury address receiving the remainder of the protocol fee.
    pub dao_address: Address,
    /// Submission cap in stake units. Enforced only while
    /// `submit_threshold_enabled` is true.
    pub submit_threshold: u64,
    pub submit_threshold_enabled: bool,
    /// Epochs a withdrawal ticket must age before it can be claimed.
    pub withdrawal_delay_epochs: u64,
    /// Buffer below this value is not pushed out by `delegate`.
    pub delegation_lower_bound: u64,
    /// Operators with accrued reward below this are skipped in a
    /// distribution round.
    pub reward_distribution_lower_bound: u64,
    /// Distribution fails outright when the eligible reward total is
    /// below this floor.
    pub min_reward_distribution: u64,
    /// Share of the eligible reward total taken as protocol fee.
    pub protocol_fee_bps: u16,
    /// Share of the protocol fee routed to insurance; the rest goes to
    /// the DAO treasury.
    pub insurance_fee_bps: u16,
    /// Share of the eligible reward total the pool re-buffers for
    /// itself.
    pub pool_retention_bps: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            insurance_address: Address::ZERO,
            dao_address: Address::ZERO,
            submit_threshold: 0,
            submit_threshold_enabled: false,
            withdrawal_delay_epochs: 80,
            delegation_lower_bound: 0,
            reward_distribution_lower_bound: 0,
            min_reward_distribution: 0,
            protocol_fee_bps: 1000,
            insurance_fee_bps: 5000,
            pool_retention_bps: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Commission applied to operators without a per-operator override.
    pub default_commission_bps: u16,
    /// Delegation ceiling for operators without a per-operator override.
    pub default_max_delegation: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_commission_bps: 500,
            default_max_delegation: u64::MAX,
        }
    }
}

impl ProtocolConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str::<Self>(&contents)?)
    }
}
