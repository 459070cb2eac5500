//! network configuration snapshot and per-contract parameters
//!
//! Election timing, the active validator set and the punishment table are
//! consensus state on a real network. Handlers never read them from globals:
//! they receive a [`ChainContext`] carrying the current time and a
//! [`NetworkConfig`] snapshot, so tests can drive synthetic configurations.

use scale_codec::{Decode, Encode};
use scale_info::TypeInfo;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// election timing parameters
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionTiming {
    /// length of a validation round
    pub validators_elected_for: u64,
    /// elections open this long before the next round starts
    pub elections_start_before: u64,
    /// elections close this long before the next round starts
    pub elections_end_before: u64,
    /// stake stays frozen this long after the round it secured
    pub stake_held_for: u64,
    /// stakes must reach the elector this long before elections close
    pub stake_close_margin: u64,
}

impl Default for ElectionTiming {
    fn default() -> Self {
        Self {
            validators_elected_for: 65536,
            elections_start_before: 32768,
            elections_end_before: 8192,
            stake_held_for: 32768,
            stake_close_margin: 600,
        }
    }
}

/// the currently active validator set
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSetInfo {
    pub utime_since: Timestamp,
    pub utime_until: Timestamp,
    pub hash: H256,
}

impl Default for ValidatorSetInfo {
    fn default() -> Self {
        Self {
            utime_since: 0,
            utime_until: 65536,
            hash: H256::digest(b"validator-set-0"),
        }
    }
}

/// validator punishment table
///
/// multipliers are fixed point over 256, proportional fines over 2^32
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentConfig {
    pub default_flat_fine: Amount,
    pub default_proportional_fine: u32,
    pub severity_flat_mult: u16,
    pub severity_proportional_mult: u16,
    pub long_flat_mult: u16,
    pub long_proportional_mult: u16,
    pub medium_flat_mult: u16,
    pub medium_proportional_mult: u16,
}

impl Default for PunishmentConfig {
    fn default() -> Self {
        Self {
            default_flat_fine: 101 * COIN,
            default_proportional_fine: 1 << 26,
            severity_flat_mult: 256,
            severity_proportional_mult: 256,
            long_flat_mult: 256,
            long_proportional_mult: 256,
            medium_flat_mult: 256,
            medium_proportional_mult: 256,
        }
    }
}

/// consensus configuration visible to contracts
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    pub elector: Address,
    pub min_stake: Amount,
    pub elections: ElectionTiming,
    pub validators: ValidatorSetInfo,
    pub punishment: PunishmentConfig,
}

impl NetworkConfig {
    /// start of the round currently being elected
    pub fn elect_at(&self) -> Timestamp {
        self.validators.utime_until
    }

    pub fn elections_open_at(&self) -> Timestamp {
        self.elect_at().saturating_sub(self.elections.elections_start_before)
    }

    pub fn elections_close_at(&self) -> Timestamp {
        self.elect_at().saturating_sub(self.elections.elections_end_before)
    }

    /// last moment a stake may be sent for the open election
    pub fn stake_deadline(&self) -> Timestamp {
        self.elections_close_at().saturating_sub(self.elections.stake_close_margin)
    }

    /// worst-case fine for a validator staking `stake`
    pub fn max_punishment(&self, stake: Amount) -> Amount {
        let p = &self.punishment;
        let worst_flat = p.long_flat_mult.max(p.medium_flat_mult) as u128;
        let worst_prop = p.long_proportional_mult.max(p.medium_proportional_mult) as u128;

        let mut fine = p.default_flat_fine;
        fine = fine.saturating_mul(p.severity_flat_mult as u128) >> 8;
        fine = fine.saturating_mul(worst_flat) >> 8;

        let mut part = p.default_proportional_fine as u128;
        part = (part * p.severity_proportional_mult as u128) >> 8;
        part = (part * worst_prop) >> 8;

        let proportional = stake.saturating_mul(part) >> 32;
        stake.min(fine.saturating_add(proportional))
    }
}

/// capability the execution environment hands to every handler
pub trait ChainContext {
    fn now(&self) -> Timestamp;
    fn network(&self) -> &NetworkConfig;
}

/// plain context snapshot
#[derive(Clone, Debug)]
pub struct Context<'a> {
    pub now: Timestamp,
    pub network: &'a NetworkConfig,
}

impl<'a> Context<'a> {
    pub fn new(now: Timestamp, network: &'a NetworkConfig) -> Self {
        Self { now, network }
    }
}

impl ChainContext for Context<'_> {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn network(&self) -> &NetworkConfig {
        self.network
    }
}

/// economic parameters of a controller, fixed at deploy time
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerParams {
    /// balance that must always stay on the controller
    pub min_storage: Amount,
    /// value the elector keeps per stake operation
    pub elector_op_value: Amount,
    /// paid to a third party refreshing an overdue validator set hash
    pub hash_update_fine: Amount,
    /// hash updates reserved for in every stake
    pub hash_update_allowance: u8,
    /// paid to a third party recovering an abandoned stake
    pub stake_recover_fine: Amount,
    /// seconds after a validator set change before a third party may refresh it
    pub hash_update_grace: u64,
    /// seconds after the hold period before a third party may recover
    pub stake_recover_grace: u64,
    /// validator set changes that must be observed before recovery
    pub required_set_changes: u8,
    /// recover requests allowed per stake, retries included
    pub recover_attempt_limit: u8,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            min_storage: 2 * COIN,
            elector_op_value: COIN,
            hash_update_fine: 10 * COIN,
            hash_update_allowance: 2,
            stake_recover_fine: 10 * COIN,
            hash_update_grace: 600,
            stake_recover_grace: 3600,
            required_set_changes: 2,
            recover_attempt_limit: 3,
        }
    }
}

impl ControllerParams {
    /// reserve kept out of every stake for fines that may fall due
    pub fn fine_exposure(&self, missed_hash_updates: u8) -> Amount {
        let updates = self.hash_update_allowance as u128 + missed_hash_updates as u128;
        self.hash_update_fine.saturating_mul(updates).saturating_add(self.stake_recover_fine)
    }
}

/// initial pool parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub interest_rate: u32,
    pub min_loan_per_validator: Amount,
    pub max_loan_per_validator: Amount,
    pub disbalance_tolerance: u8,
    pub credit_start_prior_elections_end: u64,
    pub min_storage: Amount,
    pub controller_params: ControllerParams,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            // ~1% per round
            interest_rate: 655,
            min_loan_per_validator: 10_000 * COIN,
            max_loan_per_validator: 1_000_000 * COIN,
            disbalance_tolerance: 30,
            credit_start_prior_elections_end: 24576,
            min_storage: 10 * COIN,
            controller_params: ControllerParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_election_windows() {
        let net = NetworkConfig::default();

        assert_eq!(net.elect_at(), 65536);
        assert_eq!(net.elections_open_at(), 32768);
        assert_eq!(net.elections_close_at(), 57344);
        assert_eq!(net.stake_deadline(), 56744);
    }

    #[test]
    fn test_max_punishment_default_table() {
        let net = NetworkConfig::default();
        let stake = 100_000 * COIN;

        // flat 101 coins + stake / 64
        let expected = 101 * COIN + stake / 64;
        assert_eq!(net.max_punishment(stake), expected);
    }

    #[test]
    fn test_max_punishment_capped_by_stake() {
        let net = NetworkConfig::default();
        assert_eq!(net.max_punishment(50 * COIN), 50 * COIN);
    }

    #[test]
    fn test_max_punishment_uses_worst_interval() {
        let mut net = NetworkConfig::default();
        net.punishment.default_proportional_fine = 0;
        net.punishment.medium_flat_mult = 512;

        assert_eq!(net.max_punishment(1_000_000 * COIN), 202 * COIN);
    }

    #[test]
    fn test_fine_exposure_grows_with_misses() {
        let params = ControllerParams::default();
        assert_eq!(params.fine_exposure(0), 30 * COIN);
        assert_eq!(params.fine_exposure(3), 60 * COIN);
    }

    #[test]
    fn test_network_config_json() {
        let net = NetworkConfig::default();
        let json = serde_json::to_string(&net).unwrap();
        let back: NetworkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, net);
    }
}
