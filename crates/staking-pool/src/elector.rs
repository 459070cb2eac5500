//! elector adapter
//!
//! checks a controller runs before handing a stake to the elector, and the
//! messages it sends there. The elector itself is external; see
//! [`crate::sandbox::ScriptedElector`] for the test double.

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::message::{ElectorOp, Envelope, Op, StakeRequest};
use crate::types::*;

/// stake must target the election currently open, before its stake deadline,
/// and a loan must have been taken within the current validator round
pub fn check_stake_window(
    network: &NetworkConfig,
    now: Timestamp,
    stake_at: Timestamp,
    borrowed_amount: Amount,
    borrowing_time: Timestamp,
) -> Result<()> {
    if stake_at != network.elect_at() {
        return Err(Error::WronglyUsedCredit);
    }
    if now < network.elections_open_at() || now >= network.stake_deadline() {
        return Err(Error::WronglyUsedCredit);
    }
    if borrowed_amount > 0 && borrowing_time < network.validators.utime_since {
        return Err(Error::WronglyUsedCredit);
    }
    Ok(())
}

/// own funds (balance net of debt) must cover the worst fine for `stake`
pub fn check_solvency(
    network: &NetworkConfig,
    balance: Amount,
    borrowed_amount: Amount,
    stake: Amount,
) -> Result<()> {
    let own = balance.saturating_sub(borrowed_amount);
    if own < network.max_punishment(stake) {
        return Err(Error::SolvencyNotGuaranteed);
    }
    Ok(())
}

/// signed stake forwarded to the elector; the stake travels as value
pub fn new_stake_message(from: Address, network: &NetworkConfig, req: &StakeRequest) -> Envelope {
    Envelope::new(
        from,
        network.elector,
        req.stake,
        Op::Elector(ElectorOp::NewStake {
            query_id: req.query_id,
            validator_pubkey: req.validator_pubkey,
            stake_at: req.stake_at,
            max_factor: req.max_factor,
            adnl_addr: req.adnl_addr,
            signature: req.signature,
        }),
    )
}

pub fn recover_stake_message(
    from: Address,
    network: &NetworkConfig,
    query_id: QueryId,
    value: Amount,
) -> Envelope {
    Envelope::new(
        from,
        network.elector,
        value,
        Op::Elector(ElectorOp::RecoverStake { query_id }),
    )
}

/// recover queries are keyed by time, never zero
pub fn recover_query_id(now: Timestamp) -> QueryId {
    now.max(1)
}
