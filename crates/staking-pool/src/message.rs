//! messages exchanged between pool, controllers, elector and wallets
//!
//! delivery is asynchronous and at most once; a failed message carrying value
//! comes back to its sender as [`Op::Bounced`].

use scale_codec::{Decode, Encode};
use scale_info::TypeInfo;

use crate::config::ControllerParams;
use crate::controller::ControllerStatic;
use crate::ledger::RoundSummary;
use crate::types::*;

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub struct Envelope {
    pub src: Address,
    pub dest: Address,
    /// coins attached
    pub value: Amount,
    /// return the value to `src` if the receiver rejects
    pub bounce: bool,
    pub op: Op,
}

impl Envelope {
    pub fn new(src: Address, dest: Address, value: Amount, op: Op) -> Self {
        Self { src, dest, value, bounce: true, op }
    }

    /// plain value transfer that never bounces
    pub fn transfer(src: Address, dest: Address, value: Amount) -> Self {
        Self { src, dest, value, bounce: false, op: Op::Transfer }
    }

    pub fn notify(src: Address, dest: Address, notification: Notification) -> Self {
        Self { src, dest, value: 0, bounce: false, op: Op::Notify(notification) }
    }

    /// the bounce for this message, if it should produce one
    pub fn bounced(&self) -> Option<Envelope> {
        if !self.bounce || matches!(self.op, Op::Bounced(_)) {
            return None;
        }
        Some(Envelope {
            src: self.dest,
            dest: self.src,
            value: self.value,
            bounce: false,
            op: Op::Bounced(self.op.tag()),
        })
    }
}

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub enum Op {
    /// value only
    Transfer,
    Pool(PoolOp),
    Controller(ControllerOp),
    Elector(ElectorOp),
    /// create a controller at the destination address
    Deploy(ControllerInit),
    /// opaque signal to an external collaborator
    Notify(Notification),
    /// returned message
    Bounced(OpTag),
}

impl Op {
    pub fn tag(&self) -> OpTag {
        match self {
            Op::Pool(PoolOp::RequestLoan { .. }) => OpTag::RequestLoan,
            Op::Pool(PoolOp::LoanRepayment { .. }) => OpTag::LoanRepayment,
            Op::Controller(ControllerOp::Credit { .. }) => OpTag::Credit,
            Op::Elector(ElectorOp::NewStake { .. }) => OpTag::NewStake,
            Op::Elector(ElectorOp::RecoverStake { .. }) => OpTag::RecoverStake,
            _ => OpTag::Other,
        }
    }
}

/// identifies which message bounced
#[derive(Clone, Copy, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub enum OpTag {
    RequestLoan,
    Credit,
    NewStake,
    RecoverStake,
    LoanRepayment,
    Other,
}

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub enum PoolOp {
    /// validator asks the pool to deploy its controller
    DeployController { controller_id: u32 },
    /// controller forwards a loan request
    RequestLoan {
        controller_id: u32,
        validator: Address,
        min_loan: Amount,
        max_loan: Amount,
        max_interest: u32,
    },
    /// controller returns principal plus interest (as value)
    LoanRepayment { controller_id: u32, validator: Address },
    Deposit,
    Withdraw { amount: Amount, recipient: Address },
    SetInterest { rate: u32 },
    SetOperationalParams {
        min_loan: Amount,
        max_loan: Amount,
        disbalance_tolerance: u8,
        credit_start_prior_elections_end: u64,
    },
    Halt,
    Unhalt,
    TopUp,
}

/// signed stake payload as the validator prepares it
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub struct StakeRequest {
    pub query_id: QueryId,
    pub stake: Amount,
    pub validator_pubkey: PublicKey,
    pub stake_at: Timestamp,
    pub max_factor: u32,
    pub adnl_addr: H256,
    pub signature: Signature,
}

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub enum ControllerOp {
    // from validator
    RequestLoan { min_loan: Amount, max_loan: Amount, max_interest: u32 },
    NewStake(StakeRequest),
    ReturnUnusedLoan,
    WithdrawValidator { amount: Amount },

    // from anyone
    UpdateValidatorHash,
    RecoverStake,
    TopUp,

    // from pool
    Credit { amount: Amount },

    // from governance roles
    Approve,
    Disapprove,
    Halt,
    Unhalt,

    // from elector
    NewStakeOk { query_id: QueryId },
    NewStakeError { query_id: QueryId, reason: u32 },
    RecoverStakeOk { query_id: QueryId },
    RecoverStakeError { query_id: QueryId, reason: u32 },
}

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub enum ElectorOp {
    /// stake is the attached value
    NewStake {
        query_id: QueryId,
        validator_pubkey: PublicKey,
        stake_at: Timestamp,
        max_factor: u32,
        adnl_addr: H256,
        signature: Signature,
    },
    RecoverStake { query_id: QueryId },
}

/// static configuration a pool hands to a freshly deployed controller
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub struct ControllerInit {
    pub static_data: ControllerStatic,
    pub params: ControllerParams,
}

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub enum Notification {
    /// sent to interest manager and governor when a round rotates out
    RoundFinalized(RoundSummary),
    DepositAccepted { depositor: Address, amount: Amount },
    WithdrawalSettled { recipient: Address, amount: Amount },
}
