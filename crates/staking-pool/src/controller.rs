//! per-validator controller
//!
//! custody contract between pool liquidity and the elector. It borrows from
//! the pool, stakes with the elector, waits out the hold period, recovers the
//! stake and repays exactly its debt.
//!
//! ```text
//! Rest -> SentBorrowingRequest -> Rest (credited)
//! Rest -> SentStakeRequest -> FundsStaken -> SentRecoverRequest -> Rest
//!                                                               \-> Insolvent
//! ```
//!
//! while the elector still holds the stake, recovery may be retried from
//! SentRecoverRequest or Insolvent, up to `recover_attempt_limit` requests.
//!
//! handlers run on a copy of the state that is committed only on success, so
//! a rejected message leaves the encoded state unchanged and sends nothing.

use alloc::vec::Vec;
use scale_codec::{Decode, Encode};
use scale_info::TypeInfo;
use tracing::{debug, info, warn};

use crate::config::{ChainContext, ControllerParams};
use crate::elector;
use crate::error::{Error, Result};
use crate::gate::{Role, RoleGate};
use crate::message::*;
use crate::types::*;

#[derive(Clone, Copy, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Rest,
    SentBorrowingRequest,
    SentStakeRequest,
    FundsStaken,
    SentRecoverRequest,
    /// debt not covered after recovery, or recovery failed; cleared by a top-up
    /// or a retried recovery
    Insolvent,
}

impl ControllerState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::SentBorrowingRequest => "sent_borrowing_request",
            Self::SentStakeRequest => "sent_stake_request",
            Self::FundsStaken => "funds_staken",
            Self::SentRecoverRequest => "sent_recover_request",
            Self::Insolvent => "insolvent",
        }
    }
}

/// identity of a controller; its address is derived from this
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub struct ControllerStatic {
    pub controller_id: u32,
    pub validator: Address,
    pub pool: Address,
    pub governor: Address,
    pub approver: Address,
    pub halter: Address,
}

impl ControllerStatic {
    pub fn address(&self) -> Address {
        Address::derive(b"controller", self)
    }
}

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub struct Controller {
    pub address: Address,
    pub static_data: ControllerStatic,
    pub params: ControllerParams,
    pub state: ControllerState,
    pub approved: bool,
    pub halted: bool,
    pub balance: Amount,
    /// principal plus interest owed to the pool
    pub borrowed_amount: Amount,
    pub borrowing_time: Timestamp,
    pub stake_sent: Amount,
    pub stake_at: Timestamp,
    pub stake_held_for: u64,
    pub validator_set_hash: H256,
    pub validator_set_change_count: u8,
    pub validator_set_change_time: Timestamp,
    /// hash refreshes third parties had to do for the validator
    pub missed_hash_updates: u8,
    /// recover requests sent for the current stake
    pub recover_attempts: u8,
}

impl Controller {
    pub fn new(init: ControllerInit) -> Self {
        Self {
            address: init.static_data.address(),
            static_data: init.static_data,
            params: init.params,
            state: ControllerState::Rest,
            approved: false,
            halted: false,
            balance: 0,
            borrowed_amount: 0,
            borrowing_time: 0,
            stake_sent: 0,
            stake_at: 0,
            stake_held_for: 0,
            validator_set_hash: H256::zero(),
            validator_set_change_count: 0,
            validator_set_change_time: 0,
            missed_hash_updates: 0,
            recover_attempts: 0,
        }
    }

    /// instantiate from a deploy message sent by the owning pool
    pub fn deploy(msg: &Envelope) -> Result<Self> {
        let Op::Deploy(init) = &msg.op else {
            return Err(Error::UnknownOperation);
        };
        if msg.src != init.static_data.pool || msg.dest != init.static_data.address() {
            return Err(Error::WrongSender);
        }
        let mut controller = Self::new(init.clone());
        controller.balance = msg.value;
        debug!(controller = %controller.address, validator = %init.static_data.validator, "deployed");
        Ok(controller)
    }

    pub fn state_bytes(&self) -> Vec<u8> {
        self.encode()
    }

    pub fn state_hash(&self) -> H256 {
        H256::digest(&self.encode())
    }

    /// handle one inbound message; state is only written when `Ok`
    pub fn receive(&mut self, ctx: &impl ChainContext, msg: &Envelope) -> Result<Vec<Envelope>> {
        let mut next = self.clone();
        let out = next.dispatch(ctx, msg)?;
        *self = next;
        Ok(out)
    }

    fn dispatch(&mut self, ctx: &impl ChainContext, msg: &Envelope) -> Result<Vec<Envelope>> {
        self.balance += msg.value;
        let src = &msg.src;

        match &msg.op {
            Op::Transfer => Ok(Vec::new()),
            Op::Bounced(tag) => self.apply_bounce(ctx, src, *tag),
            Op::Deploy(init) => self.apply_redeploy(src, init),
            Op::Controller(op) => match op {
                ControllerOp::RequestLoan { min_loan, max_loan, max_interest } => {
                    self.apply_request_loan(src, *min_loan, *max_loan, *max_interest)
                }
                ControllerOp::Credit { amount } => self.apply_credit(ctx, src, *amount),
                ControllerOp::NewStake(req) => self.apply_new_stake(ctx, msg, req),
                ControllerOp::NewStakeOk { .. } => self.apply_new_stake_ok(ctx, src),
                ControllerOp::NewStakeError { reason, .. } => {
                    self.apply_new_stake_error(ctx, src, *reason)
                }
                ControllerOp::UpdateValidatorHash => self.apply_update_hash(ctx, src),
                ControllerOp::RecoverStake => self.apply_recover_stake(ctx, src),
                ControllerOp::RecoverStakeOk { .. } => self.apply_recover_stake_ok(ctx, src),
                ControllerOp::RecoverStakeError { reason, .. } => {
                    self.apply_recover_stake_error(ctx, src, *reason)
                }
                ControllerOp::ReturnUnusedLoan => self.apply_return_unused_loan(src),
                ControllerOp::WithdrawValidator { amount } => {
                    self.apply_withdraw_validator(src, *amount)
                }
                ControllerOp::TopUp => self.apply_top_up(),
                ControllerOp::Approve => self.apply_approval(src, true),
                ControllerOp::Disapprove => self.apply_approval(src, false),
                ControllerOp::Halt => {
                    self.require_role(src, Role::Halter)?;
                    self.halted = true;
                    Ok(Vec::new())
                }
                ControllerOp::Unhalt => {
                    self.require_role(src, Role::Governor)?;
                    self.halted = false;
                    Ok(Vec::new())
                }
            },
            _ => Err(Error::UnknownOperation),
        }
    }

    fn require_state(&self, expected: ControllerState) -> Result<()> {
        if self.state != expected {
            return Err(Error::WrongState(self.state.name()));
        }
        Ok(())
    }

    fn require_elector(&self, ctx: &impl ChainContext, src: &Address) -> Result<()> {
        if *src != ctx.network().elector {
            return Err(Error::WrongSender);
        }
        Ok(())
    }

    /// balance above the storage reserve
    fn spendable(&self) -> Amount {
        self.balance.saturating_sub(self.params.min_storage)
    }

    fn pay(&mut self, to: Address, amount: Amount) -> Envelope {
        self.balance -= amount;
        Envelope::transfer(self.address, to, amount)
    }

    fn apply_request_loan(
        &mut self,
        src: &Address,
        min_loan: Amount,
        max_loan: Amount,
        max_interest: u32,
    ) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::Validator)?;
        self.require_not_halted()?;
        if !self.approved {
            return Err(Error::NotApproved);
        }
        self.require_state(ControllerState::Rest)?;
        if self.borrowed_amount > 0 {
            return Err(Error::MultipleLoansProhibited);
        }
        if min_loan > max_loan {
            return Err(Error::ContradictingBorrowingParams);
        }

        self.state = ControllerState::SentBorrowingRequest;
        debug!(controller = %self.address, min_loan, max_loan, "loan requested");

        Ok(vec![Envelope::new(
            self.address,
            self.static_data.pool,
            0,
            Op::Pool(PoolOp::RequestLoan {
                controller_id: self.static_data.controller_id,
                validator: self.static_data.validator,
                min_loan,
                max_loan,
                max_interest,
            }),
        )])
    }

    fn apply_credit(&mut self, ctx: &impl ChainContext, src: &Address, amount: Amount) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::Pool)?;
        self.require_state(ControllerState::SentBorrowingRequest)?;

        self.borrowed_amount += amount;
        self.borrowing_time = ctx.now();
        self.state = ControllerState::Rest;
        info!(controller = %self.address, debt = amount, "credited");
        Ok(Vec::new())
    }

    fn apply_new_stake(
        &mut self,
        ctx: &impl ChainContext,
        msg: &Envelope,
        req: &StakeRequest,
    ) -> Result<Vec<Envelope>> {
        let network = ctx.network();

        self.require_role(&msg.src, Role::Validator)?;
        self.require_not_halted()?;
        self.require_state(ControllerState::Rest)?;

        if msg.value <= self.params.elector_op_value {
            return Err(Error::StakeRequestValueTooLow);
        }
        if req.stake < network.min_stake {
            return Err(Error::ValueLtMinimum);
        }
        let affordable = self
            .spendable()
            .saturating_sub(self.params.fine_exposure(self.missed_hash_updates));
        if req.stake > affordable {
            return Err(Error::ValueTooHigh);
        }
        if req.query_id == 0 {
            return Err(Error::ZeroQueryId);
        }
        elector::check_stake_window(
            network,
            ctx.now(),
            req.stake_at,
            self.borrowed_amount,
            self.borrowing_time,
        )?;
        elector::check_solvency(network, self.balance, self.borrowed_amount, req.stake)?;

        self.balance -= req.stake;
        self.stake_sent = req.stake;
        self.stake_at = req.stake_at;
        self.state = ControllerState::SentStakeRequest;
        info!(controller = %self.address, stake = req.stake, stake_at = req.stake_at, "stake sent");

        Ok(vec![elector::new_stake_message(self.address, network, req)])
    }

    fn apply_new_stake_ok(&mut self, ctx: &impl ChainContext, src: &Address) -> Result<Vec<Envelope>> {
        self.require_elector(ctx, src)?;
        self.require_state(ControllerState::SentStakeRequest)?;

        let network = ctx.network();
        self.stake_sent = self.stake_sent.saturating_sub(self.params.elector_op_value);
        self.validator_set_hash = network.validators.hash;
        self.validator_set_change_count = 0;
        self.validator_set_change_time = ctx.now();
        self.stake_held_for = network.elections.stake_held_for;
        self.recover_attempts = 0;
        self.state = ControllerState::FundsStaken;
        debug!(controller = %self.address, stake = self.stake_sent, "stake accepted");
        Ok(Vec::new())
    }

    fn apply_new_stake_error(&mut self, ctx: &impl ChainContext, src: &Address, reason: u32) -> Result<Vec<Envelope>> {
        self.require_elector(ctx, src)?;
        self.require_state(ControllerState::SentStakeRequest)?;

        self.clear_stake();
        self.state = ControllerState::Rest;
        debug!(controller = %self.address, reason, "stake rejected by elector");
        Ok(Vec::new())
    }

    fn apply_update_hash(&mut self, ctx: &impl ChainContext, src: &Address) -> Result<Vec<Envelope>> {
        self.require_state(ControllerState::FundsStaken)?;

        let validators = &ctx.network().validators;
        if validators.hash == self.validator_set_hash {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        if !self.check_role(src, Role::Validator) {
            if ctx.now() < validators.utime_since + self.params.hash_update_grace {
                return Err(Error::HashUpdateNotOverdue);
            }
            self.missed_hash_updates = self.missed_hash_updates.saturating_add(1);
            let fine = self.params.hash_update_fine.min(self.spendable());
            if fine > 0 {
                out.push(self.pay(*src, fine));
            }
        }

        self.validator_set_hash = validators.hash;
        self.validator_set_change_count = self.validator_set_change_count.saturating_add(1);
        self.validator_set_change_time = ctx.now();
        debug!(
            controller = %self.address,
            changes = self.validator_set_change_count,
            missed = self.missed_hash_updates,
            "validator set hash updated"
        );
        Ok(out)
    }

    /// earliest time the stake may be recovered
    pub fn recover_at(&self) -> Timestamp {
        self.stake_at + self.stake_held_for
    }

    /// the elector still holds a stake this controller may ask back
    pub fn stake_at_elector(&self) -> bool {
        match self.state {
            ControllerState::FundsStaken | ControllerState::SentRecoverRequest => true,
            ControllerState::Insolvent => self.stake_sent > 0,
            _ => false,
        }
    }

    fn apply_recover_stake(&mut self, ctx: &impl ChainContext, src: &Address) -> Result<Vec<Envelope>> {
        if !self.stake_at_elector() {
            return Err(Error::WrongState(self.state.name()));
        }

        let now = ctx.now();
        if now < self.recover_at() {
            return Err(Error::TooEarlyStakeRecoverAttemptTime);
        }
        if self.validator_set_change_count < self.params.required_set_changes {
            return Err(Error::TooEarlyStakeRecoverAttemptCount);
        }
        if self.recover_attempts >= self.params.recover_attempt_limit {
            return Err(Error::TooEarlyStakeRecoverAttemptCount);
        }

        let reward = if self.check_role(src, Role::Validator) {
            0
        } else {
            if now < self.recover_at() + self.params.stake_recover_grace {
                return Err(Error::TooEarlyStakeRecoverAttemptTime);
            }
            self.params.stake_recover_fine
        };

        let need = self.params.elector_op_value + reward;
        if self.spendable() < need {
            return Err(Error::InsufficientBalance { have: self.spendable(), need });
        }

        let op_value = self.params.elector_op_value;
        self.balance -= op_value;
        let mut out = vec![elector::recover_stake_message(
            self.address,
            ctx.network(),
            elector::recover_query_id(now),
            op_value,
        )];
        if reward > 0 {
            out.push(self.pay(*src, reward));
        }

        self.recover_attempts += 1;
        self.state = ControllerState::SentRecoverRequest;
        debug!(controller = %self.address, reward, attempt = self.recover_attempts, "stake recovery requested");
        Ok(out)
    }

    fn apply_recover_stake_ok(&mut self, ctx: &impl ChainContext, src: &Address) -> Result<Vec<Envelope>> {
        self.require_elector(ctx, src)?;
        // a late reply to an earlier attempt still brings the stake home
        if !self.stake_at_elector() {
            return Err(Error::WrongState(self.state.name()));
        }

        self.clear_stake();
        info!(controller = %self.address, balance = self.balance, debt = self.borrowed_amount, "stake recovered");
        Ok(self.settle_debt().into_iter().collect())
    }

    fn apply_recover_stake_error(
        &mut self,
        ctx: &impl ChainContext,
        src: &Address,
        reason: u32,
    ) -> Result<Vec<Envelope>> {
        self.require_elector(ctx, src)?;
        self.require_state(ControllerState::SentRecoverRequest)?;

        self.state = ControllerState::Insolvent;
        warn!(controller = %self.address, reason, "stake recovery failed");
        Ok(Vec::new())
    }

    fn apply_return_unused_loan(&mut self, src: &Address) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::Validator)?;
        self.require_state(ControllerState::Rest)?;
        if self.borrowed_amount == 0 {
            return Err(Error::NoActiveLoan);
        }
        if self.spendable() < self.borrowed_amount {
            return Err(Error::InsufficientBalance {
                have: self.spendable(),
                need: self.borrowed_amount,
            });
        }
        Ok(vec![self.repay()])
    }

    fn apply_withdraw_validator(&mut self, src: &Address, amount: Amount) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::Validator)?;
        self.require_not_halted()?;
        self.require_state(ControllerState::Rest)?;
        if self.borrowed_amount > 0 {
            return Err(Error::LoanOutstanding);
        }
        if self.spendable() < amount {
            return Err(Error::InsufficientBalance { have: self.spendable(), need: amount });
        }
        let validator = self.static_data.validator;
        Ok(vec![self.pay(validator, amount)])
    }

    fn apply_top_up(&mut self) -> Result<Vec<Envelope>> {
        if self.state != ControllerState::Insolvent {
            return Ok(Vec::new());
        }
        Ok(self.settle_debt().into_iter().collect())
    }

    /// a deploy reaching a live controller only tops it up
    fn apply_redeploy(&mut self, src: &Address, init: &ControllerInit) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::Pool)?;
        if init.static_data != self.static_data {
            return Err(Error::WrongSender);
        }
        debug!(controller = %self.address, balance = self.balance, "redeploy");
        self.apply_top_up()
    }

    fn apply_approval(&mut self, src: &Address, approved: bool) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::Approver)?;
        self.approved = approved;
        Ok(Vec::new())
    }

    fn apply_bounce(&mut self, ctx: &impl ChainContext, src: &Address, tag: OpTag) -> Result<Vec<Envelope>> {
        match tag {
            OpTag::RequestLoan => {
                self.require_role(src, Role::Pool)?;
                if self.state == ControllerState::SentBorrowingRequest {
                    self.state = ControllerState::Rest;
                }
            }
            OpTag::NewStake => {
                self.require_elector(ctx, src)?;
                if self.state == ControllerState::SentStakeRequest {
                    self.clear_stake();
                    self.state = ControllerState::Rest;
                }
            }
            OpTag::RecoverStake => {
                self.require_elector(ctx, src)?;
                if self.state == ControllerState::SentRecoverRequest {
                    self.recover_attempts = self.recover_attempts.saturating_sub(1);
                    self.state = ControllerState::FundsStaken;
                }
            }
            // value is already back on the balance
            OpTag::LoanRepayment | OpTag::Credit | OpTag::Other => {}
        }
        debug!(controller = %self.address, ?tag, state = self.state.name(), "bounce");
        Ok(Vec::new())
    }

    fn clear_stake(&mut self) {
        self.stake_sent = 0;
        self.stake_at = 0;
        self.stake_held_for = 0;
        self.validator_set_change_count = 0;
        self.recover_attempts = 0;
    }

    /// state after the debt is covered: back to waiting while a stake is out
    fn settled_state(&self) -> ControllerState {
        if self.stake_sent > 0 {
            ControllerState::FundsStaken
        } else {
            ControllerState::Rest
        }
    }

    /// repay the debt if the balance allows, otherwise become insolvent
    fn settle_debt(&mut self) -> Option<Envelope> {
        if self.borrowed_amount == 0 {
            self.state = self.settled_state();
            return None;
        }
        if self.spendable() < self.borrowed_amount {
            self.state = ControllerState::Insolvent;
            warn!(
                controller = %self.address,
                balance = self.balance,
                debt = self.borrowed_amount,
                "controller insolvent"
            );
            return None;
        }
        self.state = self.settled_state();
        Some(self.repay())
    }

    /// send exactly the debt back to the pool
    fn repay(&mut self) -> Envelope {
        let amount = self.borrowed_amount;
        self.balance -= amount;
        self.borrowed_amount = 0;
        self.borrowing_time = 0;
        info!(controller = %self.address, amount, "loan repaid");

        Envelope::new(
            self.address,
            self.static_data.pool,
            amount,
            Op::Pool(PoolOp::LoanRepayment {
                controller_id: self.static_data.controller_id,
                validator: self.static_data.validator,
            }),
        )
    }
}

impl RoleGate for Controller {
    fn check_role(&self, sender: &Address, role: Role) -> bool {
        let s = &self.static_data;
        match role {
            Role::Validator => *sender == s.validator,
            Role::Pool => *sender == s.pool,
            Role::Governor => *sender == s.governor,
            Role::Approver => *sender == s.approver,
            Role::Halter => *sender == s.halter,
            Role::InterestManager | Role::Payout | Role::Elector => false,
        }
    }

    fn is_halted(&self) -> bool {
        self.halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Context, NetworkConfig};

    const VALIDATOR: [u8; 32] = [1u8; 32];
    const POOL: [u8; 32] = [2u8; 32];
    const GOVERNOR: [u8; 32] = [3u8; 32];
    const APPROVER: [u8; 32] = [4u8; 32];
    const HALTER: [u8; 32] = [5u8; 32];
    const ELECTOR: [u8; 32] = [0xee; 32];
    const STRANGER: [u8; 32] = [9u8; 32];

    fn addr(raw: [u8; 32]) -> Address {
        Address::from_raw(raw)
    }

    fn mock_network() -> NetworkConfig {
        NetworkConfig {
            elector: addr(ELECTOR),
            min_stake: 10_000 * COIN,
            ..Default::default()
        }
    }

    fn mock_controller() -> Controller {
        let mut c = Controller::new(ControllerInit {
            static_data: ControllerStatic {
                controller_id: 0,
                validator: addr(VALIDATOR),
                pool: addr(POOL),
                governor: addr(GOVERNOR),
                approver: addr(APPROVER),
                halter: addr(HALTER),
            },
            params: ControllerParams::default(),
        });
        c.approved = true;
        c
    }

    fn to(c: &Controller, from: [u8; 32], value: Amount, op: ControllerOp) -> Envelope {
        Envelope::new(addr(from), c.address, value, Op::Controller(op))
    }

    fn stake_request(net: &NetworkConfig, stake: Amount) -> StakeRequest {
        StakeRequest {
            query_id: 1,
            stake,
            validator_pubkey: PublicKey::from_raw([7u8; 32]),
            stake_at: net.elect_at(),
            max_factor: 1 << 16,
            adnl_addr: H256::zero(),
            signature: Signature::default(),
        }
    }

    /// controller credited with `loan` debt and `own` validator funds
    fn credited(net: &NetworkConfig, loan: Amount, own: Amount) -> Controller {
        let ctx = Context::new(40_000, net);
        let mut c = mock_controller();
        c.receive(&ctx, &to(&c, VALIDATOR, own, ControllerOp::TopUp)).unwrap();
        let req = to(&c, VALIDATOR, 0, ControllerOp::RequestLoan { min_loan: 0, max_loan: loan, max_interest: 1000 });
        c.receive(&ctx, &req).unwrap();
        c.receive(&ctx, &to(&c, POOL, loan, ControllerOp::Credit { amount: loan })).unwrap();
        c
    }

    fn staked(net: &NetworkConfig) -> Controller {
        let ctx = Context::new(40_000, net);
        let mut c = credited(net, 100_000 * COIN, 5_000 * COIN);
        let stake = stake_request(net, 100_000 * COIN);
        c.receive(&ctx, &to(&c, VALIDATOR, 2 * COIN, ControllerOp::NewStake(stake))).unwrap();
        c.receive(&ctx, &to(&c, ELECTOR, 0, ControllerOp::NewStakeOk { query_id: 1 })).unwrap();
        c
    }

    #[test]
    fn test_request_loan_and_credit() {
        let net = mock_network();
        let ctx = Context::new(40_000, &net);
        let mut c = mock_controller();

        let out = c
            .receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RequestLoan { min_loan: 1, max_loan: 10, max_interest: 700 }))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dest, addr(POOL));
        assert_eq!(c.state, ControllerState::SentBorrowingRequest);

        // only the pool can credit
        let before = c.state_bytes();
        let err = c.receive(&ctx, &to(&c, STRANGER, 10, ControllerOp::Credit { amount: 11 }));
        assert_eq!(err, Err(Error::WrongSender));
        assert_eq!(c.state_bytes(), before);

        c.receive(&ctx, &to(&c, POOL, 10, ControllerOp::Credit { amount: 11 })).unwrap();
        assert_eq!(c.state, ControllerState::Rest);
        assert_eq!(c.borrowed_amount, 11);
        assert_eq!(c.borrowing_time, 40_000);
        assert_eq!(c.balance, 10);
    }

    #[test]
    fn test_request_loan_preconditions() {
        let net = mock_network();
        let ctx = Context::new(40_000, &net);
        let op = || ControllerOp::RequestLoan { min_loan: 1, max_loan: 10, max_interest: 700 };

        let mut c = mock_controller();
        assert_eq!(c.receive(&ctx, &to(&c, STRANGER, 0, op())), Err(Error::WrongSender));

        c.approved = false;
        assert_eq!(c.receive(&ctx, &to(&c, VALIDATOR, 0, op())), Err(Error::NotApproved));

        c.approved = true;
        c.halted = true;
        assert_eq!(c.receive(&ctx, &to(&c, VALIDATOR, 0, op())), Err(Error::Halted));

        let mut c = credited(&net, 100, 0);
        assert_eq!(c.receive(&ctx, &to(&c, VALIDATOR, 0, op())), Err(Error::MultipleLoansProhibited));
    }

    #[test]
    fn test_new_stake_wrong_sender_sends_nothing() {
        let net = mock_network();
        let ctx = Context::new(40_000, &net);
        let mut c = mock_controller();
        let before = c.state_bytes();

        let msg = to(&c, STRANGER, 2 * COIN, ControllerOp::NewStake(stake_request(&net, 10_000 * COIN)));
        assert_eq!(c.receive(&ctx, &msg), Err(Error::WrongSender));
        assert_eq!(c.state_bytes(), before);
    }

    #[test]
    fn test_new_stake_check_order() {
        let net = mock_network();
        let ctx = Context::new(40_000, &net);
        let c = credited(&net, 100_000 * COIN, 5_000 * COIN);

        let attempt = |value: Amount, req: StakeRequest| {
            let mut c = c.clone();
            let before = c.state_bytes();
            let result = c.receive(&ctx, &to(&c, VALIDATOR, value, ControllerOp::NewStake(req)));
            assert_eq!(c.state_bytes(), before);
            result
        };

        let ok = stake_request(&net, 100_000 * COIN);
        assert_eq!(attempt(COIN, ok.clone()), Err(Error::StakeRequestValueTooLow));
        assert_eq!(
            attempt(2 * COIN, stake_request(&net, 10_000 * COIN - 1)),
            Err(Error::ValueLtMinimum)
        );
        assert_eq!(attempt(2 * COIN, stake_request(&net, 105_000 * COIN)), Err(Error::ValueTooHigh));
        assert_eq!(
            attempt(2 * COIN, StakeRequest { query_id: 0, ..ok.clone() }),
            Err(Error::ZeroQueryId)
        );
        assert_eq!(
            attempt(2 * COIN, StakeRequest { stake_at: 1, ..ok.clone() }),
            Err(Error::WronglyUsedCredit)
        );
    }

    #[test]
    fn test_new_stake_solvency() {
        let net = mock_network();
        let ctx = Context::new(40_000, &net);
        // own funds far below the worst fine of a 100k stake
        let mut c = credited(&net, 100_000 * COIN, 100 * COIN);
        let msg = to(&c, VALIDATOR, 2 * COIN, ControllerOp::NewStake(stake_request(&net, 50_000 * COIN)));
        assert_eq!(c.receive(&ctx, &msg), Err(Error::SolvencyNotGuaranteed));
    }

    #[test]
    fn test_stake_lifecycle() {
        let mut net = mock_network();
        let mut c = staked(&net);
        assert_eq!(c.state, ControllerState::FundsStaken);
        assert_eq!(c.stake_sent, 99_999 * COIN);
        assert_eq!(c.stake_held_for, net.elections.stake_held_for);

        // too early
        let ctx = Context::new(c.recover_at() - 1, &net);
        assert_eq!(
            c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)),
            Err(Error::TooEarlyStakeRecoverAttemptTime)
        );

        // time reached, validator set never changed
        let ctx = Context::new(c.recover_at(), &net);
        assert_eq!(
            c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)),
            Err(Error::TooEarlyStakeRecoverAttemptCount)
        );

        for round in 1..=2u64 {
            net.validators.utime_since = round * 65536;
            net.validators.utime_until = (round + 1) * 65536;
            net.validators.hash = H256::digest(&round.to_le_bytes());
            let ctx = Context::new(net.validators.utime_since, &net);
            c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::UpdateValidatorHash)).unwrap();
        }
        assert_eq!(c.validator_set_change_count, 2);
        assert_eq!(c.missed_hash_updates, 0);

        let ctx = Context::new(c.recover_at().max(net.validators.utime_since), &net);
        let out = c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dest, addr(ELECTOR));
        assert_eq!(c.state, ControllerState::SentRecoverRequest);

        // recovered with reward; repays exactly the debt
        let debt = c.borrowed_amount;
        let recovered = 101_000 * COIN;
        let out = c
            .receive(&ctx, &to(&c, ELECTOR, recovered, ControllerOp::RecoverStakeOk { query_id: 1 }))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dest, addr(POOL));
        assert_eq!(out[0].value, debt);
        assert_eq!(c.state, ControllerState::Rest);
        assert_eq!(c.borrowed_amount, 0);
    }

    #[test]
    fn test_hash_update_by_third_party() {
        let mut net = mock_network();
        let mut c = staked(&net);

        net.validators.utime_since = 65536;
        net.validators.utime_until = 131072;
        net.validators.hash = H256::digest(b"next");

        let ctx = Context::new(65536 + 10, &net);
        assert_eq!(
            c.receive(&ctx, &to(&c, STRANGER, 0, ControllerOp::UpdateValidatorHash)),
            Err(Error::HashUpdateNotOverdue)
        );

        let ctx = Context::new(65536 + c.params.hash_update_grace, &net);
        let out = c.receive(&ctx, &to(&c, STRANGER, 0, ControllerOp::UpdateValidatorHash)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dest, addr(STRANGER));
        assert_eq!(out[0].value, c.params.hash_update_fine);
        assert_eq!(c.missed_hash_updates, 1);
        assert_eq!(c.validator_set_change_count, 1);

        // same hash again is a no-op
        let before = c.state_bytes();
        let out = c.receive(&ctx, &to(&c, STRANGER, 0, ControllerOp::UpdateValidatorHash)).unwrap();
        assert!(out.is_empty());
        assert_eq!(c.state_bytes(), before);
    }

    #[test]
    fn test_recover_shortfall_is_insolvent_until_top_up() {
        let mut net = mock_network();
        let mut c = staked(&net);
        c.validator_set_change_count = 2;
        net.validators.hash = c.validator_set_hash;

        let ctx = Context::new(c.recover_at(), &net);
        c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)).unwrap();

        // punished: recovered less than owed
        let out = c
            .receive(&ctx, &to(&c, ELECTOR, 90_000 * COIN, ControllerOp::RecoverStakeOk { query_id: 1 }))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(c.state, ControllerState::Insolvent);

        // a partial top-up is accepted but changes nothing else
        c.receive(&ctx, &to(&c, STRANGER, COIN, ControllerOp::TopUp)).unwrap();
        assert_eq!(c.state, ControllerState::Insolvent);

        let debt = c.borrowed_amount;
        let out = c.receive(&ctx, &to(&c, VALIDATOR, 20_000 * COIN, ControllerOp::TopUp)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, debt);
        assert_eq!(c.state, ControllerState::Rest);
    }

    #[test]
    fn test_third_party_recover_after_grace() {
        let net = mock_network();
        let mut c = staked(&net);
        c.validator_set_change_count = 2;

        let ctx = Context::new(c.recover_at(), &net);
        assert_eq!(
            c.receive(&ctx, &to(&c, STRANGER, 0, ControllerOp::RecoverStake)),
            Err(Error::TooEarlyStakeRecoverAttemptTime)
        );

        let ctx = Context::new(c.recover_at() + c.params.stake_recover_grace, &net);
        let out = c.receive(&ctx, &to(&c, STRANGER, 0, ControllerOp::RecoverStake)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].dest, addr(STRANGER));
        assert_eq!(out[1].value, c.params.stake_recover_fine);
    }

    #[test]
    fn test_elector_replies_need_elector() {
        let net = mock_network();
        let ctx = Context::new(40_000, &net);
        let mut c = credited(&net, 100_000 * COIN, 5_000 * COIN);
        let stake = stake_request(&net, 100_000 * COIN);
        c.receive(&ctx, &to(&c, VALIDATOR, 2 * COIN, ControllerOp::NewStake(stake))).unwrap();

        assert_eq!(
            c.receive(&ctx, &to(&c, STRANGER, 0, ControllerOp::NewStakeOk { query_id: 1 })),
            Err(Error::WrongSender)
        );

        let refund = 100_000 * COIN;
        c.receive(&ctx, &to(&c, ELECTOR, refund, ControllerOp::NewStakeError { query_id: 1, reason: 3 }))
            .unwrap();
        assert_eq!(c.state, ControllerState::Rest);
        assert_eq!(c.stake_sent, 0);
        // loan stays outstanding
        assert!(c.borrowed_amount > 0);
    }

    #[test]
    fn test_bounces_reset_pending_state() {
        let net = mock_network();
        let ctx = Context::new(40_000, &net);
        let mut c = mock_controller();
        let op = ControllerOp::RequestLoan { min_loan: 1, max_loan: 10, max_interest: 700 };
        c.receive(&ctx, &to(&c, VALIDATOR, 0, op)).unwrap();

        let bounce = Envelope {
            src: addr(POOL),
            dest: c.address,
            value: 0,
            bounce: false,
            op: Op::Bounced(OpTag::RequestLoan),
        };
        c.receive(&ctx, &bounce).unwrap();
        assert_eq!(c.state, ControllerState::Rest);

        let mut c = credited(&net, 100_000 * COIN, 5_000 * COIN);
        let balance = c.balance;
        let stake = stake_request(&net, 100_000 * COIN);
        c.receive(&ctx, &to(&c, VALIDATOR, 2 * COIN, ControllerOp::NewStake(stake))).unwrap();
        let bounce = Envelope {
            src: addr(ELECTOR),
            dest: c.address,
            value: 100_000 * COIN,
            bounce: false,
            op: Op::Bounced(OpTag::NewStake),
        };
        c.receive(&ctx, &bounce).unwrap();
        assert_eq!(c.state, ControllerState::Rest);
        assert_eq!(c.balance, balance + 2 * COIN);
    }

    #[test]
    fn test_withdraw_validator() {
        let net = mock_network();
        let ctx = Context::new(40_000, &net);

        let mut c = credited(&net, 1000, 50 * COIN);
        assert_eq!(
            c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::WithdrawValidator { amount: COIN })),
            Err(Error::LoanOutstanding)
        );

        c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::ReturnUnusedLoan)).unwrap();
        assert_eq!(c.borrowed_amount, 0);

        let out = c
            .receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::WithdrawValidator { amount: 48 * COIN }))
            .unwrap();
        assert_eq!(out[0].dest, addr(VALIDATOR));
        assert_eq!(c.balance, c.params.min_storage);

        assert!(matches!(
            c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::WithdrawValidator { amount: 1 })),
            Err(Error::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_governance_roles() {
        let net = mock_network();
        let ctx = Context::new(0, &net);
        let mut c = mock_controller();

        assert_eq!(c.receive(&ctx, &to(&c, STRANGER, 0, ControllerOp::Halt)), Err(Error::WrongSender));
        c.receive(&ctx, &to(&c, HALTER, 0, ControllerOp::Halt)).unwrap();
        assert!(c.halted);
        // the halter cannot lift the halt
        assert_eq!(c.receive(&ctx, &to(&c, HALTER, 0, ControllerOp::Unhalt)), Err(Error::WrongSender));
        c.receive(&ctx, &to(&c, GOVERNOR, 0, ControllerOp::Unhalt)).unwrap();
        assert!(!c.halted);

        c.receive(&ctx, &to(&c, APPROVER, 0, ControllerOp::Disapprove)).unwrap();
        assert!(!c.approved);
    }

    /// staked controller past the hold period with both set changes observed
    fn recoverable(net: &NetworkConfig) -> Controller {
        let mut c = staked(net);
        c.validator_set_change_count = 2;
        c
    }

    #[test]
    fn test_recover_retried_while_elector_silent() {
        let net = mock_network();
        let mut c = recoverable(&net);
        let first = c.recover_at();

        c.receive(&Context::new(first, &net), &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake))
            .unwrap();
        assert_eq!(c.state, ControllerState::SentRecoverRequest);

        // no reply ever came; the validator asks again
        for attempt in 2..=c.params.recover_attempt_limit {
            let ctx = Context::new(first + 100_000 * attempt as u64, &net);
            let out = c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)).unwrap();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].dest, addr(ELECTOR));
            assert_eq!(c.recover_attempts, attempt);
        }

        let ctx = Context::new(first + 1_000_000, &net);
        let before = c.state_bytes();
        assert_eq!(
            c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)),
            Err(Error::TooEarlyStakeRecoverAttemptCount)
        );
        assert_eq!(c.state_bytes(), before);

        // one of the requests finally gets its answer
        let debt = c.borrowed_amount;
        let out = c
            .receive(&ctx, &to(&c, ELECTOR, 99_999 * COIN, ControllerOp::RecoverStakeOk { query_id: 1 }))
            .unwrap();
        assert_eq!(out[0].value, debt);
        assert_eq!(c.state, ControllerState::Rest);
        assert_eq!(c.recover_attempts, 0);
    }

    #[test]
    fn test_failed_recovery_keeps_stake_reclaimable() {
        let net = mock_network();
        let mut c = recoverable(&net);
        let ctx = Context::new(c.recover_at(), &net);

        c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)).unwrap();
        c.receive(&ctx, &to(&c, ELECTOR, COIN, ControllerOp::RecoverStakeError { query_id: 1, reason: 2 }))
            .unwrap();
        assert_eq!(c.state, ControllerState::Insolvent);
        assert!(c.stake_at_elector());

        // topping up clears the debt but the stake is still out
        let debt = c.borrowed_amount;
        let out = c.receive(&ctx, &to(&c, VALIDATOR, 100_000 * COIN, ControllerOp::TopUp)).unwrap();
        assert_eq!(out[0].value, debt);
        assert_eq!(c.borrowed_amount, 0);
        assert_eq!(c.state, ControllerState::FundsStaken);
        assert_eq!(c.stake_sent, 99_999 * COIN);

        c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)).unwrap();
        let balance = c.balance;
        let out = c
            .receive(&ctx, &to(&c, ELECTOR, 99_999 * COIN, ControllerOp::RecoverStakeOk { query_id: 2 }))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(c.state, ControllerState::Rest);
        assert_eq!(c.stake_sent, 0);
        assert_eq!(c.balance, balance + 99_999 * COIN);
    }

    #[test]
    fn test_recovery_retried_from_insolvent() {
        let net = mock_network();
        let mut c = recoverable(&net);
        let ctx = Context::new(c.recover_at(), &net);

        c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)).unwrap();
        c.receive(&ctx, &to(&c, ELECTOR, COIN, ControllerOp::RecoverStakeError { query_id: 1, reason: 2 }))
            .unwrap();
        assert_eq!(c.state, ControllerState::Insolvent);

        let debt = c.borrowed_amount;
        c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)).unwrap();
        assert_eq!(c.state, ControllerState::SentRecoverRequest);
        let out = c
            .receive(&ctx, &to(&c, ELECTOR, 99_999 * COIN, ControllerOp::RecoverStakeOk { query_id: 2 }))
            .unwrap();
        assert_eq!(out[0].value, debt);
        assert_eq!(c.state, ControllerState::Rest);

        // insolvent after a punished recovery has nothing left to recover
        let mut c = recoverable(&net);
        c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)).unwrap();
        c.receive(&ctx, &to(&c, ELECTOR, 90_000 * COIN, ControllerOp::RecoverStakeOk { query_id: 1 }))
            .unwrap();
        assert_eq!(c.state, ControllerState::Insolvent);
        assert!(!c.stake_at_elector());
        assert_eq!(
            c.receive(&ctx, &to(&c, VALIDATOR, 0, ControllerOp::RecoverStake)),
            Err(Error::WrongState("insolvent"))
        );
    }

    #[test]
    fn test_redeploy_tops_up() {
        let net = mock_network();
        let ctx = Context::new(0, &net);
        let mut c = mock_controller();
        let init = ControllerInit { static_data: c.static_data.clone(), params: c.params.clone() };

        let redeploy = Envelope::new(addr(POOL), c.address, 5 * COIN, Op::Deploy(init.clone()));
        c.receive(&ctx, &redeploy).unwrap();
        assert_eq!(c.balance, 5 * COIN);
        assert_eq!(c.state, ControllerState::Rest);

        let forged = Envelope::new(addr(STRANGER), c.address, COIN, Op::Deploy(init));
        assert_eq!(c.receive(&ctx, &forged), Err(Error::WrongSender));
        assert_eq!(c.balance, 5 * COIN);
    }
}
