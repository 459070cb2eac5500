//! lending pool
//!
//! holds depositor liquidity, lends it to controllers it deployed, and keeps
//! per-round borrower accounting. A round rotates out only when its last
//! outstanding loan is repaid; loan requests never rotate.

use alloc::vec::Vec;
use scale_codec::{Decode, Encode};
use scale_info::TypeInfo;
use tracing::{debug, info};

use crate::config::{ChainContext, ControllerParams, PoolConfig};
use crate::controller::ControllerStatic;
use crate::error::{Error, Result};
use crate::gate::{Role, RoleGate, Roles};
use crate::ledger::RoundLedger;
use crate::message::*;
use crate::sizing::{self, LendingPolicy, Liquidity, LoanBounds};
use crate::types::*;

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub struct Pool {
    pub address: Address,
    /// assets under management, lent principal included
    pub total_balance: Amount,
    /// coins actually held
    pub balance: Amount,
    /// numerator over 65535, 24 bits
    pub interest_rate: u32,
    pub min_loan_per_validator: Amount,
    pub max_loan_per_validator: Amount,
    pub disbalance_tolerance: u8,
    /// 48 bits
    pub credit_start_prior_elections_end: u64,
    pub current_round: RoundLedger,
    pub previous_round: RoundLedger,
    pub halted: bool,
    pub roles: Roles,
    pub controller_params: ControllerParams,
    pub min_storage: Amount,
}

impl Pool {
    pub fn new(address: Address, roles: Roles, config: &PoolConfig) -> Result<Self> {
        if config.interest_rate > MAX_U24 {
            return Err(Error::FieldOverflow(config.interest_rate as u128));
        }
        if config.credit_start_prior_elections_end > MAX_U48 {
            return Err(Error::FieldOverflow(config.credit_start_prior_elections_end as u128));
        }
        if config.min_loan_per_validator > config.max_loan_per_validator {
            return Err(Error::ContradictingOperationalParams);
        }

        Ok(Self {
            address,
            total_balance: 0,
            balance: 0,
            interest_rate: config.interest_rate,
            min_loan_per_validator: config.min_loan_per_validator,
            max_loan_per_validator: config.max_loan_per_validator,
            disbalance_tolerance: config.disbalance_tolerance,
            credit_start_prior_elections_end: config.credit_start_prior_elections_end,
            current_round: RoundLedger::new(0),
            previous_round: RoundLedger::new(0),
            halted: false,
            roles,
            controller_params: config.controller_params.clone(),
            min_storage: config.min_storage,
        })
    }

    pub fn state_bytes(&self) -> Vec<u8> {
        self.encode()
    }

    pub fn state_hash(&self) -> H256 {
        H256::digest(&self.encode())
    }

    /// static data of the controller this pool deploys for `(validator, id)`
    pub fn controller_static(&self, controller_id: u32, validator: Address) -> ControllerStatic {
        ControllerStatic {
            controller_id,
            validator,
            pool: self.address,
            governor: self.roles.governor,
            approver: self.roles.approver,
            halter: self.roles.halter,
        }
    }

    pub fn controller_address(&self, controller_id: u32, validator: Address) -> Address {
        self.controller_static(controller_id, validator).address()
    }

    /// liquidity that can leave the pool
    pub fn available(&self) -> Amount {
        self.balance.saturating_sub(self.min_storage)
    }

    pub fn policy(&self) -> LendingPolicy {
        LendingPolicy {
            min_loan_per_validator: self.min_loan_per_validator,
            max_loan_per_validator: self.max_loan_per_validator,
            disbalance_tolerance: self.disbalance_tolerance,
        }
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
            Op::Bounced(tag) => self.apply_bounce(src, *tag, msg.value),
            Op::Pool(op) => match op {
                PoolOp::DeployController { controller_id } => {
                    self.apply_deploy_controller(src, *controller_id, msg.value)
                }
                PoolOp::RequestLoan { controller_id, validator, min_loan, max_loan, max_interest } => {
                    let bounds = LoanBounds { min_loan: *min_loan, max_loan: *max_loan };
                    self.apply_request_loan(ctx, src, *controller_id, *validator, bounds, *max_interest)
                }
                PoolOp::LoanRepayment { controller_id, validator } => {
                    self.apply_loan_repayment(src, *controller_id, *validator, msg.value)
                }
                PoolOp::Deposit => self.apply_deposit(src, msg.value),
                PoolOp::Withdraw { amount, recipient } => self.apply_withdraw(src, *amount, *recipient),
                PoolOp::SetInterest { rate } => self.apply_set_interest(src, *rate),
                PoolOp::SetOperationalParams {
                    min_loan,
                    max_loan,
                    disbalance_tolerance,
                    credit_start_prior_elections_end,
                } => self.apply_set_operational_params(
                    src,
                    *min_loan,
                    *max_loan,
                    *disbalance_tolerance,
                    *credit_start_prior_elections_end,
                ),
                PoolOp::Halt => {
                    self.require_role(src, Role::Halter)?;
                    self.halted = true;
                    info!(pool = %self.address, "halted");
                    Ok(Vec::new())
                }
                PoolOp::Unhalt => {
                    self.require_role(src, Role::Governor)?;
                    self.halted = false;
                    info!(pool = %self.address, "unhalted");
                    Ok(Vec::new())
                }
                PoolOp::TopUp => Ok(Vec::new()),
            },
            _ => Err(Error::UnknownOperation),
        }
    }

    fn apply_deploy_controller(&mut self, src: &Address, controller_id: u32, value: Amount) -> Result<Vec<Envelope>> {
        self.require_not_halted()?;

        let static_data = self.controller_static(controller_id, *src);
        let address = static_data.address();
        self.balance -= value;
        debug!(pool = %self.address, controller = %address, controller_id, "deploying controller");

        Ok(vec![Envelope::new(
            self.address,
            address,
            value,
            Op::Deploy(ControllerInit {
                static_data,
                params: self.controller_params.clone(),
            }),
        )])
    }

    fn apply_request_loan(
        &mut self,
        ctx: &impl ChainContext,
        src: &Address,
        controller_id: u32,
        validator: Address,
        bounds: LoanBounds,
        max_interest: u32,
    ) -> Result<Vec<Envelope>> {
        self.require_not_halted()?;
        if *src != self.controller_address(controller_id, validator) {
            return Err(Error::WrongSender);
        }

        let now = ctx.now();
        let close = ctx.network().elections_close_at();
        if now < close.saturating_sub(self.credit_start_prior_elections_end) {
            return Err(Error::TooEarlyLoanRequest);
        }
        if now >= close {
            return Err(Error::TooLateLoanRequest);
        }

        if max_interest < self.interest_rate {
            return Err(Error::InterestTooLow {
                offered: max_interest,
                required: self.interest_rate,
            });
        }

        let granted = sizing::size_loan(
            bounds,
            &self.policy(),
            Liquidity {
                total_balance: self.total_balance,
                round_borrowed: self.current_round.borrowed,
                available: self.available(),
            },
        )?;
        let interest = sizing::interest_for(granted, self.interest_rate);
        self.current_round.record_loan(*src, granted, interest)?;
        self.balance -= granted;

        info!(
            pool = %self.address,
            controller = %src,
            round = self.current_round.round_id,
            granted,
            interest,
            "loan granted"
        );

        Ok(vec![Envelope::new(
            self.address,
            *src,
            granted,
            Op::Controller(ControllerOp::Credit { amount: granted + interest }),
        )])
    }

    fn apply_loan_repayment(
        &mut self,
        src: &Address,
        controller_id: u32,
        validator: Address,
        value: Amount,
    ) -> Result<Vec<Envelope>> {
        if *src != self.controller_address(controller_id, validator) {
            return Err(Error::WrongSender);
        }
        self.close_loan(src, value)
    }

    /// close a borrower's record and rotate when it was the last one
    fn close_loan(&mut self, borrower: &Address, value: Amount) -> Result<Vec<Envelope>> {
        let closed = self.current_round.record_repayment(borrower, value)?;
        info!(
            pool = %self.address,
            controller = %borrower,
            round = self.current_round.round_id,
            borrowed = closed.borrowed,
            returned = value,
            active = self.current_round.active_borrowers,
            "loan closed"
        );

        if !self.current_round.can_rotate() {
            return Ok(Vec::new());
        }
        self.rotate()
    }

    fn rotate(&mut self) -> Result<Vec<Envelope>> {
        let next_id = self
            .current_round
            .round_id
            .checked_add(1)
            .ok_or(Error::FieldOverflow(u32::MAX as u128 + 1))?;
        let summary = self.current_round.summary();

        let total = self.total_balance as SignedAmount + summary.profit;
        self.total_balance = total.max(0) as Amount;
        self.previous_round = core::mem::replace(&mut self.current_round, RoundLedger::new(next_id));

        info!(
            pool = %self.address,
            round = summary.round_id,
            borrowed = summary.borrowed,
            returned = summary.returned,
            profit = summary.profit,
            shortfall = summary.shortfall,
            total_balance = self.total_balance,
            "round rotated"
        );

        Ok([self.roles.interest_manager, self.roles.governor]
            .into_iter()
            .map(|dest| Envelope::notify(self.address, dest, Notification::RoundFinalized(summary)))
            .collect())
    }

    fn apply_deposit(&mut self, src: &Address, value: Amount) -> Result<Vec<Envelope>> {
        self.require_not_halted()?;
        self.total_balance += value;
        debug!(pool = %self.address, depositor = %src, value, "deposit");

        Ok(vec![Envelope::notify(
            self.address,
            self.roles.payout,
            Notification::DepositAccepted { depositor: *src, amount: value },
        )])
    }

    fn apply_withdraw(&mut self, src: &Address, amount: Amount, recipient: Address) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::Payout)?;
        self.require_not_halted()?;

        let have = self.available().min(self.total_balance);
        if have < amount {
            return Err(Error::InsufficientBalance { have, need: amount });
        }
        self.balance -= amount;
        self.total_balance -= amount;
        debug!(pool = %self.address, recipient = %recipient, amount, "withdrawal");

        Ok(vec![
            Envelope::transfer(self.address, recipient, amount),
            Envelope::notify(
                self.address,
                self.roles.payout,
                Notification::WithdrawalSettled { recipient, amount },
            ),
        ])
    }

    fn apply_set_interest(&mut self, src: &Address, rate: u32) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::InterestManager)?;
        if rate > MAX_U24 {
            return Err(Error::FieldOverflow(rate as u128));
        }
        self.interest_rate = rate;
        info!(pool = %self.address, rate, "interest rate set");
        Ok(Vec::new())
    }

    fn apply_set_operational_params(
        &mut self,
        src: &Address,
        min_loan: Amount,
        max_loan: Amount,
        disbalance_tolerance: u8,
        credit_start: u64,
    ) -> Result<Vec<Envelope>> {
        self.require_role(src, Role::Governor)?;
        if min_loan > max_loan {
            return Err(Error::ContradictingOperationalParams);
        }
        if credit_start > MAX_U48 {
            return Err(Error::FieldOverflow(credit_start as u128));
        }
        self.min_loan_per_validator = min_loan;
        self.max_loan_per_validator = max_loan;
        self.disbalance_tolerance = disbalance_tolerance;
        self.credit_start_prior_elections_end = credit_start;
        info!(pool = %self.address, min_loan, max_loan, disbalance_tolerance, credit_start, "operational params set");
        Ok(Vec::new())
    }

    fn apply_bounce(&mut self, src: &Address, tag: OpTag, value: Amount) -> Result<Vec<Envelope>> {
        match tag {
            // the controller refused the credit; the principal is back
            OpTag::Credit if self.current_round.is_active(src) => self.close_loan(src, value),
            _ => Ok(Vec::new()),
        }
    }
}

impl RoleGate for Pool {
    fn check_role(&self, sender: &Address, role: Role) -> bool {
        self.roles.holder(role) == Some(sender)
    }

    fn is_halted(&self) -> bool {
        self.halted
    }
}
