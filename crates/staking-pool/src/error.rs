//! error types for pool and controller handlers
//!
//! every rejection aborts the current message and leaves contract state
//! untouched; the only external trace is a bounce or a missing follow-up.

use thiserror::Error;

/// coarse classification of rejections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// wrong sender for a role-gated operation
    Authorization,
    /// operation invalid in the current state, or contract halted
    State,
    /// timing precondition outside its window
    Window,
    /// amount outside min/max/ceiling/structural limits
    Bound,
    /// not enough coverage for punishment, or not enough liquidity
    Solvency,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("message sender is not allowed to perform this operation")]
    WrongSender,

    #[error("operation not allowed in controller state {0}")]
    WrongState(&'static str),

    #[error("contract is halted")]
    Halted,

    #[error("controller is not approved")]
    NotApproved,

    #[error("controller already holds a loan")]
    MultipleLoansProhibited,

    #[error("borrower has no active loan in the current round")]
    NoActiveLoan,

    #[error("controller still owes the pool")]
    LoanOutstanding,

    #[error("operation not handled by this contract")]
    UnknownOperation,

    #[error("loan requested before the borrow window opened")]
    TooEarlyLoanRequest,

    #[error("loan requested after elections closed")]
    TooLateLoanRequest,

    #[error("stake does not target the open election with fresh credit")]
    WronglyUsedCredit,

    #[error("stake hold period has not elapsed")]
    TooEarlyStakeRecoverAttemptTime,

    #[error("validator set has not changed enough times since staking")]
    TooEarlyStakeRecoverAttemptCount,

    #[error("validator set hash update is not overdue yet")]
    HashUpdateNotOverdue,

    #[error("requested max interest {offered} is below pool rate {required}")]
    InterestTooLow { offered: u32, required: u32 },

    #[error("loan bounds contradict each other or pool limits")]
    ContradictingBorrowingParams,

    #[error("operational parameters contradict each other")]
    ContradictingOperationalParams,

    #[error("value {0} does not fit its field width")]
    FieldOverflow(u128),

    #[error("attached value does not cover the elector operation")]
    StakeRequestValueTooLow,

    #[error("stake below network minimum")]
    ValueLtMinimum,

    #[error("stake exceeds affordable amount")]
    ValueTooHigh,

    #[error("stake request must carry a non-zero query id")]
    ZeroQueryId,

    #[error("credit book would exceed maximal depth")]
    CreditBookTooDeep,

    #[error("balance does not cover worst-case punishment")]
    SolvencyNotGuaranteed,

    #[error("pool cannot fund the minimal requested loan")]
    NotEnoughFundsForLoan,

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u128, need: u128 },
}

impl Error {
    /// stable snake-case code, as it appears in logs and bounces
    pub fn code(&self) -> &'static str {
        match self {
            Self::WrongSender => "wrong_sender",
            Self::WrongState(_) => "wrong_state",
            Self::Halted => "halted",
            Self::NotApproved => "controller_not_approved",
            Self::MultipleLoansProhibited => "multiple_loans_are_prohibited",
            Self::NoActiveLoan => "no_active_loan",
            Self::LoanOutstanding => "loan_outstanding",
            Self::UnknownOperation => "unknown_op",
            Self::TooEarlyLoanRequest => "too_early_borrowing_request",
            Self::TooLateLoanRequest => "too_late_loan_request",
            Self::WronglyUsedCredit => "wrongly_used_credit",
            Self::TooEarlyStakeRecoverAttemptTime => "too_early_stake_recover_attempt_time",
            Self::TooEarlyStakeRecoverAttemptCount => "too_early_stake_recover_attempt_count",
            Self::HashUpdateNotOverdue => "hash_update_not_overdue",
            Self::InterestTooLow { .. } => "interest_too_low",
            Self::ContradictingBorrowingParams => "contradicting_borrowing_params",
            Self::ContradictingOperationalParams => "contradicting_operational_params",
            Self::FieldOverflow(_) => "field_overflow",
            Self::StakeRequestValueTooLow => "newStake.request_value",
            Self::ValueLtMinimum => "value_lt_minimum",
            Self::ValueTooHigh => "value_too_high",
            Self::ZeroQueryId => "query_id",
            Self::CreditBookTooDeep => "credit_book_too_deep",
            Self::SolvencyNotGuaranteed => "solvency_not_guaranteed",
            Self::NotEnoughFundsForLoan => "not_enough_funds_for_loan",
            Self::InsufficientBalance { .. } => "insufficient_balance",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WrongSender => ErrorKind::Authorization,

            Self::WrongState(_)
            | Self::Halted
            | Self::NotApproved
            | Self::MultipleLoansProhibited
            | Self::NoActiveLoan
            | Self::LoanOutstanding
            | Self::UnknownOperation => ErrorKind::State,

            Self::TooEarlyLoanRequest
            | Self::TooLateLoanRequest
            | Self::WronglyUsedCredit
            | Self::TooEarlyStakeRecoverAttemptTime
            | Self::TooEarlyStakeRecoverAttemptCount
            | Self::HashUpdateNotOverdue => ErrorKind::Window,

            Self::InterestTooLow { .. }
            | Self::ContradictingBorrowingParams
            | Self::ContradictingOperationalParams
            | Self::FieldOverflow(_)
            | Self::StakeRequestValueTooLow
            | Self::ValueLtMinimum
            | Self::ValueTooHigh
            | Self::ZeroQueryId
            | Self::CreditBookTooDeep => ErrorKind::Bound,

            Self::SolvencyNotGuaranteed
            | Self::NotEnoughFundsForLoan
            | Self::InsufficientBalance { .. } => ErrorKind::Solvency,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
