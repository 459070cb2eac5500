//! loan sizing policy
//!
//! A single round may not lend more than `(256 + tolerance) / 512` of the
//! pool's total balance. Tolerance 0 caps the round at one half of the pool,
//! tolerance 255 at ~99.8%.

use crate::error::{Error, Result};
use crate::types::*;

pub const TOLERANCE_BASE: u128 = 512;

/// denominator of the interest rate
pub const INTEREST_BASIS: u128 = 65535;

/// pool-side limits a request is sized against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LendingPolicy {
    pub min_loan_per_validator: Amount,
    pub max_loan_per_validator: Amount,
    pub disbalance_tolerance: u8,
}

/// what a controller asked for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoanBounds {
    pub min_loan: Amount,
    pub max_loan: Amount,
}

/// pool state the request is sized against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Liquidity {
    pub total_balance: Amount,
    pub round_borrowed: Amount,
    pub available: Amount,
}

/// upper bound of principal the current round may lend in total
pub fn round_cap(total_balance: Amount, tolerance: u8) -> Amount {
    let share = TOLERANCE_BASE / 2 + tolerance as u128;
    total_balance.saturating_mul(share) / TOLERANCE_BASE
}

/// principal still lendable in the current round
pub fn disbalance_ceiling(total_balance: Amount, tolerance: u8, round_borrowed: Amount) -> Amount {
    round_cap(total_balance, tolerance).saturating_sub(round_borrowed)
}

pub fn interest_for(principal: Amount, rate: u32) -> Amount {
    principal.saturating_mul(rate as u128) / INTEREST_BASIS
}

/// clamp the requested bounds into pool limits
pub fn effective_bounds(request: LoanBounds, policy: &LendingPolicy) -> Result<LoanBounds> {
    if request.min_loan > request.max_loan {
        return Err(Error::ContradictingBorrowingParams);
    }
    let bounds = LoanBounds {
        min_loan: request.min_loan.max(policy.min_loan_per_validator),
        max_loan: request.max_loan.min(policy.max_loan_per_validator),
    };
    if bounds.min_loan > bounds.max_loan {
        return Err(Error::ContradictingBorrowingParams);
    }
    Ok(bounds)
}

/// principal granted for a request
pub fn size_loan(request: LoanBounds, policy: &LendingPolicy, liquidity: Liquidity) -> Result<Amount> {
    let bounds = effective_bounds(request, policy)?;
    let ceiling = disbalance_ceiling(
        liquidity.total_balance,
        policy.disbalance_tolerance,
        liquidity.round_borrowed,
    );

    let granted = bounds.max_loan.min(ceiling).min(liquidity.available);
    if granted < bounds.min_loan || granted == 0 {
        return Err(Error::NotEnoughFundsForLoan);
    }
    Ok(granted)
}
