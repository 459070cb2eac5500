//! per-round borrower accounting
//!
//! A round is the pool's accounting epoch. Each round keeps one record per
//! controller that borrowed in it, aggregate totals, and the number of loans
//! still outstanding. The round can only rotate out once that number is zero.

use std::collections::BTreeMap;

use scale_codec::{Decode, Encode};
use scale_info::TypeInfo;

use crate::error::{Error, Result};
use crate::types::*;

/// deepest credit book the pool accepts
///
/// depth is measured as fork levels of a binary trie over borrower
/// addresses, the shape the on-chain dictionary takes.
pub const CREDIT_BOOK_MAX_DEPTH: u32 = 30;

/// one controller's loan within a round
#[derive(Clone, Copy, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Default)]
pub struct BorrowerRecord {
    /// principal lent in this round
    pub borrowed: Amount,
    /// interest owed on top of principal
    pub accounted_interest: Amount,
    /// loan closed by a repayment
    pub repaid: bool,
}

impl BorrowerRecord {
    pub fn is_active(&self) -> bool {
        self.borrowed > 0 && !self.repaid
    }

    /// principal plus interest
    pub fn debt(&self) -> Amount {
        self.borrowed + self.accounted_interest
    }
}

#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Default)]
pub struct RoundLedger {
    pub round_id: u32,
    pub borrowers: BTreeMap<Address, BorrowerRecord>,
    pub active_borrowers: u32,
    /// principal lent
    pub borrowed: Amount,
    /// principal plus interest owed
    pub expected: Amount,
    /// repaid so far
    pub returned: Amount,
    /// returned minus principal; negative when validators were punished
    pub profit: SignedAmount,
}

/// totals reported once a round rotates out
#[derive(Clone, Copy, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub struct RoundSummary {
    pub round_id: u32,
    pub borrowed: Amount,
    pub expected: Amount,
    pub returned: Amount,
    pub profit: SignedAmount,
    /// principal plus interest that never came back
    pub shortfall: Amount,
}

impl RoundLedger {
    pub fn new(round_id: u32) -> Self {
        Self {
            round_id,
            ..Default::default()
        }
    }

    pub fn get(&self, borrower: &Address) -> Option<&BorrowerRecord> {
        self.borrowers.get(borrower)
    }

    pub fn is_active(&self, borrower: &Address) -> bool {
        self.borrowers.get(borrower).map_or(false, |r| r.is_active())
    }

    /// book a loan; a borrower without an open loan becomes active again
    pub fn record_loan(&mut self, borrower: Address, principal: Amount, interest: Amount) -> Result<()> {
        if !self.borrowers.contains_key(&borrower) {
            let mut keys: Vec<Address> = self.borrowers.keys().copied().collect();
            let pos = keys.binary_search(&borrower).unwrap_or_else(|p| p);
            keys.insert(pos, borrower);
            if credit_book_depth(&keys) > CREDIT_BOOK_MAX_DEPTH {
                return Err(Error::CreditBookTooDeep);
            }
        }

        let record = self.borrowers.entry(borrower).or_default();
        if !record.is_active() {
            if record.repaid {
                *record = BorrowerRecord::default();
            }
            self.active_borrowers += 1;
        }
        record.borrowed += principal;
        record.accounted_interest += interest;

        self.borrowed += principal;
        self.expected += principal + interest;
        self.profit = self.compute_profit();
        Ok(())
    }

    /// close a borrower's loan; returns the record as it stood
    pub fn record_repayment(&mut self, borrower: &Address, amount: Amount) -> Result<BorrowerRecord> {
        let record = self
            .borrowers
            .get_mut(borrower)
            .filter(|r| r.is_active())
            .ok_or(Error::NoActiveLoan)?;

        let closed = *record;
        record.repaid = true;

        self.active_borrowers -= 1;
        self.returned += amount;
        self.profit = self.compute_profit();
        Ok(closed)
    }

    pub fn compute_profit(&self) -> SignedAmount {
        self.returned as SignedAmount - self.borrowed as SignedAmount
    }

    /// expected minus returned, zero when every debt was repaid in full
    pub fn shortfall(&self) -> Amount {
        self.expected.saturating_sub(self.returned)
    }

    /// debt still outstanding in this round
    pub fn outstanding(&self) -> Amount {
        self.borrowers
            .values()
            .filter(|r| r.is_active())
            .map(BorrowerRecord::debt)
            .sum()
    }

    pub fn can_rotate(&self) -> bool {
        self.active_borrowers == 0
    }

    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            round_id: self.round_id,
            borrowed: self.borrowed,
            expected: self.expected,
            returned: self.returned,
            profit: self.profit,
            shortfall: self.shortfall(),
        }
    }
}

/// fork depth of a binary trie over sorted, distinct addresses
pub fn credit_book_depth(sorted: &[Address]) -> u32 {
    fn depth(keys: &[Address], from_bit: usize) -> u32 {
        if keys.len() <= 1 {
            return 0;
        }
        let first = &keys[0];
        let last = &keys[keys.len() - 1];
        let Some(bit) = (from_bit..256).find(|&i| first.bit(i) != last.bit(i)) else {
            return 0;
        };
        let mid = keys.partition_point(|k| !k.bit(bit));
        1 + depth(&keys[..mid], bit + 1).max(depth(&keys[mid..], bit + 1))
    }

    depth(sorted, 0)
}
