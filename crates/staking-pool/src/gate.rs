//! role / halt gate shared by pool and controller

use scale_codec::{Decode, Encode};
use scale_info::TypeInfo;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Address;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Governor,
    InterestManager,
    Halter,
    Approver,
    /// external deposit/withdrawal subsystem
    Payout,
    /// operator owning a controller
    Validator,
    /// pool that deployed a controller
    Pool,
    /// network election authority
    Elector,
}

/// authorization seam consulted at the top of every handler
pub trait RoleGate {
    fn check_role(&self, sender: &Address, role: Role) -> bool;
    fn is_halted(&self) -> bool;

    fn require_role(&self, sender: &Address, role: Role) -> Result<()> {
        if self.check_role(sender, role) {
            Ok(())
        } else {
            Err(Error::WrongSender)
        }
    }

    fn require_not_halted(&self) -> Result<()> {
        if self.is_halted() {
            Err(Error::Halted)
        } else {
            Ok(())
        }
    }
}

/// pool governance addresses
#[derive(Clone, Debug, Encode, Decode, TypeInfo, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Roles {
    pub governor: Address,
    pub interest_manager: Address,
    pub halter: Address,
    pub approver: Address,
    pub payout: Address,
}

impl Roles {
    /// address holding `role`, if this role set knows it
    pub fn holder(&self, role: Role) -> Option<&Address> {
        match role {
            Role::Governor => Some(&self.governor),
            Role::InterestManager => Some(&self.interest_manager),
            Role::Halter => Some(&self.halter),
            Role::Approver => Some(&self.approver),
            Role::Payout => Some(&self.payout),
            Role::Validator | Role::Pool | Role::Elector => None,
        }
    }
}
