//! delegated validator staking pool
//!
//! depositors fund a pool that lends to approved validators through
//! per-validator controllers. Controllers stake with the network elector,
//! recover the stake after the hold period and repay the pool, which closes
//! its accounting round once every loan in it is back.
//!
//! contracts are message driven: [`Pool::receive`] and [`Controller::receive`]
//! take one [`Envelope`] and return the messages it causes. [`Sandbox`] wires
//! them together with a scripted elector for tests and simulation.

extern crate alloc;

pub mod config;
pub mod controller;
pub mod elector;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod message;
pub mod pool;
pub mod sandbox;
pub mod sizing;
pub mod types;

pub use config::*;
pub use controller::*;
pub use error::{Error, ErrorKind, Result};
pub use gate::*;
pub use ledger::*;
pub use message::*;
pub use pool::*;
pub use sandbox::*;
pub use types::*;
