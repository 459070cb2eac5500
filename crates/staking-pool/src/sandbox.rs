//! deterministic message bus for pool, controllers and a scripted elector
//!
//! messages are delivered strictly in FIFO order. A rejected message is
//! logged and, when it asked for it, bounced back with its value. Anything
//! addressed to an unknown address lands in an external wallet.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use crate::config::{Context, NetworkConfig, PoolConfig, ValidatorSetInfo};
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::gate::Roles;
use crate::message::*;
use crate::pool::Pool;
use crate::types::*;

/// stand-in for the network elector
#[derive(Clone, Debug, Default)]
pub struct ScriptedElector {
    pub address: Address,
    /// kept out of every stake and every recover request
    pub op_value: Amount,
    /// stake held per controller
    pub stakes: BTreeMap<Address, Amount>,
    /// added to (or taken from) a stake when it is returned
    pub reward: SignedAmount,
    pub reject_stakes: bool,
    pub fail_recovery: bool,
}

impl ScriptedElector {
    pub fn new(address: Address, op_value: Amount) -> Self {
        Self { address, op_value, ..Default::default() }
    }

    pub fn receive(&mut self, msg: &Envelope) -> Vec<Envelope> {
        let Op::Elector(op) = &msg.op else {
            return Vec::new();
        };

        let (value, reply) = match *op {
            ElectorOp::NewStake { query_id, .. } => {
                if self.reject_stakes || msg.value <= self.op_value {
                    (msg.value, ControllerOp::NewStakeError { query_id, reason: 1 })
                } else {
                    *self.stakes.entry(msg.src).or_default() += msg.value - self.op_value;
                    (0, ControllerOp::NewStakeOk { query_id })
                }
            }
            ElectorOp::RecoverStake { query_id } => match self.stakes.get(&msg.src) {
                Some(&stake) if !self.fail_recovery => {
                    self.stakes.remove(&msg.src);
                    let returned = (stake as SignedAmount + self.reward).max(0) as Amount;
                    (returned, ControllerOp::RecoverStakeOk { query_id })
                }
                _ => (msg.value, ControllerOp::RecoverStakeError { query_id, reason: 2 }),
            },
        };

        vec![Envelope {
            src: self.address,
            dest: msg.src,
            value,
            bounce: false,
            op: Op::Controller(reply),
        }]
    }
}

/// a message some contract refused
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub msg: Envelope,
    pub error: Error,
}

pub struct Sandbox {
    pub now: Timestamp,
    pub network: NetworkConfig,
    pub pool: Pool,
    pub controllers: BTreeMap<Address, Controller>,
    pub elector: ScriptedElector,
    /// value received by external addresses
    pub wallets: BTreeMap<Address, Amount>,
    pub notifications: Vec<(Address, Notification)>,
    pub rejections: Vec<Rejection>,
    queue: VecDeque<Envelope>,
}

impl Sandbox {
    pub fn new(network: NetworkConfig, roles: Roles, config: &PoolConfig) -> Result<Self> {
        let pool = Pool::new(Address::derive(b"pool", &roles), roles, config)?;
        let elector = ScriptedElector::new(network.elector, config.controller_params.elector_op_value);

        Ok(Self {
            now: 0,
            network,
            pool,
            controllers: BTreeMap::new(),
            elector,
            wallets: BTreeMap::new(),
            notifications: Vec::new(),
            rejections: Vec::new(),
            queue: VecDeque::new(),
        })
    }

    pub fn advance_to(&mut self, now: Timestamp) {
        self.now = self.now.max(now);
    }

    pub fn set_validators(&mut self, validators: ValidatorSetInfo) {
        self.network.validators = validators;
    }

    /// start the next validator round: the elected set becomes active
    pub fn next_validator_round(&mut self) {
        let current = &self.network.validators;
        let since = current.utime_until;
        let until = since + self.network.elections.validators_elected_for;
        let hash = H256::digest(&since.to_le_bytes());
        self.set_validators(ValidatorSetInfo { utime_since: since, utime_until: until, hash });
    }

    pub fn controller(&self, address: &Address) -> Option<&Controller> {
        self.controllers.get(address)
    }

    pub fn wallet(&self, address: &Address) -> Amount {
        self.wallets.get(address).copied().unwrap_or_default()
    }

    /// deliver `msg` and everything it causes; returns the outcome of `msg` itself
    pub fn send(&mut self, msg: Envelope) -> Result<()> {
        let result = self.step(msg);
        self.run();
        result
    }

    /// drain the queue
    pub fn run(&mut self) {
        while let Some(msg) = self.queue.pop_front() {
            let _ = self.step(msg);
        }
    }

    fn step(&mut self, msg: Envelope) -> Result<()> {
        match self.deliver(&msg) {
            Ok(out) => {
                self.queue.extend(out);
                Ok(())
            }
            Err(error) => {
                warn!(
                    code = error.code(),
                    kind = ?error.kind(),
                    src = %msg.src,
                    dest = %msg.dest,
                    value = msg.value,
                    "message rejected"
                );
                if let Some(bounce) = msg.bounced() {
                    self.queue.push_back(bounce);
                }
                self.rejections.push(Rejection { msg, error: error.clone() });
                Err(error)
            }
        }
    }

    fn deliver(&mut self, msg: &Envelope) -> Result<Vec<Envelope>> {
        let ctx = Context::new(self.now, &self.network);

        if msg.dest == self.pool.address {
            return self.pool.receive(&ctx, msg);
        }
        if msg.dest == self.elector.address {
            return Ok(self.elector.receive(msg));
        }
        if let Some(controller) = self.controllers.get_mut(&msg.dest) {
            return controller.receive(&ctx, msg);
        }
        if let Op::Deploy(_) = msg.op {
            let controller = Controller::deploy(msg)?;
            self.controllers.insert(controller.address, controller);
            return Ok(Vec::new());
        }

        *self.wallets.entry(msg.dest).or_default() += msg.value;
        if let Op::Notify(notification) = &msg.op {
            debug!(dest = %msg.dest, ?notification, "notification");
            self.notifications.push((msg.dest, notification.clone()));
        }
        Ok(Vec::new())
    }

    // wallet-side helpers

    pub fn deposit(&mut self, depositor: Address, amount: Amount) -> Result<()> {
        self.send(Envelope::new(depositor, self.pool.address, amount, Op::Pool(PoolOp::Deposit)))
    }

    /// deploy a controller for `validator` through the pool; returns its address
    pub fn deploy_controller(&mut self, validator: Address, controller_id: u32, value: Amount) -> Result<Address> {
        let op = Op::Pool(PoolOp::DeployController { controller_id });
        self.send(Envelope::new(validator, self.pool.address, value, op))?;
        Ok(self.pool.controller_address(controller_id, validator))
    }

    pub fn to_controller(&mut self, from: Address, controller: Address, value: Amount, op: ControllerOp) -> Result<()> {
        self.send(Envelope::new(from, controller, value, Op::Controller(op)))
    }

    pub fn to_pool(&mut self, from: Address, value: Amount, op: PoolOp) -> Result<()> {
        self.send(Envelope::new(from, self.pool.address, value, Op::Pool(op)))
    }

    /// stake request for the election currently open
    pub fn stake_request(&self, stake: Amount, query_id: QueryId) -> StakeRequest {
        StakeRequest {
            query_id,
            stake,
            validator_pubkey: PublicKey::from_raw(H256::digest(&query_id.to_le_bytes()).0),
            stake_at: self.network.elect_at(),
            max_factor: 3 << 16,
            adnl_addr: H256::zero(),
            signature: Signature::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_stake(value: Amount) -> Envelope {
        Envelope::new(
            Address::from_raw([1u8; 32]),
            Address::from_raw([0xee; 32]),
            value,
            Op::Elector(ElectorOp::NewStake {
                query_id: 5,
                validator_pubkey: PublicKey::zero(),
                stake_at: 65536,
                max_factor: 1 << 16,
                adnl_addr: H256::zero(),
                signature: Signature::default(),
            }),
        )
    }

    #[test]
    fn test_elector_keeps_op_value() {
        let mut elector = ScriptedElector::new(Address::from_raw([0xee; 32]), COIN);
        let reply = elector.receive(&mock_stake(100 * COIN));

        assert_eq!(reply[0].value, 0);
        assert_eq!(reply[0].op, Op::Controller(ControllerOp::NewStakeOk { query_id: 5 }));
        assert_eq!(elector.stakes[&Address::from_raw([1u8; 32])], 99 * COIN);
    }

    #[test]
    fn test_elector_rejects_and_refunds() {
        let mut elector = ScriptedElector::new(Address::from_raw([0xee; 32]), COIN);
        elector.reject_stakes = true;
        let reply = elector.receive(&mock_stake(100 * COIN));

        assert_eq!(reply[0].value, 100 * COIN);
        assert!(matches!(reply[0].op, Op::Controller(ControllerOp::NewStakeError { .. })));
        assert!(elector.stakes.is_empty());
    }

    #[test]
    fn test_elector_recovery_applies_reward() {
        let mut elector = ScriptedElector::new(Address::from_raw([0xee; 32]), COIN);
        elector.receive(&mock_stake(100 * COIN));
        elector.reward = -(200 * COIN as SignedAmount);

        let recover = Envelope::new(
            Address::from_raw([1u8; 32]),
            elector.address,
            COIN,
            Op::Elector(ElectorOp::RecoverStake { query_id: 9 }),
        );
        let reply = elector.receive(&recover);
        // punished below zero returns nothing
        assert_eq!(reply[0].value, 0);

        // nothing left to recover
        let reply = elector.receive(&recover);
        assert_eq!(reply[0].value, COIN);
        assert!(matches!(reply[0].op, Op::Controller(ControllerOp::RecoverStakeError { .. })));
    }

    #[test]
    fn test_unknown_destination_is_a_wallet() {
        let mut sandbox = Sandbox::new(NetworkConfig::default(), Roles::default(), &PoolConfig::default()).unwrap();
        let wallet = Address::from_raw([0x77; 32]);

        sandbox
            .send(Envelope::transfer(Address::from_raw([1u8; 32]), wallet, 42))
            .unwrap();
        assert_eq!(sandbox.wallet(&wallet), 42);
    }

    #[test]
    fn test_rejection_bounces_value() {
        let mut sandbox = Sandbox::new(NetworkConfig::default(), Roles::default(), &PoolConfig::default()).unwrap();
        let stranger = Address::from_raw([0x77; 32]);

        let err = sandbox.to_pool(stranger, 5 * COIN, PoolOp::SetInterest { rate: 1 });
        assert_eq!(err, Err(Error::WrongSender));
        assert_eq!(sandbox.wallet(&stranger), 5 * COIN);
        assert_eq!(sandbox.pool.balance, 0);
        assert_eq!(sandbox.rejections.len(), 1);
    }
}
