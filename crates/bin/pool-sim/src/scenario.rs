//! scenario description and the round driver

use serde::{Deserialize, Serialize};
use staking_pool::*;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub network: NetworkConfig,
    pub roles: Roles,
    pub pool: PoolConfig,
    /// initial liquidity deposited before the first round
    pub deposit: Amount,
    pub rounds: u32,
    pub validators: Vec<ValidatorPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorPlan {
    /// validator money put on the controller once
    pub own_funds: Amount,
    pub max_loan: Amount,
    /// elector reward (negative: punishment) applied on every recovery
    pub reward: SignedAmount,
}

fn named(name: &str) -> Address {
    Address::from_raw(H256::digest(name.as_bytes()).0)
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                elector: named("elector"),
                min_stake: 10_000 * COIN,
                ..Default::default()
            },
            roles: Roles {
                governor: named("governor"),
                interest_manager: named("interest-manager"),
                halter: named("halter"),
                approver: named("approver"),
                payout: named("payout"),
            },
            pool: PoolConfig::default(),
            deposit: 2_000_000 * COIN,
            rounds: 3,
            validators: vec![
                ValidatorPlan { own_funds: 20_000 * COIN, max_loan: 300_000 * COIN, reward: 3_000 * COIN as SignedAmount },
                ValidatorPlan { own_funds: 20_000 * COIN, max_loan: 300_000 * COIN, reward: 1_500 * COIN as SignedAmount },
                ValidatorPlan { own_funds: 20_000 * COIN, max_loan: 300_000 * COIN, reward: -(1_000 * COIN as SignedAmount) },
            ],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ControllerReport {
    pub address: Address,
    pub state: &'static str,
    pub balance: Amount,
    pub debt: Amount,
}

#[derive(Debug, Serialize)]
pub struct RoundReport {
    /// pool round closed during this cycle, if any
    pub closed_round: Option<u32>,
    pub borrowed: Amount,
    pub returned: Amount,
    pub profit: SignedAmount,
    /// expected repayments that never came back
    pub shortfall: Amount,
    pub total_balance: Amount,
    pub rejections: usize,
    pub controllers: Vec<ControllerReport>,
}

struct Participant {
    validator: Address,
    controller: Address,
    plan: ValidatorPlan,
}

/// first moment both the borrow window and the election are open
fn borrow_time(sb: &Sandbox) -> Timestamp {
    let network = &sb.network;
    let window_open = network
        .elections_close_at()
        .saturating_sub(sb.pool.credit_start_prior_elections_end);
    window_open.max(network.elections_open_at()).max(sb.now)
}

fn log_rejection(what: &str, controller: &Address, err: Error) {
    warn!(%controller, code = err.code(), "{} rejected: {}", what, err);
}

pub fn run(scenario: &Scenario) -> Result<Vec<RoundReport>> {
    let mut sb = Sandbox::new(scenario.network.clone(), scenario.roles.clone(), &scenario.pool)?;
    sb.deposit(named("depositor"), scenario.deposit)?;

    let mut participants = Vec::new();
    for (i, plan) in scenario.validators.iter().enumerate() {
        let validator = named(&format!("validator-{}", i));
        let controller = sb.deploy_controller(validator, 0, 5 * COIN)?;
        sb.to_controller(scenario.roles.approver, controller, 0, ControllerOp::Approve)?;
        sb.to_controller(validator, controller, plan.own_funds, ControllerOp::TopUp)?;
        participants.push(Participant { validator, controller, plan: plan.clone() });
    }
    info!(pool = %sb.pool.address, controllers = participants.len(), "scenario ready");

    let mut reports = Vec::new();
    for cycle in 0..scenario.rounds {
        let round_before = sb.pool.current_round.round_id;
        let rejections_before = sb.rejections.len();

        sb.advance_to(borrow_time(&sb));
        for p in &participants {
            let op = ControllerOp::RequestLoan {
                min_loan: sb.pool.min_loan_per_validator,
                max_loan: p.plan.max_loan,
                max_interest: sb.pool.interest_rate,
            };
            if let Err(err) = sb.to_controller(p.validator, p.controller, 0, op) {
                log_rejection("loan request", &p.controller, err);
            }
        }

        for (i, p) in participants.iter().enumerate() {
            let Some(controller) = sb.controller(&p.controller) else {
                continue;
            };
            let attached = 2 * controller.params.elector_op_value;
            let stake = (controller.balance + attached)
                .saturating_sub(controller.params.min_storage)
                .saturating_sub(controller.params.fine_exposure(controller.missed_hash_updates));

            let req = sb.stake_request(stake, (cycle as QueryId + 1) * 1000 + i as QueryId);
            if let Err(err) = sb.to_controller(p.validator, p.controller, attached, ControllerOp::NewStake(req)) {
                log_rejection("stake", &p.controller, err);
            }
        }

        for _ in 0..scenario.pool.controller_params.required_set_changes {
            sb.next_validator_round();
            sb.advance_to(sb.network.validators.utime_since);
            for p in &participants {
                if let Err(err) = sb.to_controller(p.validator, p.controller, 0, ControllerOp::UpdateValidatorHash) {
                    log_rejection("hash update", &p.controller, err);
                }
            }
        }

        for p in &participants {
            let recover_at = sb.controller(&p.controller).map_or(0, |c| c.recover_at());
            sb.advance_to(recover_at);
            sb.elector.reward = p.plan.reward;
            if let Err(err) = sb.to_controller(p.validator, p.controller, 0, ControllerOp::RecoverStake) {
                log_rejection("recovery", &p.controller, err);
            }
        }

        let closed = sb.pool.current_round.round_id != round_before;
        let summary = if closed {
            sb.pool.previous_round.summary()
        } else {
            sb.pool.current_round.summary()
        };
        info!(cycle, closed, profit = summary.profit, total = sb.pool.total_balance, "cycle done");

        reports.push(RoundReport {
            closed_round: closed.then_some(summary.round_id),
            borrowed: summary.borrowed,
            returned: summary.returned,
            profit: summary.profit,
            shortfall: summary.shortfall,
            total_balance: sb.pool.total_balance,
            rejections: sb.rejections.len() - rejections_before,
            controllers: participants
                .iter()
                .filter_map(|p| sb.controller(&p.controller))
                .map(|c| ControllerReport {
                    address: c.address,
                    state: c.state.name(),
                    balance: c.balance,
                    debt: c.borrowed_amount,
                })
                .collect(),
        });
    }

    Ok(reports)
}
