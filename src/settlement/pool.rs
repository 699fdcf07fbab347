//! Per-event escrow pool.
//!
//! One pool per three-outcome event. The pool owns the stake ledger and the
//! accept/lock/settle state machine; it never talks to the claim issuer.
//! Settlement authority is the registry identity bound at construction,
//! re-checked on every call.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{EngineEvent, EventBus};
use crate::settlement::bank::ValueLedger;

/// Number of outcomes per event. Fixed by design.
pub const OUTCOME_COUNT: usize = 3;

/// Smallest accepted stake, in base units. Bounds dust and spam entries.
pub const MIN_STAKE: u64 = 10_000;

/// Pool lifecycle. One-way: `Open` -> `Settled`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Open,
    Settled,
}

/// A single stake: amount committed to one outcome index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRecord {
    pub amount: u64,
    pub outcome: usize,
}

#[derive(Debug)]
struct PoolState {
    status: PoolStatus,
    outcome_totals: [u64; OUTCOME_COUNT],
    /// staker -> ordered stake records. A staker may hold stakes on
    /// several outcomes of the same event.
    stake_ledger: HashMap<String, Vec<StakeRecord>>,
    /// Distinct stakers in first-stake order; drives the settlement scan.
    staker_set: Vec<String>,
}

/// Result of a successful settlement, handed back to the registry.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub winning_outcome: usize,
    /// `(staker, winning amount)` in first-stake order.
    pub winners: Vec<(String, u64)>,
    pub total_winning_stake: u64,
    pub swept_to_treasury: u64,
}

/// Read-only view for the API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: String,
    pub description: String,
    pub outcome_labels: [String; OUTCOME_COUNT],
    pub close_time: DateTime<Utc>,
    pub status: PoolStatus,
    pub outcome_totals: [u64; OUTCOME_COUNT],
    pub staker_count: usize,
}

pub struct EventPool {
    id: String,
    description: String,
    outcome_labels: [String; OUTCOME_COUNT],
    close_time: DateTime<Utc>,
    /// Identity of the registry allowed to settle and sweep this pool.
    registry_id: String,
    bank: Arc<dyn ValueLedger>,
    events: EventBus,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for EventPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPool")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("outcome_labels", &self.outcome_labels)
            .field("close_time", &self.close_time)
            .field("registry_id", &self.registry_id)
            .finish_non_exhaustive()
    }
}

impl EventPool {
    pub fn new(
        description: String,
        outcome_labels: [String; OUTCOME_COUNT],
        close_time: DateTime<Utc>,
        registry_id: String,
        bank: Arc<dyn ValueLedger>,
        events: EventBus,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description,
            outcome_labels,
            close_time,
            registry_id,
            bank,
            events,
            state: Mutex::new(PoolState {
                status: PoolStatus::Open,
                outcome_totals: [0; OUTCOME_COUNT],
                stake_ledger: HashMap::new(),
                staker_set: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn outcome_labels(&self) -> &[String; OUTCOME_COUNT] {
        &self.outcome_labels
    }

    pub fn close_time(&self) -> DateTime<Utc> {
        self.close_time
    }

    pub fn status(&self) -> PoolStatus {
        self.state.lock().status
    }

    pub fn outcome_totals(&self) -> [u64; OUTCOME_COUNT] {
        self.state.lock().outcome_totals
    }

    /// Stake records for one staker, in placement order.
    pub fn stakes_of(&self, staker: &str) -> Vec<StakeRecord> {
        self.state
            .lock()
            .stake_ledger
            .get(staker)
            .cloned()
            .unwrap_or_default()
    }

    /// Custody account of this pool on the value ledger.
    pub fn custody_account(&self) -> String {
        format!("pool:{}", self.id)
    }

    /// Current balance held in pool custody.
    pub fn custody_balance(&self) -> u64 {
        self.bank.balance_of(&self.custody_account())
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        PoolSnapshot {
            pool_id: self.id.clone(),
            description: self.description.clone(),
            outcome_labels: self.outcome_labels.clone(),
            close_time: self.close_time,
            status: state.status,
            outcome_totals: state.outcome_totals,
            staker_count: state.staker_set.len(),
        }
    }

    /// Commit `amount` to `outcome` on behalf of `staker`.
    ///
    /// All-or-nothing: every precondition is checked, then funds move, then
    /// the ledger mutates. A failed pull leaves no trace in the ledger.
    pub fn place_stake(
        &self,
        staker: &str,
        outcome: usize,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if state.status != PoolStatus::Open {
            return Err(anyhow!("pool already settled"));
        }
        if now >= self.close_time {
            return Err(anyhow!("betting window closed"));
        }
        if outcome >= OUTCOME_COUNT {
            return Err(anyhow!("invalid outcome"));
        }
        if amount < MIN_STAKE {
            return Err(anyhow!("stake below minimum"));
        }
        let new_total = state.outcome_totals[outcome]
            .checked_add(amount)
            .ok_or_else(|| anyhow!("outcome total overflow"))?;

        self.bank.transfer(staker, &self.custody_account(), amount)?;

        if !state.stake_ledger.contains_key(staker) {
            state.staker_set.push(staker.to_string());
        }
        state
            .stake_ledger
            .entry(staker.to_string())
            .or_default()
            .push(StakeRecord { amount, outcome });
        state.outcome_totals[outcome] = new_total;

        info!(
            pool_id = %self.id,
            staker = %staker,
            outcome,
            amount,
            "Stake placed"
        );
        self.events.publish(EngineEvent::StakePlaced {
            pool_id: self.id.clone(),
            staker: staker.to_string(),
            outcome,
            amount,
        });
        Ok(())
    }

    /// Declare the winning outcome. Registry-only, once, at/after close.
    ///
    /// Status flips to `Settled` before any fund movement so a reentrant or
    /// retried call can never settle twice. Winning stake moves to
    /// `backing_account` (the redemption reserve behind the minted claims),
    /// everything else in custody moves to the treasury, and the pool ends
    /// at a zero balance. If either push fails the pool stays `Settled`
    /// with funds stuck in custody, recoverable through
    /// [`EventPool::withdraw_remaining`].
    pub fn settle(
        &self,
        caller: &str,
        winning_outcome: usize,
        now: DateTime<Utc>,
        treasury: &str,
        backing_account: &str,
    ) -> Result<SettlementOutcome> {
        let mut state = self.state.lock();

        if caller != self.registry_id {
            return Err(anyhow!("unauthorized caller"));
        }
        if state.status != PoolStatus::Open {
            return Err(anyhow!("already settled"));
        }
        if now < self.close_time {
            return Err(anyhow!("event still ongoing"));
        }
        if winning_outcome >= OUTCOME_COUNT {
            return Err(anyhow!("invalid outcome"));
        }

        state.status = PoolStatus::Settled;

        let (winners, total_winning_stake) =
            compute_winners(&state.stake_ledger, &state.staker_set, winning_outcome);

        // Everything in custody beyond the winning total is losing stake,
        // including any value sent to the pool outside the stake path.
        let custody = self.custody_balance();
        let losing_stake = custody.saturating_sub(total_winning_stake);

        if total_winning_stake > 0 {
            if let Err(err) = self.bank.transfer(
                &self.custody_account(),
                backing_account,
                total_winning_stake,
            ) {
                warn!(
                    pool_id = %self.id,
                    amount = total_winning_stake,
                    error = %err,
                    "Backing reserve transfer failed; pool is settled with funds stuck in custody"
                );
                return Err(err);
            }
        }
        if losing_stake > 0 {
            if let Err(err) = self
                .bank
                .transfer(&self.custody_account(), treasury, losing_stake)
            {
                warn!(
                    pool_id = %self.id,
                    amount = losing_stake,
                    error = %err,
                    "Treasury sweep failed; pool is settled with funds stuck in custody"
                );
                return Err(err);
            }
        }

        info!(
            pool_id = %self.id,
            winning_outcome,
            total_winning_stake,
            swept = losing_stake,
            "Pool settled"
        );
        self.events.publish(EngineEvent::PoolSettled {
            pool_id: self.id.clone(),
            winning_outcome,
            total_winning_stake,
            swept_to_treasury: losing_stake,
        });

        Ok(SettlementOutcome {
            winning_outcome,
            winners,
            total_winning_stake,
            swept_to_treasury: losing_stake,
        })
    }

    /// Sweep whatever sits in pool custody to the treasury. Registry-only
    /// escape hatch, valid in any phase, so value can never be stranded.
    pub fn withdraw_remaining(&self, caller: &str, treasury: &str) -> Result<u64> {
        // Lock held across the transfer to serialize against settle().
        let _state = self.state.lock();

        if caller != self.registry_id {
            return Err(anyhow!("unauthorized caller"));
        }
        let remaining = self.custody_balance();
        if remaining > 0 {
            self.bank
                .transfer(&self.custody_account(), treasury, remaining)?;
            info!(pool_id = %self.id, amount = remaining, "Residual custody swept");
            self.events.publish(EngineEvent::TreasurySwept {
                pool_id: self.id.clone(),
                amount: remaining,
            });
        }
        Ok(remaining)
    }
}

/// Pure winner scan over a ledger snapshot.
///
/// Walks stakers in first-stake order and sums, per staker, the records
/// placed on `winning_outcome`. Cost is O(total stake records); participation
/// per event is bounded by practice, not by this code.
pub fn compute_winners(
    stake_ledger: &HashMap<String, Vec<StakeRecord>>,
    staker_set: &[String],
    winning_outcome: usize,
) -> (Vec<(String, u64)>, u64) {
    let mut winners = Vec::new();
    let mut total_winning_stake = 0u64;

    for staker in staker_set {
        let Some(records) = stake_ledger.get(staker) else {
            continue;
        };
        let won: u64 = records
            .iter()
            .filter(|r| r.outcome == winning_outcome)
            .map(|r| r.amount)
            .sum();
        if won > 0 {
            winners.push((staker.clone(), won));
            total_winning_stake += won;
        }
    }

    (winners, total_winning_stake)
}
