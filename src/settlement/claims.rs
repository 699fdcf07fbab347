//! Claim token issuance and accounting.
//!
//! Claims are keyed by a deterministic id derived from `(pool, outcome)` so
//! any observer can re-derive the id for redemption or display without
//! querying engine state. Minting is registry-only and batch-atomic; holder
//! transfers are a peripheral capability, unaffected by the pause switch.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::models::{EngineEvent, EventBus};

/// Provenance record stored per claim id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimDetails {
    pub pool_id: String,
    pub winning_outcome: usize,
}

/// Deterministic claim identifier: hex SHA-256 of `"{pool_id}|{outcome}"`.
///
/// Pure function of its inputs; distinct pools or distinct outcomes of the
/// same pool can never collide.
pub fn claim_id(pool_id: &str, winning_outcome: usize) -> String {
    let data = format!("{}|{}", pool_id, winning_outcome);
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Value-ledger account holding the redemption reserve behind one claim id.
/// Claims redeem 1:1 against this account; redemption itself lives outside
/// the settlement core.
pub fn backing_account(claim_id: &str) -> String {
    format!("claims:{claim_id}")
}

#[derive(Debug, Default)]
struct IssuerState {
    paused: bool,
    details: HashMap<String, ClaimDetails>,
    /// holder -> claim_id -> amount
    balances: HashMap<String, HashMap<String, u64>>,
}

pub struct ClaimIssuer {
    /// Identity of the owning registry; the only caller allowed to mint
    /// or toggle the pause switch.
    registry_id: String,
    events: EventBus,
    state: Mutex<IssuerState>,
}

impl ClaimIssuer {
    pub fn new(registry_id: String, events: EventBus) -> Self {
        Self {
            registry_id,
            events,
            state: Mutex::new(IssuerState::default()),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn details(&self, claim_id: &str) -> Option<ClaimDetails> {
        self.state.lock().details.get(claim_id).cloned()
    }

    pub fn balance_of(&self, holder: &str, claim_id: &str) -> u64 {
        self.state
            .lock()
            .balances
            .get(holder)
            .and_then(|claims| claims.get(claim_id))
            .copied()
            .unwrap_or(0)
    }

    /// All claim balances of one holder.
    pub fn balances_of(&self, holder: &str) -> HashMap<String, u64> {
        self.state
            .lock()
            .balances
            .get(holder)
            .cloned()
            .unwrap_or_default()
    }

    /// Batch-mint claims for a settled pool's winners. Registry-only.
    ///
    /// Either every credit lands or none does: all validation runs before
    /// the first balance is touched, under a single lock.
    pub fn mint_claims(
        &self,
        caller: &str,
        winners: &[String],
        amounts: &[u64],
        pool_id: &str,
        winning_outcome: usize,
    ) -> Result<String> {
        let mut state = self.state.lock();

        if caller != self.registry_id {
            return Err(anyhow!("unauthorized caller"));
        }
        if state.paused {
            return Err(anyhow!("claim minting paused"));
        }
        if winners.is_empty() {
            return Err(anyhow!("empty winners batch"));
        }
        if winners.len() != amounts.len() {
            return Err(anyhow!("winners/amounts length mismatch"));
        }

        let id = claim_id(pool_id, winning_outcome);

        // Compute every resulting balance before touching any of them, so a
        // mid-batch overflow cannot leave a partial mint. Duplicate winners
        // within one batch fold into the same running total.
        let mut credited: HashMap<&str, u64> = HashMap::new();
        for (winner, amount) in winners.iter().zip(amounts) {
            let current = state
                .balances
                .get(winner)
                .and_then(|claims| claims.get(&id))
                .copied()
                .unwrap_or(0);
            let total = credited.entry(winner.as_str()).or_insert(current);
            *total = total
                .checked_add(*amount)
                .ok_or_else(|| anyhow!("claim balance overflow"))?;
        }

        state
            .details
            .entry(id.clone())
            .or_insert_with(|| ClaimDetails {
                pool_id: pool_id.to_string(),
                winning_outcome,
            });
        for (winner, balance) in credited {
            state
                .balances
                .entry(winner.to_string())
                .or_default()
                .insert(id.clone(), balance);
        }

        info!(
            claim_id = %id,
            pool_id = %pool_id,
            winning_outcome,
            winner_count = winners.len(),
            "Claims minted"
        );
        self.events.publish(EngineEvent::ClaimsMinted {
            claim_id: id.clone(),
            pool_id: pool_id.to_string(),
            winning_outcome,
            winners: winners.to_vec(),
            amounts: amounts.to_vec(),
        });

        Ok(id)
    }

    /// Holder-initiated transfer. Works while minting is paused.
    pub fn transfer(&self, from: &str, to: &str, claim_id: &str, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(anyhow!("transfer amount must be positive"));
        }
        let mut state = self.state.lock();

        let from_balance = state
            .balances
            .get(from)
            .and_then(|claims| claims.get(claim_id))
            .copied()
            .unwrap_or(0);
        if from_balance < amount {
            return Err(anyhow!("insufficient claim balance"));
        }

        if let Some(balance) = state
            .balances
            .get_mut(from)
            .and_then(|claims| claims.get_mut(claim_id))
        {
            *balance -= amount;
        }
        *state
            .balances
            .entry(to.to_string())
            .or_default()
            .entry(claim_id.to_string())
            .or_insert(0) += amount;

        Ok(())
    }

    /// Emergency stop for minting. Owner (registry) only.
    pub fn pause(&self, caller: &str) -> Result<()> {
        if caller != self.registry_id {
            return Err(anyhow!("unauthorized caller"));
        }
        self.state.lock().paused = true;
        warn!("Claim minting paused");
        Ok(())
    }

    pub fn unpause(&self, caller: &str) -> Result<()> {
        if caller != self.registry_id {
            return Err(anyhow!("unauthorized caller"));
        }
        self.state.lock().paused = false;
        info!("Claim minting resumed");
        Ok(())
    }
}
