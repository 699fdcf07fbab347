//! Registry and factory.
//!
//! The sole authority that creates pools and drives settlement. Pools only
//! ever trust the registry identity bound at their construction; the issuer
//! only mints for that same identity. The registry itself answers to a human
//! owner with a two-step ownership handover.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::{EngineEvent, EventBus};
use crate::settlement::bank::ValueLedger;
use crate::settlement::claims::{backing_account, claim_id, ClaimIssuer};
use crate::settlement::pool::{EventPool, OUTCOME_COUNT};

/// Outcome of a registry-driven settlement, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub pool_id: String,
    pub winning_outcome: usize,
    pub total_winning_stake: u64,
    pub swept_to_treasury: u64,
    /// Absent when no stake won and minting was skipped.
    pub claim_id: Option<String>,
}

struct RegistryState {
    owner: String,
    pending_owner: Option<String>,
    treasury: String,
    /// Append-only, in creation order.
    pools: Vec<Arc<EventPool>>,
}

pub struct Registry {
    /// Identity this registry presents to pools and the issuer.
    id: String,
    bank: Arc<dyn ValueLedger>,
    issuer: Arc<ClaimIssuer>,
    events: EventBus,
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new(
        owner: String,
        treasury: String,
        bank: Arc<dyn ValueLedger>,
        events: EventBus,
    ) -> Result<Self> {
        if treasury.trim().is_empty() {
            return Err(anyhow!("treasury must not be empty"));
        }
        let id = format!("registry:{}", Uuid::new_v4());
        let issuer = Arc::new(ClaimIssuer::new(id.clone(), events.clone()));
        Ok(Self {
            id,
            bank,
            issuer,
            events,
            state: Mutex::new(RegistryState {
                owner,
                pending_owner: None,
                treasury,
                pools: Vec::new(),
            }),
        })
    }

    pub fn issuer(&self) -> &Arc<ClaimIssuer> {
        &self.issuer
    }

    pub fn treasury(&self) -> String {
        self.state.lock().treasury.clone()
    }

    pub fn owner(&self) -> String {
        self.state.lock().owner.clone()
    }

    pub fn pools(&self) -> Vec<Arc<EventPool>> {
        self.state.lock().pools.clone()
    }

    pub fn pool(&self, pool_id: &str) -> Option<Arc<EventPool>> {
        self.state
            .lock()
            .pools
            .iter()
            .find(|p| p.id() == pool_id)
            .cloned()
    }

    fn require_owner(state: &RegistryState, caller: &str) -> Result<()> {
        if caller != state.owner {
            return Err(anyhow!("not the owner"));
        }
        Ok(())
    }

    /// Create a new event pool. Owner-only.
    pub fn create_event(
        &self,
        caller: &str,
        description: String,
        outcome_labels: [String; OUTCOME_COUNT],
        close_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Arc<EventPool>> {
        let mut state = self.state.lock();
        Self::require_owner(&state, caller)?;

        if close_time <= now {
            return Err(anyhow!("close time must be in the future"));
        }
        if outcome_labels.iter().any(|l| l.trim().is_empty()) {
            return Err(anyhow!("outcome labels must not be empty"));
        }
        if outcome_labels[0] == outcome_labels[1]
            || outcome_labels[0] == outcome_labels[2]
            || outcome_labels[1] == outcome_labels[2]
        {
            return Err(anyhow!("outcome labels must be distinct"));
        }

        let pool = Arc::new(EventPool::new(
            description.clone(),
            outcome_labels,
            close_time,
            self.id.clone(),
            self.bank.clone(),
            self.events.clone(),
        ));
        state.pools.push(pool.clone());

        info!(pool_id = %pool.id(), description = %description, "Event pool created");
        self.events.publish(EngineEvent::PoolCreated {
            pool_id: pool.id().to_string(),
            description,
            close_time: close_time.timestamp(),
        });
        Ok(pool)
    }

    /// Settle a pool and mint claims for its winners. Owner-only.
    ///
    /// Thin orchestration: the pool computes who won what, this method
    /// performs authorization-gated minting, the issuer does the token
    /// accounting. Rejected up front while minting is paused so a settled
    /// pool can never be left with unminted winners.
    pub fn settle(
        &self,
        caller: &str,
        pool_id: &str,
        winning_outcome: usize,
        now: DateTime<Utc>,
    ) -> Result<SettlementSummary> {
        // Held across the whole orchestration. The pause controls take the
        // same lock, so a pause can never land between the paused check and
        // the mint.
        let state = self.state.lock();
        Self::require_owner(&state, caller)?;
        let pool = state
            .pools
            .iter()
            .find(|p| p.id() == pool_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown pool"))?;
        let treasury = state.treasury.clone();

        if self.issuer.is_paused() {
            return Err(anyhow!("claim minting paused"));
        }

        let id = claim_id(pool.id(), winning_outcome);
        let outcome = pool.settle(
            &self.id,
            winning_outcome,
            now,
            &treasury,
            &backing_account(&id),
        )?;

        let minted_claim_id = if outcome.winners.is_empty() {
            // The issuer rejects empty batches; skip the call entirely.
            None
        } else {
            let (winners, amounts): (Vec<String>, Vec<u64>) =
                outcome.winners.iter().cloned().unzip();
            Some(self.issuer.mint_claims(
                &self.id,
                &winners,
                &amounts,
                pool.id(),
                winning_outcome,
            )?)
        };

        info!(
            pool_id = %pool.id(),
            winning_outcome,
            minted_face_value = outcome.total_winning_stake,
            swept = outcome.swept_to_treasury,
            "Settlement complete"
        );
        Ok(SettlementSummary {
            pool_id: pool.id().to_string(),
            winning_outcome,
            total_winning_stake: outcome.total_winning_stake,
            swept_to_treasury: outcome.swept_to_treasury,
            claim_id: minted_claim_id,
        })
    }

    /// Sweep residual custody of a pool to the treasury. Owner-only.
    pub fn withdraw_remaining(&self, caller: &str, pool_id: &str) -> Result<u64> {
        let (pool, treasury) = {
            let state = self.state.lock();
            Self::require_owner(&state, caller)?;
            let pool = state
                .pools
                .iter()
                .find(|p| p.id() == pool_id)
                .cloned()
                .ok_or_else(|| anyhow!("unknown pool"))?;
            (pool, state.treasury.clone())
        };
        pool.withdraw_remaining(&self.id, &treasury)
    }

    pub fn set_treasury(&self, caller: &str, new_treasury: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::require_owner(&state, caller)?;
        if new_treasury.trim().is_empty() {
            return Err(anyhow!("treasury must not be empty"));
        }
        state.treasury = new_treasury.to_string();
        info!(treasury = %new_treasury, "Treasury updated");
        Ok(())
    }

    /// First half of the ownership handover: name a successor.
    pub fn propose_owner(&self, caller: &str, new_owner: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::require_owner(&state, caller)?;
        if new_owner.trim().is_empty() {
            return Err(anyhow!("owner must not be empty"));
        }
        state.pending_owner = Some(new_owner.to_string());
        info!(pending_owner = %new_owner, "Ownership transfer proposed");
        Ok(())
    }

    /// Second half: the successor accepts, becoming the owner.
    pub fn accept_owner(&self, caller: &str) -> Result<()> {
        let mut state = self.state.lock();
        match state.pending_owner.as_deref() {
            Some(pending) if pending == caller => {
                state.owner = caller.to_string();
                state.pending_owner = None;
                info!(owner = %caller, "Ownership transferred");
                Ok(())
            }
            _ => Err(anyhow!("no pending ownership transfer for caller")),
        }
    }

    /// Block claim minting engine-wide. Owner-only.
    ///
    /// Serialized with [`Registry::settle`] on the registry lock: a pause
    /// takes effect either before a settlement starts or after its mint has
    /// landed, never in between.
    pub fn pause_minting(&self, caller: &str) -> Result<()> {
        let state = self.state.lock();
        Self::require_owner(&state, caller)?;
        self.issuer.pause(&self.id)
    }

    pub fn unpause_minting(&self, caller: &str) -> Result<()> {
        let state = self.state.lock();
        Self::require_owner(&state, caller)?;
        self.issuer.unpause(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::bank::InMemoryBank;
    use crate::settlement::claims::claim_id;
    use crate::settlement::pool::{PoolStatus, MIN_STAKE};
    use chrono::Duration;

    fn setup() -> (Registry, Arc<InMemoryBank>, DateTime<Utc>) {
        let bank = Arc::new(InMemoryBank::new());
        let registry = Registry::new(
            "owner".to_string(),
            "treasury".to_string(),
            bank.clone(),
            EventBus::default(),
        )
        .unwrap();
        (registry, bank, Utc::now())
    }

    fn labels() -> [String; 3] {
        ["A".to_string(), "B".to_string(), "Draw".to_string()]
    }

    #[test]
    fn create_event_is_owner_only() {
        let (registry, _, now) = setup();
        let err = registry
            .create_event(
                "mallory",
                "Derby".to_string(),
                labels(),
                now + Duration::hours(1),
                now,
            )
            .unwrap_err();
        assert!(err.to_string().contains("not the owner"));
        assert!(registry.pools().is_empty());
    }

    #[test]
    fn create_event_validates_close_time_and_labels() {
        let (registry, _, now) = setup();

        let err = registry
            .create_event("owner", "Derby".to_string(), labels(), now, now)
            .unwrap_err();
        assert!(err.to_string().contains("close time must be in the future"));

        let err = registry
            .create_event(
                "owner",
                "Derby".to_string(),
                ["A".to_string(), "A".to_string(), "Draw".to_string()],
                now + Duration::hours(1),
                now,
            )
            .unwrap_err();
        assert!(err.to_string().contains("labels must be distinct"));
    }

    #[test]
    fn settle_mints_claims_and_sweeps_losers() {
        let (registry, bank, now) = setup();
        bank.deposit("x", 50_000).unwrap();
        bank.deposit("y", 30_000).unwrap();

        let pool = registry
            .create_event(
                "owner",
                "Derby".to_string(),
                labels(),
                now + Duration::hours(1),
                now,
            )
            .unwrap();
        pool.place_stake("x", 0, 50_000, now).unwrap();
        pool.place_stake("y", 1, 30_000, now).unwrap();

        let after = now + Duration::hours(2);
        let summary = registry.settle("owner", pool.id(), 0, after).unwrap();

        let id = claim_id(pool.id(), 0);
        assert_eq!(summary.claim_id.as_deref(), Some(id.as_str()));
        assert_eq!(summary.total_winning_stake, 50_000);
        assert_eq!(summary.swept_to_treasury, 30_000);
        assert_eq!(registry.issuer().balance_of("x", &id), 50_000);
        assert_eq!(registry.issuer().balance_of("y", &id), 0);
        assert_eq!(bank.balance_of("treasury"), 30_000);
        assert_eq!(pool.status(), PoolStatus::Settled);
    }

    #[test]
    fn settle_skips_minting_with_zero_winners() {
        let (registry, bank, now) = setup();
        bank.deposit("x", MIN_STAKE).unwrap();

        let pool = registry
            .create_event(
                "owner",
                "Derby".to_string(),
                labels(),
                now + Duration::hours(1),
                now,
            )
            .unwrap();
        pool.place_stake("x", 0, MIN_STAKE, now).unwrap();

        let summary = registry
            .settle("owner", pool.id(), 1, now + Duration::hours(2))
            .unwrap();
        assert!(summary.claim_id.is_none());
        assert_eq!(summary.swept_to_treasury, MIN_STAKE);
        assert_eq!(bank.balance_of("treasury"), MIN_STAKE);
    }

    #[test]
    fn settle_rejects_while_minting_paused() {
        let (registry, bank, now) = setup();
        bank.deposit("x", MIN_STAKE).unwrap();

        let pool = registry
            .create_event(
                "owner",
                "Derby".to_string(),
                labels(),
                now + Duration::hours(1),
                now,
            )
            .unwrap();
        pool.place_stake("x", 0, MIN_STAKE, now).unwrap();

        registry.pause_minting("owner").unwrap();
        let err = registry
            .settle("owner", pool.id(), 0, now + Duration::hours(2))
            .unwrap_err();
        assert!(err.to_string().contains("claim minting paused"));
        // Pool untouched; settlement can run after unpause.
        assert_eq!(pool.status(), PoolStatus::Open);

        registry.unpause_minting("owner").unwrap();
        registry
            .settle("owner", pool.id(), 0, now + Duration::hours(2))
            .unwrap();
    }

    /// Bank that parks inside the redemption-reserve push until released,
    /// so a test can interleave other registry calls mid-settlement.
    struct GatedBank {
        inner: InMemoryBank,
        reserve_push_entered: std::sync::mpsc::Sender<()>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl ValueLedger for GatedBank {
        fn transfer(&self, from: &str, to: &str, amount: u64) -> Result<()> {
            if to.starts_with("claims:") {
                let _ = self.reserve_push_entered.send(());
                let _ = self.release.lock().recv();
            }
            self.inner.transfer(from, to, amount)
        }

        fn balance_of(&self, account: &str) -> u64 {
            self.inner.balance_of(account)
        }
    }

    #[test]
    fn pause_during_settlement_cannot_strand_winners() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let bank = Arc::new(GatedBank {
            inner: InMemoryBank::new(),
            reserve_push_entered: entered_tx,
            release: Mutex::new(release_rx),
        });
        bank.inner.deposit("x", 50_000).unwrap();

        let now = Utc::now();
        let registry = Arc::new(
            Registry::new(
                "owner".to_string(),
                "treasury".to_string(),
                bank.clone(),
                EventBus::default(),
            )
            .unwrap(),
        );
        let pool = registry
            .create_event(
                "owner",
                "Derby".to_string(),
                labels(),
                now + Duration::hours(1),
                now,
            )
            .unwrap();
        pool.place_stake("x", 0, 50_000, now).unwrap();

        let settler = {
            let registry = registry.clone();
            let pool_id = pool.id().to_string();
            std::thread::spawn(move || registry.settle("owner", &pool_id, 0, now + Duration::hours(2)))
        };
        // Settlement is parked inside the reserve push, past the paused
        // check, holding the registry lock.
        entered_rx.recv().unwrap();
        let pauser = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.pause_minting("owner"))
        };
        release_tx.send(()).unwrap();

        let summary = settler.join().unwrap().unwrap();
        pauser.join().unwrap().unwrap();

        // The pause could only take effect after the mint landed; the
        // winner's claim balance is whole.
        let id = claim_id(pool.id(), 0);
        assert_eq!(summary.claim_id.as_deref(), Some(id.as_str()));
        assert_eq!(registry.issuer().balance_of("x", &id), 50_000);
        assert!(registry.issuer().is_paused());
    }

    #[test]
    fn settle_rejects_unknown_pool() {
        let (registry, _, now) = setup();
        let err = registry.settle("owner", "nope", 0, now).unwrap_err();
        assert!(err.to_string().contains("unknown pool"));
    }

    #[test]
    fn set_treasury_validates() {
        let (registry, _, _) = setup();
        assert!(registry.set_treasury("mallory", "t2").is_err());
        assert!(registry.set_treasury("owner", "  ").is_err());
        registry.set_treasury("owner", "t2").unwrap();
        assert_eq!(registry.treasury(), "t2");
    }

    #[test]
    fn ownership_handover_is_two_step() {
        let (registry, _, now) = setup();

        registry.propose_owner("owner", "successor").unwrap();
        // Proposal alone changes nothing.
        assert_eq!(registry.owner(), "owner");
        // Only the named successor may accept.
        assert!(registry.accept_owner("mallory").is_err());

        registry.accept_owner("successor").unwrap();
        assert_eq!(registry.owner(), "successor");

        // Old owner is locked out, new owner is live.
        assert!(registry
            .create_event(
                "owner",
                "Derby".to_string(),
                labels(),
                now + Duration::hours(1),
                now
            )
            .is_err());
        assert!(registry
            .create_event(
                "successor",
                "Derby".to_string(),
                labels(),
                now + Duration::hours(1),
                now
            )
            .is_ok());
    }

    #[test]
    fn withdraw_remaining_routes_through_registry() {
        let (registry, bank, now) = setup();
        let pool = registry
            .create_event(
                "owner",
                "Derby".to_string(),
                labels(),
                now + Duration::hours(1),
                now,
            )
            .unwrap();
        bank.deposit(&pool.custody_account(), 5_000).unwrap();

        assert!(registry.withdraw_remaining("mallory", pool.id()).is_err());
        let swept = registry.withdraw_remaining("owner", pool.id()).unwrap();
        assert_eq!(swept, 5_000);
        assert_eq!(bank.balance_of("treasury"), 5_000);
    }
}
