//! Pari-mutuel settlement engine: per-event escrow pools, the registry that
//! creates and settles them, and the claim issuer that tokenizes winnings.

pub mod bank;
pub mod claims;
pub mod pool;
pub mod registry;

pub use bank::{InMemoryBank, ValueLedger};
pub use claims::{backing_account, claim_id, ClaimDetails, ClaimIssuer};
pub use pool::{
    compute_winners, EventPool, PoolSnapshot, PoolStatus, SettlementOutcome, StakeRecord,
    MIN_STAKE, OUTCOME_COUNT,
};
pub use registry::{Registry, SettlementSummary};
