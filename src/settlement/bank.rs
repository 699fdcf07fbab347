//! Value-currency boundary.
//!
//! The settlement core never moves value itself; it asks a `ValueLedger` to
//! pull stakes into pool custody and push sweeps to the treasury. Transfers
//! are fallible and atomic: a rejected transfer leaves both accounts untouched.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Interface to the external stable-value currency.
pub trait ValueLedger: Send + Sync {
    /// Move `amount` base units from one account to another.
    fn transfer(&self, from: &str, to: &str, amount: u64) -> Result<()>;

    /// Current balance of an account (0 for unknown accounts).
    fn balance_of(&self, account: &str) -> u64;
}

/// In-memory ledger used by the backend and by tests.
#[derive(Default)]
pub struct InMemoryBank {
    accounts: Mutex<HashMap<String, u64>>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air. Funding entry point for demo
    /// accounts; real deployments replace this ledger entirely.
    pub fn deposit(&self, account: &str, amount: u64) -> Result<()> {
        let mut accounts = self.accounts.lock();
        let balance = accounts.entry(account.to_string()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("balance overflow"))?;
        Ok(())
    }
}

impl ValueLedger for InMemoryBank {
    fn transfer(&self, from: &str, to: &str, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let mut accounts = self.accounts.lock();

        let from_balance = accounts.get(from).copied().unwrap_or(0);
        if from_balance < amount {
            return Err(anyhow!("insufficient funds"));
        }
        let to_balance = accounts.get(to).copied().unwrap_or(0);
        let to_after = to_balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("balance overflow"))?;

        accounts.insert(from.to_string(), from_balance - amount);
        accounts.insert(to.to_string(), to_after);
        Ok(())
    }

    fn balance_of(&self, account: &str) -> u64 {
        self.accounts.lock().get(account).copied().unwrap_or(0)
    }
}
