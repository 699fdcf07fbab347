use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Engine notifications, published on every state-changing operation.
///
/// Consumers (the WebSocket feed, tests) subscribe through [`EventBus`];
/// slow or absent subscribers never block the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PoolCreated {
        pool_id: String,
        description: String,
        close_time: i64,
    },
    StakePlaced {
        pool_id: String,
        staker: String,
        outcome: usize,
        amount: u64,
    },
    PoolSettled {
        pool_id: String,
        winning_outcome: usize,
        total_winning_stake: u64,
        swept_to_treasury: u64,
    },
    ClaimsMinted {
        claim_id: String,
        pool_id: String,
        winning_outcome: usize,
        winners: Vec<String>,
        amounts: Vec<u64>,
    },
    TreasurySwept {
        pool_id: String,
        amount: u64,
    },
}

/// Broadcast fan-out for [`EngineEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Send errors (no active subscribers) are ignored.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub owner_address: String,
    pub treasury_address: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let owner_address =
            std::env::var("OWNER_ADDRESS").unwrap_or_else(|_| "owner".to_string());

        let treasury_address =
            std::env::var("TREASURY_ADDRESS").unwrap_or_else(|_| "treasury".to_string());

        Ok(Self {
            port,
            owner_address,
            treasury_address,
        })
    }
}
