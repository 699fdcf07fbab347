//! TriPool - pari-mutuel settlement backend for three-outcome events.
//!
//! Stakes accrue per event until close time; an owner-driven settlement
//! converts winning stakes into claim tokens and sweeps losing stakes to
//! the treasury. Exactly once, by construction.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tripool_backend::{
    api::{router, AppState},
    middleware::request_logging,
    models::{Config, EventBus},
    settlement::{InMemoryBank, Registry},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripool_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        owner = %config.owner_address,
        treasury = %config.treasury_address,
        "Starting TriPool settlement backend"
    );

    let bank = Arc::new(InMemoryBank::new());
    let events = EventBus::default();
    let registry = Arc::new(Registry::new(
        config.owner_address.clone(),
        config.treasury_address.clone(),
        bank.clone(),
        events.clone(),
    )?);

    let state = AppState {
        registry,
        bank,
        events,
    };
    let app = router(state)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
