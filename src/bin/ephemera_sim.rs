//! Simulates two chat clients exchanging ephemeral messages.
//!
//! Usage:
//!
//! ```text
//! ephemera_sim [config-path]
//! ```
//!
//! The optional JSON document at `config-path` is a [`DeliveryConfig`] in
//! camelCase, for example:
//!
//! ```json
//! {
//!   "pollIntervalMs": 1000,
//!   "defaultExpirySeconds": 30,
//!   "requestTimeoutMs": 5000
//! }
//! ```
//!
//! Both clients share an in-memory server and a simulated clock, which the
//! simulation advances one poll interval at a time until every timed
//! message has expired. Progress is logged through `tracing`; set
//! `RUST_LOG=ephemera=debug` for per-tick detail.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ephemera::chat::{
    adapters::memory::InMemoryChatGateway,
    clock::ManualClock,
    config::DeliveryConfig,
    domain::{ExpiryTimer, Participant, UserId},
    error::{ConfigError, DeliveryError, StoreError},
    services::{DeliveryCoordinator, MessageDraft},
};
use mockable::Clock;
use thiserror::Error;
use tokio::runtime::Builder;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

type SimServer = InMemoryChatGateway<ManualClock>;
type SimClient = DeliveryCoordinator<SimServer, ManualClock>;

const ADA: UserId = UserId::new(1);
const GRACE: UserId = UserId::new(2);
const MAX_STEPS: u32 = 600;

#[derive(Debug, Error)]
enum SimError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("failed to read config: {0}")]
    ConfigRead(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("runtime init failed: {0}")]
    RuntimeInit(#[source] std::io::Error),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(std::env::args().skip(1))?;
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(SimError::RuntimeInit)?;
    runtime.block_on(simulate(&config))?;
    Ok(())
}

fn load_config(mut args: impl Iterator<Item = String>) -> Result<DeliveryConfig, SimError> {
    let path = args.next();
    if let Some(extra) = args.next() {
        return Err(SimError::InvalidArgs(format!(
            "unexpected extra argument: {extra}"
        )));
    }
    let Some(config_path) = path else {
        return Ok(DeliveryConfig::default());
    };
    let document = std::fs::read_to_string(&config_path).map_err(SimError::ConfigRead)?;
    let config = DeliveryConfig::from_json(&document)?;
    info!(path = %config_path, "loaded configuration");
    Ok(config)
}

async fn client(
    server: &Arc<SimServer>,
    clock: &Arc<ManualClock>,
    config: &DeliveryConfig,
    user: UserId,
    partner: UserId,
) -> Result<SimClient, SimError> {
    let coordinator = DeliveryCoordinator::new(
        Arc::clone(server),
        Arc::clone(clock),
        config.clone().with_auto_select_first_partner(false),
    )?;
    coordinator.login(user)?;
    coordinator.refresh_partners().await?;
    coordinator.select(partner).await?;
    Ok(coordinator)
}

fn log_conversation(name: &str, client: &SimClient, now: DateTime<Utc>) -> Result<(), SimError> {
    for message in client.snapshot()? {
        let remaining = message.expires_at().map_or_else(
            || "never".to_owned(),
            |expires_at| client.clock().countdown(expires_at).to_string(),
        );
        info!(
            client = name,
            sender = %message.sender(),
            text = %message.content().text,
            expires_in = %remaining,
            at = %now,
            "visible message"
        );
    }
    Ok(())
}

async fn simulate(config: &DeliveryConfig) -> Result<(), SimError> {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let server = Arc::new(InMemoryChatGateway::new(Arc::clone(&clock)));
    server.link(
        Participant::new(ADA, "Ada Lovelace"),
        Participant::new(GRACE, "Grace Hopper"),
    );

    let ada = client(&server, &clock, config, ADA, GRACE).await?;
    let grace = client(&server, &clock, config, GRACE, ADA).await?;

    ada.send(
        MessageDraft::text("This note burns in ten seconds").with_timer(ExpiryTimer::TenSeconds),
    )
    .await?;
    ada.send(MessageDraft::text("This one lasts a minute").with_timer(ExpiryTimer::OneMinute))
        .await?;
    grace.tick().await?;
    grace.send(MessageDraft::text("Read you, deleting on schedule")).await?;
    ada.tick().await?;

    log_conversation("ada", &ada, clock.utc())?;
    log_conversation("grace", &grace, clock.utc())?;

    let step = config.poll_interval().max(Duration::from_millis(1));
    for _ in 0..MAX_STEPS {
        if ada.store().next_expiry()?.is_none() && grace.store().next_expiry()?.is_none() {
            break;
        }
        clock.advance(step);
        for (name, coordinator) in [("ada", &ada), ("grace", &grace)] {
            let report = coordinator.tick().await?;
            for removed in report.expired {
                info!(
                    client = name,
                    message = %removed.message.id(),
                    text = %removed.message.content().text,
                    "message expired"
                );
            }
        }
    }

    log_conversation("ada", &ada, clock.utc())?;
    log_conversation("grace", &grace, clock.utc())?;
    info!(status = ?ada.connection_status(), "simulation finished");
    Ok(())
}
