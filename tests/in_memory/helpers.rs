//! Shared test helpers for in-memory chat server integration tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use ephemera::chat::{
    adapters::memory::InMemoryChatGateway,
    clock::ManualClock,
    config::DeliveryConfig,
    domain::{Message, Participant, UserId},
    ports::ChatGateway,
    services::DeliveryCoordinator,
};
use rstest::fixture;

/// The local user in most scenarios.
pub const ADA: UserId = UserId::new(1);
/// First partner of [`ADA`].
pub const GRACE: UserId = UserId::new(2);
/// Second partner of [`ADA`].
pub const LINUS: UserId = UserId::new(3);

/// In-memory server type used throughout the integration tests.
pub type Server = InMemoryChatGateway<ManualClock>;

/// Coordinator type talking to the in-memory server.
pub type Coordinator<G = Server> = DeliveryCoordinator<G, ManualClock>;

/// Provides a controllable clock frozen at a fixed instant.
///
/// # Panics
///
/// Panics if the fixed start instant is invalid.
#[fixture]
pub fn clock() -> Arc<ManualClock> {
    let start: DateTime<Utc> = Utc
        .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .expect("valid start instant");
    Arc::new(ManualClock::new(start))
}

/// Provides a server where Ada chats with Grace and Linus.
#[fixture]
pub fn server(clock: Arc<ManualClock>) -> (Arc<ManualClock>, Arc<Server>) {
    let server = Server::new(Arc::clone(&clock));
    let ada = Participant::new(ADA, "Ada Lovelace");
    server.link(ada.clone(), Participant::new(GRACE, "Grace Hopper"));
    server.link(ada, Participant::new(LINUS, "Linus Torvalds"));
    (clock, Arc::new(server))
}

/// Configuration with a fast poll interval and manual partner selection.
#[must_use]
pub fn config() -> DeliveryConfig {
    DeliveryConfig::default()
        .with_poll_interval_ms(10)
        .with_auto_select_first_partner(false)
}

/// Logs `user` in against `gateway` and loads the partner list.
///
/// # Errors
///
/// Returns an error if the partner list cannot be fetched.
pub async fn session<G: ChatGateway>(
    gateway: Arc<G>,
    clock: &Arc<ManualClock>,
    config: DeliveryConfig,
    user: UserId,
) -> Result<Arc<Coordinator<G>>, eyre::Report> {
    let coordinator = Arc::new(DeliveryCoordinator::new(gateway, Arc::clone(clock), config)?);
    coordinator.login(user)?;
    coordinator.refresh_partners().await?;
    Ok(coordinator)
}

/// Returns the texts of `messages`, in order.
#[must_use]
pub fn texts(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .map(|message| message.content().text.as_str())
        .collect()
}

/// Polls `condition` until it holds or two seconds pass.
///
/// # Errors
///
/// Returns an error naming `what` if the condition never holds.
pub async fn eventually<F>(what: &str, mut condition: F) -> Result<(), eyre::Report>
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    waited.map_err(|_| eyre::eyre!("timed out waiting for {what}"))
}

