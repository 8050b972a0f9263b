//! Shared world state for selection and send BDD scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ephemera::chat::{
    adapters::memory::InMemoryChatGateway,
    clock::ManualClock,
    config::DeliveryConfig,
    domain::{Message, UserId},
    error::DeliveryError,
    services::DeliveryCoordinator,
};
use rstest::fixture;

/// Server type used by the BDD world.
pub type TestServer = InMemoryChatGateway<ManualClock>;

/// Coordinator type used by the BDD world.
pub type TestCoordinator = DeliveryCoordinator<TestServer, ManualClock>;

/// Scenario world for selection and send behaviour tests.
pub struct ChatWorld {
    pub clock: Arc<ManualClock>,
    pub server: Arc<TestServer>,
    pub coordinator: Option<TestCoordinator>,
    pub user: Option<UserId>,
    pub users: HashMap<String, UserId>,
    pub last_sent: Option<Message>,
    pub last_error: Option<DeliveryError>,
}

impl ChatWorld {
    /// Creates a world with a server and no session.
    #[must_use]
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let server = Arc::new(InMemoryChatGateway::new(Arc::clone(&clock)));
        Self {
            clock,
            server,
            coordinator: None,
            user: None,
            users: HashMap::new(),
            last_sent: None,
            last_error: None,
        }
    }

    /// Returns the identifier of `name`, allocating one on first use.
    pub fn user_id(&mut self, name: &str) -> UserId {
        let next = UserId::new(u64::try_from(self.users.len()).unwrap_or(u64::MAX).saturating_add(1));
        *self.users.entry(name.to_owned()).or_insert(next)
    }

    /// Returns the identifier of a user the scenario already named.
    pub fn known_user(&self, name: &str) -> Result<UserId, eyre::Report> {
        self.users
            .get(name)
            .copied()
            .ok_or_else(|| eyre::eyre!("user {name} is not part of the scenario"))
    }

    /// Returns the coordinator of the logged-in user.
    pub fn coordinator(&self) -> Result<&TestCoordinator, eyre::Report> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| eyre::eyre!("no user is logged in"))
    }

    /// Configuration used by every scenario: manual selection, fast polls.
    #[must_use]
    pub fn config() -> DeliveryConfig {
        DeliveryConfig::default()
            .with_poll_interval_ms(10)
            .with_auto_select_first_partner(false)
    }
}

impl Default for ChatWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> ChatWorld {
    ChatWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
