//! Expiry-aware chat delivery core.
//!
//! This module keeps a client-side view of one-to-one conversations whose
//! messages self-destruct. It reconciles that view with an external chat
//! server, applies optimistic sends, and removes messages once their expiry
//! passes.
//!
//! # Architecture
//!
//! The module follows hexagonal architecture principles:
//!
//! - **Domain**: Pure domain types ([`domain::Message`], [`domain::ExpiryTimer`], [`domain::ActiveSelection`], etc.)
//! - **Store**: Ordered per-conversation logs with versioned snapshots ([`store::MessageStore`])
//! - **Index**: Partner lists and the active selection ([`index::ConversationIndex`])
//! - **Ports**: Abstract interfaces to the server ([`ports::ChatGateway`], [`ports::MessagePush`])
//! - **Adapters**: Concrete implementations ([`adapters::memory::InMemoryChatGateway`])
//! - **Services**: Orchestration ([`services::DeliveryCoordinator`])
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chrono::{TimeZone, Utc};
//! use ephemera::chat::adapters::memory::InMemoryChatGateway;
//! use ephemera::chat::clock::ManualClock;
//! use ephemera::chat::config::DeliveryConfig;
//! use ephemera::chat::domain::{ExpiryTimer, Participant, UserId};
//! use ephemera::chat::services::{DeliveryCoordinator, MessageDraft};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
//! let server = Arc::new(InMemoryChatGateway::new(Arc::clone(&clock)));
//! server.link(
//!     Participant::new(UserId::new(1), "Ada"),
//!     Participant::new(UserId::new(2), "Grace"),
//! );
//!
//! let coordinator =
//!     DeliveryCoordinator::new(Arc::clone(&server), Arc::clone(&clock), DeliveryConfig::default())
//!         .expect("valid config");
//! coordinator.login(UserId::new(1)).expect("login");
//! coordinator.refresh_partners().await.expect("partners");
//! coordinator
//!     .send(MessageDraft::text("burn after reading").with_timer(ExpiryTimer::TenSeconds))
//!     .await
//!     .expect("send");
//! assert_eq!(coordinator.snapshot().expect("snapshot").len(), 1);
//!
//! clock.advance(Duration::from_secs(10));
//! coordinator.tick().await.expect("tick");
//! assert!(coordinator.snapshot().expect("snapshot").is_empty());
//! # });
//! ```

pub mod adapters;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod index;
pub mod ports;
pub mod services;
pub mod store;

#[cfg(test)]
mod tests;
