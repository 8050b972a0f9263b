//! Port trait definitions for the chat delivery core.
//!
//! Ports define the abstract interfaces the core requires from the external
//! chat server. Adapters implement these ports; the coordinator receives them
//! at construction, so tests substitute doubles.

pub mod gateway;
pub mod push;

pub use gateway::{ChatGateway, GatewayResult, OutgoingMessage};
pub use push::{IncomingMessage, MessageFeed, MessagePush};
