//! Domain types for the chat delivery core.
//!
//! This module contains pure domain types with no infrastructure
//! dependencies. Messages, participants, and identifiers are serialisable
//! via serde so adapters can move them across the wire unchanged.

mod expiry;
mod ids;
mod message;
mod participant;

pub use expiry::{Countdown, ExpiryTimer};
pub use ids::{ConversationId, MessageId, ProvisionalId, UserId};
pub use message::{
    AttachmentRef, DeliveryState, Message, MessageBuilder, MessageBuilderError, MessageContent,
};
pub use participant::{ActiveSelection, Participant};
