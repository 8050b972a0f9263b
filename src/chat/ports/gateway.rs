//! Gateway port for the external chat server.
//!
//! Defines the REST-shaped boundary the delivery core reads conversation
//! state from and sends messages through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::{
    domain::{AttachmentRef, Message, MessageContent, Participant, ProvisionalId, UserId},
    error::GatewayError,
};

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// A message handed to the server for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Text and uploaded attachment.
    pub content: MessageContent,
    /// Lifetime in seconds; `None` sends a message that never expires.
    pub expiry_seconds: Option<u64>,
    /// Provisional identifier the server echoes on the confirmed message.
    pub client_ref: ProvisionalId,
}

/// Port for the external chat server.
///
/// Implementations own transport concerns (HTTP, sockets, retries on the
/// wire); the core only sees completed results or [`GatewayError`]s.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Fetches the conversation partners of `user`, in server order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if the server cannot be reached.
    async fn fetch_conversation_partners(&self, user: UserId) -> GatewayResult<Vec<Participant>>;

    /// Fetches the authoritative messages between `user` and `partner`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if the server cannot be reached.
    async fn fetch_messages(&self, user: UserId, partner: UserId) -> GatewayResult<Vec<Message>>;

    /// Sends a message and returns it as confirmed by the server, with its
    /// final identifier and creation timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if the server cannot be reached and
    /// [`GatewayError::Validation`] if the message is rejected, for example
    /// for having neither text nor an attachment.
    async fn send_message(
        &self,
        user: UserId,
        partner: UserId,
        outgoing: OutgoingMessage,
    ) -> GatewayResult<Message>;

    /// Uploads attachment bytes and returns a reference to them.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upload`] if the upload fails.
    async fn upload_attachment(
        &self,
        bytes: Vec<u8>,
        filename: String,
    ) -> GatewayResult<AttachmentRef>;
}
