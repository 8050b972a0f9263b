//! Error types for the chat delivery core.
//!
//! Uses `thiserror` for ergonomic error handling with typed variants
//! that can be inspected by callers.

use super::domain::{ConversationId, MessageBuilderError, MessageId, ProvisionalId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the message store.
///
/// Apart from [`StoreError::DuplicateMessage`], which callers recover from by
/// ignoring the insert, these indicate a broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A message with this identifier already exists, or already expired,
    /// in the conversation.
    #[error("duplicate message {id} in conversation {conversation_id}")]
    DuplicateMessage {
        /// The conversation containing the conflict.
        conversation_id: ConversationId,
        /// The conflicting message identifier.
        id: MessageId,
    },

    /// The message expiry does not follow its creation timestamp.
    #[error("message {0} expires before it was created")]
    InvalidExpiry(MessageId),

    /// The referenced message is not in the conversation.
    #[error("message {id} not found in conversation {conversation_id}")]
    UnknownMessage {
        /// The conversation searched.
        conversation_id: ConversationId,
        /// The missing message identifier.
        id: MessageId,
    },

    /// An internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    /// Creates a lock poisoning error from any displayable cause.
    #[must_use]
    pub fn poisoned(cause: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(cause.to_string())
    }
}

/// Errors raised by the conversation index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The partner is not in the logged-in user's partner list.
    #[error("unknown conversation partner: {0}")]
    UnknownPartner(UserId),

    /// No user is logged in.
    #[error("no user is logged in")]
    NotLoggedIn,
}

/// Failures reported by the external chat server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The request could not be completed.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the request as invalid.
    #[error("validation error: {0}")]
    Validation(String),

    /// The attachment upload failed.
    #[error("upload error: {0}")]
    Upload(String),

    /// The request exceeded the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an upload error.
    #[must_use]
    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload(message.into())
    }
}

/// Errors raised while loading delivery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("malformed configuration: {0}")]
    Malformed(String),

    /// A duration option was zero.
    #[error("configuration option `{0}` must be greater than zero")]
    ZeroValue(&'static str),
}

/// Errors surfaced by the delivery coordinator.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The message store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The conversation index rejected an operation.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// An external read failed; the next tick retries.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The coordinator was given an invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The outgoing message could not be built.
    #[error(transparent)]
    Message(#[from] MessageBuilderError),

    /// No conversation partner is selected.
    #[error("no conversation is selected")]
    NoSelection,

    /// The draft has neither text nor an attachment.
    #[error("cannot send an empty message")]
    EmptyMessage,

    /// A send failed; the provisional message is kept in the failed state.
    #[error("send of provisional message {provisional} failed: {source}")]
    SendFailed {
        /// The provisional message left in the failed state.
        provisional: ProvisionalId,
        /// The underlying gateway failure.
        source: GatewayError,
    },

    /// No failed send is recorded under this provisional identifier.
    #[error("no failed send for provisional message {0}")]
    UnknownProvisional(ProvisionalId),

    /// A coordinator lock was poisoned.
    #[error("coordinator lock poisoned: {0}")]
    LockPoisoned(String),
}

impl DeliveryError {
    /// Returns `true` for failures of the external collaborator, which are
    /// expected in steady state and retried.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::Gateway(_) | Self::SendFailed { .. })
    }
}
