//! Domain identifier newtypes for users, conversations, and messages.
//!
//! These types prevent accidental mixing of the different identifiers that
//! flow between the delivery core and the external chat server.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a chat user as assigned by the external server.
///
/// # Examples
///
/// ```
/// use ephemera::chat::domain::UserId;
///
/// let id = UserId::new(7);
/// assert_eq!(id.value(), 7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Creates a user identifier from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying numeric value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a two-party conversation.
///
/// The participant pair is unordered for lookup but stored in canonical
/// (ascending) order, so both participants derive the same identifier.
///
/// # Examples
///
/// ```
/// use ephemera::chat::domain::{ConversationId, UserId};
///
/// let a = UserId::new(2);
/// let b = UserId::new(9);
/// assert_eq!(ConversationId::between(a, b), ConversationId::between(b, a));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    low: UserId,
    high: UserId,
}

impl ConversationId {
    /// Creates the conversation identifier shared by two participants.
    #[must_use]
    pub fn between(first: UserId, second: UserId) -> Self {
        Self {
            low: first.min(second),
            high: first.max(second),
        }
    }

    /// Returns the participants in canonical order.
    #[must_use]
    pub const fn participants(&self) -> (UserId, UserId) {
        (self.low, self.high)
    }

    /// Returns `true` if `user` takes part in this conversation.
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.low == user || self.high == user
    }

    /// Returns the participant other than `user`, if `user` takes part.
    #[must_use]
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        if self.low == user {
            Some(self.high)
        } else if self.high == user {
            Some(self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

/// Client-generated identifier of a message awaiting server confirmation.
///
/// The server echoes it back as the confirmed message's client reference,
/// which lets reconciliation match the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionalId(Uuid);

impl ProvisionalId {
    /// Creates a new random provisional identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a provisional identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

/// Note: This implementation generates a new random UUID on each call,
/// which is non-standard behaviour for `Default`.
impl Default for ProvisionalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message, unique within its conversation.
///
/// Confirmed messages carry the server-assigned identifier. Provisional
/// messages use an identifier derived from their [`ProvisionalId`].
///
/// # Examples
///
/// ```
/// use ephemera::chat::domain::{MessageId, ProvisionalId};
///
/// let confirmed = MessageId::new("srv-42");
/// assert_eq!(confirmed.as_str(), "srv-42");
///
/// let local = MessageId::from(ProvisionalId::new());
/// assert!(local.as_str().starts_with("local-"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message identifier from a server-assigned value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<ProvisionalId> for MessageId {
    fn from(provisional: ProvisionalId) -> Self {
        Self(format!("local-{provisional}"))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
