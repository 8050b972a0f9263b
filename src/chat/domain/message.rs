//! The Message aggregate representing a single chat message.
//!
//! Message content is immutable after creation. Only the delivery state of a
//! provisional message changes, and expiry is handled by removal from the
//! store rather than by mutating the message.

use super::{MessageId, ProvisionalId, UserId};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Reference to an uploaded attachment, as returned by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentRef(String);

impl AttachmentRef {
    /// Creates an attachment reference from a location string.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// Placeholder for a file still being uploaded, shown on the provisional
    /// message until the server assigns the real location.
    #[must_use]
    pub fn pending(filename: &str) -> Self {
        Self(format!("{PENDING_SCHEME}{filename}"))
    }

    /// Returns `true` for a placeholder created by [`AttachmentRef::pending`].
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.starts_with(PENDING_SCHEME)
    }

    /// Returns the location as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

const PENDING_SCHEME: &str = "pending:";

/// Body of a message: text and an optional attachment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageContent {
    /// Message text, possibly empty when an attachment is present.
    pub text: String,
    /// Optional attachment reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRef>,
}

impl MessageContent {
    /// Creates text-only content.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    /// Attaches an uploaded file to the content.
    #[must_use]
    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Returns `true` when there is neither non-blank text nor an attachment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }
}

/// Delivery state of a message from the local client's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    /// Acknowledged by the external server.
    #[default]
    Confirmed,
    /// Inserted optimistically, awaiting confirmation.
    Pending,
    /// The send failed; the message stays visible so it can be retried.
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

/// A message within a two-party conversation.
///
/// # Invariants
///
/// - content is never empty (checked at construction)
/// - `expires_at`, when set, is strictly later than `created_at`
/// - a message without `expires_at` never expires
///
/// # Examples
///
/// ```
/// use chrono::{TimeDelta, Utc};
/// use ephemera::chat::domain::{Message, MessageContent, MessageId, UserId};
///
/// let now = Utc::now();
/// let message = Message::builder(MessageId::new("srv-1"), UserId::new(1), now)
///     .with_content(MessageContent::text("hello"))
///     .with_expiry(now + TimeDelta::seconds(10))
///     .build()
///     .expect("valid message");
///
/// assert!(!message.is_expired_at(now));
/// assert!(message.is_expired_at(now + TimeDelta::seconds(10)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender: UserId,
    content: MessageContent,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_ref: Option<ProvisionalId>,
    #[serde(default)]
    delivery: DeliveryState,
}

impl Message {
    /// Returns a builder for a confirmed message.
    #[must_use]
    pub fn builder(id: MessageId, sender: UserId, created_at: DateTime<Utc>) -> MessageBuilder {
        MessageBuilder::new(id, sender, created_at)
    }

    /// Creates a provisional message for an optimistic local send.
    ///
    /// The message identifier is derived from `provisional` and the message
    /// starts in [`DeliveryState::Pending`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageBuilderError`] when the content is empty or the
    /// expiry cannot be represented.
    pub fn provisional(
        provisional: ProvisionalId,
        sender: UserId,
        content: MessageContent,
        created_at: DateTime<Utc>,
        expiry_seconds: Option<u64>,
    ) -> Result<Self, MessageBuilderError> {
        let mut builder = MessageBuilder::new(MessageId::from(provisional), sender, created_at)
            .with_content(content)
            .with_client_ref(provisional);
        if let Some(seconds) = expiry_seconds {
            builder = builder.expiring_after_seconds(seconds)?;
        }
        let mut message = builder.build()?;
        message.delivery = DeliveryState::Pending;
        Ok(message)
    }

    /// Returns the message identifier.
    #[must_use]
    pub const fn id(&self) -> &MessageId {
        &self.id
    }

    /// Returns the sender.
    #[must_use]
    pub const fn sender(&self) -> UserId {
        self.sender
    }

    /// Returns the content.
    #[must_use]
    pub const fn content(&self) -> &MessageContent {
        &self.content
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the absolute expiry timestamp, if any.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns the provisional identifier this message confirms or stands for.
    #[must_use]
    pub const fn client_ref(&self) -> Option<ProvisionalId> {
        self.client_ref
    }

    /// Returns the delivery state.
    #[must_use]
    pub const fn delivery(&self) -> &DeliveryState {
        &self.delivery
    }

    /// Returns `true` for locally created messages not yet confirmed.
    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        !matches!(self.delivery, DeliveryState::Confirmed)
    }

    /// Returns `true` once the expiry timestamp is at or before `as_of`.
    ///
    /// The boundary is inclusive; messages without expiry never expire.
    #[must_use]
    pub fn is_expired_at(&self, as_of: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= as_of)
    }

    /// Returns `true` when the expiry invariant holds.
    #[must_use]
    pub fn has_valid_expiry(&self) -> bool {
        self.expires_at
            .is_none_or(|expires_at| expires_at > self.created_at)
    }

    /// Key ordering messages within a conversation: creation time, then id.
    #[must_use]
    pub fn ordering_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.created_at, &self.id)
    }

    /// Returns this message marked as confirmed by the server.
    #[must_use]
    pub fn into_confirmed(mut self) -> Self {
        self.delivery = DeliveryState::Confirmed;
        self
    }

    pub(crate) fn set_delivery(&mut self, delivery: DeliveryState) {
        self.delivery = delivery;
    }

    pub(crate) fn set_client_ref(&mut self, provisional: ProvisionalId) {
        self.client_ref = Some(provisional);
    }
}

/// Builder for constructing messages with full control over all fields.
#[derive(Debug)]
pub struct MessageBuilder {
    id: MessageId,
    sender: UserId,
    created_at: DateTime<Utc>,
    content: MessageContent,
    expires_at: Option<DateTime<Utc>>,
    client_ref: Option<ProvisionalId>,
}

impl MessageBuilder {
    /// Creates a new message builder.
    #[must_use]
    pub fn new(id: MessageId, sender: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            sender,
            created_at,
            content: MessageContent::default(),
            expires_at: None,
            client_ref: None,
        }
    }

    /// Sets the message content.
    #[must_use]
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content = content;
        self
    }

    /// Sets an absolute expiry timestamp.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the expiry relative to the creation timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBuilderError::ExpiryOutOfRange`] when the resulting
    /// instant cannot be represented.
    pub fn expiring_after_seconds(mut self, seconds: u64) -> Result<Self, MessageBuilderError> {
        let expires_at = i64::try_from(seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| self.created_at.checked_add_signed(delta))
            .ok_or(MessageBuilderError::ExpiryOutOfRange(seconds))?;
        self.expires_at = Some(expires_at);
        Ok(self)
    }

    /// Records the provisional identifier echoed by the server.
    #[must_use]
    pub const fn with_client_ref(mut self, provisional: ProvisionalId) -> Self {
        self.client_ref = Some(provisional);
        self
    }

    /// Builds the message in the confirmed state.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBuilderError::EmptyContent`] if there is neither
    /// text nor an attachment, and [`MessageBuilderError::ExpiryNotAfterCreation`]
    /// if the expiry does not follow the creation timestamp.
    pub fn build(self) -> Result<Message, MessageBuilderError> {
        if self.content.is_empty() {
            return Err(MessageBuilderError::EmptyContent);
        }
        if self
            .expires_at
            .is_some_and(|expires_at| expires_at <= self.created_at)
        {
            return Err(MessageBuilderError::ExpiryNotAfterCreation);
        }

        Ok(Message {
            id: self.id,
            sender: self.sender,
            content: self.content,
            created_at: self.created_at,
            expires_at: self.expires_at,
            client_ref: self.client_ref,
            delivery: DeliveryState::Confirmed,
        })
    }
}

/// Errors that can occur when building a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageBuilderError {
    /// The message has neither text nor an attachment.
    #[error("message must contain text or an attachment")]
    EmptyContent,

    /// The expiry timestamp is not after the creation timestamp.
    #[error("message expiry must be later than its creation time")]
    ExpiryNotAfterCreation,

    /// The expiry offset cannot be represented as a timestamp.
    #[error("expiry of {0} seconds is out of range")]
    ExpiryOutOfRange(u64),
}
