//! In-memory implementation of the chat server ports.
//!
//! Provides a simple, thread-safe stand-in for the external chat server,
//! suitable for tests and local simulation. Not suitable for production use.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::sync::mpsc;

use crate::chat::{
    domain::{AttachmentRef, ConversationId, Message, MessageContent, MessageId, Participant, UserId},
    error::GatewayError,
    ports::{
        gateway::{ChatGateway, GatewayResult, OutgoingMessage},
        push::{IncomingMessage, MessageFeed, MessagePush},
    },
};

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct ServerState {
    partners: HashMap<UserId, Vec<Participant>>,
    conversations: HashMap<ConversationId, Vec<Message>>,
    subscribers: Vec<mpsc::Sender<IncomingMessage>>,
    next_message: u64,
    next_upload: u64,
    last_created: Option<DateTime<Utc>>,
    injected_failures: u32,
}

impl ServerState {
    fn take_failure(&mut self) -> GatewayResult<()> {
        if self.injected_failures == 0 {
            return Ok(());
        }
        self.injected_failures -= 1;
        Err(GatewayError::network("injected failure"))
    }

    /// Server timestamps are strictly increasing even under a frozen clock.
    fn stamp(&mut self, reading: DateTime<Utc>) -> DateTime<Utc> {
        let stamped = self
            .last_created
            .and_then(|last| last.checked_add_signed(TimeDelta::milliseconds(1)))
            .map_or(reading, |floor| floor.max(reading));
        self.last_created = Some(stamped);
        stamped
    }

    fn next_message_id(&mut self) -> MessageId {
        self.next_message = self.next_message.saturating_add(1);
        MessageId::new(format!("srv-{}", self.next_message))
    }

    fn publish(&mut self, conversation_id: ConversationId, message: &Message) {
        let incoming = IncomingMessage {
            conversation_id,
            message: message.clone(),
        };
        self.subscribers
            .retain(|subscriber| match subscriber.try_send(incoming.clone()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
    }
}

/// In-memory chat server implementing [`ChatGateway`] and [`MessagePush`].
///
/// Thread-safe via internal [`RwLock`]. Messages past their expiry are not
/// returned by [`ChatGateway::fetch_messages`], mirroring a server that
/// enforces expiry on its side too.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ephemera::chat::adapters::memory::InMemoryChatGateway;
/// use ephemera::chat::domain::{Participant, UserId};
/// use mockable::DefaultClock;
///
/// let server = InMemoryChatGateway::new(Arc::new(DefaultClock));
/// server.link(
///     Participant::new(UserId::new(1), "Ada"),
///     Participant::new(UserId::new(2), "Grace"),
/// );
/// assert_eq!(server.partners_of(UserId::new(1)).len(), 1);
/// ```
#[derive(Debug)]
pub struct InMemoryChatGateway<C: Clock + Send + Sync> {
    state: Arc<RwLock<ServerState>>,
    clock: Arc<C>,
}

impl<C: Clock + Send + Sync> Clone for InMemoryChatGateway<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock + Send + Sync> InMemoryChatGateway<C> {
    /// Creates an empty server stamping messages with `clock`.
    #[must_use]
    pub fn new(clock: Arc<C>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ServerState::default())),
            clock,
        }
    }

    fn write(&self) -> GatewayResult<RwLockWriteGuard<'_, ServerState>> {
        self.state
            .write()
            .map_err(|e| GatewayError::network(format!("lock poisoned: {e}")))
    }

    /// Replaces the partner list of `user`.
    pub fn register_partners(&self, user: UserId, partners: Vec<Participant>) {
        if let Ok(mut state) = self.write() {
            state.partners.insert(user, partners);
        }
    }

    /// Makes two users conversation partners of each other.
    pub fn link(&self, first: Participant, second: Participant) {
        if let Ok(mut state) = self.write() {
            let first_id = first.id();
            let second_id = second.id();
            let first_list = state.partners.entry(first_id).or_default();
            if !first_list.iter().any(|p| p.id() == second_id) {
                first_list.push(second);
            }
            let second_list = state.partners.entry(second_id).or_default();
            if !second_list.iter().any(|p| p.id() == first_id) {
                second_list.push(first);
            }
        }
    }

    /// Returns the partner list of `user`.
    ///
    /// Returns an empty list if the internal lock is poisoned.
    #[must_use]
    pub fn partners_of(&self, user: UserId) -> Vec<Participant> {
        self.state
            .read()
            .map(|state| state.partners.get(&user).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Stores a message as if it had been sent earlier, without pushing it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Network`] if the internal lock is poisoned.
    pub fn seed_message(
        &self,
        conversation_id: ConversationId,
        message: Message,
    ) -> GatewayResult<()> {
        let mut state = self.write()?;
        state
            .conversations
            .entry(conversation_id)
            .or_default()
            .push(message);
        Ok(())
    }

    /// Removes a message from the server, as a moderator or expiry job would.
    ///
    /// Returns `true` if the message existed.
    pub fn delete_message(&self, conversation_id: ConversationId, id: &MessageId) -> bool {
        self.write().is_ok_and(|mut state| {
            state
                .conversations
                .get_mut(&conversation_id)
                .is_some_and(|messages| {
                    let before = messages.len();
                    messages.retain(|message| message.id() != id);
                    messages.len() != before
                })
        })
    }

    /// Sends a message on behalf of `sender` and pushes it to subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] for empty content.
    pub fn deliver(
        &self,
        sender: UserId,
        recipient: UserId,
        content: MessageContent,
        expiry_seconds: Option<u64>,
    ) -> GatewayResult<Message> {
        self.accept(sender, recipient, content, expiry_seconds, None)
    }

    /// Makes the next `count` gateway calls fail with a network error.
    pub fn fail_next(&self, count: u32) {
        if let Ok(mut state) = self.write() {
            state.injected_failures = count;
        }
    }

    /// Returns the number of messages stored for a conversation, including
    /// expired ones the server has not yet dropped.
    #[must_use]
    pub fn stored_messages(&self, conversation_id: ConversationId) -> usize {
        self.state
            .read()
            .map(|state| state.conversations.get(&conversation_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn accept(
        &self,
        sender: UserId,
        recipient: UserId,
        content: MessageContent,
        expiry_seconds: Option<u64>,
        outgoing: Option<&OutgoingMessage>,
    ) -> GatewayResult<Message> {
        if content.is_empty() {
            return Err(GatewayError::validation(
                "message must contain text or an attachment",
            ));
        }
        let reading = self.clock.utc();
        let mut state = self.write()?;
        let created_at = state.stamp(reading);
        let id = state.next_message_id();

        let mut builder = Message::builder(id, sender, created_at).with_content(content);
        if let Some(seconds) = expiry_seconds {
            builder = builder
                .expiring_after_seconds(seconds)
                .map_err(|e| GatewayError::validation(e.to_string()))?;
        }
        if let Some(outgoing) = outgoing {
            builder = builder.with_client_ref(outgoing.client_ref);
        }
        let message = builder
            .build()
            .map_err(|e| GatewayError::validation(e.to_string()))?;

        let conversation_id = ConversationId::between(sender, recipient);
        state
            .conversations
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        state.publish(conversation_id, &message);
        Ok(message)
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> ChatGateway for InMemoryChatGateway<C> {
    async fn fetch_conversation_partners(&self, user: UserId) -> GatewayResult<Vec<Participant>> {
        let mut state = self.write()?;
        state.take_failure()?;
        Ok(state.partners.get(&user).cloned().unwrap_or_default())
    }

    async fn fetch_messages(&self, user: UserId, partner: UserId) -> GatewayResult<Vec<Message>> {
        let now = self.clock.utc();
        let mut state = self.write()?;
        state.take_failure()?;

        let conversation_id = ConversationId::between(user, partner);
        let mut messages: Vec<Message> = state
            .conversations
            .get(&conversation_id)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|message| !message.is_expired_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Sort for consistent ordering
        messages.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
        Ok(messages)
    }

    async fn send_message(
        &self,
        user: UserId,
        partner: UserId,
        outgoing: OutgoingMessage,
    ) -> GatewayResult<Message> {
        self.write()?.take_failure()?;
        self.accept(
            user,
            partner,
            outgoing.content.clone(),
            outgoing.expiry_seconds,
            Some(&outgoing),
        )
    }

    async fn upload_attachment(
        &self,
        bytes: Vec<u8>,
        filename: String,
    ) -> GatewayResult<AttachmentRef> {
        let mut state = self.write()?;
        state
            .take_failure()
            .map_err(|e| GatewayError::upload(e.to_string()))?;
        if bytes.is_empty() {
            return Err(GatewayError::upload("attachment is empty"));
        }
        if filename.trim().is_empty() {
            return Err(GatewayError::upload("attachment has no filename"));
        }
        state.next_upload = state.next_upload.saturating_add(1);
        Ok(AttachmentRef::new(format!(
            "memory://uploads/{}/{filename}",
            state.next_upload
        )))
    }
}

impl<C: Clock + Send + Sync> MessagePush for InMemoryChatGateway<C> {
    fn subscribe(&self) -> MessageFeed {
        let (sender, receiver) = mpsc::channel(FEED_CAPACITY);
        if let Ok(mut state) = self.write() {
            state.subscribers.push(sender);
        }
        receiver
    }
}
