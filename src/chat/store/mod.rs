//! Ordered, expiry-aware message store.
//!
//! Each conversation log is published as an immutable version behind an
//! [`Arc`]. Writers build the next version under a per-conversation mutex
//! and swap it in; readers clone the current [`Arc`] and never wait for a
//! reconciliation or sweep to finish computing.

mod log;

pub use log::ReconcileReport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::chat::{
    domain::{ConversationId, DeliveryState, Message, MessageId, ProvisionalId},
    error::StoreError,
};
use log::{ConversationLog, InsertRejection};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A message removed by a sweep, with the conversation it belonged to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredMessage {
    /// The conversation the message was removed from.
    pub conversation_id: ConversationId,
    /// The removed message.
    pub message: Message,
}

#[derive(Debug, Default)]
struct ConversationSlot {
    writer: Mutex<()>,
    published: RwLock<Arc<ConversationLog>>,
}

impl ConversationSlot {
    fn current(&self) -> StoreResult<Arc<ConversationLog>> {
        let guard = self.published.read().map_err(StoreError::poisoned)?;
        Ok(Arc::clone(&guard))
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut ConversationLog) -> R) -> StoreResult<R> {
        let _writer = self.writer.lock().map_err(StoreError::poisoned)?;
        let current = self.current()?;
        let mut next = ConversationLog::clone(&current);
        let outcome = apply(&mut next);
        if next.version() != current.version() {
            let mut published = self.published.write().map_err(StoreError::poisoned)?;
            *published = Arc::new(next);
        }
        Ok(outcome)
    }

    fn sweep(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<Message>> {
        if !self.current()?.has_expired(as_of) {
            return Ok(Vec::new());
        }
        self.mutate(|log| log.sweep(as_of))
    }
}

/// Store of conversation messages with per-message expiry.
///
/// Thread-safe: mutations of one conversation are serialised, mutations of
/// different conversations proceed independently, and snapshot reads never
/// block on a mutation in progress.
///
/// # Example
///
/// ```
/// use chrono::{TimeDelta, Utc};
/// use ephemera::chat::domain::{ConversationId, Message, MessageContent, MessageId, UserId};
/// use ephemera::chat::store::MessageStore;
///
/// let store = MessageStore::new();
/// let conversation = ConversationId::between(UserId::new(1), UserId::new(2));
/// let now = Utc::now();
/// let message = Message::builder(MessageId::new("srv-1"), UserId::new(2), now)
///     .with_content(MessageContent::text("hi"))
///     .with_expiry(now + TimeDelta::seconds(10))
///     .build()
///     .expect("valid message");
///
/// store.insert(conversation, message).expect("first insert succeeds");
/// let expired = store
///     .sweep_expired(now + TimeDelta::seconds(10))
///     .expect("sweep succeeds");
/// assert_eq!(expired.len(), 1);
/// assert!(store.snapshot(conversation).expect("snapshot").is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MessageStore {
    conversations: RwLock<HashMap<ConversationId, Arc<ConversationSlot>>>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, conversation_id: ConversationId) -> StoreResult<Option<Arc<ConversationSlot>>> {
        let guard = self.conversations.read().map_err(StoreError::poisoned)?;
        Ok(guard.get(&conversation_id).map(Arc::clone))
    }

    fn slot_or_create(&self, conversation_id: ConversationId) -> StoreResult<Arc<ConversationSlot>> {
        if let Some(slot) = self.slot(conversation_id)? {
            return Ok(slot);
        }
        let mut guard = self.conversations.write().map_err(StoreError::poisoned)?;
        Ok(Arc::clone(guard.entry(conversation_id).or_default()))
    }

    fn slots(&self) -> StoreResult<Vec<(ConversationId, Arc<ConversationSlot>)>> {
        let guard = self.conversations.read().map_err(StoreError::poisoned)?;
        Ok(guard
            .iter()
            .map(|(conversation_id, slot)| (*conversation_id, Arc::clone(slot)))
            .collect())
    }

    fn published(&self, conversation_id: ConversationId) -> StoreResult<Option<Arc<ConversationLog>>> {
        self.slot(conversation_id)?
            .map(|slot| slot.current())
            .transpose()
    }

    /// Inserts a message at its `(created_at, id)` position.
    ///
    /// A confirmed message whose client reference names a provisional
    /// message of this conversation replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateMessage`] if the identifier is already
    /// present or was already swept, and [`StoreError::InvalidExpiry`] if the
    /// message expires before it was created.
    pub fn insert(&self, conversation_id: ConversationId, message: Message) -> StoreResult<()> {
        let id = message.id().clone();
        let slot = self.slot_or_create(conversation_id)?;
        slot.mutate(|log| log.insert(message))?
            .map_err(|rejection| match rejection {
                InsertRejection::Duplicate => StoreError::DuplicateMessage {
                    conversation_id,
                    id,
                },
                InsertRejection::InvalidExpiry => StoreError::InvalidExpiry(id),
            })
    }

    /// Converges a conversation to the authoritative `snapshot`.
    ///
    /// Confirmed messages missing from the snapshot are removed, new ones
    /// are inserted in order, and provisional messages stay until the
    /// snapshot lists a message carrying their client reference. Applying
    /// the same snapshot twice changes nothing the second time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn reconcile(
        &self,
        conversation_id: ConversationId,
        snapshot: Vec<Message>,
    ) -> StoreResult<ReconcileReport> {
        self.reconcile_fetched_at(conversation_id, snapshot, u64::MAX)
    }

    /// Converges a conversation to a `snapshot` fetched while the
    /// conversation was at `version` (see [`MessageStore::version`]).
    ///
    /// Behaves like [`MessageStore::reconcile`], except that confirmed
    /// messages inserted after `version` are kept even when the snapshot
    /// does not list them, since the fetch could not have seen them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn reconcile_fetched_at(
        &self,
        conversation_id: ConversationId,
        snapshot: Vec<Message>,
        version: u64,
    ) -> StoreResult<ReconcileReport> {
        let slot = self.slot_or_create(conversation_id)?;
        let (report, ordered) = slot.mutate(|log| {
            let report = log.reconcile(snapshot, version);
            (report, log.is_ordered())
        })?;

        if !ordered {
            error!(conversation = %conversation_id, "reconciled log violates message ordering");
            debug_assert!(ordered, "reconciled log violates message ordering");
        }
        if !report.rejected.is_empty() {
            error!(
                conversation = %conversation_id,
                rejected = ?report.rejected,
                "authoritative snapshot contains messages expiring before creation"
            );
        }
        if !report.is_empty() {
            debug!(
                conversation = %conversation_id,
                inserted = report.inserted.len(),
                removed = report.removed.len(),
                superseded = report.superseded.len(),
                "reconciled conversation"
            );
        }
        Ok(report)
    }

    /// Replaces a provisional message with its server-confirmed message.
    ///
    /// A no-op for parts already applied by an earlier reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidExpiry`] if the confirmed message expires
    /// before it was created; the provisional message is kept. Returns
    /// [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn confirm(
        &self,
        conversation_id: ConversationId,
        provisional: ProvisionalId,
        confirmed: Message,
    ) -> StoreResult<()> {
        let id = confirmed.id().clone();
        let slot = self.slot_or_create(conversation_id)?;
        match slot.mutate(|log| log.confirm(provisional, confirmed))? {
            Ok(()) => Ok(()),
            Err(InsertRejection::InvalidExpiry) => {
                error!(
                    conversation = %conversation_id,
                    %provisional,
                    message = %id,
                    "confirmation expires before it was created"
                );
                Err(StoreError::InvalidExpiry(id))
            }
            Err(InsertRejection::Duplicate) => Ok(()),
        }
    }

    /// Marks a provisional message as failed, keeping it visible.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownMessage`] if the provisional message is
    /// not in the conversation.
    pub fn mark_failed(
        &self,
        conversation_id: ConversationId,
        provisional: ProvisionalId,
        reason: impl Into<String>,
    ) -> StoreResult<()> {
        self.set_delivery(
            conversation_id,
            provisional,
            DeliveryState::Failed {
                reason: reason.into(),
            },
        )
    }

    /// Returns a failed provisional message to the pending state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownMessage`] if the provisional message is
    /// not in the conversation.
    pub fn mark_pending(
        &self,
        conversation_id: ConversationId,
        provisional: ProvisionalId,
    ) -> StoreResult<()> {
        self.set_delivery(conversation_id, provisional, DeliveryState::Pending)
    }

    fn set_delivery(
        &self,
        conversation_id: ConversationId,
        provisional: ProvisionalId,
        state: DeliveryState,
    ) -> StoreResult<()> {
        let unknown = || StoreError::UnknownMessage {
            conversation_id,
            id: MessageId::from(provisional),
        };
        let slot = self.slot(conversation_id)?.ok_or_else(unknown)?;
        if slot.mutate(|log| log.set_delivery(provisional, state))? {
            Ok(())
        } else {
            Err(unknown())
        }
    }

    /// Removes every message whose expiry is at or before `as_of`, across
    /// all conversations, and returns the removed messages.
    ///
    /// Idempotent: a message is removed at most once, and a later call with
    /// the same or a later instant does not report it again.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn sweep_expired(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<ExpiredMessage>> {
        let mut expired = Vec::new();
        for (conversation_id, slot) in self.slots()? {
            let removed = slot.sweep(as_of)?;
            expired.extend(removed.into_iter().map(|message| ExpiredMessage {
                conversation_id,
                message,
            }));
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), %as_of, "swept expired messages");
        }
        Ok(expired)
    }

    /// Sweeps a single conversation. See [`MessageStore::sweep_expired`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn sweep_conversation(
        &self,
        conversation_id: ConversationId,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<Message>> {
        Ok(self
            .slot(conversation_id)?
            .map(|slot| slot.sweep(as_of))
            .transpose()?
            .unwrap_or_default())
    }

    /// Returns the ordered messages of a conversation that have not been
    /// swept. Never mutates state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn snapshot(&self, conversation_id: ConversationId) -> StoreResult<Vec<Message>> {
        Ok(self
            .published(conversation_id)?
            .map(|log| log.messages().cloned().collect())
            .unwrap_or_default())
    }

    /// Returns the ordered messages of a conversation still live at `as_of`,
    /// leaving expired ones for the next sweep.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn snapshot_at(
        &self,
        conversation_id: ConversationId,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<Message>> {
        Ok(self
            .published(conversation_id)?
            .map(|log| {
                log.messages()
                    .filter(|message| !message.is_expired_at(as_of))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Looks up a message by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn find(
        &self,
        conversation_id: ConversationId,
        id: &MessageId,
    ) -> StoreResult<Option<Message>> {
        Ok(self
            .published(conversation_id)?
            .and_then(|log| log.find(id).cloned()))
    }

    /// Returns the earliest pending expiry across all conversations, so a
    /// driver needs at most one timer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn next_expiry(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let mut earliest = None;
        for (_, slot) in self.slots()? {
            let candidate = slot.current()?.next_expiry();
            earliest = match (earliest, candidate) {
                (Some(current), Some(next)) => Some(std::cmp::min(current, next)),
                (current, next) => current.or(next),
            };
        }
        Ok(earliest)
    }

    /// Returns the number of published versions of a conversation so far.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn version(&self, conversation_id: ConversationId) -> StoreResult<u64> {
        Ok(self
            .published(conversation_id)?
            .map_or(0, |log| log.version()))
    }

    /// Drops every conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LockPoisoned`] if an internal lock is poisoned.
    pub fn clear(&self) -> StoreResult<()> {
        self.conversations
            .write()
            .map_err(StoreError::poisoned)?
            .clear();
        Ok(())
    }
}
