//! Ordered message log of a single conversation.
//!
//! Messages are kept sorted by `(created_at, id)`. Each entry remembers the
//! log version that placed it, so a reconciliation against a snapshot
//! fetched at an older version leaves later arrivals alone. Swept messages
//! are remembered through a watermark: anything expiring at or before the
//! latest sweep that removed a message counts as already seen, so a lagging
//! snapshot cannot bring it back.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::chat::domain::{DeliveryState, Message, MessageId, ProvisionalId};

/// Changes applied by a reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Messages added from the authoritative snapshot.
    pub inserted: Vec<MessageId>,
    /// Confirmed messages the authoritative snapshot no longer lists.
    pub removed: Vec<MessageId>,
    /// Provisional messages replaced by their confirmed counterpart.
    pub superseded: Vec<ProvisionalId>,
    /// Snapshot entries rejected for violating the expiry invariant.
    pub rejected: Vec<MessageId>,
}

impl ReconcileReport {
    /// Returns `true` when the reconciliation changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.removed.is_empty()
            && self.superseded.is_empty()
            && self.rejected.is_empty()
    }
}

/// Reason a single insert was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertRejection {
    Duplicate,
    InvalidExpiry,
}

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    placed_at: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ConversationLog {
    entries: Vec<Entry>,
    swept_through: Option<DateTime<Utc>>,
    version: u64,
}

impl ConversationLog {
    pub(crate) const fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }

    pub(crate) fn find(&self, id: &MessageId) -> Option<&Message> {
        self.messages().find(|message| message.id() == id)
    }

    fn was_swept(&self, message: &Message) -> bool {
        match (message.expires_at(), self.swept_through) {
            (Some(expires_at), Some(watermark)) => expires_at <= watermark,
            _ => false,
        }
    }

    fn has_seen(&self, message: &Message) -> bool {
        self.was_swept(message) || self.find(message.id()).is_some()
    }

    const fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Inserts at the ordering position, superseding a provisional message
    /// whose client reference the new message confirms.
    pub(crate) fn insert(&mut self, message: Message) -> Result<(), InsertRejection> {
        if !message.has_valid_expiry() {
            return Err(InsertRejection::InvalidExpiry);
        }
        if self.has_seen(&message) {
            return Err(InsertRejection::Duplicate);
        }
        if !message.is_provisional() {
            if let Some(provisional) = message.client_ref() {
                self.remove_provisional(provisional);
            }
        }
        self.place(message);
        self.touch();
        Ok(())
    }

    /// Every call must be followed by a `touch`, which publishes the
    /// version recorded here.
    fn place(&mut self, message: Message) {
        let index = self
            .entries
            .partition_point(|existing| existing.message.ordering_key() < message.ordering_key());
        let placed_at = self.version.wrapping_add(1);
        self.entries.insert(index, Entry { message, placed_at });
    }

    fn remove_provisional(&mut self, provisional: ProvisionalId) -> bool {
        let local_id = MessageId::from(provisional);
        let before = self.entries.len();
        self.entries
            .retain(|entry| !(entry.message.is_provisional() && *entry.message.id() == local_id));
        let removed = self.entries.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    /// Replaces a provisional message with its confirmed counterpart.
    ///
    /// Idempotent: a second confirmation, or one arriving after a
    /// reconciliation already matched the pair, changes nothing. A
    /// confirmation expiring before its creation is refused and the
    /// provisional message is left in place.
    pub(crate) fn confirm(
        &mut self,
        provisional: ProvisionalId,
        mut confirmed: Message,
    ) -> Result<(), InsertRejection> {
        if !confirmed.has_valid_expiry() {
            return Err(InsertRejection::InvalidExpiry);
        }
        self.remove_provisional(provisional);
        if confirmed.client_ref().is_none() {
            confirmed.set_client_ref(provisional);
        }
        let confirmed = confirmed.into_confirmed();
        if !self.has_seen(&confirmed) {
            self.place(confirmed);
            self.touch();
        }
        Ok(())
    }

    /// Changes the delivery state of a provisional message.
    ///
    /// Returns `false` if no such provisional message exists.
    pub(crate) fn set_delivery(&mut self, provisional: ProvisionalId, state: DeliveryState) -> bool {
        let local_id = MessageId::from(provisional);
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.message.is_provisional() && *entry.message.id() == local_id)
        else {
            return false;
        };
        if *entry.message.delivery() != state {
            entry.message.set_delivery(state);
            self.touch();
        }
        true
    }

    /// Converges this log to the authoritative `snapshot`, fetched while the
    /// log was at version `fetched_at`.
    ///
    /// Only confirmed messages placed at or before `fetched_at` can be
    /// removed for being absent from the snapshot; anything placed later
    /// arrived after the fetch began and is left for the next one.
    pub(crate) fn reconcile(&mut self, snapshot: Vec<Message>, fetched_at: u64) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut authoritative: Vec<Message> = Vec::with_capacity(snapshot.len());
        let mut listed: HashSet<MessageId> = HashSet::with_capacity(snapshot.len());

        for message in snapshot {
            if !message.has_valid_expiry() {
                report.rejected.push(message.id().clone());
                continue;
            }
            if listed.insert(message.id().clone()) {
                authoritative.push(message.into_confirmed());
            }
        }

        let confirmed_refs: HashSet<ProvisionalId> = authoritative
            .iter()
            .filter_map(Message::client_ref)
            .collect();

        self.entries.retain(|entry| {
            let message = &entry.message;
            if message.is_provisional() {
                let superseded = message
                    .client_ref()
                    .is_some_and(|provisional| confirmed_refs.contains(&provisional));
                if let Some(provisional) = message.client_ref().filter(|_| superseded) {
                    report.superseded.push(provisional);
                }
                !superseded
            } else if listed.contains(message.id()) || entry.placed_at > fetched_at {
                true
            } else {
                report.removed.push(message.id().clone());
                false
            }
        });

        for message in authoritative {
            if !self.has_seen(&message) {
                report.inserted.push(message.id().clone());
                self.place(message);
            }
        }

        if !(report.inserted.is_empty()
            && report.removed.is_empty()
            && report.superseded.is_empty())
        {
            self.touch();
        }
        report
    }

    /// Returns `true` if a sweep at `as_of` would remove anything.
    pub(crate) fn has_expired(&self, as_of: DateTime<Utc>) -> bool {
        self.messages().any(|message| message.is_expired_at(as_of))
    }

    /// Removes every message expired as of `as_of`.
    pub(crate) fn sweep(&mut self, as_of: DateTime<Utc>) -> Vec<Message> {
        if !self.has_expired(as_of) {
            return Vec::new();
        }
        let (expired, live): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.message.is_expired_at(as_of));
        self.entries = live;
        let watermark = self.swept_through.map_or(as_of, |earlier| earlier.max(as_of));
        self.swept_through = Some(watermark);
        self.touch();
        expired.into_iter().map(|entry| entry.message).collect()
    }

    pub(crate) fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.messages().filter_map(Message::expires_at).min()
    }

    /// Returns `true` when messages are strictly ordered by `(created_at, id)`.
    pub(crate) fn is_ordered(&self) -> bool {
        self.entries.windows(2).all(|pair| match pair {
            [earlier, later] => earlier.message.ordering_key() < later.message.ordering_key(),
            _ => true,
        })
    }
}
