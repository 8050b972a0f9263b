//! Per-conversation `Idle`/`Syncing` state with a stale-response guard.
//!
//! Every sync is issued a ticket carrying a monotonically increasing request
//! sequence number. A response is applied only while its ticket is still the
//! one recorded for the conversation; cancelling or abandoning the ticket
//! turns any late response into a stale one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

use crate::chat::{domain::ConversationId, error::DeliveryError};

use super::delivery::DeliveryResult;

/// Sync state of a single conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No sync is outstanding.
    #[default]
    Idle,
    /// A fetch is outstanding; further ticks are skipped.
    Syncing,
}

#[derive(Debug, Default)]
struct SyncTableInner {
    next_sequence: u64,
    in_flight: HashMap<ConversationId, u64>,
}

#[derive(Debug, Default)]
pub(crate) struct SyncTable {
    inner: Mutex<SyncTableInner>,
}

impl SyncTable {
    fn lock(&self) -> DeliveryResult<MutexGuard<'_, SyncTableInner>> {
        self.inner
            .lock()
            .map_err(|e| DeliveryError::LockPoisoned(e.to_string()))
    }

    /// Moves the conversation to `Syncing`, or returns `None` if it already is.
    pub(crate) fn begin(&self, conversation_id: ConversationId) -> DeliveryResult<Option<SyncTicket<'_>>> {
        let mut inner = self.lock()?;
        if inner.in_flight.contains_key(&conversation_id) {
            return Ok(None);
        }
        inner.next_sequence = inner.next_sequence.wrapping_add(1);
        let sequence = inner.next_sequence;
        inner.in_flight.insert(conversation_id, sequence);
        Ok(Some(SyncTicket {
            table: self,
            conversation_id,
            sequence,
            settled: false,
        }))
    }

    /// Drops interest in the outstanding sync of a conversation.
    ///
    /// Returns `true` if a sync was outstanding; its response will be
    /// discarded as stale.
    pub(crate) fn cancel(&self, conversation_id: ConversationId) -> DeliveryResult<bool> {
        Ok(self.lock()?.in_flight.remove(&conversation_id).is_some())
    }

    /// Drops interest in every outstanding sync.
    pub(crate) fn cancel_all(&self) -> DeliveryResult<()> {
        self.lock()?.in_flight.clear();
        Ok(())
    }

    pub(crate) fn state(&self, conversation_id: ConversationId) -> DeliveryResult<SyncState> {
        Ok(if self.lock()?.in_flight.contains_key(&conversation_id) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        })
    }

    fn release(&self, conversation_id: ConversationId, sequence: u64) -> DeliveryResult<bool> {
        let mut inner = self.lock()?;
        if inner.in_flight.get(&conversation_id) == Some(&sequence) {
            inner.in_flight.remove(&conversation_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Claim on the single outstanding sync of a conversation.
///
/// Dropping an unsettled ticket returns the conversation to `Idle`, so a
/// cancelled caller cannot leave it stuck in `Syncing`.
#[derive(Debug)]
pub(crate) struct SyncTicket<'a> {
    table: &'a SyncTable,
    conversation_id: ConversationId,
    sequence: u64,
    settled: bool,
}

impl SyncTicket<'_> {
    pub(crate) const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Applies a response if the ticket is still current, then returns the
    /// conversation to `Idle`.
    ///
    /// `apply` runs while the sync table is locked, so no other sync of any
    /// conversation can begin or complete in between. Returns `None` for a
    /// stale ticket without running `apply`.
    pub(crate) fn complete<R>(mut self, apply: impl FnOnce() -> R) -> DeliveryResult<Option<R>> {
        self.settled = true;
        let mut inner = self.table.lock()?;
        if inner.in_flight.get(&self.conversation_id) != Some(&self.sequence) {
            return Ok(None);
        }
        let outcome = apply();
        inner.in_flight.remove(&self.conversation_id);
        Ok(Some(outcome))
    }

    /// Returns the conversation to `Idle` after a failed fetch.
    ///
    /// Returns `false` if the ticket had already been superseded.
    pub(crate) fn abandon(mut self) -> DeliveryResult<bool> {
        self.settled = true;
        self.table.release(self.conversation_id, self.sequence)
    }
}

impl Drop for SyncTicket<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(err) = self.table.release(self.conversation_id, self.sequence) {
            warn!(conversation = %self.conversation_id, error = %err, "could not release sync ticket");
        }
    }
}
