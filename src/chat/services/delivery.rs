//! Orchestration of selection, syncing, sending, and expiry.
//!
//! Provides [`DeliveryCoordinator`], which drives the message store and the
//! conversation index from ticks, user actions, and pushed messages.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use mockable::Clock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::chat::{
    clock::ExpiryClock,
    config::DeliveryConfig,
    domain::{
        ActiveSelection, AttachmentRef, ConversationId, DeliveryState, ExpiryTimer, Message,
        MessageContent, MessageId, Participant, ProvisionalId, UserId,
    },
    error::{DeliveryError, GatewayError, IndexError, StoreError},
    index::ConversationIndex,
    ports::{ChatGateway, GatewayResult, IncomingMessage, MessageFeed, OutgoingMessage},
    store::{ExpiredMessage, MessageStore, ReconcileReport, StoreResult},
};

use super::sync_guard::{SyncState, SyncTable};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Result type for coordinator operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// A file to upload alongside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    /// Raw file contents.
    pub bytes: Vec<u8>,
    /// Original filename, forwarded to the upload endpoint.
    pub filename: String,
}

/// A message composed by the local user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageDraft {
    text: String,
    attachment: Option<AttachmentUpload>,
    timer: Option<ExpiryTimer>,
}

impl MessageDraft {
    /// Creates a text draft.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Attaches a file to upload before sending.
    #[must_use]
    pub fn with_attachment(mut self, bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        self.attachment = Some(AttachmentUpload {
            bytes,
            filename: filename.into(),
        });
        self
    }

    /// Sets the expiry timer. Without one the configured default applies.
    #[must_use]
    pub const fn with_timer(mut self, timer: ExpiryTimer) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Returns `true` when there is neither non-blank text nor an attachment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }
}

/// Result of a sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The authoritative snapshot was applied.
    Synced(ReconcileReport),
    /// A sync of the conversation was already outstanding.
    Skipped,
    /// The response arrived after the sync was cancelled and was discarded.
    StaleResponse {
        /// The conversation the response belonged to.
        conversation_id: ConversationId,
        /// Request sequence number of the discarded response.
        sequence: u64,
    },
    /// No conversation is selected.
    NoSelection,
}

/// Everything a single tick changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Outcome of the sync of the selected conversation.
    pub sync: SyncOutcome,
    /// Messages removed by the expiry sweep that preceded the sync.
    pub expired: Vec<ExpiredMessage>,
}

/// How a pushed message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The message was inserted.
    Applied,
    /// The message was already present, or had already expired.
    Duplicate,
    /// The message belongs to a conversation of another user.
    Ignored,
}

/// Health of the link to the external server, derived from consecutive
/// failed calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The last call succeeded.
    Connected,
    /// Recent calls failed, below the configured threshold.
    Degraded {
        /// Consecutive failed calls.
        failures: u32,
    },
    /// Calls have failed at least the configured number of times in a row.
    Lost {
        /// Consecutive failed calls.
        failures: u32,
    },
}

#[derive(Debug, Clone)]
struct PendingSend {
    conversation_id: ConversationId,
    user: UserId,
    partner: UserId,
    text: String,
    upload: Option<AttachmentUpload>,
    uploaded: Option<AttachmentRef>,
    expiry_seconds: Option<u64>,
}

/// Coordinates message delivery for one local client.
///
/// Holds the only references to the store and the index that mutate them.
/// Every method takes `&self`, so a coordinator shared through an [`Arc`]
/// can serve ticks, pushes, and user actions concurrently.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ephemera::chat::adapters::memory::InMemoryChatGateway;
/// use ephemera::chat::config::DeliveryConfig;
/// use ephemera::chat::domain::{Participant, UserId};
/// use ephemera::chat::services::{DeliveryCoordinator, MessageDraft};
/// use mockable::DefaultClock;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let clock = Arc::new(DefaultClock);
/// let server = Arc::new(InMemoryChatGateway::new(Arc::clone(&clock)));
/// server.link(
///     Participant::new(UserId::new(1), "Ada"),
///     Participant::new(UserId::new(2), "Grace"),
/// );
///
/// let coordinator = DeliveryCoordinator::new(server, clock, DeliveryConfig::default()).unwrap();
/// coordinator.login(UserId::new(1)).unwrap();
/// coordinator.refresh_partners().await.unwrap();
/// coordinator.send(MessageDraft::text("hello")).await.unwrap();
/// assert_eq!(coordinator.snapshot().unwrap().len(), 1);
/// # });
/// ```
pub struct DeliveryCoordinator<G, K>
where
    G: ChatGateway,
    K: Clock + Send + Sync,
{
    gateway: Arc<G>,
    clock: ExpiryClock<K>,
    config: DeliveryConfig,
    store: Arc<MessageStore>,
    index: RwLock<ConversationIndex>,
    syncs: SyncTable,
    failures: AtomicU32,
    outbox: Mutex<HashMap<ProvisionalId, PendingSend>>,
}

impl<G, K> DeliveryCoordinator<G, K>
where
    G: ChatGateway,
    K: Clock + Send + Sync,
{
    /// Creates a coordinator with an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Config`] if `config` fails validation.
    pub fn new(gateway: Arc<G>, clock: Arc<K>, config: DeliveryConfig) -> DeliveryResult<Self> {
        Self::with_store(gateway, clock, config, Arc::new(MessageStore::new()))
    }

    /// Creates a coordinator over an existing store.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Config`] if `config` fails validation.
    pub fn with_store(
        gateway: Arc<G>,
        clock: Arc<K>,
        config: DeliveryConfig,
        store: Arc<MessageStore>,
    ) -> DeliveryResult<Self> {
        config.validate()?;
        Ok(Self {
            gateway,
            clock: ExpiryClock::new(clock),
            config,
            store,
            index: RwLock::new(ConversationIndex::new()),
            syncs: SyncTable::default(),
            failures: AtomicU32::new(0),
            outbox: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the message store, for read-only observers.
    #[must_use]
    pub const fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Returns the expiry clock used for sweeps and countdowns.
    #[must_use]
    pub const fn clock(&self) -> &ExpiryClock<K> {
        &self.clock
    }

    fn read_index(&self) -> DeliveryResult<RwLockReadGuard<'_, ConversationIndex>> {
        self.index
            .read()
            .map_err(|e| DeliveryError::LockPoisoned(e.to_string()))
    }

    fn write_index(&self) -> DeliveryResult<RwLockWriteGuard<'_, ConversationIndex>> {
        self.index
            .write()
            .map_err(|e| DeliveryError::LockPoisoned(e.to_string()))
    }

    fn lock_outbox(&self) -> DeliveryResult<MutexGuard<'_, HashMap<ProvisionalId, PendingSend>>> {
        self.outbox
            .lock()
            .map_err(|e| DeliveryError::LockPoisoned(e.to_string()))
    }

    fn current_user(&self) -> DeliveryResult<UserId> {
        Ok(self
            .read_index()?
            .selection()
            .ok_or(IndexError::NotLoggedIn)?
            .user())
    }

    fn selected(&self) -> DeliveryResult<Option<(UserId, UserId, ConversationId)>> {
        let index = self.read_index()?;
        let selection = index.selection().ok_or(IndexError::NotLoggedIn)?;
        let user = selection.user();
        Ok(selection
            .partner()
            .map(|partner| (user, partner, ConversationId::between(user, partner))))
    }

    // Session

    /// Starts a session for `user`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::LockPoisoned`] if an internal lock is poisoned.
    pub fn login(&self, user: UserId) -> DeliveryResult<ActiveSelection> {
        self.syncs.cancel_all()?;
        let selection = self.write_index()?.login(user);
        info!(user = %user, "logged in");
        Ok(selection)
    }

    /// Ends the session, discarding in-flight syncs, unsent drafts, and
    /// every cached message.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if an internal lock is poisoned.
    pub fn logout(&self) -> DeliveryResult<Option<ActiveSelection>> {
        self.syncs.cancel_all()?;
        let previous = self.write_index()?.logout();
        self.lock_outbox()?.clear();
        self.store.clear()?;
        self.failures.store(0, Ordering::Relaxed);
        if let Some(selection) = previous {
            info!(user = %selection.user(), "logged out");
        }
        Ok(previous)
    }

    /// Returns the active selection, if a user is logged in.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::LockPoisoned`] if an internal lock is poisoned.
    pub fn selection(&self) -> DeliveryResult<Option<ActiveSelection>> {
        Ok(self.read_index()?.selection().copied())
    }

    /// Runs `read` against the conversation index.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::LockPoisoned`] if an internal lock is poisoned.
    pub fn with_index<R>(&self, read: impl FnOnce(&ConversationIndex) -> R) -> DeliveryResult<R> {
        let index = self.read_index()?;
        Ok(read(&index))
    }

    /// Returns the cached partners of the logged-in user.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotLoggedIn`] without a session.
    pub fn partners(&self) -> DeliveryResult<Vec<Participant>> {
        let index = self.read_index()?;
        let user = index.selection().ok_or(IndexError::NotLoggedIn)?.user();
        Ok(index.list_partners(user).to_vec())
    }

    /// Returns the cached partners whose display name contains `query`,
    /// ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::LockPoisoned`] if an internal lock is poisoned.
    pub fn search_partners(&self, query: &str) -> DeliveryResult<Vec<Participant>> {
        Ok(self.read_index()?.search(query).cloned().collect())
    }

    /// Fetches the partner list of the logged-in user and caches it.
    ///
    /// A selected partner no longer listed is deselected and its in-flight
    /// sync cancelled. With `auto_select_first_partner` enabled and nothing
    /// selected, the first partner is selected and synced.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotLoggedIn`] without a session and
    /// [`DeliveryError::Gateway`] if the fetch fails.
    pub async fn refresh_partners(&self) -> DeliveryResult<Vec<Participant>> {
        let user = self.current_user()?;
        let partners = match self
            .call(self.gateway.fetch_conversation_partners(user))
            .await
        {
            Ok(partners) => {
                self.record_success();
                partners
            }
            Err(err) => {
                let failures = self.record_failure();
                warn!(user = %user, failures, error = %err, "partner refresh failed");
                return Err(err.into());
            }
        };

        let (dropped, first) = {
            let mut index = self.write_index()?;
            let dropped = index.update_partners(user, partners.clone());
            let unselected = index
                .selection()
                .is_some_and(|selection| selection.user() == user && selection.partner().is_none());
            let first = partners.first().map(Participant::id).filter(|_| unselected);
            (dropped, first)
        };
        debug!(user = %user, count = partners.len(), "refreshed partners");

        if let Some(conversation) = dropped {
            self.syncs.cancel(conversation)?;
            info!(conversation = %conversation, "selected partner disappeared; selection cleared");
        }
        if let Some(partner) = first.filter(|_| self.config.auto_select_first_partner) {
            self.select(partner).await?;
        }
        Ok(partners)
    }

    /// Selects the conversation with `partner` and syncs it.
    ///
    /// A sync still outstanding for the previously selected conversation is
    /// cancelled, so its late response is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Index`] if `partner` is unknown, leaving the
    /// selection unchanged, and [`DeliveryError::Gateway`] if the initial
    /// sync fails.
    pub async fn select(&self, partner: UserId) -> DeliveryResult<SyncOutcome> {
        let (user, previous, conversation) = {
            let mut index = self.write_index()?;
            let previous = index.selection().and_then(ActiveSelection::conversation);
            let conversation = index.select(partner)?;
            let user = index
                .selection()
                .map(ActiveSelection::user)
                .ok_or(IndexError::NotLoggedIn)?;
            (user, previous, conversation)
        };

        if let Some(deselected) = previous.filter(|earlier| *earlier != conversation) {
            if self.syncs.cancel(deselected)? {
                debug!(conversation = %deselected, "cancelled in-flight sync of deselected conversation");
            }
        }
        info!(conversation = %conversation, "selected conversation");
        self.sync_conversation(user, partner, conversation).await
    }

    // Sync

    /// Syncs the selected conversation unless a sync is already outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Gateway`] if the fetch fails; the
    /// conversation returns to `Idle` and the next tick retries.
    pub async fn sync_selected(&self) -> DeliveryResult<SyncOutcome> {
        let Some((user, partner, conversation)) = self.selected_or_none()? else {
            return Ok(SyncOutcome::NoSelection);
        };
        self.sync_conversation(user, partner, conversation).await
    }

    fn selected_or_none(&self) -> DeliveryResult<Option<(UserId, UserId, ConversationId)>> {
        match self.selected() {
            Err(DeliveryError::Index(IndexError::NotLoggedIn)) => Ok(None),
            other => other,
        }
    }

    async fn sync_conversation(
        &self,
        user: UserId,
        partner: UserId,
        conversation: ConversationId,
    ) -> DeliveryResult<SyncOutcome> {
        let Some(ticket) = self.syncs.begin(conversation)? else {
            debug!(conversation = %conversation, "sync already in flight; skipping");
            return Ok(SyncOutcome::Skipped);
        };
        let sequence = ticket.sequence();
        let fetched_at = self.store.version(conversation)?;
        let stale = SyncOutcome::StaleResponse {
            conversation_id: conversation,
            sequence,
        };

        match self.call(self.gateway.fetch_messages(user, partner)).await {
            Ok(snapshot) => {
                let now = self.clock.now();
                let store = &self.store;
                let applied = ticket.complete(|| -> StoreResult<ReconcileReport> {
                    let report = store.reconcile_fetched_at(conversation, snapshot, fetched_at)?;
                    store.sweep_conversation(conversation, now)?;
                    Ok(report)
                })?;
                let Some(result) = applied else {
                    debug!(conversation = %conversation, sequence, "discarded stale sync response");
                    return Ok(stale);
                };
                let report = result?;
                self.record_success();
                Ok(SyncOutcome::Synced(report))
            }
            Err(err) => {
                if !ticket.abandon()? {
                    debug!(conversation = %conversation, sequence, "discarded stale sync failure");
                    return Ok(stale);
                }
                let failures = self.record_failure();
                warn!(
                    conversation = %conversation,
                    failures,
                    error = %err,
                    "sync failed; retrying on next tick"
                );
                Err(err.into())
            }
        }
    }

    /// Returns whether a sync of `conversation` is outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::LockPoisoned`] if an internal lock is poisoned.
    pub fn sync_state(&self, conversation: ConversationId) -> DeliveryResult<SyncState> {
        self.syncs.state(conversation)
    }

    /// Sweeps expired messages, then syncs the selected conversation.
    ///
    /// Equivalent to one step of [`DeliveryCoordinator::run`].
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Gateway`] if the sync fails; the sweep has
    /// already been applied.
    pub async fn tick(&self) -> DeliveryResult<TickReport> {
        let expired = self.store.sweep_expired(self.clock.now())?;
        if !expired.is_empty() {
            let mut outbox = self.lock_outbox()?;
            for removed in &expired {
                debug!(
                    conversation = %removed.conversation_id,
                    message = %removed.message.id(),
                    "message expired"
                );
                let abandoned = removed
                    .message
                    .client_ref()
                    .filter(|_| removed.message.is_provisional());
                if let Some(provisional) = abandoned {
                    outbox.remove(&provisional);
                }
            }
        }
        let sync = self.sync_selected().await?;
        Ok(TickReport { sync, expired })
    }

    // Send

    /// Sends a draft to the selected partner.
    ///
    /// A provisional message appears in the store immediately. On success
    /// it is replaced by the server-confirmed message; on failure it stays
    /// visible in the failed state and can be retried with
    /// [`DeliveryCoordinator::retry_send`].
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::EmptyMessage`] for an empty draft,
    /// [`DeliveryError::NoSelection`] without a selected partner,
    /// [`DeliveryError::SendFailed`] if the upload or send fails, and
    /// [`DeliveryError::Store`] if the server confirms with a message that
    /// expires before its creation. Both failures leave the provisional
    /// message in the failed state.
    pub async fn send(&self, draft: MessageDraft) -> DeliveryResult<Message> {
        if draft.is_empty() {
            return Err(DeliveryError::EmptyMessage);
        }
        let (user, partner, conversation) = self.selected()?.ok_or(DeliveryError::NoSelection)?;
        let MessageDraft {
            text,
            attachment,
            timer,
        } = draft;
        let expiry_seconds = timer
            .map(ExpiryTimer::seconds)
            .or(self.config.default_expiry_seconds);

        let provisional = ProvisionalId::new();
        let mut preview = MessageContent::text(text.clone());
        if let Some(upload) = &attachment {
            preview = preview.with_attachment(AttachmentRef::pending(&upload.filename));
        }
        let message =
            Message::provisional(provisional, user, preview, self.clock.now(), expiry_seconds)?;
        self.store.insert(conversation, message)?;
        self.lock_outbox()?.insert(
            provisional,
            PendingSend {
                conversation_id: conversation,
                user,
                partner,
                text,
                upload: attachment,
                uploaded: None,
                expiry_seconds,
            },
        );
        debug!(conversation = %conversation, %provisional, "inserted provisional message");

        self.dispatch(provisional).await
    }

    /// Retries a failed send, reusing an attachment uploaded by an earlier
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::UnknownProvisional`] unless `provisional`
    /// names a failed send that has not expired, and
    /// [`DeliveryError::SendFailed`] if the retry fails too.
    pub async fn retry_send(&self, provisional: ProvisionalId) -> DeliveryResult<Message> {
        let conversation = self
            .lock_outbox()?
            .get(&provisional)
            .map(|pending| pending.conversation_id)
            .ok_or(DeliveryError::UnknownProvisional(provisional))?;
        let failed = self
            .store
            .find(conversation, &MessageId::from(provisional))?
            .is_some_and(|message| matches!(message.delivery(), DeliveryState::Failed { .. }));
        if !failed {
            return Err(DeliveryError::UnknownProvisional(provisional));
        }
        self.store.mark_pending(conversation, provisional)?;
        info!(conversation = %conversation, %provisional, "retrying send");
        self.dispatch(provisional).await
    }

    async fn dispatch(&self, provisional: ProvisionalId) -> DeliveryResult<Message> {
        let pending = self
            .lock_outbox()?
            .get(&provisional)
            .cloned()
            .ok_or(DeliveryError::UnknownProvisional(provisional))?;
        let conversation = pending.conversation_id;

        let confirmed = match self.deliver(&pending, provisional).await? {
            Ok(confirmed) => confirmed,
            Err(source) => {
                let failures = self.record_failure();
                warn!(
                    conversation = %conversation,
                    %provisional,
                    failures,
                    error = %source,
                    "send failed"
                );
                self.keep_failed(conversation, provisional, source.to_string())?;
                return Err(DeliveryError::SendFailed {
                    provisional,
                    source,
                });
            }
        };
        self.record_success();

        if let Err(err) = self
            .store
            .confirm(conversation, provisional, confirmed.clone())
        {
            if matches!(err, StoreError::InvalidExpiry(_)) {
                self.keep_failed(conversation, provisional, err.to_string())?;
            }
            return Err(err.into());
        }
        self.lock_outbox()?.remove(&provisional);
        info!(
            conversation = %conversation,
            %provisional,
            message = %confirmed.id(),
            "message confirmed"
        );
        Ok(confirmed)
    }

    /// Leaves a provisional message visible in the failed state so the
    /// user can retry it.
    fn keep_failed(
        &self,
        conversation: ConversationId,
        provisional: ProvisionalId,
        reason: String,
    ) -> DeliveryResult<()> {
        match self.store.mark_failed(conversation, provisional, reason) {
            Ok(()) => Ok(()),
            Err(StoreError::UnknownMessage { .. }) => {
                // Expired while the request was outstanding.
                self.lock_outbox()?.remove(&provisional);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Uploads the attachment if needed, then sends. The outer result
    /// carries local failures, the inner one the server's answer.
    async fn deliver(
        &self,
        pending: &PendingSend,
        provisional: ProvisionalId,
    ) -> DeliveryResult<GatewayResult<Message>> {
        let attachment = match self.upload_for(pending, provisional).await? {
            Ok(attachment) => attachment,
            Err(source) => return Ok(Err(source)),
        };
        let mut content = MessageContent::text(pending.text.clone());
        if let Some(reference) = attachment {
            content = content.with_attachment(reference);
        }
        let outgoing = OutgoingMessage {
            content,
            expiry_seconds: pending.expiry_seconds,
            client_ref: provisional,
        };
        Ok(self
            .call(
                self.gateway
                    .send_message(pending.user, pending.partner, outgoing),
            )
            .await)
    }

    async fn upload_for(
        &self,
        pending: &PendingSend,
        provisional: ProvisionalId,
    ) -> DeliveryResult<GatewayResult<Option<AttachmentRef>>> {
        if let Some(uploaded) = &pending.uploaded {
            return Ok(Ok(Some(uploaded.clone())));
        }
        let Some(upload) = &pending.upload else {
            return Ok(Ok(None));
        };
        let uploaded = self
            .call(
                self.gateway
                    .upload_attachment(upload.bytes.clone(), upload.filename.clone()),
            )
            .await;
        let reference = match uploaded {
            Ok(reference) => reference,
            Err(source) => return Ok(Err(source)),
        };
        debug!(%provisional, attachment = %reference.as_str(), "attachment uploaded");
        if let Some(entry) = self.lock_outbox()?.get_mut(&provisional) {
            entry.uploaded = Some(reference.clone());
        }
        Ok(Ok(Some(reference)))
    }

    // Push

    /// Applies a message pushed by the server.
    ///
    /// Duplicates, including echoes of messages already applied by a sync,
    /// are ignored. A pushed confirmation of a local send replaces the
    /// provisional message.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotLoggedIn`] without a session and
    /// [`DeliveryError::Store`] if the message expires before it was created.
    pub fn receive(&self, incoming: IncomingMessage) -> DeliveryResult<ReceiveOutcome> {
        let user = self.current_user()?;
        let IncomingMessage {
            conversation_id,
            message,
        } = incoming;
        if !conversation_id.involves(user) {
            debug!(conversation = %conversation_id, "ignoring push for another user");
            return Ok(ReceiveOutcome::Ignored);
        }
        let id = message.id().clone();
        match self.store.insert(conversation_id, message.into_confirmed()) {
            Ok(()) => {
                debug!(conversation = %conversation_id, message = %id, "applied pushed message");
                Ok(ReceiveOutcome::Applied)
            }
            Err(StoreError::DuplicateMessage { .. }) => {
                debug!(conversation = %conversation_id, message = %id, "ignoring duplicate push");
                Ok(ReceiveOutcome::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }

    // Reads

    /// Returns the live messages of the selected conversation, in order.
    ///
    /// Messages past their expiry are hidden even before the next sweep.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::NoSelection`] without a selected partner.
    pub fn snapshot(&self) -> DeliveryResult<Vec<Message>> {
        let (_, _, conversation) = self.selected()?.ok_or(DeliveryError::NoSelection)?;
        self.snapshot_of(conversation)
    }

    /// Returns the live messages of any conversation, in order.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Store`] if an internal lock is poisoned.
    pub fn snapshot_of(&self, conversation: ConversationId) -> DeliveryResult<Vec<Message>> {
        Ok(self.store.snapshot_at(conversation, self.clock.now())?)
    }

    /// Returns the number of consecutive failed external calls.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Classifies connection health from consecutive failures.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        match self.consecutive_failures() {
            0 => ConnectionStatus::Connected,
            failures if failures >= self.config.connection_lost_threshold => {
                ConnectionStatus::Lost { failures }
            }
            failures => ConnectionStatus::Degraded { failures },
        }
    }

    fn record_success(&self) {
        let previous = self.failures.swap(0, Ordering::Relaxed);
        if previous >= self.config.connection_lost_threshold {
            info!(after_failures = previous, "connection restored");
        }
    }

    fn record_failure(&self) -> u32 {
        let failures = self
            .failures
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        if failures == self.config.connection_lost_threshold {
            warn!(failures, "connection lost");
        }
        failures
    }

    async fn call<T>(&self, request: impl Future<Output = GatewayResult<T>> + Send) -> GatewayResult<T> {
        let limit = self.config.request_timeout();
        tokio::time::timeout(limit, request)
            .await
            .unwrap_or_else(|_elapsed| Err(GatewayError::Timeout(limit)))
    }

    // Drivers

    /// Ticks at the configured poll interval until `shutdown` resolves.
    ///
    /// Ticks missed while a slow sync was outstanding are skipped rather
    /// than replayed in a burst. Failures are logged and retried on the
    /// next tick.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval().max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        info!(interval = ?self.config.poll_interval(), "delivery loop started");

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => match self.tick().await {
                    Ok(report) => {
                        if !report.expired.is_empty() {
                            debug!(expired = report.expired.len(), "tick swept messages");
                        }
                    }
                    Err(err) if err.is_external() => {
                        debug!(error = %err, "tick failed");
                    }
                    Err(err) => warn!(error = %err, "tick failed"),
                },
            }
        }
        info!("delivery loop stopped");
    }

    /// Applies pushed messages from `feed` until it closes or `shutdown`
    /// resolves.
    pub async fn run_push(&self, mut feed: MessageFeed, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                next = feed.recv() => {
                    let Some(incoming) = next else {
                        info!("push feed closed");
                        break;
                    };
                    if let Err(err) = self.receive(incoming) {
                        warn!(error = %err, "could not apply pushed message");
                    }
                }
            }
        }
    }
}
