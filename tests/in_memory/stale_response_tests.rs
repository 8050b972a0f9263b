//! Tests for syncs that are outstanding while the selection changes or
//! other updates land.
//!
//! [`GatedGateway`] wraps the in-memory server and can hold one fetch at
//! the gate after it has read its snapshot, so the response is already
//! outdated when it is released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::in_memory::helpers::{
    ADA, GRACE, LINUS, Server, config, server, session, texts,
};
use async_trait::async_trait;
use ephemera::chat::{
    clock::ManualClock,
    domain::{AttachmentRef, ConversationId, Message, MessageContent, Participant, UserId},
    error::{DeliveryError, GatewayError},
    ports::{ChatGateway, GatewayResult, IncomingMessage, OutgoingMessage},
    services::{MessageDraft, ReceiveOutcome, SyncOutcome, SyncState},
};
use rstest::rstest;
use tokio::sync::Notify;

struct GatedGateway {
    inner: Arc<Server>,
    held: UserId,
    hold: AtomicBool,
    entered: Notify,
    gate: Notify,
}

impl GatedGateway {
    fn new(inner: Arc<Server>, held: UserId) -> Self {
        Self {
            inner,
            held,
            hold: AtomicBool::new(false),
            entered: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Holds the next fetch of the held partner's conversation.
    fn hold_next(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    async fn wait_until_held(&self) {
        self.entered.notified().await;
    }

    fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ChatGateway for GatedGateway {
    async fn fetch_conversation_partners(&self, user: UserId) -> GatewayResult<Vec<Participant>> {
        self.inner.fetch_conversation_partners(user).await
    }

    async fn fetch_messages(&self, user: UserId, partner: UserId) -> GatewayResult<Vec<Message>> {
        let snapshot = self.inner.fetch_messages(user, partner).await;
        if partner == self.held && self.hold.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        snapshot
    }

    async fn send_message(
        &self,
        user: UserId,
        partner: UserId,
        outgoing: OutgoingMessage,
    ) -> GatewayResult<Message> {
        self.inner.send_message(user, partner, outgoing).await
    }

    async fn upload_attachment(
        &self,
        bytes: Vec<u8>,
        filename: String,
    ) -> GatewayResult<AttachmentRef> {
        self.inner.upload_attachment(bytes, filename).await
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn late_response_for_a_deselected_conversation_is_discarded(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let conversation = ConversationId::between(ADA, GRACE);
    let outdated = server.deliver(GRACE, ADA, MessageContent::text("outdated"), None)?;
    let gated = Arc::new(GatedGateway::new(Arc::clone(&server), GRACE));
    let ada = session(Arc::clone(&gated), &clock, config(), ADA).await?;

    gated.hold_next();
    let runner = Arc::clone(&ada);
    let slow = tokio::spawn(async move { runner.select(GRACE).await });
    gated.wait_until_held().await;

    ada.select(LINUS).await?;
    eyre::ensure!(
        server.delete_message(conversation, outdated.id()),
        "outdated message removed on the server"
    );
    server.deliver(GRACE, ADA, MessageContent::text("fresh"), None)?;
    let resync = ada.select(GRACE).await?;
    eyre::ensure!(
        matches!(resync, SyncOutcome::Synced(_)),
        "reselection syncs: {resync:?}"
    );

    gated.release();
    let late = slow.await??;
    eyre::ensure!(
        matches!(late, SyncOutcome::StaleResponse { conversation_id, .. } if conversation_id == conversation),
        "late response reported stale: {late:?}"
    );
    eyre::ensure!(
        texts(&ada.snapshot()?) == vec!["fresh"],
        "outdated snapshot was not applied"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn tick_skips_a_conversation_already_syncing(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let conversation = ConversationId::between(ADA, GRACE);
    let gated = Arc::new(GatedGateway::new(Arc::clone(&server), GRACE));
    let ada = session(Arc::clone(&gated), &clock, config(), ADA).await?;

    gated.hold_next();
    let runner = Arc::clone(&ada);
    let slow = tokio::spawn(async move { runner.select(GRACE).await });
    gated.wait_until_held().await;

    eyre::ensure!(
        ada.sync_state(conversation)? == SyncState::Syncing,
        "sync outstanding"
    );
    let report = ada.tick().await?;
    eyre::ensure!(report.sync == SyncOutcome::Skipped, "tick skipped: {report:?}");

    gated.release();
    let first = slow.await??;
    eyre::ensure!(matches!(first, SyncOutcome::Synced(_)), "first sync applied");
    eyre::ensure!(
        ada.sync_state(conversation)? == SyncState::Idle,
        "conversation idle again"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn slow_fetch_times_out(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let conversation = ConversationId::between(ADA, GRACE);
    let gated = Arc::new(GatedGateway::new(Arc::clone(&server), GRACE));
    let ada = session(
        Arc::clone(&gated),
        &clock,
        config().with_request_timeout_ms(20),
        ADA,
    )
    .await?;

    gated.hold_next();
    let result = ada.select(GRACE).await;

    eyre::ensure!(
        matches!(
            result,
            Err(DeliveryError::Gateway(GatewayError::Timeout(limit)))
                if limit == Duration::from_millis(20)
        ),
        "expected a timeout, got {result:?}"
    );
    eyre::ensure!(
        ada.sync_state(conversation)? == SyncState::Idle,
        "timed-out sync released"
    );
    eyre::ensure!(ada.consecutive_failures() == 1, "timeout counted");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn abandoned_sync_future_releases_the_conversation(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let conversation = ConversationId::between(ADA, GRACE);
    server.deliver(GRACE, ADA, MessageContent::text("hi"), None)?;
    let gated = Arc::new(GatedGateway::new(Arc::clone(&server), GRACE));
    let ada = session(Arc::clone(&gated), &clock, config(), ADA).await?;

    gated.hold_next();
    let abandoned = tokio::time::timeout(Duration::from_millis(50), ada.select(GRACE)).await;
    eyre::ensure!(abandoned.is_err(), "select was still waiting");
    eyre::ensure!(
        ada.sync_state(conversation)? == SyncState::Idle,
        "dropped sync released"
    );

    let retried = ada.sync_selected().await?;
    eyre::ensure!(matches!(retried, SyncOutcome::Synced(_)), "retry syncs");
    eyre::ensure!(texts(&ada.snapshot()?) == vec!["hi"], "message synced");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn push_during_a_sync_survives_its_response(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let conversation = ConversationId::between(ADA, GRACE);
    let gated = Arc::new(GatedGateway::new(Arc::clone(&server), GRACE));
    let ada = session(Arc::clone(&gated), &clock, config(), ADA).await?;

    gated.hold_next();
    let runner = Arc::clone(&ada);
    let slow = tokio::spawn(async move { runner.select(GRACE).await });
    gated.wait_until_held().await;

    let pushed = server.deliver(GRACE, ADA, MessageContent::text("pushed"), None)?;
    let outcome = ada.receive(IncomingMessage {
        conversation_id: conversation,
        message: pushed,
    })?;
    eyre::ensure!(outcome == ReceiveOutcome::Applied, "push applied: {outcome:?}");

    gated.release();
    let sync = slow.await??;
    eyre::ensure!(
        matches!(&sync, SyncOutcome::Synced(report) if report.removed.is_empty()),
        "outdated snapshot removed nothing: {sync:?}"
    );
    eyre::ensure!(
        texts(&ada.snapshot()?) == vec!["pushed"],
        "pushed message kept"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn confirmation_during_a_sync_survives_its_response(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let gated = Arc::new(GatedGateway::new(Arc::clone(&server), GRACE));
    let ada = session(Arc::clone(&gated), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;

    gated.hold_next();
    let runner = Arc::clone(&ada);
    let slow = tokio::spawn(async move { runner.tick().await });
    gated.wait_until_held().await;

    let sent = ada.send(MessageDraft::text("hello")).await?;
    eyre::ensure!(!sent.is_provisional(), "send confirmed");

    gated.release();
    let report = slow.await??;
    eyre::ensure!(
        matches!(&report.sync, SyncOutcome::Synced(applied) if applied.removed.is_empty()),
        "outdated snapshot removed nothing: {report:?}"
    );
    let visible = ada.snapshot()?;
    eyre::ensure!(texts(&visible) == vec!["hello"], "confirmed message kept");
    eyre::ensure!(
        visible.iter().all(|message| message.id() == sent.id()),
        "only the confirmed copy is shown"
    );
    Ok(())
}
