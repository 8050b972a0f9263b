//! Delivery flow tests against [`InMemoryChatGateway`].
//!
//! Two coordinators share one server, the way two chat clients would.

use std::sync::Arc;

use crate::in_memory::helpers::{
    ADA, GRACE, LINUS, Server, config, server, session, texts,
};
use ephemera::chat::{
    clock::ManualClock,
    config::DeliveryConfig,
    domain::{ConversationId, DeliveryState, MessageContent},
    error::{DeliveryError, GatewayError},
    services::{ConnectionStatus, MessageDraft, SyncOutcome},
};
use rstest::rstest;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn messages_reach_the_partner_in_order(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    let grace = session(Arc::clone(&server), &clock, config(), GRACE).await?;
    ada.select(GRACE).await?;
    grace.select(ADA).await?;

    ada.send(MessageDraft::text("ping")).await?;
    grace.tick().await?;
    grace.send(MessageDraft::text("pong")).await?;
    ada.tick().await?;

    eyre::ensure!(texts(&ada.snapshot()?) == vec!["ping", "pong"], "ada sees both");
    eyre::ensure!(texts(&grace.snapshot()?) == vec!["ping", "pong"], "grace sees both");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn confirmed_message_replaces_the_provisional_one(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;

    let sent = ada.send(MessageDraft::text("hello")).await?;
    ada.tick().await?;
    ada.tick().await?;

    let snapshot = ada.snapshot()?;
    eyre::ensure!(snapshot.len() == 1, "expected one message, got {snapshot:?}");
    let only = snapshot
        .first()
        .ok_or_else(|| eyre::eyre!("missing message"))?;
    eyre::ensure!(only.id() == sent.id(), "server identifier is kept");
    eyre::ensure!(only.id().as_str().starts_with("srv-"), "server id expected");
    eyre::ensure!(
        *only.delivery() == DeliveryState::Confirmed,
        "message is confirmed"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn attachments_are_uploaded_before_sending(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;

    let sent = ada
        .send(MessageDraft::default().with_attachment(b"GIF89a".to_vec(), "wave.gif"))
        .await?;

    let attachment = sent
        .content()
        .attachment
        .as_ref()
        .ok_or_else(|| eyre::eyre!("attachment missing"))?;
    eyre::ensure!(
        attachment.as_str() == "memory://uploads/1/wave.gif",
        "unexpected attachment {attachment:?}"
    );
    eyre::ensure!(sent.content().text.is_empty(), "attachment-only message");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_upload_fails_the_send(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;

    let result = ada
        .send(MessageDraft::text("see attached").with_attachment(Vec::new(), "empty.txt"))
        .await;

    eyre::ensure!(
        matches!(
            result,
            Err(DeliveryError::SendFailed {
                source: GatewayError::Upload(_),
                ..
            })
        ),
        "expected upload failure, got {result:?}"
    );
    let conversation = ConversationId::between(ADA, GRACE);
    eyre::ensure!(
        server.stored_messages(conversation) == 0,
        "nothing reached the server"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_send_is_retried_successfully(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;

    server.fail_next(1);
    let Err(DeliveryError::SendFailed { provisional, .. }) =
        ada.send(MessageDraft::text("again?")).await
    else {
        eyre::bail!("send should fail");
    };
    ada.tick().await?;

    let failed = ada.snapshot()?;
    eyre::ensure!(failed.len() == 1, "failed send survives the sync");
    eyre::ensure!(
        failed
            .first()
            .is_some_and(|message| matches!(message.delivery(), DeliveryState::Failed { .. })),
        "message is marked failed"
    );

    ada.retry_send(provisional).await?;
    ada.tick().await?;

    let snapshot = ada.snapshot()?;
    eyre::ensure!(texts(&snapshot) == vec!["again?"], "one confirmed copy");
    eyre::ensure!(
        snapshot.first().is_some_and(|message| !message.is_provisional()),
        "message is confirmed"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn server_side_deletion_is_reconciled(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;
    let kept = server.deliver(GRACE, ADA, MessageContent::text("keep"), None)?;
    let doomed = server.deliver(GRACE, ADA, MessageContent::text("oops"), None)?;
    ada.tick().await?;
    eyre::ensure!(texts(&ada.snapshot()?) == vec!["keep", "oops"], "both synced");

    eyre::ensure!(
        server.delete_message(ConversationId::between(ADA, GRACE), doomed.id()),
        "message deleted on the server"
    );
    let report = ada.tick().await?;

    eyre::ensure!(
        matches!(&report.sync, SyncOutcome::Synced(changes) if changes.removed == vec![doomed.id().clone()]),
        "sync reports the removal: {report:?}"
    );
    let snapshot = ada.snapshot()?;
    eyre::ensure!(
        snapshot.iter().map(|message| message.id()).eq([kept.id()]),
        "only the kept message remains"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn connection_is_lost_after_repeated_failures(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;

    server.fail_next(3);
    for _ in 0..3 {
        eyre::ensure!(ada.tick().await.is_err(), "tick should fail");
    }
    eyre::ensure!(
        ada.connection_status() == ConnectionStatus::Lost { failures: 3 },
        "connection lost after three failures"
    );

    ada.tick().await?;
    eyre::ensure!(
        ada.connection_status() == ConnectionStatus::Connected,
        "connection restored"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn refresh_selects_the_first_partner_by_default(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    server.deliver(GRACE, ADA, MessageContent::text("welcome"), None)?;

    let ada = session(Arc::clone(&server), &clock, DeliveryConfig::default(), ADA).await?;

    let selection = ada
        .selection()?
        .ok_or_else(|| eyre::eyre!("not logged in"))?;
    eyre::ensure!(selection.partner() == Some(GRACE), "first partner selected");
    eyre::ensure!(texts(&ada.snapshot()?) == vec!["welcome"], "selection synced");
    eyre::ensure!(
        ada.search_partners("torv")?.iter().map(|p| p.id()).eq([LINUS]),
        "search finds Linus"
    );
    Ok(())
}
