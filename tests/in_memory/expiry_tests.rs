//! Expiry tests against [`InMemoryChatGateway`].

use std::sync::Arc;
use std::time::Duration;

use crate::in_memory::helpers::{
    ADA, GRACE, Server, config, eventually, server, session, texts,
};
use ephemera::chat::{
    clock::ManualClock,
    domain::{ConversationId, ExpiryTimer, Message, MessageContent, MessageId},
    services::MessageDraft,
};
use mockable::Clock;
use rstest::rstest;
use tokio::sync::Notify;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn timed_message_disappears_on_both_sides(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    let grace = session(Arc::clone(&server), &clock, config(), GRACE).await?;
    ada.select(GRACE).await?;
    grace.select(ADA).await?;

    let sent = ada
        .send(MessageDraft::text("self-destructing").with_timer(ExpiryTimer::TenSeconds))
        .await?;
    grace.tick().await?;
    eyre::ensure!(
        texts(&grace.snapshot()?) == vec!["self-destructing"],
        "grace received the message"
    );

    clock.advance(Duration::from_secs(9));
    ada.tick().await?;
    eyre::ensure!(ada.snapshot()?.len() == 1, "still visible one second early");

    clock.advance(Duration::from_secs(1));
    let ada_report = ada.tick().await?;
    let grace_report = grace.tick().await?;

    for (who, report) in [("ada", &ada_report), ("grace", &grace_report)] {
        eyre::ensure!(
            report.expired.iter().map(|removed| removed.message.id()).eq([sent.id()]),
            "{who} swept the message: {report:?}"
        );
    }
    eyre::ensure!(ada.snapshot()?.is_empty(), "gone for ada");
    eyre::ensure!(grace.snapshot()?.is_empty(), "gone for grace");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn only_the_permanent_message_survives(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let conversation = ConversationId::between(ADA, GRACE);
    let now = clock.utc();
    let permanent = Message::builder(MessageId::new("m1"), GRACE, now)
        .with_content(MessageContent::text("M1"))
        .build()?;
    let fleeting = Message::builder(MessageId::new("m2"), GRACE, now)
        .with_content(MessageContent::text("M2"))
        .expiring_after_seconds(10)?
        .build()?;
    server.seed_message(conversation, permanent)?;
    server.seed_message(conversation, fleeting)?;

    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;
    eyre::ensure!(texts(&ada.snapshot()?) == vec!["M1", "M2"], "both synced");

    clock.advance(Duration::from_secs(11));
    eyre::ensure!(
        texts(&ada.snapshot()?) == vec!["M1"],
        "expired message hidden before the sweep"
    );

    let report = ada.tick().await?;
    eyre::ensure!(
        report
            .expired
            .iter()
            .map(|removed| removed.message.id().as_str())
            .eq(["m2"]),
        "sweep removed M2: {report:?}"
    );
    eyre::ensure!(texts(&ada.snapshot()?) == vec!["M1"], "M1 remains");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn delivery_loop_sweeps_until_shut_down(
    server: (Arc<ManualClock>, Arc<Server>),
) -> Result<(), eyre::Report> {
    let (clock, server) = server;
    let ada = session(Arc::clone(&server), &clock, config(), ADA).await?;
    ada.select(GRACE).await?;
    server.deliver(
        GRACE,
        ADA,
        MessageContent::text("blink"),
        Some(ExpiryTimer::TenSeconds.seconds()),
    )?;

    let stop = Arc::new(Notify::new());
    let runner = Arc::clone(&ada);
    let signal = Arc::clone(&stop);
    let handle = tokio::spawn(async move {
        runner.run(async move { signal.notified().await }).await;
    });

    eventually("the message to sync", || {
        ada.snapshot().is_ok_and(|messages| texts(&messages) == vec!["blink"])
    })
    .await?;

    clock.advance(Duration::from_secs(10));
    eventually("the message to be swept", || {
        ada.store()
            .snapshot(ConversationId::between(ADA, GRACE))
            .is_ok_and(|messages| messages.is_empty())
    })
    .await?;

    stop.notify_one();
    tokio::time::timeout(Duration::from_secs(2), handle).await??;
    Ok(())
}
