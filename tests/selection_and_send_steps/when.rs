//! When steps for selection and send BDD scenarios.

use std::time::Duration;

use ephemera::chat::{
    domain::{ExpiryTimer, MessageContent, UserId},
    services::MessageDraft,
};
use eyre::WrapErr;
use rstest_bdd_macros::when;

use super::world::{ChatWorld, run_async};

const STRANGER: UserId = UserId::new(999);

fn send(world: &mut ChatWorld, draft: MessageDraft) -> Result<(), eyre::Report> {
    let outcome = run_async(world.coordinator()?.send(draft));
    match outcome {
        Ok(message) => {
            world.last_sent = Some(message);
            world.last_error = None;
        }
        Err(error) => {
            world.last_sent = None;
            world.last_error = Some(error);
        }
    }
    Ok(())
}

#[when("a user who is not a partner is selected")]
fn select_stranger(world: &mut ChatWorld) -> Result<(), eyre::Report> {
    let outcome = run_async(world.coordinator()?.select(STRANGER));
    world.last_error = outcome.err();
    Ok(())
}

#[when(r#"the message "{text}" is sent"#)]
fn send_message(world: &mut ChatWorld, text: String) -> Result<(), eyre::Report> {
    send(world, MessageDraft::text(text))
}

#[when(r#"the message "{text}" is sent with a {seconds:u64} second timer"#)]
fn send_timed_message(
    world: &mut ChatWorld,
    text: String,
    seconds: u64,
) -> Result<(), eyre::Report> {
    let timer = ExpiryTimer::from_seconds(seconds)
        .ok_or_else(|| eyre::eyre!("a timer needs at least one second"))?;
    send(world, MessageDraft::text(text).with_timer(timer))
}

#[when("{seconds:u64} seconds pass")]
fn seconds_pass(world: &mut ChatWorld, seconds: u64) -> Result<(), eyre::Report> {
    world.clock.advance(Duration::from_secs(seconds));
    run_async(world.coordinator()?.tick()).wrap_err("tick after time passed")?;
    Ok(())
}

#[when(r#""{name}" replies "{text}""#)]
fn partner_replies(world: &mut ChatWorld, name: String, text: String) -> Result<(), eyre::Report> {
    let partner = world.known_user(&name)?;
    let user = world
        .user
        .ok_or_else(|| eyre::eyre!("no user is logged in"))?;
    world
        .server
        .deliver(partner, user, MessageContent::text(text), None)
        .wrap_err("deliver reply")?;
    run_async(world.coordinator()?.tick()).wrap_err("tick after reply")?;
    Ok(())
}
