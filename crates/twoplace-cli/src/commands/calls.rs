use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use twoplace_client::history::{load_history, Direction};
use twoplace_client::{CallError, CallManager, CallSnapshot, CallStatus, EndReason};
use twoplace_media::{RtcPeerFactory, SystemMediaDevices};
use twoplace_shared::{UserId, UserProfile};

use super::Context;

fn manager(ctx: &Context, me: &UserProfile) -> anyhow::Result<CallManager> {
    Ok(CallManager::new(
        me.uid.clone(),
        Arc::new(ctx.store.clone()),
        Arc::new(SystemMediaDevices),
        Arc::new(RtcPeerFactory::new()?),
        ctx.config.call_config(),
    ))
}

fn partner_name(ctx: &Context, uid: &UserId) -> String {
    ctx.store
        .read(|db| db.get_user(uid))
        .map(|p| p.username)
        .unwrap_or_else(|_| uid.to_string())
}

fn describe(reason: Option<EndReason>) -> &'static str {
    match reason {
        Some(EndReason::Hangup) => "hung up",
        Some(EndReason::Rejected) => "declined",
        Some(EndReason::Timeout) => "no answer",
        Some(EndReason::Unload) => "client closed",
        Some(EndReason::Remote) => "ended by the other side",
        Some(EndReason::SleepTimer) => "sleep timer",
        None => "ended",
    }
}

fn print_usage(manager: &CallManager) {
    if let Some(usage) = manager.usage() {
        println!(
            "Traffic: {} bytes sent, {} bytes received",
            usage.bytes_sent, usage.bytes_received
        );
    }
}

/// Sign out and wait for the manager to unload its call.
async fn shut_down(ctx: &Context, follower: tokio::task::JoinHandle<()>) {
    ctx.auth.sign_out();
    if let Err(e) = follower.await {
        warn!(error = %e, "unload task failed");
    }
}

pub async fn call(
    ctx: &Context,
    user: Option<&str>,
    username: &str,
    sleep: Option<u32>,
) -> anyhow::Result<()> {
    let me = ctx.sign_in(user)?;
    let callee = ctx.lookup(username)?;
    let manager = manager(ctx, &me)?;
    let follower = manager.follow_auth(ctx.auth.subscribe());
    let mut status = manager.subscribe_status();

    match manager.initiate(&callee.uid).await {
        Ok(id) => println!("Calling {} ({id})...", callee.username),
        // The call document exists and times out on its own.
        Err(CallError::Capture(e)) => eprintln!("Could not start capture: {e}"),
        Err(e) => return Err(e.into()),
    }

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                match snapshot.status {
                    CallStatus::Accepted => {
                        println!("Connected to {}", callee.username);
                        if let Some(minutes) = sleep {
                            manager.set_sleep_timer(minutes).await?;
                            println!("Call will end in {minutes} minute(s)");
                        }
                    }
                    CallStatus::Ended => {
                        println!("Call ended: {}", describe(snapshot.end_reason));
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                shut_down(ctx, follower).await;
                print_usage(&manager);
                return Ok(());
            }
        }
    }

    print_usage(&manager);
    Ok(())
}

pub async fn listen(ctx: &Context, user: Option<&str>, auto_accept: bool) -> anyhow::Result<()> {
    let me = ctx.sign_in(user)?;
    let manager = manager(ctx, &me)?;
    let follower = manager.follow_auth(ctx.auth.subscribe());
    let mut status = manager.subscribe_status();
    manager.start_listening();
    println!("Waiting for calls as {}. Ctrl-C to quit.", me.username);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut audio_on = true;
    let mut video_on = true;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                on_status(ctx, &manager, &snapshot, auto_accept).await;
                if snapshot.status == CallStatus::Accepted {
                    audio_on = true;
                    video_on = true;
                }
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                let snapshot = manager.status();
                let result = match line.trim().split_once(' ').unwrap_or((line.trim(), "")) {
                    ("a", _) => match snapshot.call_id {
                        Some(id) if snapshot.status == CallStatus::Ringing => manager.accept(&id).await,
                        _ => Err(CallError::NoActiveCall),
                    },
                    ("r", _) => match snapshot.call_id {
                        Some(id) => manager.reject(&id).await,
                        None => Err(CallError::NoActiveCall),
                    },
                    ("h", _) => manager.end().await,
                    ("m", _) => {
                        audio_on = !audio_on;
                        manager.set_audio_enabled(audio_on)
                    }
                    ("v", _) => {
                        video_on = !video_on;
                        manager.set_video_enabled(video_on)
                    }
                    ("s", minutes) => match minutes.trim().parse() {
                        Ok(minutes) => manager.set_sleep_timer(minutes).await,
                        Err(_) => {
                            println!("usage: s <minutes>");
                            Ok(())
                        }
                    },
                    ("", _) => Ok(()),
                    _ => {
                        println!("a=accept r=reject h=hang up m=mute v=video s <min>=sleep timer");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    println!("{e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                shut_down(ctx, follower).await;
                return Ok(());
            }
        }
    }
    Ok(())
}

async fn on_status(ctx: &Context, manager: &CallManager, snapshot: &CallSnapshot, auto_accept: bool) {
    let partner = snapshot
        .partner
        .as_ref()
        .map(|uid| partner_name(ctx, uid))
        .unwrap_or_default();
    match snapshot.status {
        CallStatus::Ringing => {
            println!("Incoming call from {partner}");
            if let (true, Some(id)) = (auto_accept, snapshot.call_id) {
                if let Err(e) = manager.accept(&id).await {
                    println!("Could not accept: {e}");
                }
            } else {
                println!("[a]ccept or [r]eject?");
            }
        }
        CallStatus::Accepted => println!("Connected to {partner}"),
        CallStatus::Ended => {
            println!("Call with {partner} ended: {}", describe(snapshot.end_reason));
            print_usage(manager);
        }
        CallStatus::Idle | CallStatus::Calling => {}
    }
}

pub fn history(ctx: &Context, user: Option<&str>, limit: u32) -> anyhow::Result<()> {
    let me = ctx.sign_in(user)?;
    let entries = load_history(&ctx.store, &me.uid, limit)?;
    if ctx.json {
        return ctx.print_json(&entries);
    }
    if entries.is_empty() {
        println!("No calls yet");
    }
    for entry in &entries {
        let arrow = match entry.direction {
            Direction::Outgoing => "->",
            Direction::Incoming => "<-",
        };
        println!(
            "{} {arrow} {:<20} {:<9} {:>6} {:>8} MB",
            entry.started_at.format("%Y-%m-%d %H:%M"),
            entry.partner_display_name,
            entry.outcome,
            entry.duration,
            entry.traffic_mb,
        );
    }
    Ok(())
}
