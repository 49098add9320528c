use clap::Subcommand;
use twoplace_shared::RequestId;

use super::Context;

#[derive(Debug, Subcommand)]
pub enum FriendsCmd {
    /// Send a friend request, or withdraw the one you already sent.
    Request { username: String },
    /// Accept a pending request from USERNAME.
    Accept { username: String },
    /// Decline a pending request from USERNAME.
    Reject { username: String },
    /// Remove USERNAME from your friends.
    Remove { username: String },
    /// List your friends.
    List,
    /// List friend requests waiting for you.
    Requests,
}

pub fn run(ctx: &Context, user: Option<&str>, cmd: FriendsCmd) -> anyhow::Result<()> {
    let me = ctx.sign_in(user)?;
    match cmd {
        FriendsCmd::Request { username } => {
            let other = ctx.lookup(&username)?;
            match ctx
                .store
                .write(|db| db.toggle_friend_request(&me.uid, &other.uid))?
            {
                Some(_) => println!("Friend request sent to {}", other.username),
                None => println!("Friend request to {} withdrawn", other.username),
            }
        }
        FriendsCmd::Accept { username } => {
            let other = ctx.lookup(&username)?;
            let id = RequestId::for_pair(&other.uid, &me.uid);
            ctx.store
                .write(|db| db.accept_friend_request(&id, &me.uid))?;
            println!("You and {} are now friends", other.username);
        }
        FriendsCmd::Reject { username } => {
            let other = ctx.lookup(&username)?;
            let id = RequestId::for_pair(&other.uid, &me.uid);
            ctx.store
                .write(|db| db.reject_friend_request(&id, &me.uid))?;
            println!("Declined friend request from {}", other.username);
        }
        FriendsCmd::Remove { username } => {
            let other = ctx.lookup(&username)?;
            let removed = ctx.store.write(|db| db.remove_friend(&me.uid, &other.uid))?;
            if removed {
                println!("Removed {} from your friends", other.username);
            } else {
                println!("{} was not your friend", other.username);
            }
        }
        FriendsCmd::List => {
            let friends = ctx.store.read(|db| db.friends_of(&me.uid))?;
            if ctx.json {
                return ctx.print_json(&friends);
            }
            if friends.is_empty() {
                println!("No friends yet");
            }
            for friend in &friends {
                println!("{:<20} {}", friend.username, friend.display_name);
            }
        }
        FriendsCmd::Requests => {
            let pending = ctx.store.read(|db| db.pending_requests_for(&me.uid))?;
            if ctx.json {
                return ctx.print_json(&pending);
            }
            if pending.is_empty() {
                println!("No pending requests");
            }
            for request in &pending {
                println!(
                    "{:<20} sent {}",
                    request.from_name,
                    request.sent_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}
