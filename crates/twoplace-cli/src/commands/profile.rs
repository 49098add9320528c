use clap::Subcommand;
use twoplace_shared::UserProfile;

use super::Context;

#[derive(Debug, Subcommand)]
pub enum ProfileCmd {
    /// Show a profile (your own by default).
    Show { username: Option<String> },
    /// Find users whose username starts with PREFIX.
    Search {
        prefix: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Change your display name and photo.
    Set {
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        photo_url: Option<String>,
    },
}

pub fn register(ctx: &Context, username: &str, display_name: Option<&str>) -> anyhow::Result<()> {
    let display_name = display_name.unwrap_or(username);
    let profile = ctx
        .store
        .write(|db| db.create_user_if_absent(username, display_name))?;
    if ctx.json {
        return ctx.print_json(&profile);
    }
    print_profile(&profile);
    Ok(())
}

pub fn run(ctx: &Context, user: Option<&str>, cmd: ProfileCmd) -> anyhow::Result<()> {
    let me = ctx.sign_in(user)?;
    match cmd {
        ProfileCmd::Show { username } => {
            let profile = match username {
                Some(name) => ctx.lookup(&name)?,
                None => me,
            };
            if ctx.json {
                return ctx.print_json(&profile);
            }
            print_profile(&profile);
        }
        ProfileCmd::Search { prefix, limit } => {
            let found = ctx
                .store
                .read(|db| db.search_users(&prefix, &me.uid, limit))?;
            if ctx.json {
                return ctx.print_json(&found);
            }
            if found.is_empty() {
                println!("No users matching {prefix:?}");
            }
            for profile in &found {
                let friend = if me.friends.contains(&profile.uid) { " (friend)" } else { "" };
                println!("{:<20} {}{}", profile.username, profile.display_name, friend);
            }
        }
        ProfileCmd::Set { display_name, photo_url } => {
            ctx.store
                .write(|db| db.update_profile(&me.uid, &display_name, photo_url.as_deref()))?;
            println!("Profile updated");
        }
    }
    Ok(())
}

fn print_profile(profile: &UserProfile) {
    println!("username:     {}", profile.username);
    println!("display name: {}", profile.display_name);
    println!("uid:          {}", profile.uid);
    if let Some(url) = &profile.photo_url {
        println!("photo:        {url}");
    }
    println!("friends:      {}", profile.friends.len());
    println!("joined:       {}", profile.created_at.format("%Y-%m-%d"));
}
