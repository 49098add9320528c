//! Subcommand implementations.

pub mod calls;
pub mod friends;
pub mod profile;

use anyhow::{anyhow, bail, Context as _};
use serde::Serialize;
use twoplace_client::AuthSession;
use twoplace_shared::UserProfile;
use twoplace_store::{Database, LiveStore};

use crate::config::ClientConfig;

/// What every subcommand works against.
pub struct Context {
    pub config: ClientConfig,
    pub store: LiveStore,
    pub auth: AuthSession,
    pub json: bool,
}

impl Context {
    pub fn open(config: ClientConfig, json: bool) -> anyhow::Result<Self> {
        let db = match &config.db_path {
            Some(path) => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)
                        .with_context(|| format!("creating {}", dir.display()))?;
                }
                Database::open_at(path)?
            }
            None => Database::new()?,
        };
        let store = LiveStore::new(db).with_poll_interval(config.poll_interval);
        let auth = AuthSession::new(store.clone());
        Ok(Self { config, store, auth, json })
    }

    /// Sign in as `user`, which every subcommand except `register` needs.
    pub fn sign_in(&self, user: Option<&str>) -> anyhow::Result<UserProfile> {
        let Some(username) = user else {
            bail!("no user given; pass --user or set TWOPLACE_USER");
        };
        Ok(self.auth.sign_in(username)?)
    }

    /// Look up a registered user by username.
    pub fn lookup(&self, username: &str) -> anyhow::Result<UserProfile> {
        self.store
            .read(|db| db.find_user_by_username(username))?
            .ok_or_else(|| anyhow!("no user named {username:?}"))
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
