//! The signed-in identity.

use tokio::sync::watch;
use tracing::info;
use twoplace_shared::{UserId, UserProfile};
use twoplace_store::LiveStore;

use crate::error::Result;

/// Holds the current identity and broadcasts every change to it.
pub struct AuthSession {
    store: LiveStore,
    current: watch::Sender<Option<UserId>>,
}

impl AuthSession {
    pub fn new(store: LiveStore) -> Self {
        let (current, _) = watch::channel(None);
        Self { store, current }
    }

    /// Sign in as `username`, registering the profile on first use.
    pub fn sign_in(&self, username: &str) -> Result<UserProfile> {
        let profile = self
            .store
            .write(|db| db.create_user_if_absent(username, username))?;
        info!(uid = %profile.uid.short(), username, "signed in");
        self.current.send_replace(Some(profile.uid.clone()));
        Ok(profile)
    }

    pub fn sign_out(&self) {
        if let Some(uid) = self.current.send_replace(None) {
            info!(uid = %uid.short(), "signed out");
        }
    }

    pub fn current(&self) -> Option<UserId> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::live_store;

    #[tokio::test]
    async fn sign_in_registers_once() {
        let auth = AuthSession::new(live_store());
        let first = auth.sign_in("alice").unwrap();
        auth.sign_out();
        let second = auth.sign_in("alice").unwrap();

        assert_eq!(first.uid, second.uid);
        assert_eq!(second.display_name, "alice");
        assert_eq!(auth.current(), Some(first.uid));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let auth = AuthSession::new(live_store());
        let mut rx = auth.subscribe();
        assert_eq!(*rx.borrow(), None);

        let profile = auth.sign_in("bob").unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(profile.uid));

        auth.sign_out();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), None);
    }
}
