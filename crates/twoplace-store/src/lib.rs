//! # twoplace-store
//!
//! The session store: call documents, their candidate subcollections,
//! user profiles and friend requests, persisted in SQLite.
//!
//! [`Database`] is the synchronous handle with typed CRUD helpers for every
//! document kind. [`LiveStore`] wraps it for async callers and adds live
//! subscriptions (the [`SessionStore`] trait) so a client sees documents
//! change as the other participant writes them, whether that participant
//! runs in this process or in another one sharing the database file.

pub mod calls;
pub mod database;
pub mod friends;
pub mod live;
pub mod migrations;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use live::{LiveStore, SessionStore, Subscription};
