//! # twoplace-client
//!
//! Client-side call logic for two-party video calls signaled through the
//! session store.
//!
//! - [`CallManager`] is the single entry point: initiate, accept, respond,
//!   reject, end and unload a call, and observe its [`CallStatus`].
//! - [`candidates::CandidateQueue`] holds remote candidates until the remote
//!   description is in place.
//! - [`lifecycle::Lifecycle`] owns the status machine and its timers.
//! - [`usage::UsageMeter`] samples transport counters while a call is live.
//! - [`auth::AuthSession`] is the identity stream, [`history`] turns stored
//!   calls into a readable call log.

pub mod auth;
pub mod candidates;
pub mod config;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod manager;
pub mod usage;

#[cfg(test)]
mod fakes;

pub use auth::AuthSession;
pub use config::CallConfig;
pub use error::{CallError, Result};
pub use lifecycle::{CallSnapshot, CallStatus, EndReason};
pub use manager::CallManager;
pub use usage::UsageTotals;
