//! # twoplace-shared
//!
//! Identifiers, the canonical call/profile data model and the constants
//! shared by every twoplace crate.

pub mod constants;
pub mod error;
pub mod models;
pub mod types;

pub use error::{PatchError, ValidationError};
pub use models::*;
pub use types::{CallId, RequestId, Role, UserId};
