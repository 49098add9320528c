use thiserror::Error;
use twoplace_media::MediaError;
use twoplace_shared::{CallId, ValidationError};
use twoplace_store::StoreError;

/// Errors returned by [`crate::CallManager`] operations.
#[derive(Error, Debug)]
pub enum CallError {
    /// Camera or microphone could not be acquired.
    #[error("Local capture failed: {0}")]
    Capture(#[source] MediaError),

    #[error("Peer connection error: {0}")]
    Peer(#[source] MediaError),

    /// The caller has not written its offer yet.
    #[error("Call {0} has no offer yet")]
    NoOffer(CallId),

    #[error("Call {0} has already ended")]
    Ended(CallId),

    /// Only an incoming call that is still ringing can be declined.
    #[error("Call {0} is not ringing; use end to hang up")]
    NotRinging(CallId),

    #[error("Already in a call")]
    Busy,

    #[error("No active call")]
    NoActiveCall,

    #[error("Invalid call: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<MediaError> for CallError {
    fn from(e: MediaError) -> Self {
        if e.is_capture() {
            CallError::Capture(e)
        } else {
            CallError::Peer(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
