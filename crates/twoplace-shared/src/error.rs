use thiserror::Error;

/// Structural problems found in a call document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Caller and callee are the same user")]
    SelfCall,

    #[error("acceptedAt is set but accepted is false")]
    AcceptedAtWithoutAccepted,

    #[error("offer field holds a description of type {0}")]
    OfferType(String),

    #[error("answer field holds a description of type {0}")]
    AnswerType(String),

    #[error("Invalid field value: {0}")]
    InvalidField(String),
}

/// Reasons a patch is refused by a call document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Call has ended and can no longer be modified")]
    Terminal,

    #[error("An accepted call cannot be un-accepted")]
    AcceptRevert,
    #[error("An accepted call cannot be ended as unanswered")]
    AnsweredBeforeTimeout,

    #[error("Only the {0} may write {1}")]
    RoleViolation(&'static str, &'static str),

    #[error("Writer is not a participant of this call")]
    NotParticipant,

    #[error("Patch would produce an invalid call: {0}")]
    Invalid(#[from] ValidationError),
}
