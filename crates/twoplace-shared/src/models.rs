//! Canonical documents exchanged through the session store.
//!
//! Field names serialize in camelCase so a stored document reads the same
//! as the `calls` schema (`callerUid`, `startedAt`, `wasAutoEnded`, ...).
//! Optional fields are always present on the Rust side as `Option`, never
//! as missing keys.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PatchError, ValidationError};
use crate::types::{CallId, RequestId, Role, UserId};

// ---------------------------------------------------------------------------
// Negotiation payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Opaque session description. Relayed as-is, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate init blob, in the shape the browser `toJSON()` produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CallSession
// ---------------------------------------------------------------------------

/// One document in the `calls` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: CallId,
    pub caller_uid: UserId,
    pub callee_uid: UserId,
    pub started_at: DateTime<Utc>,
    pub accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    pub ended_at: Option<DateTime<Utc>>,
    pub was_auto_ended: Option<bool>,
    pub bytes_sent: Option<u64>,
    pub bytes_received: Option<u64>,
    pub sleep_timer_minutes: Option<u32>,
}

/// Result of applying a [`CallPatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// Every field in the patch already had that value.
    Unchanged,
}

impl CallSession {
    pub fn new(
        caller_uid: UserId,
        callee_uid: UserId,
        started_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let session = Self {
            id: CallId::new(),
            caller_uid,
            callee_uid,
            started_at,
            accepted: false,
            accepted_at: None,
            offer: None,
            answer: None,
            ended_at: None,
            was_auto_ended: None,
            bytes_sent: None,
            bytes_received: None,
            sleep_timer_minutes: None,
        };
        session.validate()?;
        Ok(session)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.caller_uid == self.callee_uid {
            return Err(ValidationError::SelfCall);
        }
        if self.accepted_at.is_some() && !self.accepted {
            return Err(ValidationError::AcceptedAtWithoutAccepted);
        }
        if let Some(offer) = &self.offer {
            if offer.sdp_type != SdpType::Offer {
                return Err(ValidationError::OfferType(offer.sdp_type.to_string()));
            }
        }
        if let Some(answer) = &self.answer {
            if answer.sdp_type != SdpType::Answer {
                return Err(ValidationError::AnswerType(answer.sdp_type.to_string()));
            }
        }
        Ok(())
    }

    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if *user == self.caller_uid {
            Some(Role::Caller)
        } else if *user == self.callee_uid {
            Some(Role::Callee)
        } else {
            None
        }
    }

    /// The other participant, seen from `user`.
    pub fn partner_of(&self, user: &UserId) -> Option<&UserId> {
        match self.role_of(user)? {
            Role::Caller => Some(&self.callee_uid),
            Role::Callee => Some(&self.caller_uid),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// True while `user` is the callee of a call nobody has answered or ended.
    pub fn is_ringing_for(&self, user: &UserId) -> bool {
        self.callee_uid == *user && !self.accepted && !self.is_ended()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|ended| ended - self.started_at)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent.unwrap_or(0) + self.bytes_received.unwrap_or(0)
    }

    /// Apply `patch` on behalf of `writer`.
    ///
    /// The whole patch is validated before anything changes. Once `endedAt`
    /// is set only idempotent retries are accepted.
    pub fn apply(&mut self, writer: &UserId, patch: &CallPatch) -> Result<PatchOutcome, PatchError> {
        let role = self.role_of(writer).ok_or(PatchError::NotParticipant)?;
        if patch.offer.is_some() && role != Role::Caller {
            return Err(PatchError::RoleViolation("caller", "offer"));
        }
        if patch.answer.is_some() && role != Role::Callee {
            return Err(PatchError::RoleViolation("callee", "answer"));
        }

        if self.is_ended() {
            return if patch.is_contained_in(self) {
                Ok(PatchOutcome::Unchanged)
            } else {
                Err(PatchError::Terminal)
            };
        }

        if patch.accepted == Some(false) && self.accepted {
            return Err(PatchError::AcceptRevert);
        }
        if patch.was_auto_ended == Some(true) && self.accepted {
            return Err(PatchError::AnsweredBeforeTimeout);
        }

        let mut next = self.clone();
        if patch.accepted == Some(true) && !next.accepted {
            next.accepted = true;
        }
        // The first acceptance timestamp wins.
        if next.accepted_at.is_none() {
            next.accepted_at = patch.accepted_at;
        }
        if let Some(offer) = &patch.offer {
            next.offer = Some(offer.clone());
        }
        if let Some(answer) = &patch.answer {
            next.answer = Some(answer.clone());
        }
        if patch.ended_at.is_some() {
            next.ended_at = patch.ended_at;
        }
        if patch.was_auto_ended.is_some() {
            next.was_auto_ended = patch.was_auto_ended;
        }
        if patch.bytes_sent.is_some() {
            next.bytes_sent = patch.bytes_sent;
        }
        if patch.bytes_received.is_some() {
            next.bytes_received = patch.bytes_received;
        }
        if patch.sleep_timer_minutes.is_some() {
            next.sleep_timer_minutes = patch.sleep_timer_minutes;
        }
        next.validate()?;

        if next == *self {
            return Ok(PatchOutcome::Unchanged);
        }
        *self = next;
        Ok(PatchOutcome::Applied)
    }
}

// ---------------------------------------------------------------------------
// CallPatch
// ---------------------------------------------------------------------------

/// A partial update of a [`CallSession`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPatch {
    pub accepted: Option<bool>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    pub ended_at: Option<DateTime<Utc>>,
    pub was_auto_ended: Option<bool>,
    pub bytes_sent: Option<u64>,
    pub bytes_received: Option<u64>,
    pub sleep_timer_minutes: Option<u32>,
}

impl CallPatch {
    pub fn offer(desc: SessionDescription) -> Self {
        Self {
            offer: Some(desc),
            ..Default::default()
        }
    }

    pub fn answer(desc: SessionDescription) -> Self {
        Self {
            answer: Some(desc),
            ..Default::default()
        }
    }

    pub fn accept(at: DateTime<Utc>) -> Self {
        Self {
            accepted: Some(true),
            accepted_at: Some(at),
            ..Default::default()
        }
    }

    /// Explicit rejection by the callee (or cancellation by the caller).
    pub fn reject(at: DateTime<Utc>) -> Self {
        Self {
            ended_at: Some(at),
            was_auto_ended: Some(false),
            ..Default::default()
        }
    }

    /// Unanswered-call timeout.
    pub fn auto_end(at: DateTime<Utc>) -> Self {
        Self {
            ended_at: Some(at),
            was_auto_ended: Some(true),
            ..Default::default()
        }
    }

    pub fn hangup(at: DateTime<Utc>) -> Self {
        Self {
            ended_at: Some(at),
            ..Default::default()
        }
    }

    pub fn sleep_timer(minutes: u32) -> Self {
        Self {
            sleep_timer_minutes: Some(minutes),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, bytes_sent: u64, bytes_received: u64) -> Self {
        self.bytes_sent = Some(bytes_sent);
        self.bytes_received = Some(bytes_received);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True if every field this patch carries already holds that value.
    pub fn is_contained_in(&self, session: &CallSession) -> bool {
        fn same<T: PartialEq>(patch: &Option<T>, current: &Option<T>) -> bool {
            patch.is_none() || patch == current
        }

        self.accepted.map_or(true, |a| a == session.accepted)
            && same(&self.accepted_at, &session.accepted_at)
            && same(&self.offer, &session.offer)
            && same(&self.answer, &session.answer)
            && same(&self.ended_at, &session.ended_at)
            && same(&self.was_auto_ended, &session.was_auto_ended)
            && same(&self.bytes_sent, &session.bytes_sent)
            && same(&self.bytes_received, &session.bytes_received)
            && same(&self.sleep_timer_minutes, &session.sleep_timer_minutes)
    }
}

// ---------------------------------------------------------------------------
// Profiles and friend requests
// ---------------------------------------------------------------------------

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    pub username: String,
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    /// Friend identifiers; friendship is symmetric.
    pub friends: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendRequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: RequestId,
    pub from_uid: UserId,
    pub from_name: String,
    pub to_uid: UserId,
    pub to_name: String,
    pub status: FriendRequestStatus,
    pub sent_at: DateTime<Utc>,
}
