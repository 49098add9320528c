//! Call log built from stored call documents.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use twoplace_shared::constants::UNKNOWN_DISPLAY_NAME;
use twoplace_shared::{CallId, CallSession, Role, UserId};
use twoplace_store::{Database, LiveStore, StoreError};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Answered,
    Missed,
    Rejected,
    Ongoing,
}

impl Outcome {
    pub fn of(call: &CallSession) -> Self {
        match (call.accepted, call.is_ended()) {
            (true, true) => Outcome::Answered,
            (_, false) => Outcome::Ongoing,
            // An explicit reject is the only non-automatic end before
            // acceptance that the callee writes.
            (false, true) => match call.was_auto_ended {
                Some(false) => Outcome::Rejected,
                _ => Outcome::Missed,
            },
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Outcome::Answered => "answered",
            Outcome::Missed => "missed",
            Outcome::Rejected => "rejected",
            Outcome::Ongoing => "ongoing",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub call_id: CallId,
    pub direction: Direction,
    pub partner_uid: UserId,
    pub partner_username: String,
    pub partner_display_name: String,
    pub started_at: DateTime<Utc>,
    pub outcome: Outcome,
    /// `m:ss`, or `-` while the call has not ended.
    pub duration: String,
    pub traffic_mb: String,
}

/// `m:ss`. Negative spans clamp to zero.
pub fn duration_label(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Bytes as mebibytes with two decimals.
pub fn traffic_mb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
}

fn entry(db: &Database, viewer: &UserId, call: &CallSession) -> twoplace_store::Result<HistoryEntry> {
    let direction = match call.role_of(viewer) {
        Some(Role::Caller) => Direction::Outgoing,
        _ => Direction::Incoming,
    };
    let partner_uid = match direction {
        Direction::Outgoing => call.callee_uid.clone(),
        Direction::Incoming => call.caller_uid.clone(),
    };
    let (partner_username, partner_display_name) = match db.get_user(&partner_uid) {
        Ok(profile) => (profile.username, profile.display_name),
        Err(StoreError::NotFound) => (
            partner_uid.as_str().to_string(),
            UNKNOWN_DISPLAY_NAME.to_string(),
        ),
        Err(e) => return Err(e),
    };

    Ok(HistoryEntry {
        call_id: call.id,
        direction,
        partner_uid,
        partner_username,
        partner_display_name,
        started_at: call.started_at,
        outcome: Outcome::of(call),
        duration: call
            .duration()
            .map(duration_label)
            .unwrap_or_else(|| "-".to_string()),
        traffic_mb: traffic_mb(call.total_bytes()),
    })
}

/// The most recent `limit` calls `viewer` took part in, newest first.
pub fn load_history(store: &LiveStore, viewer: &UserId, limit: u32) -> Result<Vec<HistoryEntry>> {
    let entries = store.read(|db| {
        db.calls_for_user(viewer, limit)?
            .iter()
            .map(|call| entry(db, viewer, call))
            .collect()
    })?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::live_store;
    use twoplace_shared::CallPatch;
    use twoplace_store::SessionStore;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn labels() {
        assert_eq!(duration_label(Duration::seconds(0)), "0:00");
        assert_eq!(duration_label(Duration::seconds(75)), "1:15");
        assert_eq!(duration_label(Duration::seconds(3_601)), "60:01");
        assert_eq!(traffic_mb(0), "0.00");
        assert_eq!(traffic_mb(1_572_864), "1.50");
    }

    #[tokio::test]
    async fn outcomes_and_partners() {
        let store = live_store();
        let alice = store
            .read(|db| db.create_user_if_absent("alice", "Alice"))
            .unwrap()
            .uid;
        let bob = store
            .read(|db| db.create_user_if_absent("bob", "Bob"))
            .unwrap()
            .uid;
        let ghost = UserId::from("ghost-uid");

        // Answered, two and a half minutes, 3 MiB each way.
        let answered = CallSession::new(alice.clone(), bob.clone(), at(0)).unwrap();
        store.create_call(&answered).await.unwrap();
        store.update_call(&answered.id, &bob, &CallPatch::accept(at(5))).await.unwrap();
        store
            .update_call(
                &answered.id,
                &alice,
                &CallPatch::hangup(at(150)).with_usage(3 * 1024 * 1024, 3 * 1024 * 1024),
            )
            .await
            .unwrap();

        // Rejected by alice.
        let rejected = CallSession::new(bob.clone(), alice.clone(), at(200)).unwrap();
        store.create_call(&rejected).await.unwrap();
        store.update_call(&rejected.id, &alice, &CallPatch::reject(at(203))).await.unwrap();

        // Missed: timed out.
        let missed = CallSession::new(bob.clone(), alice.clone(), at(300)).unwrap();
        store.create_call(&missed).await.unwrap();
        store.update_call(&missed.id, &bob, &CallPatch::auto_end(at(315))).await.unwrap();

        // Still ringing, partner without a profile.
        let ongoing = CallSession::new(alice.clone(), ghost.clone(), at(400)).unwrap();
        store.create_call(&ongoing).await.unwrap();

        let log = load_history(&store, &alice, 10).unwrap();
        assert_eq!(log.len(), 4);

        assert_eq!(log[0].call_id, ongoing.id);
        assert_eq!(log[0].outcome, Outcome::Ongoing);
        assert_eq!(log[0].duration, "-");
        assert_eq!(log[0].partner_username, "ghost-uid");
        assert_eq!(log[0].partner_display_name, UNKNOWN_DISPLAY_NAME);

        assert_eq!(log[1].outcome, Outcome::Missed);
        assert_eq!(log[1].direction, Direction::Incoming);
        assert_eq!(log[1].duration, "0:15");

        assert_eq!(log[2].outcome, Outcome::Rejected);
        assert_eq!(log[2].partner_display_name, "Bob");

        assert_eq!(log[3].outcome, Outcome::Answered);
        assert_eq!(log[3].direction, Direction::Outgoing);
        assert_eq!(log[3].duration, "2:30");
        assert_eq!(log[3].traffic_mb, "6.00");

        assert_eq!(load_history(&store, &alice, 1).unwrap().len(), 1);
    }
}
