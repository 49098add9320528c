//! CRUD operations for [`CallSession`] documents and their candidate
//! subcollections.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use twoplace_shared::{
    CallId, CallPatch, CallSession, IceCandidate, PatchError, PatchOutcome, Role,
    SessionDescription, UserId,
};

use crate::database::{conversion_error, format_ts, not_found, parse_ts, Database};
use crate::error::{Result, StoreError};

const CALL_COLUMNS: &str = "id, caller_uid, callee_uid, started_at, accepted, accepted_at, \
     offer, answer, ended_at, was_auto_ended, bytes_sent, bytes_received, sleep_timer_minutes";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new call document.
    pub fn create_call(&self, call: &CallSession) -> Result<()> {
        call.validate()?;

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO calls (id, caller_uid, callee_uid, started_at, accepted,
                 accepted_at, offer, answer, ended_at, was_auto_ended, bytes_sent,
                 bytes_received, sleep_timer_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                call.id.to_string(),
                call.caller_uid.as_str(),
                call.callee_uid.as_str(),
                format_ts(&call.started_at),
                call.accepted,
                call.accepted_at.as_ref().map(format_ts),
                encode_description(call.offer.as_ref())?,
                encode_description(call.answer.as_ref())?,
                call.ended_at.as_ref().map(format_ts),
                call.was_auto_ended,
                call.bytes_sent.map(|b| b as i64),
                call.bytes_received.map(|b| b as i64),
                call.sleep_timer_minutes,
            ],
        )?;

        if inserted == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single call by id.
    pub fn get_call(&self, id: &CallId) -> Result<CallSession> {
        let call = self
            .conn()
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
                params![id.to_string()],
                row_to_call,
            )
            .map_err(not_found)?;
        call.validate()?;
        Ok(call)
    }

    /// Calls ringing for `callee`: not accepted and not ended, oldest first.
    pub fn open_calls_for_callee(&self, callee: &UserId) -> Result<Vec<CallSession>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM calls
             WHERE callee_uid = ?1 AND accepted = 0 AND ended_at IS NULL
             ORDER BY started_at ASC"
        ))?;
        let rows = stmt.query_map(params![callee.as_str()], row_to_call)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Every call `user` took part in, newest first.
    pub fn calls_for_user(&self, user: &UserId, limit: u32) -> Result<Vec<CallSession>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM calls
             WHERE caller_uid = ?1 OR callee_uid = ?1
             ORDER BY started_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user.as_str(), limit], row_to_call)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply `patch` to a call on behalf of `writer`.
    ///
    /// Read-modify-write inside one transaction, so two processes racing on
    /// the same document serialize and the second one sees the first one's
    /// result (e.g. an accept arriving after a reject is refused).
    pub fn update_call(
        &mut self,
        id: &CallId,
        writer: &UserId,
        patch: &CallPatch,
    ) -> Result<(PatchOutcome, CallSession)> {
        let tx = self.conn_mut().transaction()?;

        let mut call = tx
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
                params![id.to_string()],
                row_to_call,
            )
            .map_err(not_found)?;

        let outcome = call.apply(writer, patch)?;
        if outcome == PatchOutcome::Applied {
            tx.execute(
                "UPDATE calls SET accepted = ?2, accepted_at = ?3, offer = ?4, answer = ?5,
                     ended_at = ?6, was_auto_ended = ?7, bytes_sent = ?8, bytes_received = ?9,
                     sleep_timer_minutes = ?10
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    call.accepted,
                    call.accepted_at.as_ref().map(format_ts),
                    encode_description(call.offer.as_ref())?,
                    encode_description(call.answer.as_ref())?,
                    call.ended_at.as_ref().map(format_ts),
                    call.was_auto_ended,
                    call.bytes_sent.map(|b| b as i64),
                    call.bytes_received.map(|b| b as i64),
                    call.sleep_timer_minutes,
                ],
            )?;
        }
        tx.commit()?;

        Ok((outcome, call))
    }

    // ------------------------------------------------------------------
    // Candidates
    // ------------------------------------------------------------------

    /// Append a candidate to the `role` subcollection. Returns its sequence
    /// number.
    pub fn add_candidate(
        &self,
        id: &CallId,
        writer: &UserId,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<i64> {
        let participants: Option<(String, String)> = self
            .conn()
            .query_row(
                "SELECT caller_uid, callee_uid FROM calls WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (caller, callee) = participants.ok_or(StoreError::NotFound)?;

        let writer_role = if writer.as_str() == caller {
            Role::Caller
        } else if writer.as_str() == callee {
            Role::Callee
        } else {
            return Err(PatchError::NotParticipant.into());
        };
        if writer_role != role {
            return Err(PatchError::RoleViolation(role.as_str(), role.candidates_collection()).into());
        }

        self.conn().execute(
            "INSERT INTO call_candidates (call_id, role, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.to_string(),
                role.as_str(),
                serde_json::to_string(candidate)?,
                format_ts(&Utc::now()),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Candidates of the `role` subcollection with a sequence number above
    /// `after`, in contribution order.
    pub fn candidates_since(
        &self,
        id: &CallId,
        role: Role,
        after: i64,
    ) -> Result<Vec<(i64, IceCandidate)>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, payload FROM call_candidates
             WHERE call_id = ?1 AND role = ?2 AND seq > ?3
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string(), role.as_str(), after], |row| {
            let seq: i64 = row.get(0)?;
            let payload: String = row.get(1)?;
            let candidate: IceCandidate =
                serde_json::from_str(&payload).map_err(|e| conversion_error(1, e))?;
            Ok((seq, candidate))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn encode_description(desc: Option<&SessionDescription>) -> Result<Option<String>> {
    desc.map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::Json)
}

fn decode_description(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<SessionDescription>> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| conversion_error(idx, e))
}

/// Map a `rusqlite::Row` selected with [`CALL_COLUMNS`] to a [`CallSession`].
fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallSession> {
    let id_str: String = row.get(0)?;
    let caller: String = row.get(1)?;
    let callee: String = row.get(2)?;
    let started_str: String = row.get(3)?;
    let accepted: bool = row.get(4)?;
    let accepted_str: Option<String> = row.get(5)?;
    let offer: Option<String> = row.get(6)?;
    let answer: Option<String> = row.get(7)?;
    let ended_str: Option<String> = row.get(8)?;
    let was_auto_ended: Option<bool> = row.get(9)?;
    let bytes_sent: Option<i64> = row.get(10)?;
    let bytes_received: Option<i64> = row.get(11)?;
    let sleep_timer_minutes: Option<u32> = row.get(12)?;

    let id = CallId::parse(&id_str).map_err(|e| conversion_error(0, e))?;

    Ok(CallSession {
        id,
        caller_uid: UserId(caller),
        callee_uid: UserId(callee),
        started_at: parse_ts(3, &started_str)?,
        accepted,
        accepted_at: accepted_str.map(|s| parse_ts(5, &s)).transpose()?,
        offer: decode_description(6, offer)?,
        answer: decode_description(7, answer)?,
        ended_at: ended_str.map(|s| parse_ts(8, &s)).transpose()?,
        was_auto_ended,
        bytes_sent: bytes_sent.map(|b| b.max(0) as u64),
        bytes_received: bytes_received.map(|b| b.max(0) as u64),
        sleep_timer_minutes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        UserId::from("alice")
    }

    fn bob() -> UserId {
        UserId::from("bob")
    }

    fn new_call(db: &Database) -> CallSession {
        let call = CallSession::new(alice(), bob(), Utc::now()).unwrap();
        db.create_call(&call).unwrap();
        call
    }

    #[test]
    fn create_and_get() {
        let db = Database::open_in_memory().unwrap();
        let call = new_call(&db);

        let loaded = db.get_call(&call.id).unwrap();
        assert_eq!(loaded, call);
        assert!(matches!(db.create_call(&call), Err(StoreError::AlreadyExists)));
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_call(&CallId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn update_persists_descriptions() {
        let mut db = Database::open_in_memory().unwrap();
        let call = new_call(&db);

        let offer = SessionDescription::offer("v=0 offer");
        let (outcome, updated) = db
            .update_call(&call.id, &alice(), &CallPatch::offer(offer.clone()))
            .unwrap();
        assert_eq!(outcome, PatchOutcome::Applied);
        assert_eq!(updated.offer, Some(offer.clone()));
        assert_eq!(db.get_call(&call.id).unwrap().offer, Some(offer));
    }

    #[test]
    fn ended_call_refuses_further_writes() {
        let mut db = Database::open_in_memory().unwrap();
        let call = new_call(&db);
        let end = CallPatch::reject(Utc::now());

        db.update_call(&call.id, &bob(), &end).unwrap();
        let (outcome, _) = db.update_call(&call.id, &bob(), &end).unwrap();
        assert_eq!(outcome, PatchOutcome::Unchanged);

        let err = db
            .update_call(&call.id, &bob(), &CallPatch::accept(Utc::now()))
            .unwrap_err();
        assert!(err.is_terminal());
        assert!(!db.get_call(&call.id).unwrap().accepted);
    }

    #[test]
    fn candidates_keep_contribution_order() {
        let db = Database::open_in_memory().unwrap();
        let call = new_call(&db);

        for i in 0..3 {
            db.add_candidate(&call.id, &alice(), Role::Caller, &IceCandidate::new(format!("c{i}")))
                .unwrap();
        }
        db.add_candidate(&call.id, &bob(), Role::Callee, &IceCandidate::new("b0"))
            .unwrap();

        let caller = db.candidates_since(&call.id, Role::Caller, 0).unwrap();
        let names: Vec<_> = caller.iter().map(|(_, c)| c.candidate.as_str()).collect();
        assert_eq!(names, vec!["c0", "c1", "c2"]);

        let after_first = db.candidates_since(&call.id, Role::Caller, caller[0].0).unwrap();
        assert_eq!(after_first.len(), 2);
        assert_eq!(db.candidates_since(&call.id, Role::Callee, 0).unwrap().len(), 1);
    }

    #[test]
    fn candidates_respect_roles() {
        let db = Database::open_in_memory().unwrap();
        let call = new_call(&db);

        let err = db
            .add_candidate(&call.id, &bob(), Role::Caller, &IceCandidate::new("x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Refused(PatchError::RoleViolation(..))));

        let err = db
            .add_candidate(&call.id, &UserId::from("eve"), Role::Caller, &IceCandidate::new("x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Refused(PatchError::NotParticipant)));
    }

    #[test]
    fn open_calls_and_history() {
        let mut db = Database::open_in_memory().unwrap();
        let first = new_call(&db);
        let second =
            CallSession::new(alice(), bob(), first.started_at + chrono::Duration::seconds(5)).unwrap();
        db.create_call(&second).unwrap();

        db.update_call(&first.id, &bob(), &CallPatch::accept(Utc::now()))
            .unwrap();

        let open = db.open_calls_for_callee(&bob()).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second.id);
        assert!(db.open_calls_for_callee(&alice()).unwrap().is_empty());

        let history = db.calls_for_user(&alice(), 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
    }
}
