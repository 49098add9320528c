//! Friend requests and the symmetric friendship relation.
//!
//! A request is keyed by the (sender, recipient) pair. Sending twice
//! withdraws the pending request; accepting writes the relation on both
//! profiles in the same transaction as the status change.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use twoplace_shared::{FriendRequest, FriendRequestStatus, RequestId, UserId, UserProfile};

use crate::database::{conversion_error, format_ts, parse_ts, Database};
use crate::error::{Result, StoreError};

const REQUEST_COLUMNS: &str = "id, from_uid, from_name, to_uid, to_name, status, sent_at";

impl Database {
    /// Send a friend request, or withdraw it if one from `from` to `to`
    /// already exists. Returns the created request, `None` on withdrawal.
    pub fn toggle_friend_request(&self, from: &UserId, to: &UserId) -> Result<Option<FriendRequest>> {
        if from == to {
            return Err(StoreError::Conflict("cannot send a friend request to yourself".into()));
        }

        let id = RequestId::for_pair(from, to);
        if self.get_friend_request(&id)?.is_some() {
            self.conn().execute(
                "DELETE FROM friend_requests WHERE id = ?1",
                params![id.0],
            )?;
            tracing::debug!(request = %id, "friend request withdrawn");
            return Ok(None);
        }

        let sender = self.get_user(from)?;
        let recipient = self.get_user(to)?;
        if sender.friends.contains(to) {
            return Err(StoreError::Conflict("already friends".into()));
        }

        let request = FriendRequest {
            id,
            from_uid: from.clone(),
            from_name: sender.display_name,
            to_uid: to.clone(),
            to_name: recipient.display_name,
            status: FriendRequestStatus::Pending,
            sent_at: Utc::now(),
        };
        self.conn().execute(
            &format!("INSERT INTO friend_requests ({REQUEST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                request.id.0,
                request.from_uid.as_str(),
                request.from_name,
                request.to_uid.as_str(),
                request.to_name,
                request.status.as_str(),
                format_ts(&request.sent_at),
            ],
        )?;
        tracing::debug!(request = %request.id, "friend request sent");
        Ok(Some(request))
    }

    pub fn get_friend_request(&self, id: &RequestId) -> Result<Option<FriendRequest>> {
        self.conn()
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM friend_requests WHERE id = ?1"),
                params![id.0],
                row_to_request,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    /// Requests waiting for `uid` to answer, oldest first.
    pub fn pending_requests_for(&self, uid: &UserId) -> Result<Vec<FriendRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM friend_requests
             WHERE to_uid = ?1 AND status = 'pending'
             ORDER BY sent_at ASC"
        ))?;
        let rows = stmt.query_map(params![uid.as_str()], row_to_request)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Accept a pending request addressed to `acting`.
    pub fn accept_friend_request(&mut self, id: &RequestId, acting: &UserId) -> Result<FriendRequest> {
        let mut request = self.pending_request_for(id, acting)?;
        let now = format_ts(&Utc::now());

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "UPDATE friend_requests SET status = 'accepted' WHERE id = ?1",
            params![id.0],
        )?;
        for (user, friend) in [
            (&request.from_uid, &request.to_uid),
            (&request.to_uid, &request.from_uid),
        ] {
            tx.execute(
                "INSERT OR IGNORE INTO friends (user_uid, friend_uid, created_at) VALUES (?1, ?2, ?3)",
                params![user.as_str(), friend.as_str(), now],
            )?;
        }
        tx.commit()?;

        request.status = FriendRequestStatus::Accepted;
        tracing::info!(request = %id, "friend request accepted");
        Ok(request)
    }

    /// Reject a pending request addressed to `acting`. The request is kept
    /// with status `rejected`.
    pub fn reject_friend_request(&self, id: &RequestId, acting: &UserId) -> Result<FriendRequest> {
        let mut request = self.pending_request_for(id, acting)?;
        self.conn().execute(
            "UPDATE friend_requests SET status = 'rejected' WHERE id = ?1",
            params![id.0],
        )?;
        request.status = FriendRequestStatus::Rejected;
        tracing::debug!(request = %id, "friend request rejected");
        Ok(request)
    }

    /// Remove the friendship in both directions along with any request
    /// between the two users. Returns `true` if they were friends.
    pub fn remove_friend(&mut self, user: &UserId, friend: &UserId) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        let removed = tx.execute(
            "DELETE FROM friends
             WHERE (user_uid = ?1 AND friend_uid = ?2) OR (user_uid = ?2 AND friend_uid = ?1)",
            params![user.as_str(), friend.as_str()],
        )?;
        tx.execute(
            "DELETE FROM friend_requests WHERE id IN (?1, ?2)",
            params![
                RequestId::for_pair(user, friend).0,
                RequestId::for_pair(friend, user).0
            ],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Profiles of everyone `uid` is friends with, ordered by username.
    pub fn friends_of(&self, uid: &UserId) -> Result<Vec<UserProfile>> {
        let mut profiles = Vec::new();
        for friend in self.friend_ids(uid)? {
            match self.get_user(&friend) {
                Ok(profile) => profiles.push(profile),
                // Dangling relation: the other profile is gone.
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        profiles.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(profiles)
    }

    fn pending_request_for(&self, id: &RequestId, acting: &UserId) -> Result<FriendRequest> {
        let request = self.get_friend_request(id)?.ok_or(StoreError::NotFound)?;
        if request.to_uid != *acting {
            return Err(StoreError::Forbidden(
                "only the recipient can answer a friend request".into(),
            ));
        }
        if request.status != FriendRequestStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "request is already {}",
                request.status.as_str()
            )));
        }
        Ok(request)
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequest> {
    let id: String = row.get(0)?;
    let from_uid: String = row.get(1)?;
    let from_name: String = row.get(2)?;
    let to_uid: String = row.get(3)?;
    let to_name: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let sent_str: String = row.get(6)?;

    let status = FriendRequestStatus::parse(&status_str).ok_or_else(|| {
        conversion_error(
            5,
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("unknown status {status_str}")),
        )
    })?;

    Ok(FriendRequest {
        id: RequestId(id),
        from_uid: UserId(from_uid),
        from_name,
        to_uid: UserId(to_uid),
        to_name,
        status,
        sent_at: parse_ts(6, &sent_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, UserProfile, UserProfile) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user_if_absent("alice", "Alice").unwrap();
        let bob = db.create_user_if_absent("bob", "Bob").unwrap();
        (db, alice, bob)
    }

    #[test]
    fn toggle_sends_then_withdraws() {
        let (db, alice, bob) = setup();

        let sent = db.toggle_friend_request(&alice.uid, &bob.uid).unwrap().unwrap();
        assert_eq!(sent.status, FriendRequestStatus::Pending);
        assert_eq!(sent.to_name, "Bob");
        assert_eq!(db.pending_requests_for(&bob.uid).unwrap().len(), 1);

        assert!(db.toggle_friend_request(&alice.uid, &bob.uid).unwrap().is_none());
        assert!(db.pending_requests_for(&bob.uid).unwrap().is_empty());
    }

    #[test]
    fn accept_makes_friendship_symmetric() {
        let (mut db, alice, bob) = setup();
        let sent = db.toggle_friend_request(&alice.uid, &bob.uid).unwrap().unwrap();

        let accepted = db.accept_friend_request(&sent.id, &bob.uid).unwrap();
        assert_eq!(accepted.status, FriendRequestStatus::Accepted);

        assert!(db.get_user(&alice.uid).unwrap().friends.contains(&bob.uid));
        assert!(db.get_user(&bob.uid).unwrap().friends.contains(&alice.uid));
        assert_eq!(db.friends_of(&alice.uid).unwrap()[0].username, "bob");

        // Answering twice is a conflict.
        assert!(matches!(
            db.accept_friend_request(&sent.id, &bob.uid),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn only_recipient_may_answer() {
        let (mut db, alice, bob) = setup();
        let sent = db.toggle_friend_request(&alice.uid, &bob.uid).unwrap().unwrap();
        assert!(matches!(
            db.accept_friend_request(&sent.id, &alice.uid),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn reject_is_retained() {
        let (db, alice, bob) = setup();
        let sent = db.toggle_friend_request(&alice.uid, &bob.uid).unwrap().unwrap();

        db.reject_friend_request(&sent.id, &bob.uid).unwrap();
        let stored = db.get_friend_request(&sent.id).unwrap().unwrap();
        assert_eq!(stored.status, FriendRequestStatus::Rejected);
        assert!(db.get_user(&bob.uid).unwrap().friends.is_empty());
    }

    #[test]
    fn remove_clears_both_sides_and_requests() {
        let (mut db, alice, bob) = setup();
        let sent = db.toggle_friend_request(&alice.uid, &bob.uid).unwrap().unwrap();
        db.accept_friend_request(&sent.id, &bob.uid).unwrap();

        assert!(db.remove_friend(&bob.uid, &alice.uid).unwrap());
        assert!(db.friends_of(&alice.uid).unwrap().is_empty());
        assert!(db.friends_of(&bob.uid).unwrap().is_empty());
        assert!(db.get_friend_request(&sent.id).unwrap().is_none());
        assert!(!db.remove_friend(&bob.uid, &alice.uid).unwrap());
    }

    #[test]
    fn self_request_refused() {
        let (db, alice, _) = setup();
        assert!(matches!(
            db.toggle_friend_request(&alice.uid, &alice.uid),
            Err(StoreError::Conflict(_))
        ));
    }
}
