//! CRUD operations for [`UserProfile`] records.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use twoplace_shared::{UserId, UserProfile};

use crate::database::{format_ts, not_found, parse_ts, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a new profile. Usernames are unique.
    pub fn create_user(&self, profile: &UserProfile) -> Result<()> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO users (uid, username, display_name, photo_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                profile.uid.as_str(),
                profile.username,
                profile.display_name,
                profile.photo_url,
                format_ts(&profile.created_at),
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    /// Return the profile registered under `username`, creating it first if
    /// nobody holds that name yet.
    pub fn create_user_if_absent(&self, username: &str, display_name: &str) -> Result<UserProfile> {
        if let Some(existing) = self.find_user_by_username(username)? {
            return Ok(existing);
        }

        let profile = UserProfile {
            uid: UserId::generate(),
            username: username.to_string(),
            display_name: display_name.to_string(),
            photo_url: None,
            friends: BTreeSet::new(),
            created_at: Utc::now(),
        };
        self.create_user(&profile)?;
        tracing::info!(uid = %profile.uid.short(), username, "registered user");
        Ok(profile)
    }

    /// Fetch a profile (with its friend set) by uid.
    pub fn get_user(&self, uid: &UserId) -> Result<UserProfile> {
        let mut profile = self
            .conn()
            .query_row(
                "SELECT uid, username, display_name, photo_url, created_at
                 FROM users WHERE uid = ?1",
                params![uid.as_str()],
                row_to_user,
            )
            .map_err(not_found)?;
        profile.friends = self.friend_ids(uid)?;
        Ok(profile)
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let uid: Option<String> = self
            .conn()
            .query_row(
                "SELECT uid FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        uid.map(|uid| self.get_user(&UserId(uid))).transpose()
    }

    /// Users whose username starts with `prefix` (case-insensitive),
    /// excluding `exclude`.
    pub fn search_users(&self, prefix: &str, exclude: &UserId, limit: u32) -> Result<Vec<UserProfile>> {
        let pattern = format!("{}%", escape_like(&prefix.to_lowercase()));
        let mut stmt = self.conn().prepare(
            "SELECT uid, username, display_name, photo_url, created_at
             FROM users
             WHERE lower(username) LIKE ?1 ESCAPE '\\' AND uid != ?2
             ORDER BY username ASC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![pattern, exclude.as_str(), limit], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            let mut user = row?;
            user.friends = self.friend_ids(&user.uid)?;
            users.push(user);
        }
        Ok(users)
    }

    /// Change display attributes. Returns `true` if the profile exists.
    pub fn update_profile(
        &self,
        uid: &UserId,
        display_name: &str,
        photo_url: Option<&str>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET display_name = ?2, photo_url = ?3 WHERE uid = ?1",
            params![uid.as_str(), display_name, photo_url],
        )?;
        Ok(affected > 0)
    }

    pub(crate) fn friend_ids(&self, uid: &UserId) -> Result<BTreeSet<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT friend_uid FROM friends WHERE user_uid = ?1")?;
        let rows = stmt.query_map(params![uid.as_str()], |row| row.get::<_, String>(0))?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(UserId(row?));
        }
        Ok(ids)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Map a `rusqlite::Row` to a [`UserProfile`] with an empty friend set.
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let uid: String = row.get(0)?;
    let username: String = row.get(1)?;
    let display_name: String = row.get(2)?;
    let photo_url: Option<String> = row.get(3)?;
    let created_str: String = row.get(4)?;

    Ok(UserProfile {
        uid: UserId(uid),
        username,
        display_name,
        photo_url,
        friends: BTreeSet::new(),
        created_at: parse_ts(4, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_per_username() {
        let db = Database::open_in_memory().unwrap();
        let first = db.create_user_if_absent("alice", "Alice").unwrap();
        let second = db.create_user_if_absent("alice", "Someone else").unwrap();
        assert_eq!(first.uid, second.uid);
        assert_eq!(second.display_name, "Alice");
    }

    #[test]
    fn duplicate_username_rejected() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user_if_absent("alice", "Alice").unwrap();
        let clash = UserProfile {
            uid: UserId::generate(),
            ..alice
        };
        assert!(matches!(db.create_user(&clash), Err(StoreError::AlreadyExists)));
    }

    #[test]
    fn search_by_prefix_excludes_self() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user_if_absent("alice", "Alice").unwrap();
        db.create_user_if_absent("alina", "Alina").unwrap();
        db.create_user_if_absent("bob", "Bob").unwrap();
        db.create_user_if_absent("al_x", "Underscore").unwrap();

        let found = db.search_users("AL", &alice.uid, 10).unwrap();
        let names: Vec<_> = found.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["al_x", "alina"]);

        // '_' is matched literally, not as a wildcard.
        let found = db.search_users("al_", &alice.uid, 10).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn update_profile_fields() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user_if_absent("alice", "Alice").unwrap();
        assert!(db.update_profile(&alice.uid, "Alice A.", Some("https://example.org/a.png")).unwrap());

        let loaded = db.get_user(&alice.uid).unwrap();
        assert_eq!(loaded.display_name, "Alice A.");
        assert_eq!(loaded.photo_url.as_deref(), Some("https://example.org/a.png"));
        assert!(matches!(db.get_user(&UserId::from("nobody")), Err(StoreError::NotFound)));
    }
}
