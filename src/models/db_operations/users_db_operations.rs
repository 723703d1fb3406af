use crate::models::{FollowEntry, Role, User};
use bcrypt::{hash, verify, BcryptError};
use chrono::Utc;
use rusqlite::{params, Connection, Error as RusqliteError, OptionalExtension, Row};

fn bcrypt_to_rusqlite_error(e: BcryptError) -> RusqliteError {
    RusqliteError::ToSqlConversionFailure(Box::new(e))
}

const USER_COLUMNS: &str = "u.id, u.email, u.username, u.confirmed, u.role_id, r.name, \
     r.permissions, u.name, u.location, u.about_me, u.member_since, u.last_seen, \
     u.avatar_big, u.avatar_small";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        confirmed: row.get(3)?,
        role_id: row.get(4)?,
        role_name: row.get(5)?,
        permissions: row.get(6)?,
        name: row.get(7)?,
        location: row.get(8)?,
        about_me: row.get(9)?,
        member_since: row.get(10)?,
        last_seen: row.get(11)?,
        avatar_big: row.get(12)?,
        avatar_small: row.get(13)?,
    })
}

/// Registers a new user. The default role is assigned unless the email is the
/// configured administrator address, which gets the Administrator role.
pub fn create_user(
    conn: &Connection,
    email: &str,
    username: &str,
    password: &str,
    admin_email: &str,
) -> Result<i64, RusqliteError> {
    let hashed_password = hash(password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    let role_id = if email.eq_ignore_ascii_case(admin_email) {
        read_role_by_name(conn, "Administrator")
            .map(|r| r.id)
            .ok_or(RusqliteError::QueryReturnedNoRows)?
    } else {
        default_role_id(conn)?
    };
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (email, username, password_hash, role_id, member_since, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![email, username, hashed_password, role_id, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn default_role_id(conn: &Connection) -> Result<i64, RusqliteError> {
    conn.query_row("SELECT id FROM roles WHERE is_default = 1", [], |row| row.get(0))
}

pub fn read_role_by_name(conn: &Connection, name: &str) -> Option<Role> {
    conn.query_row(
        "SELECT id, name, is_default, permissions FROM roles WHERE name = ?1",
        [name],
        |row| {
            Ok(Role {
                id: row.get(0)?,
                name: row.get(1)?,
                is_default: row.get(2)?,
                permissions: row.get(3)?,
            })
        },
    )
    .ok()
}

pub fn read_user_by_id(conn: &Connection, user_id: i64) -> Option<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users u JOIN roles r ON u.role_id = r.id WHERE u.id = ?1"),
        [user_id],
        user_from_row,
    )
    .ok()
}

pub fn read_user_by_username(conn: &Connection, username: &str) -> Option<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users u JOIN roles r ON u.role_id = r.id WHERE u.username = ?1"),
        [username],
        user_from_row,
    )
    .ok()
}

pub fn read_user_by_email(conn: &Connection, email: &str) -> Option<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users u JOIN roles r ON u.role_id = r.id WHERE u.email = ?1"),
        [email],
        user_from_row,
    )
    .ok()
}

/// Checks an email/password pair. Returns the user on success.
pub fn verify_credentials(conn: &Connection, email: &str, password: &str) -> Option<User> {
    let stored_hash: String = conn
        .query_row("SELECT password_hash FROM users WHERE email = ?1", [email], |row| row.get(0))
        .ok()?;
    if verify(password, &stored_hash).unwrap_or(false) {
        read_user_by_email(conn, email)
    } else {
        None
    }
}

pub fn verify_password(conn: &Connection, user_id: i64, password: &str) -> bool {
    let stored_hash: rusqlite::Result<String> =
        conn.query_row("SELECT password_hash FROM users WHERE id = ?1", [user_id], |row| {
            row.get(0)
        });
    match stored_hash {
        Ok(h) => verify(password, &h).unwrap_or(false),
        Err(_) => false,
    }
}

pub fn update_password(
    conn: &Connection,
    user_id: i64,
    new_password: &str,
) -> Result<(), RusqliteError> {
    let hashed_password =
        hash(new_password, bcrypt::DEFAULT_COST).map_err(bcrypt_to_rusqlite_error)?;
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![hashed_password, user_id],
    )?;
    Ok(())
}

pub fn confirm_user(conn: &Connection, user_id: i64) -> Result<(), RusqliteError> {
    conn.execute("UPDATE users SET confirmed = 1 WHERE id = ?1", [user_id])?;
    Ok(())
}

pub fn update_email(conn: &Connection, user_id: i64, new_email: &str) -> Result<(), RusqliteError> {
    conn.execute("UPDATE users SET email = ?1 WHERE id = ?2", params![new_email, user_id])?;
    Ok(())
}

pub fn update_profile(
    conn: &Connection,
    user_id: i64,
    name: &str,
    location: &str,
    about_me: &str,
) -> Result<(), RusqliteError> {
    conn.execute(
        "UPDATE users SET name = ?1, location = ?2, about_me = ?3 WHERE id = ?4",
        params![name, location, about_me, user_id],
    )?;
    Ok(())
}

pub fn set_avatar(
    conn: &Connection,
    user_id: i64,
    avatar_big: &str,
    avatar_small: &str,
) -> Result<(), RusqliteError> {
    conn.execute(
        "UPDATE users SET avatar_big = ?1, avatar_small = ?2 WHERE id = ?3",
        params![avatar_big, avatar_small, user_id],
    )?;
    Ok(())
}

pub fn touch_last_seen(conn: &Connection, user_id: i64) -> Result<(), RusqliteError> {
    let now = Utc::now().to_rfc3339();
    conn.execute("UPDATE users SET last_seen = ?1 WHERE id = ?2", params![now, user_id])?;
    Ok(())
}

// --- Follow relationships ---

/// Idempotent: following someone twice leaves a single row.
pub fn follow(conn: &Connection, follower_id: i64, followed_id: i64) -> Result<(), RusqliteError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followed_id, created_at) VALUES (?1, ?2, ?3)",
        params![follower_id, followed_id, now],
    )?;
    Ok(())
}

pub fn unfollow(
    conn: &Connection,
    follower_id: i64,
    followed_id: i64,
) -> Result<usize, RusqliteError> {
    conn.execute(
        "DELETE FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
        params![follower_id, followed_id],
    )
}

pub fn is_following(conn: &Connection, follower_id: i64, followed_id: i64) -> bool {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND followed_id = ?2)",
        params![follower_id, followed_id],
        |row| row.get(0),
    )
    .unwrap_or(false)
}

pub fn follower_count(conn: &Connection, user_id: i64) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM follows WHERE followed_id = ?1", [user_id], |row| {
        row.get(0)
    })
    .unwrap_or(0)
}

pub fn followed_count(conn: &Connection, user_id: i64) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM follows WHERE follower_id = ?1", [user_id], |row| {
        row.get(0)
    })
    .unwrap_or(0)
}

/// Users who follow `user_id`, newest first.
pub fn read_followers_page(
    conn: &Connection,
    user_id: i64,
    limit: u32,
    offset: u32,
) -> Result<Vec<FollowEntry>, RusqliteError> {
    let mut stmt = conn.prepare(
        "SELECT u.username, u.avatar_small, f.created_at
         FROM follows f JOIN users u ON f.follower_id = u.id
         WHERE f.followed_id = ?1
         ORDER BY f.created_at DESC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt.query_map(params![user_id, limit, offset], |row| {
        Ok(FollowEntry { username: row.get(0)?, avatar_small: row.get(1)?, since: row.get(2)? })
    })?;
    rows.collect()
}

/// Users whom `user_id` follows, newest first.
pub fn read_followed_page(
    conn: &Connection,
    user_id: i64,
    limit: u32,
    offset: u32,
) -> Result<Vec<FollowEntry>, RusqliteError> {
    let mut stmt = conn.prepare(
        "SELECT u.username, u.avatar_small, f.created_at
         FROM follows f JOIN users u ON f.followed_id = u.id
         WHERE f.follower_id = ?1
         ORDER BY f.created_at DESC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt.query_map(params![user_id, limit, offset], |row| {
        Ok(FollowEntry { username: row.get(0)?, avatar_small: row.get(1)?, since: row.get(2)? })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::permission;
    use crate::setup::db_setup;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        db_setup::setup_database(&mut conn).unwrap();
        conn
    }

    #[test]
    fn password_is_stored_hashed_only() {
        let conn = test_conn();
        create_user(&conn, "cat@example.com", "cat", "hunter2", "admin@example.com").unwrap();

        let stored: String = conn
            .query_row("SELECT password_hash FROM users WHERE username = 'cat'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_ne!(stored, "hunter2");
        assert!(stored.starts_with("$2"));
        assert!(verify_credentials(&conn, "cat@example.com", "hunter2").is_some());
        assert!(verify_credentials(&conn, "cat@example.com", "wrong").is_none());
    }

    #[test]
    fn same_password_gets_different_hashes() {
        let conn = test_conn();
        create_user(&conn, "a@example.com", "a", "samepass", "admin@example.com").unwrap();
        create_user(&conn, "b@example.com", "b", "samepass", "admin@example.com").unwrap();

        let hash_a: String = conn
            .query_row("SELECT password_hash FROM users WHERE username = 'a'", [], |r| r.get(0))
            .unwrap();
        let hash_b: String = conn
            .query_row("SELECT password_hash FROM users WHERE username = 'b'", [], |r| r.get(0))
            .unwrap();
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn registration_assigns_default_role_and_admin_email_promotes() {
        let conn = test_conn();
        create_user(&conn, "plain@example.com", "plain", "pw", "boss@example.com").unwrap();
        create_user(&conn, "boss@example.com", "boss", "pw", "boss@example.com").unwrap();

        let plain = read_user_by_username(&conn, "plain").unwrap();
        assert_eq!(plain.role_name, "User");
        assert!(plain.can(permission::WRITE));
        assert!(!plain.can(permission::MODERATE));

        let boss = read_user_by_username(&conn, "boss").unwrap();
        assert_eq!(boss.role_name, "Administrator");
        assert!(boss.is_administrator());
    }

    #[test]
    fn follow_is_idempotent_and_reversible() {
        let conn = test_conn();
        let a = create_user(&conn, "a@example.com", "a", "pw", "x@example.com").unwrap();
        let b = create_user(&conn, "b@example.com", "b", "pw", "x@example.com").unwrap();

        follow(&conn, a, b).unwrap();
        follow(&conn, a, b).unwrap();
        assert!(is_following(&conn, a, b));
        assert!(!is_following(&conn, b, a));
        assert_eq!(follower_count(&conn, b), 1);
        assert_eq!(followed_count(&conn, a), 1);

        let followers = read_followers_page(&conn, b, 10, 0).unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].username, "a");

        unfollow(&conn, a, b).unwrap();
        assert!(!is_following(&conn, a, b));
        assert_eq!(follower_count(&conn, b), 0);
    }

    #[test]
    fn email_change_and_confirmation_flags_persist() {
        let conn = test_conn();
        let id = create_user(&conn, "old@example.com", "u", "pw", "x@example.com").unwrap();
        assert!(!read_user_by_id(&conn, id).unwrap().confirmed);

        confirm_user(&conn, id).unwrap();
        assert!(read_user_by_id(&conn, id).unwrap().confirmed);

        update_email(&conn, id, "new@example.com").unwrap();
        assert!(read_user_by_email(&conn, "new@example.com").is_some());
        assert!(read_user_by_email(&conn, "old@example.com").is_none());
    }
}
