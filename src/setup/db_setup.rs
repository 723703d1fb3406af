use crate::models::permission;
use rusqlite::{params, Connection, Result as RusqliteResult, Transaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("Bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

/// Creates the full schema and seeds the built-in roles. Safe to re-run.
pub fn setup_database(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS roles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            is_default INTEGER NOT NULL DEFAULT 0,
            permissions INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role_id INTEGER NOT NULL,
            confirmed INTEGER NOT NULL DEFAULT 0,
            name TEXT,
            location TEXT,
            about_me TEXT,
            member_since TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            avatar_big TEXT,
            avatar_small TEXT,
            FOREIGN KEY (role_id) REFERENCES roles(id)
        );
        CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
        CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            body_html TEXT NOT NULL,
            abstract TEXT NOT NULL,
            created_at TEXT NOT NULL,
            author_id INTEGER NOT NULL,
            FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id);
        CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);

        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            body TEXT NOT NULL,
            body_html TEXT NOT NULL,
            created_at TEXT NOT NULL,
            disabled INTEGER NOT NULL DEFAULT 0,
            author_id INTEGER NOT NULL,
            post_id INTEGER NOT NULL,
            FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);

        CREATE TABLE IF NOT EXISTS follows (
            follower_id INTEGER NOT NULL,
            followed_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (follower_id, followed_id),
            FOREIGN KEY (follower_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (followed_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS views (
            user_id INTEGER NOT NULL,
            post_id INTEGER NOT NULL,
            PRIMARY KEY (user_id, post_id),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS post_likes (
            user_id INTEGER NOT NULL,
            post_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (user_id, post_id),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (post_id) REFERENCES posts(id) ON DELETE CASCADE
        );",
    )?;

    seed_roles(&tx)?;
    tx.commit()?;
    Ok(())
}

/// Inserts the three built-in roles, updating the masks if they changed.
fn seed_roles(tx: &Transaction) -> RusqliteResult<()> {
    let user_mask =
        permission::FOLLOW | permission::COMMENT | permission::WRITE | permission::LIKE;
    let moderator_mask = user_mask | permission::MODERATE;
    let admin_mask = moderator_mask | permission::ADMIN;

    let roles: [(&str, bool, u32); 3] = [
        ("User", true, user_mask),
        ("Moderator", false, moderator_mask),
        ("Administrator", false, admin_mask),
    ];

    for (name, is_default, mask) in roles {
        tx.execute(
            "INSERT INTO roles (name, is_default, permissions) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET is_default = ?2, permissions = ?3",
            params![name, is_default, mask],
        )?;
    }
    Ok(())
}

/// Creates a confirmed administrator account. Used by the setup CLI.
pub fn create_admin_user(
    conn: &Connection,
    email: &str,
    username: &str,
    password: &str,
) -> Result<(), SetupError> {
    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (email, username, password_hash, role_id, confirmed, member_since, last_seen)
         SELECT ?1, ?2, ?3, id, 1, ?4, ?4 FROM roles WHERE name = 'Administrator'",
        params![email, username, hashed_password, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::permission;

    #[test]
    fn setup_is_idempotent_and_seeds_roles() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&mut conn).unwrap();
        setup_database(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);

        let (is_default, mask): (bool, u32) = conn
            .query_row(
                "SELECT is_default, permissions FROM roles WHERE name = 'User'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(is_default);
        assert!(mask & permission::WRITE == permission::WRITE);
        assert!(mask & permission::MODERATE == 0);
    }

    #[test]
    fn admin_user_gets_administrator_role() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&mut conn).unwrap();
        create_admin_user(&conn, "admin@example.com", "admin", "s3cret").unwrap();

        let mask: u32 = conn
            .query_row(
                "SELECT r.permissions FROM users u JOIN roles r ON u.role_id = r.id
                 WHERE u.username = 'admin'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(mask & permission::ADMIN == permission::ADMIN);
    }
}
