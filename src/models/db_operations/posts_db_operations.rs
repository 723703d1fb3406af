use crate::models::{Comment, Post};
use chrono::Utc;
use rusqlite::{params, Connection, Error as RusqliteError, Row};

const POST_COLUMNS: &str = "p.id, p.title, p.body, p.body_html, p.abstract, p.created_at, \
     p.author_id, u.username, u.avatar_small, \
     (SELECT COUNT(*) FROM views v WHERE v.post_id = p.id), \
     (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id), \
     (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id AND c.disabled = 0)";

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        body_html: row.get(3)?,
        abstract_text: row.get(4)?,
        created_at: row.get(5)?,
        author_id: row.get(6)?,
        author_username: row.get(7)?,
        author_avatar: row.get(8)?,
        view_count: row.get(9)?,
        like_count: row.get(10)?,
        comment_count: row.get(11)?,
    })
}

pub fn create_post(
    conn: &Connection,
    author_id: i64,
    title: &str,
    body: &str,
    body_html: &str,
    abstract_text: &str,
) -> Result<i64, RusqliteError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO posts (title, body, body_html, abstract, created_at, author_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![title, body, body_html, abstract_text, now, author_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_post(
    conn: &Connection,
    post_id: i64,
    title: &str,
    body: &str,
    body_html: &str,
    abstract_text: &str,
) -> Result<(), RusqliteError> {
    conn.execute(
        "UPDATE posts SET title = ?1, body = ?2, body_html = ?3, abstract = ?4 WHERE id = ?5",
        params![title, body, body_html, abstract_text, post_id],
    )?;
    Ok(())
}

pub fn read_post(conn: &Connection, post_id: i64) -> Option<Post> {
    conn.query_row(
        &format!("SELECT {POST_COLUMNS} FROM posts p JOIN users u ON p.author_id = u.id WHERE p.id = ?1"),
        [post_id],
        post_from_row,
    )
    .ok()
}

pub fn count_posts(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0)).unwrap_or(0)
}

/// All posts, newest first.
pub fn read_posts_page(
    conn: &Connection,
    limit: u32,
    offset: u32,
) -> Result<Vec<Post>, RusqliteError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON p.author_id = u.id
         ORDER BY p.created_at DESC, p.id DESC LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt.query_map(params![limit, offset], post_from_row)?;
    rows.collect()
}

pub fn count_posts_by_author(conn: &Connection, author_id: i64) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM posts WHERE author_id = ?1", [author_id], |row| {
        row.get(0)
    })
    .unwrap_or(0)
}

pub fn read_posts_by_author_page(
    conn: &Connection,
    author_id: i64,
    limit: u32,
    offset: u32,
) -> Result<Vec<Post>, RusqliteError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON p.author_id = u.id
         WHERE p.author_id = ?1
         ORDER BY p.created_at DESC, p.id DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![author_id, limit, offset], post_from_row)?;
    rows.collect()
}

pub fn count_followed_posts(conn: &Connection, user_id: i64) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM posts p
         WHERE p.author_id = ?1
            OR p.author_id IN (SELECT followed_id FROM follows WHERE follower_id = ?1)",
        [user_id],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Posts by followed authors plus the user's own, newest first.
pub fn read_followed_posts_page(
    conn: &Connection,
    user_id: i64,
    limit: u32,
    offset: u32,
) -> Result<Vec<Post>, RusqliteError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON p.author_id = u.id
         WHERE p.author_id = ?1
            OR p.author_id IN (SELECT followed_id FROM follows WHERE follower_id = ?1)
         ORDER BY p.created_at DESC, p.id DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![user_id, limit, offset], post_from_row)?;
    rows.collect()
}

// --- Comments ---

const COMMENT_COLUMNS: &str = "c.id, c.body, c.body_html, c.created_at, c.disabled, \
     c.author_id, u.username, u.avatar_small, c.post_id";

fn comment_from_row(row: &Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        body: row.get(1)?,
        body_html: row.get(2)?,
        created_at: row.get(3)?,
        disabled: row.get(4)?,
        author_id: row.get(5)?,
        author_username: row.get(6)?,
        author_avatar: row.get(7)?,
        post_id: row.get(8)?,
    })
}

pub fn create_comment(
    conn: &Connection,
    post_id: i64,
    author_id: i64,
    body: &str,
    body_html: &str,
) -> Result<i64, RusqliteError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO comments (body, body_html, created_at, author_id, post_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![body, body_html, now, author_id, post_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn count_comments(conn: &Connection, post_id: i64) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM comments WHERE post_id = ?1", [post_id], |row| {
        row.get(0)
    })
    .unwrap_or(0)
}

/// Comments on one post, oldest first. Disabled comments are included; the
/// template hides their body for readers without the moderate permission.
pub fn read_comments_page(
    conn: &Connection,
    post_id: i64,
    limit: u32,
    offset: u32,
) -> Result<Vec<Comment>, RusqliteError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments c JOIN users u ON c.author_id = u.id
         WHERE c.post_id = ?1
         ORDER BY c.created_at ASC, c.id ASC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![post_id, limit, offset], comment_from_row)?;
    rows.collect()
}

pub fn count_all_comments(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM comments", [], |row| row.get(0)).unwrap_or(0)
}

/// Moderation queue: every comment on the site, newest first.
pub fn read_all_comments_page(
    conn: &Connection,
    limit: u32,
    offset: u32,
) -> Result<Vec<Comment>, RusqliteError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments c JOIN users u ON c.author_id = u.id
         ORDER BY c.created_at DESC, c.id DESC LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt.query_map(params![limit, offset], comment_from_row)?;
    rows.collect()
}

pub fn set_comment_disabled(
    conn: &Connection,
    comment_id: i64,
    disabled: bool,
) -> Result<usize, RusqliteError> {
    conn.execute(
        "UPDATE comments SET disabled = ?1 WHERE id = ?2",
        params![disabled, comment_id],
    )
}

pub fn read_comment(conn: &Connection, comment_id: i64) -> Option<Comment> {
    conn.query_row(
        &format!("SELECT {COMMENT_COLUMNS} FROM comments c JOIN users u ON c.author_id = u.id WHERE c.id = ?1"),
        [comment_id],
        comment_from_row,
    )
    .ok()
}

// --- Views and likes ---

/// Records that a user has seen a post. Idempotent per (user, post).
pub fn record_view(conn: &Connection, user_id: i64, post_id: i64) -> Result<(), RusqliteError> {
    conn.execute(
        "INSERT OR IGNORE INTO views (user_id, post_id) VALUES (?1, ?2)",
        params![user_id, post_id],
    )?;
    Ok(())
}

/// Idempotent per (user, post).
pub fn like_post(conn: &Connection, user_id: i64, post_id: i64) -> Result<(), RusqliteError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO post_likes (user_id, post_id, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, post_id, now],
    )?;
    Ok(())
}

pub fn unlike_post(conn: &Connection, user_id: i64, post_id: i64) -> Result<usize, RusqliteError> {
    conn.execute(
        "DELETE FROM post_likes WHERE user_id = ?1 AND post_id = ?2",
        params![user_id, post_id],
    )
}

pub fn has_liked(conn: &Connection, user_id: i64, post_id: i64) -> bool {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM post_likes WHERE user_id = ?1 AND post_id = ?2)",
        params![user_id, post_id],
        |row| row.get(0),
    )
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::users_db_operations;
    use crate::setup::db_setup;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        db_setup::setup_database(&mut conn).unwrap();
        conn
    }

    fn make_user(conn: &Connection, name: &str) -> i64 {
        users_db_operations::create_user(
            conn,
            &format!("{name}@example.com"),
            name,
            "pw",
            "admin@example.com",
        )
        .unwrap()
    }

    #[test]
    fn post_roundtrip_with_counts() {
        let conn = test_conn();
        let author = make_user(&conn, "author");
        let reader = make_user(&conn, "reader");

        let id = create_post(&conn, author, "Title", "body", "<p>body</p>", "body").unwrap();
        let post = read_post(&conn, id).unwrap();
        assert_eq!(post.title, "Title");
        assert_eq!(post.author_username, "author");
        assert_eq!(post.view_count, 0);
        assert_eq!(post.like_count, 0);

        record_view(&conn, reader, id).unwrap();
        record_view(&conn, reader, id).unwrap();
        like_post(&conn, reader, id).unwrap();
        like_post(&conn, reader, id).unwrap();

        let post = read_post(&conn, id).unwrap();
        assert_eq!(post.view_count, 1);
        assert_eq!(post.like_count, 1);
        assert!(has_liked(&conn, reader, id));

        unlike_post(&conn, reader, id).unwrap();
        assert!(!has_liked(&conn, reader, id));
        assert_eq!(read_post(&conn, id).unwrap().like_count, 0);
    }

    #[test]
    fn followed_feed_contains_own_and_followed_posts_only() {
        let conn = test_conn();
        let me = make_user(&conn, "me");
        let friend = make_user(&conn, "friend");
        let stranger = make_user(&conn, "stranger");

        create_post(&conn, me, "mine", "b", "<p>b</p>", "b").unwrap();
        create_post(&conn, friend, "friends", "b", "<p>b</p>", "b").unwrap();
        create_post(&conn, stranger, "strangers", "b", "<p>b</p>", "b").unwrap();

        users_db_operations::follow(&conn, me, friend).unwrap();

        let feed = read_followed_posts_page(&conn, me, 10, 0).unwrap();
        let titles: Vec<&str> = feed.iter().map(|p| p.title.as_str()).collect();
        assert!(titles.contains(&"mine"));
        assert!(titles.contains(&"friends"));
        assert!(!titles.contains(&"strangers"));
        assert_eq!(count_followed_posts(&conn, me), 2);
    }

    #[test]
    fn comment_moderation_flag_roundtrips() {
        let conn = test_conn();
        let author = make_user(&conn, "author");
        let post_id = create_post(&conn, author, "t", "b", "<p>b</p>", "b").unwrap();
        let comment_id = create_comment(&conn, post_id, author, "hi", "<p>hi</p>").unwrap();

        assert!(!read_comment(&conn, comment_id).unwrap().disabled);
        set_comment_disabled(&conn, comment_id, true).unwrap();
        assert!(read_comment(&conn, comment_id).unwrap().disabled);

        // Disabled comments are excluded from the visible count on the post.
        let post = read_post(&conn, post_id).unwrap();
        assert_eq!(post.comment_count, 0);

        set_comment_disabled(&conn, comment_id, false).unwrap();
        assert_eq!(read_post(&conn, post_id).unwrap().comment_count, 1);
    }

    #[test]
    fn pagination_orders_newest_first() {
        let conn = test_conn();
        let author = make_user(&conn, "author");
        for i in 0..5 {
            create_post(&conn, author, &format!("post-{i}"), "b", "<p>b</p>", "b").unwrap();
        }
        let first = read_posts_page(&conn, 2, 0).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].title, "post-4");
        let second = read_posts_page(&conn, 2, 2).unwrap();
        assert_eq!(second[0].title, "post-2");
        assert_eq!(count_posts(&conn), 5);
    }
}
