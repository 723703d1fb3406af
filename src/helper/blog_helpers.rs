use crate::helper::sanitization_helpers;
use crate::models::db_operations::{posts_db_operations, users_db_operations};
use crate::models::{Comment, FollowEntry, Page, Post};
use crate::DbPool;
use actix_web::web;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlogHelperError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

// The page number comes straight from the query string, so the math must
// not overflow u32.
fn offset(page: u32, per_page: u32) -> u32 {
    let skipped = (page.max(1) as u64 - 1) * per_page as u64;
    skipped.min(u32::MAX as u64) as u32
}

/// Renders and stores a new post; returns its id. The title is kept as
/// entered (trimmed): templates escape it on output, and stripping it here
/// would entity-encode characters like '&' twice.
pub fn publish_post(
    pool: &web::Data<DbPool>,
    author_id: i64,
    title: &str,
    body: &str,
) -> Result<i64, BlogHelperError> {
    let body_html = sanitization_helpers::render_markdown(body);
    let abstract_text = sanitization_helpers::make_abstract(&body_html);
    let conn = pool.get()?;
    Ok(posts_db_operations::create_post(
        &conn,
        author_id,
        title.trim(),
        body,
        &body_html,
        &abstract_text,
    )?)
}

/// Re-renders and updates an existing post.
pub fn edit_post(
    pool: &web::Data<DbPool>,
    post_id: i64,
    title: &str,
    body: &str,
) -> Result<(), BlogHelperError> {
    let body_html = sanitization_helpers::render_markdown(body);
    let abstract_text = sanitization_helpers::make_abstract(&body_html);
    let conn = pool.get()?;
    posts_db_operations::update_post(
        &conn,
        post_id,
        title.trim(),
        body,
        &body_html,
        &abstract_text,
    )?;
    Ok(())
}

pub fn add_comment(
    pool: &web::Data<DbPool>,
    post_id: i64,
    author_id: i64,
    body: &str,
) -> Result<i64, BlogHelperError> {
    let body_html = sanitization_helpers::render_markdown(body);
    let conn = pool.get()?;
    Ok(posts_db_operations::create_comment(&conn, post_id, author_id, body, &body_html)?)
}

pub fn fetch_posts_page(
    pool: &web::Data<DbPool>,
    page: u32,
    per_page: u32,
) -> Result<Page<Post>, BlogHelperError> {
    let conn = pool.get()?;
    let total = posts_db_operations::count_posts(&conn);
    let items = posts_db_operations::read_posts_page(&conn, per_page, offset(page, per_page))?;
    Ok(Page::new(items, page.max(1), per_page, total))
}

pub fn fetch_followed_posts_page(
    pool: &web::Data<DbPool>,
    user_id: i64,
    page: u32,
    per_page: u32,
) -> Result<Page<Post>, BlogHelperError> {
    let conn = pool.get()?;
    let total = posts_db_operations::count_followed_posts(&conn, user_id);
    let items = posts_db_operations::read_followed_posts_page(
        &conn,
        user_id,
        per_page,
        offset(page, per_page),
    )?;
    Ok(Page::new(items, page.max(1), per_page, total))
}

pub fn fetch_user_posts_page(
    pool: &web::Data<DbPool>,
    author_id: i64,
    page: u32,
    per_page: u32,
) -> Result<Page<Post>, BlogHelperError> {
    let conn = pool.get()?;
    let total = posts_db_operations::count_posts_by_author(&conn, author_id);
    let items = posts_db_operations::read_posts_by_author_page(
        &conn,
        author_id,
        per_page,
        offset(page, per_page),
    )?;
    Ok(Page::new(items, page.max(1), per_page, total))
}

pub fn fetch_comments_page(
    pool: &web::Data<DbPool>,
    post_id: i64,
    page: u32,
    per_page: u32,
) -> Result<Page<Comment>, BlogHelperError> {
    let conn = pool.get()?;
    let total = posts_db_operations::count_comments(&conn, post_id);
    let items =
        posts_db_operations::read_comments_page(&conn, post_id, per_page, offset(page, per_page))?;
    Ok(Page::new(items, page.max(1), per_page, total))
}

/// Site-wide comment queue for moderators.
pub fn fetch_moderation_page(
    pool: &web::Data<DbPool>,
    page: u32,
    per_page: u32,
) -> Result<Page<Comment>, BlogHelperError> {
    let conn = pool.get()?;
    let total = posts_db_operations::count_all_comments(&conn);
    let items =
        posts_db_operations::read_all_comments_page(&conn, per_page, offset(page, per_page))?;
    Ok(Page::new(items, page.max(1), per_page, total))
}

pub fn fetch_followers_page(
    pool: &web::Data<DbPool>,
    user_id: i64,
    page: u32,
    per_page: u32,
) -> Result<Page<FollowEntry>, BlogHelperError> {
    let conn = pool.get()?;
    let total = users_db_operations::follower_count(&conn, user_id);
    let items = users_db_operations::read_followers_page(
        &conn,
        user_id,
        per_page,
        offset(page, per_page),
    )?;
    Ok(Page::new(items, page.max(1), per_page, total))
}

pub fn fetch_followed_users_page(
    pool: &web::Data<DbPool>,
    user_id: i64,
    page: u32,
    per_page: u32,
) -> Result<Page<FollowEntry>, BlogHelperError> {
    let conn = pool.get()?;
    let total = users_db_operations::followed_count(&conn, user_id);
    let items = users_db_operations::read_followed_page(
        &conn,
        user_id,
        per_page,
        offset(page, per_page),
    )?;
    Ok(Page::new(items, page.max(1), per_page, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_operations::{posts_db_operations, users_db_operations};
    use crate::setup::db_setup;
    use r2d2_sqlite::SqliteConnectionManager;

    fn test_pool() -> web::Data<DbPool> {
        // One connection keeps every checkout on the same in-memory db.
        let manager = SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        {
            let mut conn = pool.get().unwrap();
            db_setup::setup_database(&mut conn).unwrap();
        }
        web::Data::new(pool)
    }

    #[test]
    fn offset_clamps_instead_of_overflowing() {
        assert_eq!(offset(1, 10), 0);
        assert_eq!(offset(0, 10), 0);
        assert_eq!(offset(3, 10), 20);
        // u32::MAX pages times any per_page must not wrap around.
        assert_eq!(offset(u32::MAX, 10), u32::MAX);
        assert_eq!(offset(u32::MAX, u32::MAX), u32::MAX);
    }

    #[test]
    fn huge_page_parameter_yields_an_empty_page() {
        let pool = test_pool();
        let author = {
            let conn = pool.get().unwrap();
            users_db_operations::create_user(&conn, "a@example.com", "a", "password", "x@x.com")
                .unwrap()
        };
        publish_post(&pool, author, "First", "hello").unwrap();

        let page = fetch_posts_page(&pool, u32::MAX, 10).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 1);
    }

    #[test]
    fn titles_keep_ampersands_verbatim() {
        let pool = test_pool();
        let author = {
            let conn = pool.get().unwrap();
            users_db_operations::create_user(&conn, "a@example.com", "a", "password", "x@x.com")
                .unwrap()
        };
        let post_id = publish_post(&pool, author, "  Fish & Chips  ", "tasty").unwrap();

        {
            let conn = pool.get().unwrap();
            let post = posts_db_operations::read_post(&conn, post_id).unwrap();
            assert_eq!(post.title, "Fish & Chips");
            assert!(!post.title.contains("&amp;"));
        }

        edit_post(&pool, post_id, "Salt & Vinegar", "tastier").unwrap();
        let conn = pool.get().unwrap();
        let post = posts_db_operations::read_post(&conn, post_id).unwrap();
        assert_eq!(post.title, "Salt & Vinegar");
    }
}
