use actix_session::Session;
use actix_web::{web, HttpResponse};
use tera::{Context, Tera};

use crate::helper::form_helpers;
use crate::middleware;
use crate::DbPool;

pub mod auth;
pub mod blog;

/// Context every page template expects: the logged-in user (if any) and a
/// pending flash message.
pub(crate) fn base_context(pool: &web::Data<DbPool>, session: &Session) -> Context {
    let mut ctx = Context::new();
    ctx.insert("current_user", &middleware::current_user(pool, session));
    ctx.insert("flash", &form_helpers::take_flash(session));
    ctx
}

pub(crate) fn render_template(tera: &Tera, name: &str, ctx: &Context) -> HttpResponse {
    match tera.render(name, ctx) {
        Ok(rendered) => {
            HttpResponse::Ok().content_type("text/html; charset=utf-8").body(rendered)
        }
        Err(err) => {
            log::error!("Template rendering error for '{}': {}", name, err);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

pub(crate) fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().append_header(("location", location.to_string())).finish()
}

#[cfg(test)]
mod tests {
    use crate::models::{Comment, Page, Post};
    use tera::{Context, Tera};

    fn post_page_context(can_moderate: bool) -> Context {
        let post = Post {
            id: 1,
            title: "A post".to_string(),
            body: "body".to_string(),
            body_html: "<p>body</p>".to_string(),
            abstract_text: "body".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            author_id: 1,
            author_username: "author".to_string(),
            author_avatar: None,
            view_count: 0,
            like_count: 0,
            comment_count: 1,
        };
        let comment = Comment {
            id: 7,
            body: "hidden words".to_string(),
            body_html: "<p>hidden words</p>".to_string(),
            created_at: "2026-01-02T00:00:00Z".to_string(),
            disabled: true,
            author_id: 2,
            author_username: "heckler".to_string(),
            author_avatar: None,
            post_id: 1,
        };
        let mut ctx = Context::new();
        ctx.insert("current_user", &Option::<()>::None);
        ctx.insert("flash", &Option::<String>::None);
        ctx.insert("post", &post);
        ctx.insert("comments", &Page::new(vec![comment], 1, 10, 1));
        ctx.insert("has_liked", &false);
        ctx.insert("can_comment", &false);
        ctx.insert("can_like", &false);
        ctx.insert("can_moderate", &can_moderate);
        ctx.insert("can_edit", &false);
        ctx.insert("csrf_token", "token");
        ctx
    }

    #[test]
    fn disabled_comment_body_is_hidden_from_readers() {
        let tera = Tera::new("templates/**/*.html").unwrap();
        let page = tera.render("post.html", &post_page_context(false)).unwrap();
        assert!(!page.contains("hidden words"));
        assert!(page.contains("disabled by a moderator"));
        // The author line still identifies the comment.
        assert!(page.contains("heckler"));
    }

    #[test]
    fn disabled_comment_body_stays_visible_to_moderators() {
        let tera = Tera::new("templates/**/*.html").unwrap();
        let page = tera.render("post.html", &post_page_context(true)).unwrap();
        assert!(page.contains("hidden words"));
        assert!(!page.contains("disabled by a moderator"));
    }
}
