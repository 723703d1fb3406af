use actix_csrf::extractor::{Csrf, CsrfCookie, CsrfGuarded, CsrfToken};
use actix_multipart::Multipart;
use actix_session::Session;
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use tera::Tera;

use crate::config::Config;
use crate::helper::avatar_helpers;
use crate::helper::blog_helpers;
use crate::helper::form_helpers::flash;
use crate::middleware::{self, AuthenticatedUser};
use crate::models::db_operations::{posts_db_operations, users_db_operations};
use crate::models::{can, permission, User};
use crate::routes::{base_context, redirect, render_template};
use crate::DbPool;

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    show: Option<String>,
}

#[derive(Deserialize)]
struct PostForm {
    csrf_token: CsrfToken,
    title: String,
    body: String,
}

impl CsrfGuarded for PostForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
struct CommentForm {
    csrf_token: CsrfToken,
    body: String,
}

impl CsrfGuarded for CommentForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(show_index))
        .route("/", web::post().to(handle_quick_post))
        .route("/user/{username}", web::get().to(show_profile))
        .route("/editprofile", web::get().to(show_edit_profile_form))
        .route("/editprofile", web::post().to(handle_edit_profile))
        .route("/write", web::get().to(show_write_form))
        .route("/write", web::post().to(handle_write))
        .route("/post/{id}", web::get().to(show_post))
        .route("/post/{id}", web::post().to(handle_comment))
        .route("/edit/{id}", web::get().to(show_edit_post_form))
        .route("/edit/{id}", web::post().to(handle_edit_post))
        .route("/follow/{username}", web::get().to(handle_follow))
        .route("/unfollow/{username}", web::get().to(handle_unfollow))
        .route("/followers/{username}", web::get().to(show_followers))
        .route("/followed_by/{username}", web::get().to(show_followed_by))
        .route("/post_like/{id}", web::get().to(handle_like))
        .route("/post_unlike/{id}", web::get().to(handle_unlike))
        .route("/moderate", web::get().to(show_moderation_queue))
        .route("/moderate/enable/{id}", web::get().to(handle_enable_comment))
        .route("/moderate/disable/{id}", web::get().to(handle_disable_comment));
}

fn load_user(pool: &web::Data<DbPool>, user_id: i64) -> Option<User> {
    let conn = pool.get().ok()?;
    users_db_operations::read_user_by_id(&conn, user_id)
}

// --- Index ---

async fn show_index(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    query: web::Query<PageQuery>,
    token: CsrfToken,
) -> impl Responder {
    let page = query.page.unwrap_or(1);
    let current_user = middleware::current_user(&pool, &session);
    let followed_for = match (&query.show, &current_user) {
        (Some(show), Some(user)) if show == "followed" => Some(user.id),
        _ => None,
    };
    let show_followed = followed_for.is_some();

    let posts = match followed_for {
        Some(user_id) => {
            blog_helpers::fetch_followed_posts_page(&pool, user_id, page, config.posts_per_page)
        }
        None => blog_helpers::fetch_posts_page(&pool, page, config.posts_per_page),
    };
    let posts = match posts {
        Ok(p) => p,
        Err(e) => {
            log::error!("Failed to load post listing: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut ctx = base_context(&pool, &session);
    ctx.insert("posts", &posts);
    ctx.insert("show_followed", &show_followed);
    ctx.insert("can_write", &can(current_user.as_ref(), permission::WRITE));
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "index.html", &ctx)
}

/// The short composition box at the top of the index page.
async fn handle_quick_post(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    form: Csrf<web::Form<PostForm>>,
) -> impl Responder {
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    if !user.can(permission::WRITE) {
        return HttpResponse::Forbidden().body("You are not allowed to write posts.");
    }

    let post = form.into_inner();
    if post.title.trim().is_empty() || post.body.trim().is_empty() {
        flash(&session, "Posts need both a title and a body.");
        return redirect("/");
    }
    match blog_helpers::publish_post(&pool, user.id, &post.title, &post.body) {
        Ok(post_id) => redirect(&format!("/post/{}", post_id)),
        Err(e) => {
            log::error!("Failed to publish post for user {}: {}", user.id, e);
            flash(&session, "Publishing failed. Please try again.");
            redirect("/")
        }
    }
}

// --- Profiles ---

async fn show_profile(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> impl Responder {
    let username = path.into_inner();
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    let profile = match users_db_operations::read_user_by_username(&conn, &username) {
        Some(u) => u,
        None => return HttpResponse::NotFound().body("No such user."),
    };
    drop(conn);

    let page = query.page.unwrap_or(1);
    let posts = match blog_helpers::fetch_user_posts_page(
        &pool,
        profile.id,
        page,
        config.posts_per_page,
    ) {
        Ok(p) => p,
        Err(e) => {
            log::error!("Failed to load posts for profile '{}': {}", username, e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let current_user = middleware::current_user(&pool, &session);
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    let is_following = current_user
        .as_ref()
        .map(|u| users_db_operations::is_following(&conn, u.id, profile.id))
        .unwrap_or(false);
    let follower_count = users_db_operations::follower_count(&conn, profile.id);
    let followed_count = users_db_operations::followed_count(&conn, profile.id);

    let mut ctx = base_context(&pool, &session);
    ctx.insert("profile", &profile);
    ctx.insert("posts", &posts);
    ctx.insert("is_following", &is_following);
    ctx.insert("follower_count", &follower_count);
    ctx.insert("followed_count", &followed_count);
    ctx.insert("can_follow", &can(current_user.as_ref(), permission::FOLLOW));
    ctx.insert(
        "is_own_profile",
        &current_user.as_ref().map(|u| u.id == profile.id).unwrap_or(false),
    );
    render_template(&tera, "user.html", &ctx)
}

async fn show_edit_profile_form(
    auth_user: AuthenticatedUser,
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    token: CsrfToken,
) -> impl Responder {
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    let mut ctx = base_context(&pool, &session);
    ctx.insert("profile", &user);
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "edit_profile.html", &ctx)
}

/// Multipart handler: the avatar file arrives alongside the text fields, so
/// the CSRF token is checked against the cookie by hand instead of through
/// the urlencoded extractor.
async fn handle_edit_profile(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    csrf_cookie: CsrfCookie,
    payload: Multipart,
) -> impl Responder {
    let form = match avatar_helpers::read_profile_form(payload).await {
        Ok(f) => f,
        Err(e) => {
            flash(&session, &e.to_string());
            return redirect("/editprofile");
        }
    };
    if !csrf_cookie.validate(form.field("csrf_token")) {
        return HttpResponse::BadRequest().body("CSRF token mismatch.");
    }

    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    if let Err(e) = users_db_operations::update_profile(
        &conn,
        auth_user.user_id,
        form.field("name"),
        form.field("location"),
        form.field("about_me"),
    ) {
        log::error!("Failed to update profile for user {}: {}", auth_user.user_id, e);
        flash(&session, "Profile update failed. Please try again.");
        return redirect("/editprofile");
    }
    drop(conn);

    if let Some(bytes) = form.avatar {
        match avatar_helpers::save_avatar(&config, &auth_user.username, bytes).await {
            Ok((big, small)) => {
                let conn = match pool.get() {
                    Ok(c) => c,
                    Err(_) => return HttpResponse::InternalServerError().finish(),
                };
                if let Err(e) =
                    users_db_operations::set_avatar(&conn, auth_user.user_id, &big, &small)
                {
                    log::error!(
                        "Failed to store avatar paths for user {}: {}",
                        auth_user.user_id,
                        e
                    );
                }
            }
            Err(e) => {
                flash(&session, &e.to_string());
                return redirect("/editprofile");
            }
        }
    }

    flash(&session, "Your profile has been updated.");
    redirect(&format!("/user/{}", auth_user.username))
}

// --- Writing and editing posts ---

async fn show_write_form(
    auth_user: AuthenticatedUser,
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    token: CsrfToken,
) -> impl Responder {
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    if !user.can(permission::WRITE) {
        return HttpResponse::Forbidden().body("You are not allowed to write posts.");
    }
    let mut ctx = base_context(&pool, &session);
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "write.html", &ctx)
}

async fn handle_write(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    form: Csrf<web::Form<PostForm>>,
) -> impl Responder {
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    if !user.can(permission::WRITE) {
        return HttpResponse::Forbidden().body("You are not allowed to write posts.");
    }

    let post = form.into_inner();
    if post.title.trim().is_empty() || post.body.trim().is_empty() {
        flash(&session, "Posts need both a title and a body.");
        return redirect("/write");
    }
    match blog_helpers::publish_post(&pool, user.id, &post.title, &post.body) {
        Ok(post_id) => redirect(&format!("/post/{}", post_id)),
        Err(e) => {
            log::error!("Failed to publish post for user {}: {}", user.id, e);
            flash(&session, "Publishing failed. Please try again.");
            redirect("/write")
        }
    }
}

async fn show_edit_post_form(
    auth_user: AuthenticatedUser,
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
    token: CsrfToken,
) -> impl Responder {
    let post_id = path.into_inner();
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    let post = match posts_db_operations::read_post(&conn, post_id) {
        Some(p) => p,
        None => return HttpResponse::NotFound().body("No such post."),
    };
    if post.author_id != user.id && !user.can(permission::ADMIN) {
        return HttpResponse::Forbidden().body("You may only edit your own posts.");
    }

    let mut ctx = base_context(&pool, &session);
    ctx.insert("post", &post);
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "edit_post.html", &ctx)
}

async fn handle_edit_post(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
    form: Csrf<web::Form<PostForm>>,
) -> impl Responder {
    let post_id = path.into_inner();
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    let post = match posts_db_operations::read_post(&conn, post_id) {
        Some(p) => p,
        None => return HttpResponse::NotFound().body("No such post."),
    };
    drop(conn);
    if post.author_id != user.id && !user.can(permission::ADMIN) {
        return HttpResponse::Forbidden().body("You may only edit your own posts.");
    }

    let edit = form.into_inner();
    if edit.title.trim().is_empty() || edit.body.trim().is_empty() {
        flash(&session, "Posts need both a title and a body.");
        return redirect(&format!("/edit/{}", post_id));
    }
    match blog_helpers::edit_post(&pool, post_id, &edit.title, &edit.body) {
        Ok(_) => {
            flash(&session, "The post has been updated.");
            redirect(&format!("/post/{}", post_id))
        }
        Err(e) => {
            log::error!("Failed to edit post {}: {}", post_id, e);
            flash(&session, "Editing failed. Please try again.");
            redirect(&format!("/edit/{}", post_id))
        }
    }
}

// --- Reading posts and commenting ---

async fn show_post(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    path: web::Path<i64>,
    query: web::Query<PageQuery>,
    token: CsrfToken,
) -> impl Responder {
    let post_id = path.into_inner();
    let current_user = middleware::current_user(&pool, &session);

    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    // Each reader counts once, however often they return.
    if let Some(user) = current_user.as_ref() {
        if let Err(e) = posts_db_operations::record_view(&conn, user.id, post_id) {
            log::warn!("Failed to record view of post {} by user {}: {}", post_id, user.id, e);
        }
    }
    let post = match posts_db_operations::read_post(&conn, post_id) {
        Some(p) => p,
        None => return HttpResponse::NotFound().body("No such post."),
    };
    let has_liked = current_user
        .as_ref()
        .map(|u| posts_db_operations::has_liked(&conn, u.id, post_id))
        .unwrap_or(false);
    drop(conn);

    let page = query.page.unwrap_or(1);
    let comments = match blog_helpers::fetch_comments_page(
        &pool,
        post_id,
        page,
        config.comments_per_page,
    ) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load comments for post {}: {}", post_id, e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut ctx = base_context(&pool, &session);
    ctx.insert("post", &post);
    ctx.insert("comments", &comments);
    ctx.insert("has_liked", &has_liked);
    ctx.insert("can_comment", &can(current_user.as_ref(), permission::COMMENT));
    ctx.insert("can_like", &can(current_user.as_ref(), permission::LIKE));
    ctx.insert("can_moderate", &can(current_user.as_ref(), permission::MODERATE));
    ctx.insert(
        "can_edit",
        &current_user
            .as_ref()
            .map(|u| u.id == post.author_id || u.can(permission::ADMIN))
            .unwrap_or(false),
    );
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "post.html", &ctx)
}

async fn handle_comment(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
    form: Csrf<web::Form<CommentForm>>,
) -> impl Responder {
    let post_id = path.into_inner();
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    if !user.can(permission::COMMENT) {
        return HttpResponse::Forbidden().body("You are not allowed to comment.");
    }

    let comment = form.into_inner();
    if comment.body.trim().is_empty() {
        flash(&session, "Comments cannot be empty.");
        return redirect(&format!("/post/{}", post_id));
    }
    match blog_helpers::add_comment(&pool, post_id, user.id, &comment.body) {
        Ok(_) => flash(&session, "Your comment has been published."),
        Err(e) => {
            log::error!("Failed to add comment to post {}: {}", post_id, e);
            flash(&session, "Commenting failed. Please try again.");
        }
    }
    redirect(&format!("/post/{}", post_id))
}

// --- Following ---

async fn handle_follow(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> impl Responder {
    follow_action(auth_user, session, pool, path.into_inner(), true).await
}

async fn handle_unfollow(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> impl Responder {
    follow_action(auth_user, session, pool, path.into_inner(), false).await
}

async fn follow_action(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    username: String,
    follow: bool,
) -> HttpResponse {
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    if !user.can(permission::FOLLOW) {
        return HttpResponse::Forbidden().body("You are not allowed to follow users.");
    }

    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    let target = match users_db_operations::read_user_by_username(&conn, &username) {
        Some(t) => t,
        None => return HttpResponse::NotFound().body("No such user."),
    };
    if target.id == user.id {
        flash(&session, "You cannot follow yourself.");
        return redirect(&format!("/user/{}", username));
    }

    let result = if follow {
        users_db_operations::follow(&conn, user.id, target.id)
    } else {
        users_db_operations::unfollow(&conn, user.id, target.id).map(|_| ())
    };
    match result {
        Ok(_) if follow => flash(&session, &format!("You are now following {}.", username)),
        Ok(_) => flash(&session, &format!("You are no longer following {}.", username)),
        Err(e) => {
            log::error!("Follow update for user {} -> {} failed: {}", user.id, target.id, e);
            flash(&session, "That did not work. Please try again.");
        }
    }
    redirect(&format!("/user/{}", username))
}

async fn show_followers(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> impl Responder {
    follow_listing(session, tera, pool, config, path.into_inner(), query.page.unwrap_or(1), true)
        .await
}

async fn show_followed_by(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> impl Responder {
    follow_listing(session, tera, pool, config, path.into_inner(), query.page.unwrap_or(1), false)
        .await
}

async fn follow_listing(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    username: String,
    page: u32,
    followers: bool,
) -> HttpResponse {
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    let profile = match users_db_operations::read_user_by_username(&conn, &username) {
        Some(u) => u,
        None => return HttpResponse::NotFound().body("No such user."),
    };
    drop(conn);

    let entries = if followers {
        blog_helpers::fetch_followers_page(&pool, profile.id, page, config.followers_per_page)
    } else {
        blog_helpers::fetch_followed_users_page(&pool, profile.id, page, config.followers_per_page)
    };
    let entries = match entries {
        Ok(e) => e,
        Err(e) => {
            log::error!("Failed to load follow listing for '{}': {}", username, e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut ctx = base_context(&pool, &session);
    ctx.insert("profile", &profile);
    ctx.insert("entries", &entries);
    ctx.insert("listing_followers", &followers);
    render_template(&tera, "followers.html", &ctx)
}

// --- Likes ---

async fn handle_like(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
) -> impl Responder {
    like_action(auth_user, session, pool, path.into_inner(), true).await
}

async fn handle_unlike(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
) -> impl Responder {
    like_action(auth_user, session, pool, path.into_inner(), false).await
}

async fn like_action(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    post_id: i64,
    like: bool,
) -> HttpResponse {
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    if !user.can(permission::LIKE) {
        return HttpResponse::Forbidden().body("You are not allowed to like posts.");
    }

    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    if posts_db_operations::read_post(&conn, post_id).is_none() {
        return HttpResponse::NotFound().body("No such post.");
    }
    let result = if like {
        posts_db_operations::like_post(&conn, user.id, post_id)
    } else {
        posts_db_operations::unlike_post(&conn, user.id, post_id).map(|_| ())
    };
    if let Err(e) = result {
        log::error!("Like update for post {} by user {} failed: {}", post_id, user.id, e);
        flash(&session, "That did not work. Please try again.");
    }
    redirect(&format!("/post/{}", post_id))
}

// --- Moderation ---

async fn show_moderation_queue(
    auth_user: AuthenticatedUser,
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    query: web::Query<PageQuery>,
) -> impl Responder {
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    if !user.can(permission::MODERATE) {
        return HttpResponse::Forbidden().body("You are not allowed to moderate.");
    }

    let page = query.page.unwrap_or(1);
    let comments = match blog_helpers::fetch_moderation_page(&pool, page, config.comments_per_page)
    {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load moderation queue: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut ctx = base_context(&pool, &session);
    ctx.insert("comments", &comments);
    render_template(&tera, "moderate.html", &ctx)
}

async fn handle_enable_comment(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
) -> impl Responder {
    moderation_action(auth_user, session, pool, path.into_inner(), false).await
}

async fn handle_disable_comment(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    path: web::Path<i64>,
) -> impl Responder {
    moderation_action(auth_user, session, pool, path.into_inner(), true).await
}

async fn moderation_action(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    comment_id: i64,
    disabled: bool,
) -> HttpResponse {
    let user = match load_user(&pool, auth_user.user_id) {
        Some(u) => u,
        None => return redirect("/login"),
    };
    if !user.can(permission::MODERATE) {
        return HttpResponse::Forbidden().body("You are not allowed to moderate.");
    }

    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    if posts_db_operations::read_comment(&conn, comment_id).is_none() {
        return HttpResponse::NotFound().body("No such comment.");
    }
    if let Err(e) = posts_db_operations::set_comment_disabled(&conn, comment_id, disabled) {
        log::error!("Moderation update for comment {} failed: {}", comment_id, e);
        flash(&session, "That did not work. Please try again.");
    }
    redirect("/moderate")
}
