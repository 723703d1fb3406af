use actix_csrf::extractor::{Csrf, CsrfGuarded, CsrfToken};
use actix_session::Session;
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use tera::Tera;

use crate::config::Config;
use crate::helper::auth_helpers::{self, TokenPurpose};
use crate::helper::form_helpers::{self, flash};
use crate::helper::mail_helpers::Mailer;
use crate::middleware::{self, AuthenticatedUser};
use crate::models::db_operations::users_db_operations;
use crate::routes::{base_context, redirect, render_template};
use crate::DbPool;

// --- Form definitions ---

#[derive(Deserialize)]
struct LoginForm {
    csrf_token: CsrfToken,
    email: String,
    password: String,
}

impl CsrfGuarded for LoginForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
struct RegisterForm {
    csrf_token: CsrfToken,
    email: String,
    username: String,
    password: String,
    password2: String,
}

impl CsrfGuarded for RegisterForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
struct ChangePasswordForm {
    csrf_token: CsrfToken,
    old_password: String,
    password: String,
    password2: String,
}

impl CsrfGuarded for ChangePasswordForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
struct ResetRequestForm {
    csrf_token: CsrfToken,
    email: String,
}

impl CsrfGuarded for ResetRequestForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
struct ResetPasswordForm {
    csrf_token: CsrfToken,
    password: String,
    password2: String,
}

impl CsrfGuarded for ResetPasswordForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
struct ChangeEmailForm {
    csrf_token: CsrfToken,
    email: String,
    password: String,
}

impl CsrfGuarded for ChangeEmailForm {
    fn csrf_token(&self) -> &CsrfToken {
        &self.csrf_token
    }
}

// --- Route configuration ---

pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/login", web::get().to(show_login_form))
        .route("/login", web::post().to(handle_login))
        .route("/logout", web::get().to(handle_logout))
        .route("/register", web::get().to(show_register_form))
        .route("/register", web::post().to(handle_register))
        .route("/confirm/{token}", web::get().to(handle_confirm))
        .route("/unconfirmed", web::get().to(show_unconfirmed))
        .route("/reconfirm", web::get().to(handle_reconfirm))
        .route("/changepassword", web::get().to(show_change_password_form))
        .route("/changepassword", web::post().to(handle_change_password))
        .route("/resetpasswordrequest", web::get().to(show_reset_request_form))
        .route("/resetpasswordrequest", web::post().to(handle_reset_request))
        .route("/resetpassword/{token}", web::get().to(show_reset_password_form))
        .route("/resetpassword/{token}", web::post().to(handle_reset_password))
        .route("/changeemailrequest", web::get().to(show_change_email_form))
        .route("/changeemailrequest", web::post().to(handle_change_email_request))
        .route("/changeemail/{token}", web::get().to(handle_change_email));
}

// --- Login / logout ---

async fn show_login_form(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    token: CsrfToken,
) -> impl Responder {
    if session.get::<i64>("user_id").unwrap_or(None).is_some() {
        return redirect("/");
    }
    let mut ctx = base_context(&pool, &session);
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "auth/login.html", &ctx)
}

async fn handle_login(
    session: Session,
    pool: web::Data<DbPool>,
    form: Csrf<web::Form<LoginForm>>,
) -> impl Responder {
    let login = form.into_inner();
    let conn = match pool.get() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to get DB connection for login: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    match users_db_operations::verify_credentials(&conn, login.email.trim(), &login.password) {
        Some(user) => {
            if middleware::login_session(&session, &user).is_err() {
                return HttpResponse::InternalServerError().finish();
            }
            redirect("/")
        }
        None => {
            flash(&session, "Invalid email or password.");
            redirect("/login")
        }
    }
}

async fn handle_logout(session: Session) -> impl Responder {
    session.clear();
    redirect("/login")
}

// --- Registration and confirmation ---

async fn show_register_form(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    token: CsrfToken,
) -> impl Responder {
    let mut ctx = base_context(&pool, &session);
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "auth/register.html", &ctx)
}

async fn handle_register(
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    mailer: web::Data<Mailer>,
    form: Csrf<web::Form<RegisterForm>>,
) -> impl Responder {
    let reg = form.into_inner();
    let email = reg.email.trim().to_string();
    let username = reg.username.trim().to_string();

    if !form_helpers::is_valid_email(&email) {
        flash(&session, "Please enter a valid email address.");
        return redirect("/register");
    }
    if !form_helpers::is_valid_username(&username) {
        flash(&session, "Usernames must start with a letter and contain only letters, numbers, dots and underscores.");
        return redirect("/register");
    }
    if !form_helpers::is_valid_password(&reg.password) {
        flash(&session, "Passwords must be at least 8 characters long.");
        return redirect("/register");
    }
    if reg.password != reg.password2 {
        flash(&session, "Passwords do not match.");
        return redirect("/register");
    }

    let conn = match pool.get() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to get DB connection for registration: {}", e);
            return HttpResponse::InternalServerError().finish();
        }
    };

    if users_db_operations::read_user_by_email(&conn, &email).is_some() {
        flash(&session, "That email address is already registered.");
        return redirect("/register");
    }
    if users_db_operations::read_user_by_username(&conn, &username).is_some() {
        flash(&session, "That username is already taken.");
        return redirect("/register");
    }

    let user_id = match users_db_operations::create_user(
        &conn,
        &email,
        &username,
        &reg.password,
        &config.admin_email,
    ) {
        Ok(id) => id,
        Err(e) => {
            log::error!("Failed to create user '{}': {}", username, e);
            flash(&session, "Registration failed. Please try again.");
            return redirect("/register");
        }
    };

    send_confirmation(&config, &mailer, user_id, &email, &username).await;
    flash(&session, "A confirmation email has been sent to your address. Please check your inbox.");
    redirect("/login")
}

async fn send_confirmation(
    config: &Config,
    mailer: &Mailer,
    user_id: i64,
    email: &str,
    username: &str,
) {
    let token = match auth_helpers::generate_token(
        &config.token_secret_key,
        config.token_ttl_secs,
        user_id,
        TokenPurpose::Confirm,
        None,
    ) {
        Ok(t) => t,
        Err(e) => {
            log::error!("Failed to mint confirmation token for user {}: {}", user_id, e);
            return;
        }
    };
    if let Err(e) = mailer.send_confirmation_email(email, username, &token).await {
        log::error!("Failed to send confirmation email to {}: {}", email, e);
    }
}

async fn handle_confirm(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    path: web::Path<String>,
) -> impl Responder {
    let token = path.into_inner();
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };

    if let Some(user) = users_db_operations::read_user_by_id(&conn, auth_user.user_id) {
        if user.confirmed {
            return redirect("/");
        }
    }

    match auth_helpers::verify_token(&config.token_secret_key, &token, TokenPurpose::Confirm) {
        Ok(claims) if claims.sub == auth_user.user_id => {
            match users_db_operations::confirm_user(&conn, auth_user.user_id) {
                Ok(_) => flash(&session, "Your account is confirmed. Welcome!"),
                Err(e) => {
                    log::error!("Failed to confirm user {}: {}", auth_user.user_id, e);
                    flash(&session, "Confirmation failed. Please try again.");
                }
            }
        }
        _ => flash(&session, "The confirmation link is invalid or has expired."),
    }
    redirect("/")
}

async fn show_unconfirmed(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
) -> impl Responder {
    match middleware::current_user(&pool, &session) {
        Some(user) if !user.confirmed => {
            let ctx = base_context(&pool, &session);
            render_template(&tera, "auth/unconfirmed.html", &ctx)
        }
        _ => redirect("/"),
    }
}

async fn handle_reconfirm(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    mailer: web::Data<Mailer>,
) -> impl Responder {
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    if let Some(user) = users_db_operations::read_user_by_id(&conn, auth_user.user_id) {
        send_confirmation(&config, &mailer, user.id, &user.email, &user.username).await;
    }
    flash(&session, "A new confirmation email has been sent to your address.");
    redirect("/unconfirmed")
}

// --- Password change and reset ---

async fn show_change_password_form(
    _auth_user: AuthenticatedUser,
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    token: CsrfToken,
) -> impl Responder {
    let mut ctx = base_context(&pool, &session);
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "auth/change_password.html", &ctx)
}

async fn handle_change_password(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    form: Csrf<web::Form<ChangePasswordForm>>,
) -> impl Responder {
    let change = form.into_inner();
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };

    if !users_db_operations::verify_password(&conn, auth_user.user_id, &change.old_password) {
        flash(&session, "Your current password was entered incorrectly.");
        return redirect("/changepassword");
    }
    if !form_helpers::is_valid_password(&change.password) {
        flash(&session, "Passwords must be at least 8 characters long.");
        return redirect("/changepassword");
    }
    if change.password != change.password2 {
        flash(&session, "Passwords do not match.");
        return redirect("/changepassword");
    }

    match users_db_operations::update_password(&conn, auth_user.user_id, &change.password) {
        Ok(_) => {
            flash(&session, "Your password has been updated.");
            redirect("/")
        }
        Err(e) => {
            log::error!("Failed to update password for user {}: {}", auth_user.user_id, e);
            flash(&session, "Password change failed. Please try again.");
            redirect("/changepassword")
        }
    }
}

async fn show_reset_request_form(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    token: CsrfToken,
) -> impl Responder {
    if session.get::<i64>("user_id").unwrap_or(None).is_some() {
        return redirect("/");
    }
    let mut ctx = base_context(&pool, &session);
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "auth/reset_password_request.html", &ctx)
}

async fn handle_reset_request(
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    mailer: web::Data<Mailer>,
    form: Csrf<web::Form<ResetRequestForm>>,
) -> impl Responder {
    let request = form.into_inner();
    let email = request.email.trim().to_string();

    if let Ok(conn) = pool.get() {
        if let Some(user) = users_db_operations::read_user_by_email(&conn, &email) {
            match auth_helpers::generate_token(
                &config.token_secret_key,
                config.token_ttl_secs,
                user.id,
                TokenPurpose::PasswordReset,
                None,
            ) {
                Ok(token) => {
                    if let Err(e) =
                        mailer.send_password_reset_email(&user.email, &user.username, &token).await
                    {
                        log::error!("Failed to send reset email to {}: {}", user.email, e);
                    }
                }
                Err(e) => log::error!("Failed to mint reset token for user {}: {}", user.id, e),
            }
        }
    }

    // The same message regardless of whether the address exists.
    flash(&session, "If that address is registered, a reset email is on its way.");
    redirect("/login")
}

async fn show_reset_password_form(
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    path: web::Path<String>,
    token: CsrfToken,
) -> impl Responder {
    let mut ctx = base_context(&pool, &session);
    ctx.insert("csrf_token", token.get());
    ctx.insert("reset_token", &path.into_inner());
    render_template(&tera, "auth/reset_password.html", &ctx)
}

async fn handle_reset_password(
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    path: web::Path<String>,
    form: Csrf<web::Form<ResetPasswordForm>>,
) -> impl Responder {
    let reset = form.into_inner();
    let token = path.into_inner();

    let claims = match auth_helpers::verify_token(
        &config.token_secret_key,
        &token,
        TokenPurpose::PasswordReset,
    ) {
        Ok(c) => c,
        Err(_) => {
            flash(&session, "The reset link is invalid or has expired.");
            return redirect("/resetpasswordrequest");
        }
    };

    if !form_helpers::is_valid_password(&reset.password) {
        flash(&session, "Passwords must be at least 8 characters long.");
        return redirect(&format!("/resetpassword/{}", token));
    }
    if reset.password != reset.password2 {
        flash(&session, "Passwords do not match.");
        return redirect(&format!("/resetpassword/{}", token));
    }

    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };
    match users_db_operations::update_password(&conn, claims.sub, &reset.password) {
        Ok(_) => {
            flash(&session, "Your password has been reset. You can now log in.");
            redirect("/login")
        }
        Err(e) => {
            log::error!("Failed to reset password for user {}: {}", claims.sub, e);
            flash(&session, "Password reset failed. Please try again.");
            redirect("/resetpasswordrequest")
        }
    }
}

// --- Email change ---

async fn show_change_email_form(
    _auth_user: AuthenticatedUser,
    session: Session,
    tera: web::Data<Tera>,
    pool: web::Data<DbPool>,
    token: CsrfToken,
) -> impl Responder {
    let mut ctx = base_context(&pool, &session);
    ctx.insert("csrf_token", token.get());
    render_template(&tera, "auth/change_email_request.html", &ctx)
}

async fn handle_change_email_request(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    mailer: web::Data<Mailer>,
    form: Csrf<web::Form<ChangeEmailForm>>,
) -> impl Responder {
    let change = form.into_inner();
    let new_email = change.email.trim().to_string();
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };

    if !users_db_operations::verify_password(&conn, auth_user.user_id, &change.password) {
        flash(&session, "Your password was entered incorrectly.");
        return redirect("/changeemailrequest");
    }
    if !form_helpers::is_valid_email(&new_email) {
        flash(&session, "Please enter a valid email address.");
        return redirect("/changeemailrequest");
    }
    if users_db_operations::read_user_by_email(&conn, &new_email).is_some() {
        flash(&session, "That email address is already registered.");
        return redirect("/changeemailrequest");
    }

    match auth_helpers::generate_token(
        &config.token_secret_key,
        config.token_ttl_secs,
        auth_user.user_id,
        TokenPurpose::EmailChange,
        Some(new_email.clone()),
    ) {
        Ok(token) => {
            if let Err(e) =
                mailer.send_email_change_email(&new_email, &auth_user.username, &token).await
            {
                log::error!("Failed to send email-change mail to {}: {}", new_email, e);
            }
            flash(
                &session,
                "A confirmation email has been sent to the new address. Please check that inbox.",
            );
            redirect("/")
        }
        Err(e) => {
            log::error!(
                "Failed to mint email-change token for user {}: {}",
                auth_user.user_id,
                e
            );
            flash(&session, "Email change failed. Please try again.");
            redirect("/changeemailrequest")
        }
    }
}

async fn handle_change_email(
    auth_user: AuthenticatedUser,
    session: Session,
    pool: web::Data<DbPool>,
    config: web::Data<Config>,
    path: web::Path<String>,
) -> impl Responder {
    let token = path.into_inner();
    let conn = match pool.get() {
        Ok(c) => c,
        Err(_) => return HttpResponse::InternalServerError().finish(),
    };

    match auth_helpers::verify_token(&config.token_secret_key, &token, TokenPurpose::EmailChange) {
        Ok(claims) if claims.sub == auth_user.user_id => match claims.new_email {
            Some(new_email)
                if users_db_operations::read_user_by_email(&conn, &new_email).is_none() =>
            {
                match users_db_operations::update_email(&conn, auth_user.user_id, &new_email) {
                    Ok(_) => flash(&session, "Your email address has been updated."),
                    Err(e) => {
                        log::error!(
                            "Failed to update email for user {}: {}",
                            auth_user.user_id,
                            e
                        );
                        flash(&session, "Email change failed. Please try again.");
                    }
                }
            }
            _ => flash(&session, "That email address is no longer available."),
        },
        _ => flash(&session, "The email change link is invalid or has expired."),
    }
    redirect("/")
}
