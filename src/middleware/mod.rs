use actix_session::{Session, SessionExt};
use actix_web::{
    body::EitherBody,
    dev::{self, forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, FromRequest, HttpRequest, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use serde::Serialize;
use std::future::{ready, Ready as StdReady};

use crate::models::db_operations::users_db_operations;
use crate::models::User;
use crate::DbPool;

/// Extraction failure for login-required pages: anonymous visitors are sent
/// to the login form instead of getting a bare error page.
#[derive(Debug)]
pub struct LoginRequired;

impl std::fmt::Display for LoginRequired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Login required.")
    }
}

impl actix_web::ResponseError for LoginRequired {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::FOUND
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::Found().append_header(("location", "/login")).finish()
    }
}

/// The logged-in identity carried by the session cookie. Extraction
/// redirects to /login when there is no session, so handlers that take this
/// are implicitly login-required.
#[derive(Serialize)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub username: String,
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = StdReady<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let session = req.get_session();
        if let (Ok(Some(user_id)), Ok(Some(username))) =
            (session.get("user_id"), session.get("username"))
        {
            ready(Ok(AuthenticatedUser { user_id, username }))
        } else {
            ready(Err(LoginRequired.into()))
        }
    }
}

/// Loads the full user record for the current session, if any.
pub fn current_user(pool: &web::Data<DbPool>, session: &Session) -> Option<User> {
    let user_id: i64 = session.get("user_id").ok().flatten()?;
    let conn = pool.get().ok()?;
    users_db_operations::read_user_by_id(&conn, user_id)
}

pub fn login_session(session: &Session, user: &User) -> Result<(), Error> {
    session.insert("user_id", user.id)?;
    session.insert("username", user.username.clone())?;
    Ok(())
}

// Paths the confirmation gate never intercepts: the account-management pages
// themselves, plus static assets.
const GATE_EXEMPT_PREFIXES: &[&str] = &[
    "/login",
    "/logout",
    "/register",
    "/confirm",
    "/unconfirmed",
    "/reconfirm",
    "/changepassword",
    "/resetpasswordrequest",
    "/resetpassword",
    "/changeemailrequest",
    "/changeemail",
    "/media",
    "/static",
];

fn is_gate_exempt(path: &str) -> bool {
    GATE_EXEMPT_PREFIXES
        .iter()
        .any(|p| path == *p || path.starts_with(&format!("{}/", p)))
}

/// Redirects logged-in but unconfirmed accounts to /unconfirmed for every
/// page outside account management, and refreshes `last_seen` on each
/// authenticated request.
pub struct ConfirmedAccountGate;

impl<S, B> Transform<S, ServiceRequest> for ConfirmedAccountGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = ConfirmedAccountGateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(ConfirmedAccountGateMiddleware { service })
    }
}

pub struct ConfirmedAccountGateMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for ConfirmedAccountGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let session = req.get_session();
        let user_id: Option<i64> = session.get("user_id").unwrap_or(None);

        let mut redirect_unconfirmed = false;
        if let (Some(user_id), Some(pool)) = (user_id, req.app_data::<web::Data<DbPool>>()) {
            if let Ok(conn) = pool.get() {
                if users_db_operations::touch_last_seen(&conn, user_id).is_err() {
                    log::warn!("Failed to refresh last_seen for user {}", user_id);
                }
                if let Some(user) = users_db_operations::read_user_by_id(&conn, user_id) {
                    if !user.confirmed && !is_gate_exempt(req.path()) {
                        redirect_unconfirmed = true;
                    }
                } else {
                    // Stale cookie for a deleted account.
                    session.clear();
                }
            }
        }

        if redirect_unconfirmed {
            Box::pin(async move {
                let (http_req, _payload) = req.into_parts();
                let res = HttpResponse::Found()
                    .append_header(("location", "/unconfirmed"))
                    .finish()
                    .map_into_right_body();
                Ok(ServiceResponse::new(http_req, res))
            })
        } else {
            let fut = self.service.call(req);
            Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn anonymous_visitors_are_redirected_to_login() {
        let res = LoginRequired.error_response();
        assert_eq!(res.status(), actix_web::http::StatusCode::FOUND);
        assert_eq!(res.headers().get("location").unwrap(), "/login");
    }

    #[test]
    fn gate_exemptions_cover_account_pages_only() {
        assert!(is_gate_exempt("/login"));
        assert!(is_gate_exempt("/confirm/some.token.here"));
        assert!(is_gate_exempt("/resetpassword/abc"));
        assert!(is_gate_exempt("/media/avatars/a/big.jpg"));
        assert!(!is_gate_exempt("/"));
        assert!(!is_gate_exempt("/write"));
        assert!(!is_gate_exempt("/user/alice"));
        assert!(!is_gate_exempt("/confirmation"));
    }
}
