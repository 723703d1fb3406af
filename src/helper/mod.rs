pub mod auth_helpers;
pub mod avatar_helpers;
pub mod blog_helpers;
pub mod form_helpers;
pub mod mail_helpers;
pub mod sanitization_helpers;
