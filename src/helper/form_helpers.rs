use actix_session::Session;
use regex::Regex;
use std::sync::OnceLock;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"))
}

fn username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Must start with a letter; letters, digits, dots, underscores after.
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.]*$").expect("valid username regex"))
}

pub fn is_valid_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 64 && email_regex().is_match(email)
}

pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty() && username.len() <= 64 && username_regex().is_match(username)
}

pub fn is_valid_password(password: &str) -> bool {
    password.len() >= 8
}

// --- Flash messages ---
//
// One-shot notices stored in the session and consumed on the next page
// render, the conventional post/redirect/get pattern.

const FLASH_KEY: &str = "flash";

pub fn flash(session: &Session, message: &str) {
    if session.insert(FLASH_KEY, message.to_string()).is_err() {
        log::warn!("Failed to store flash message in session.");
    }
}

pub fn take_flash(session: &Session) -> Option<String> {
    let message = session.get::<String>(FLASH_KEY).unwrap_or(None);
    if message.is_some() {
        session.remove(FLASH_KEY);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_emails() {
        assert!(is_valid_email("reader@example.com"));
        assert!(is_valid_email("first.last@sub.domain.org"));
    }

    #[test]
    fn rejects_malformed_emails() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@example.com"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email(&format!("{}@example.com", "x".repeat(64))));
    }

    #[test]
    fn username_must_start_with_letter() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("alice_b.c99"));
        assert!(!is_valid_username("9lives"));
        assert!(!is_valid_username("_hidden"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
    }

    #[test]
    fn password_length_floor() {
        assert!(is_valid_password("12345678"));
        assert!(!is_valid_password("1234567"));
    }
}
