use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a signed token is allowed to be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Confirm,
    PasswordReset,
    EmailChange,
}

impl TokenPurpose {
    fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::Confirm => "confirm",
            TokenPurpose::PasswordReset => "reset",
            TokenPurpose::EmailChange => "change_email",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user id the token was minted for.
    pub sub: i64,
    pub purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_email: Option<String>,
    pub exp: i64,
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Token was issued for a different purpose")]
    WrongPurpose,
    #[error("Token is invalid")]
    Invalid,
}

/// Mints a signed, time-limited token for the given user and purpose.
/// `new_email` is carried only by email-change tokens.
pub fn generate_token(
    secret: &str,
    ttl_secs: u64,
    user_id: i64,
    purpose: TokenPurpose,
    new_email: Option<String>,
) -> Result<String, TokenError> {
    let claims = TokenClaims {
        sub: user_id,
        purpose: purpose.as_str().to_string(),
        new_email,
        exp: Utc::now().timestamp() + ttl_secs as i64,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|_| TokenError::Invalid)
}

/// Verifies signature, expiry, and purpose. A token minted for one purpose
/// never redeems for another.
pub fn verify_token(
    secret: &str,
    token: &str,
    expected: TokenPurpose,
) -> Result<TokenClaims, TokenError> {
    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    })?;

    if data.claims.purpose != expected.as_str() {
        return Err(TokenError::WrongPurpose);
    }
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-key-0123456789abcdef";

    #[test]
    fn token_roundtrips_for_matching_purpose() {
        let token =
            generate_token(SECRET, 3600, 42, TokenPurpose::Confirm, None).unwrap();
        let claims = verify_token(SECRET, &token, TokenPurpose::Confirm).unwrap();
        assert_eq!(claims.sub, 42);
        assert!(claims.new_email.is_none());
    }

    #[test]
    fn token_rejected_for_other_purpose() {
        let token =
            generate_token(SECRET, 3600, 42, TokenPurpose::Confirm, None).unwrap();
        let err = verify_token(SECRET, &token, TokenPurpose::PasswordReset).unwrap_err();
        assert!(matches!(err, TokenError::WrongPurpose));
    }

    #[test]
    fn token_rejected_after_expiry() {
        // Sign claims whose exp is well past the default 60s leeway.
        let claims = TokenClaims {
            sub: 42,
            purpose: "confirm".to_string(),
            new_email: None,
            exp: Utc::now().timestamp() - 300,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        let err = verify_token(SECRET, &token, TokenPurpose::Confirm).unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[test]
    fn token_rejected_with_wrong_secret() {
        let token =
            generate_token(SECRET, 3600, 42, TokenPurpose::Confirm, None).unwrap();
        let err = verify_token("a-completely-different-secret-key", &token, TokenPurpose::Confirm)
            .unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[test]
    fn email_change_token_carries_payload() {
        let token = generate_token(
            SECRET,
            3600,
            7,
            TokenPurpose::EmailChange,
            Some("new@example.com".to_string()),
        )
        .unwrap();
        let claims = verify_token(SECRET, &token, TokenPurpose::EmailChange).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.new_email.as_deref(), Some("new@example.com"));
    }
}
