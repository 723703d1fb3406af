use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use config;

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub web: WebConfig,
    pub mail: MailConfig,
    pub database_path: String,
    pub media_path: String,
    pub base_url: String,
    pub session_secret_key: String,
    pub token_secret_key: String,
    pub token_ttl_secs: u64,
    pub admin_email: String,
    pub posts_per_page: u32,
    pub comments_per_page: u32,
    pub followers_per_page: u32,
    pub log_level: String,
    pub use_secure_cookies: bool,
}

impl Config {
    pub fn from_env(env_path: &Path) -> Result<Self, config::ConfigError> {
        dotenvy::from_path(env_path).map_err(|e| {
            config::ConfigError::Message(format!(
                "FATAL: Failed to load .env file from '{}'. Error: {}",
                env_path.display(),
                e
            ))
        })?;

        let database_path = require_var("DATABASE_PATH")?;
        let media_path = require_var("MEDIA_PATH")?;
        let session_secret_key = require_var("SESSION_SECRET_KEY")?;
        let token_secret_key = require_var("TOKEN_SECRET_KEY")?;
        let admin_email = require_var("ADMIN_EMAIL")?;

        // The cookie session key must decode to 64 bytes.
        if session_secret_key.len() != 128
            || !session_secret_key.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(config::ConfigError::Message(
                "FATAL: 'SESSION_SECRET_KEY' must be 128 hexadecimal characters long (64 bytes)."
                    .to_string(),
            ));
        }

        if token_secret_key.len() < 32 {
            return Err(config::ConfigError::Message(
                "FATAL: 'TOKEN_SECRET_KEY' must be at least 32 characters long.".to_string(),
            ));
        }

        for (name, value) in [("DATABASE_PATH", &database_path), ("MEDIA_PATH", &media_path)] {
            if Path::new(value).is_relative() {
                return Err(config::ConfigError::Message(format!(
                    "FATAL: The '{}' in your .env file is a relative path ('{}'). It MUST be an absolute path.",
                    name, value
                )));
            }
        }

        let base_url = env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let use_secure_cookies = env::var("USE_SECURE_COOKIES")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let token_ttl_secs = parse_var_or("TOKEN_TTL_SECS", 3600u64)?;
        let posts_per_page = parse_var_or("POSTS_PER_PAGE", 10u32)?;
        let comments_per_page = parse_var_or("COMMENTS_PER_PAGE", 10u32)?;
        let followers_per_page = parse_var_or("FOLLOWERS_PER_PAGE", 20u32)?;

        let mail_server = env::var("MAIL_SERVER").unwrap_or_default();
        let mail_port = parse_var_or("MAIL_PORT", 587u16)?;
        let mail_username = env::var("MAIL_USERNAME").unwrap_or_default();
        let mail_password = env::var("MAIL_PASSWORD").unwrap_or_default();
        let mail_sender =
            env::var("MAIL_SENDER").unwrap_or_else(|_| "Quillpad <noreply@localhost>".to_string());

        let builder = config::Config::builder()
            // Base settings (web host/port) come from the TOML file.
            .add_source(config::File::new("config/default.toml", config::FileFormat::Toml))
            .set_override("database_path", database_path)?
            .set_override("media_path", media_path)?
            .set_override("base_url", base_url)?
            .set_override("session_secret_key", session_secret_key)?
            .set_override("token_secret_key", token_secret_key)?
            .set_override("token_ttl_secs", token_ttl_secs as i64)?
            .set_override("admin_email", admin_email)?
            .set_override("posts_per_page", posts_per_page as i64)?
            .set_override("comments_per_page", comments_per_page as i64)?
            .set_override("followers_per_page", followers_per_page as i64)?
            .set_override("log_level", log_level)?
            .set_override("use_secure_cookies", use_secure_cookies)?
            .set_override("mail.server", mail_server)?
            .set_override("mail.port", mail_port as i64)?
            .set_override("mail.username", mail_username)?
            .set_override("mail.password", mail_password)?
            .set_override("mail.sender", mail_sender)?
            .build()?;

        builder.try_deserialize()
    }

    /// Full path of the SQLite database file inside the configured directory.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("quillpad.db")
    }

    /// Directory where generated avatar renditions are stored.
    pub fn avatar_dir(&self) -> PathBuf {
        PathBuf::from(&self.media_path).join("avatars")
    }
}

fn require_var(name: &str) -> Result<String, config::ConfigError> {
    env::var(name).map_err(|_| {
        config::ConfigError::Message(format!(
            "FATAL: Environment variable '{}' is not set in your .env file.",
            name
        ))
    })
}

fn parse_var_or<T>(name: &str, default: T) -> Result<T, config::ConfigError>
where
    T: std::str::FromStr + ToString,
{
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            config::ConfigError::Message(format!(
                "FATAL: Environment variable '{}' has an invalid value ('{}').",
                name, raw
            ))
        }),
        Err(_) => Ok(default),
    }
}
