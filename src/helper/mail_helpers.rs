use crate::config::Config;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid mail address: {0}")]
    Address(String),
    #[error("Failed to build mail message: {0}")]
    Build(String),
    #[error("Failed to configure SMTP transport: {0}")]
    Transport(String),
    #[error("Failed to send mail: {0}")]
    Send(String),
}

/// Async SMTP mailer. When no MAIL_SERVER is configured it runs in no-op
/// mode and only logs what it would have sent, so development and tests need
/// no mail infrastructure.
#[derive(Clone)]
pub struct Mailer {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    sender: Mailbox,
    base_url: String,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Result<Self, MailError> {
        let sender = config
            .mail
            .sender
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(format!("MAIL_SENDER: {}", e)))?;

        let transport = if config.mail.server.trim().is_empty() {
            log::warn!("MAIL_SERVER is not configured; mail will be logged instead of sent.");
            None
        } else {
            let mut builder =
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.mail.server)
                    .map_err(|e| MailError::Transport(e.to_string()))?
                    .port(config.mail.port);
            if !config.mail.username.is_empty() {
                builder = builder.credentials(Credentials::new(
                    config.mail.username.clone(),
                    config.mail.password.clone(),
                ));
            }
            Some(Arc::new(builder.build()))
        };

        Ok(Mailer { transport, sender, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    pub async fn send_confirmation_email(
        &self,
        recipient: &str,
        username: &str,
        token: &str,
    ) -> Result<(), MailError> {
        let link = format!("{}/confirm/{}", self.base_url, token);
        let body = format!(
            "Hello {username},\n\n\
             Welcome to Quillpad! Please confirm your account by visiting:\n{link}\n\n\
             If you did not register, you can safely ignore this email.",
        );
        self.send(recipient, "Confirm your account", &body).await
    }

    pub async fn send_password_reset_email(
        &self,
        recipient: &str,
        username: &str,
        token: &str,
    ) -> Result<(), MailError> {
        let link = format!("{}/resetpassword/{}", self.base_url, token);
        let body = format!(
            "Hello {username},\n\n\
             To reset your password, visit:\n{link}\n\n\
             This link expires shortly. If you did not request a reset, ignore this email.",
        );
        self.send(recipient, "Reset your password", &body).await
    }

    /// Sent to the NEW address, proving the requester controls it.
    pub async fn send_email_change_email(
        &self,
        recipient: &str,
        username: &str,
        token: &str,
    ) -> Result<(), MailError> {
        let link = format!("{}/changeemail/{}", self.base_url, token);
        let body = format!(
            "Hello {username},\n\n\
             To confirm your new email address, visit:\n{link}\n\n\
             If you did not request this change, ignore this email.",
        );
        self.send(recipient, "Confirm your new email address", &body).await
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let transport = match &self.transport {
            Some(t) => t,
            None => {
                log::info!("Mail (no-op mode) to {}: {} -- {}", recipient, subject, body);
                return Ok(());
            }
        };

        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(format!("recipient: {}", e)))?;
        let email = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailError::Build(e.to_string()))?;

        transport.send(email).await.map_err(|e| MailError::Send(e.to_string()))?;
        log::info!("Sent mail to {}: {}", recipient, subject);
        Ok(())
    }
}
