//! Mail delivery seam.
//!
//! [`SmtpMailer`] sends plain-text mail through an SMTP relay with the
//! `lettre` async transport. [`LogMailer`] stands in when SMTP is not
//! configured and only logs what would have been sent.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A plain-text mail to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Receipt for a delivered mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub to: String,
    /// Relay response, or a note from non-sending mailers.
    pub response: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send_mail(&self, mail: MailRequest) -> Result<Sent, MailError>;

    /// Short name for logs and `/health`.
    fn kind(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// SmtpMailer
// ---------------------------------------------------------------------------

pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the transport. No connection is opened until the first send.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let from: Mailbox = config.from_address.parse()?;

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);
        if let (Some(user), Some(pass)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_mail(&self, mail: MailRequest) -> Result<Sent, MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(mail.to.parse()?)
            .subject(mail.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .map_err(|e| MailError::Build(e.to_string()))?;

        let response = self.transport.send(message).await?;
        let response = response.message().collect::<Vec<_>>().join(" ");

        tracing::info!(to = %mail.to, subject = %mail.subject, "Mail sent");
        Ok(Sent {
            to: mail.to,
            response,
        })
    }

    fn kind(&self) -> &'static str {
        "smtp"
    }
}

// ---------------------------------------------------------------------------
// LogMailer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_mail(&self, mail: MailRequest) -> Result<Sent, MailError> {
        tracing::info!(
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "SMTP not configured, mail logged instead of sent"
        );
        Ok(Sent {
            to: mail.to,
            response: "logged".into(),
        })
    }

    fn kind(&self) -> &'static str {
        "log"
    }
}
