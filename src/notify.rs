//! Outbound user notifications.
//!
//! The pipeline hands a [`Notification`] to a [`Notifier`] and moves on;
//! delivery problems are logged by the caller and never change an outcome.

use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::store::{Entry, User};

/// A message to a user or operator.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Sent once an account is registered.
    Welcome { user: User },
    /// Sent after the user's first emailed entry.
    SecondWelcome { user: User },
    /// An emailed entry could not be stored; carries what was received.
    FailedEntry {
        user: User,
        error: String,
        date: NaiveDate,
        body: String,
    },
    /// Ask the AI responder to reply to an entry.
    AiResponse { user: User, entry: Entry },
    /// An inbound email matched no account (operator notice).
    NoUserFound {
        admin_email: String,
        sender: String,
        subject: String,
    },
}

impl Notification {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::SecondWelcome { .. } => "second_welcome",
            Self::FailedEntry { .. } => "failed_entry",
            Self::AiResponse { .. } => "ai_response",
            Self::NoUserFound { .. } => "no_user_found",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Self::Welcome { user }
            | Self::SecondWelcome { user }
            | Self::FailedEntry { user, .. }
            | Self::AiResponse { user, .. } => &user.email,
            Self::NoUserFound { admin_email, .. } => admin_email,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Self::Welcome { .. } => "Welcome! Reply to this email to write your first entry".into(),
            Self::SecondWelcome { .. } => "Your first entry is saved".into(),
            Self::FailedEntry { date, .. } => {
                format!("We couldn't save your entry for {}", date.format("%B %-d, %Y"))
            }
            Self::AiResponse { entry, .. } => {
                format!("Re: your entry for {}", entry.date.format("%B %-d, %Y"))
            }
            Self::NoUserFound { subject, .. } => format!("Inbound entry not associated to user: {subject}"),
        }
    }

    /// Plain-text body.
    pub fn body(&self) -> String {
        match self {
            Self::Welcome { user } => format!(
                "Hi {},\n\nReply to any of our emails and your reply becomes a journal entry for that day.",
                greeting_name(user)
            ),
            Self::SecondWelcome { user } => format!(
                "Hi {},\n\nYour first entry arrived safely. Keep replying and your journal will fill itself in.",
                greeting_name(user)
            ),
            Self::FailedEntry { error, body, .. } => format!(
                "Something went wrong saving your entry ({error}).\n\nHere is what we received, so nothing is lost:\n\n{body}"
            ),
            Self::AiResponse { entry, .. } => {
                format!("Entry {} for {} is ready for a reply.", entry.id, entry.date)
            }
            Self::NoUserFound { sender, subject, .. } => {
                format!("From: {sender}\nSubject: {subject}")
            }
        }
    }
}

fn greeting_name(user: &User) -> &str {
    user.first_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("there")
}

/// Delivers notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Sends notifications as plain-text email through an SMTP relay.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| NotifyError::InvalidAddress {
                address: self.config.from_address.clone(),
                reason: format!("{e}"),
            })?;
        let to: Mailbox = notification
            .recipient()
            .parse()
            .map_err(|e| NotifyError::InvalidAddress {
                address: notification.recipient().to_string(),
                reason: format!("{e}"),
            })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(notification.subject())
            .body(notification.body())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let message = self.build_message(&notification)?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&self.config.host)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| NotifyError::Transport(format!("send task failed: {e}")))?
            .map_err(|e| NotifyError::Transport(format!("SMTP send failed: {e}")))?;

        info!(
            kind = notification.kind(),
            to = notification.recipient(),
            "Notification sent"
        );
        Ok(())
    }
}

// ── Log only ────────────────────────────────────────────────────────

/// Records notifications in the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            kind = notification.kind(),
            to = notification.recipient(),
            subject = %notification.subject(),
            "Notification (log only)"
        );
        Ok(())
    }
}
