//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default timezone for users without a recognised setting.
pub const DEFAULT_TIMEZONE: &str = "America/Denver";

/// Ingestion configuration, built once and injected into the resolvers.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Mail-routing domain (e.g. `dabble.me`).
    pub main_domain: String,
    /// Domain entry emails are sent from (e.g. `post.dabble.me`).
    /// Its `ai` variant marks the AI-reply routing.
    pub smtp_domain: String,
    /// Subdomains of `main_domain` that also route (e.g. `post.dabble.me`).
    pub routing_subdomains: Vec<String>,
    /// Email addresses of administrators.
    pub admin_emails: Vec<String>,
    /// Sender domains whose clients already soft-wrap plain text.
    pub soft_wrap_providers: Vec<String>,
    /// Attachment filenames known to be footer/signature images.
    pub footer_image_denylist: Vec<String>,
    /// Upper bound for probing a remote image URL.
    pub image_probe_timeout: Duration,
    /// Also notify admins when an email cannot be routed to a user.
    pub notify_admins_on_unrouted: bool,
    /// Analytics property id; tracking is disabled when `None`.
    pub analytics_id: Option<String>,
}

impl IngestConfig {
    /// Configuration for a routing domain with every other field defaulted.
    pub fn for_domain(main_domain: impl Into<String>) -> Self {
        let main_domain = main_domain.into();
        Self {
            smtp_domain: format!("post.{main_domain}"),
            main_domain,
            routing_subdomains: vec!["email".into(), "post".into(), "ai".into()],
            admin_emails: Vec::new(),
            soft_wrap_providers: vec!["yahoo.com".into()],
            footer_image_denylist: vec!["tmiFinal.png".into()],
            image_probe_timeout: Duration::from_secs(5),
            notify_admins_on_unrouted: false,
            analytics_id: None,
        }
    }

    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let main_domain = std::env::var("MAIN_DOMAIN")
            .map_err(|_| ConfigError::MissingEnvVar("MAIN_DOMAIN".into()))?;
        let mut config = Self::for_domain(main_domain);

        if let Ok(domain) = std::env::var("SMTP_DOMAIN") {
            config.smtp_domain = domain;
        }
        if let Ok(list) = std::env::var("ROUTING_SUBDOMAINS") {
            config.routing_subdomains = split_list(&list);
        }
        config.admin_emails = split_list(&std::env::var("ADMIN_EMAILS").unwrap_or_default());
        if let Ok(list) = std::env::var("SOFT_WRAP_PROVIDERS") {
            config.soft_wrap_providers = split_list(&list);
        }
        if let Ok(list) = std::env::var("FOOTER_IMAGE_DENYLIST") {
            config.footer_image_denylist = split_list(&list);
        }
        if let Ok(secs) = std::env::var("IMAGE_PROBE_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::InvalidValue {
                key: "IMAGE_PROBE_TIMEOUT_SECS".into(),
                message: format!("{e}"),
            })?;
            config.image_probe_timeout = Duration::from_secs(secs);
        }
        config.notify_admins_on_unrouted = std::env::var("NOTIFY_ADMINS_ON_UNROUTED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        config.analytics_id = std::env::var("GOOGLE_ANALYTICS_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(config)
    }

    /// Whether `email` belongs to an administrator.
    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|a| a.eq_ignore_ascii_case(email.trim()))
    }

    /// Host used by the AI-reply routing variant (`post.x` → `ai.x`).
    pub fn ai_reply_host(&self) -> String {
        self.smtp_domain.replace("post", "ai")
    }
}

/// SMTP settings for the notification sender.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `SMTP_HOST` is not set (log-only notifications).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("NOTIFY_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
