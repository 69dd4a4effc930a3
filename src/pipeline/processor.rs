//! Email processor: orchestrates one inbound email end to end.
//!
//! 1. Charset repair and body cleaning
//! 2. Recipient → user resolution (routing miss short-circuits to diagnostics)
//! 3. Image selection, date resolution, prompt matching
//! 4. `EntryDecisionEngine::apply()`: merge or create, then side effects

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::error::Result;
use crate::notify::{Notification, Notifier};
use crate::pipeline::attachment::{AttachmentSelector, ImageProbe};
use crate::pipeline::body::BodyNormalizer;
use crate::pipeline::date;
use crate::pipeline::encoding::to_utf8;
use crate::pipeline::entry::{DecisionOutcome, EntryContext, EntryDecisionEngine};
use crate::pipeline::inspiration::InspirationMatcher;
use crate::pipeline::recipient::RecipientResolver;
use crate::pipeline::types::{InboundEmail, ProcessOutcome};
use crate::pipeline::user::UserResolver;
use crate::store::Database;
use crate::tracking::Tracker;

/// Source of the current instant.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// External collaborators the processor talks to.
pub struct Collaborators {
    pub db: Arc<dyn Database>,
    pub notifier: Arc<dyn Notifier>,
    pub tracker: Arc<dyn Tracker>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    pub probe: Arc<dyn ImageProbe>,
}

/// Turns inbound emails into journal entries.
pub struct EmailProcessor {
    config: Arc<IngestConfig>,
    db: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    recipients: RecipientResolver,
    normalizer: BodyNormalizer,
    selector: AttachmentSelector,
    engine: EntryDecisionEngine,
    clock: Clock,
}

/// Cleaned text fields of an email, computed before the user is known.
struct CleanedEmail {
    sender: String,
    subject: String,
    body: String,
    html: Option<String>,
    stripped_html: Option<String>,
    raw_body: String,
}

impl EmailProcessor {
    pub fn new(config: IngestConfig, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let Collaborators {
            db,
            notifier,
            tracker,
            diagnostics,
            probe,
        } = collaborators;

        Self {
            recipients: RecipientResolver::new(&config),
            normalizer: BodyNormalizer::new(&config),
            selector: AttachmentSelector::new(&config, probe),
            engine: EntryDecisionEngine::new(
                Arc::clone(&config),
                Arc::clone(&db),
                Arc::clone(&notifier),
                tracker,
                Arc::clone(&diagnostics),
            ),
            config,
            db,
            notifier,
            diagnostics,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock (tests pin "now" with this).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Process one inbound email.
    pub async fn process(&self, email: &InboundEmail) -> Result<ProcessOutcome> {
        let token = self.recipients.pick(&email.to, &email.cc);
        let cleaned = self.clean(email);

        let Some(user) =
            UserResolver::resolve(self.db.as_ref(), token.as_deref(), &email.from).await
        else {
            self.report_unrouted(token.as_deref(), &cleaned).await;
            return Ok(ProcessOutcome::Unrouted);
        };
        info!(user_id = user.id, token = ?token, "Inbound email resolved to user");

        let image = match self.selector.select(&user, email).await {
            Some(selected) => selected.into_entry_image().await,
            None => None,
        };

        let now = (self.clock)().with_timezone(&user.timezone());
        let date = date::resolve_entry_date(&cleaned.subject, &now);
        let inspiration_id = InspirationMatcher::find(self.db.as_ref(), &cleaned.raw_body).await;

        let body = match cleaned.html {
            Some(html) if user.is_pro() => html,
            _ => cleaned.body,
        };

        let original_email = json!({
            "subject": cleaned.subject,
            "cc": email.cc.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            "bcc": email.bcc.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            "spam_report": email.spam_report,
            "headers": email.headers,
            "charsets": email.charsets,
            "stripped_html": cleaned.stripped_html,
        });

        let ctx = EntryContext {
            ai_reply: self.recipients.is_ai_reply(&email.to, &email.cc, &email.bcc),
            user,
            date,
            body,
            raw_body: cleaned.raw_body,
            subject: cleaned.subject,
            inspiration_id,
            image,
            original_email,
        };

        let outcome = match self.engine.apply(&ctx).await? {
            DecisionOutcome::Merged { entry } => ProcessOutcome::Merged { entry_id: entry.id },
            DecisionOutcome::Created { entry } => ProcessOutcome::Created { entry_id: entry.id },
            DecisionOutcome::NotSaved { reason, .. } => ProcessOutcome::NotSaved { reason },
        };
        info!(user_id = ctx.user.id, date = %ctx.date, outcome = outcome.label(), "Inbound email processed");
        Ok(outcome)
    }

    fn clean(&self, email: &InboundEmail) -> CleanedEmail {
        let sender = email.from.email().to_lowercase();
        let plain = to_utf8(email.body.as_bytes(), email.charset("text"));
        let stripped_html = email
            .html_bytes()
            .map(|bytes| to_utf8(bytes, email.charset("html")));
        let html = stripped_html
            .as_deref()
            .map(|html| self.normalizer.clean_html(html))
            .filter(|html| !html.trim().is_empty());

        CleanedEmail {
            subject: to_utf8(email.subject.as_bytes(), email.charset("subject")),
            body: self.normalizer.clean_message(&plain, &sender),
            html,
            stripped_html,
            raw_body: to_utf8(email.raw_body.as_bytes(), None),
            sender,
        }
    }

    async fn report_unrouted(&self, token: Option<&str>, cleaned: &CleanedEmail) {
        warn!(sender = %cleaned.sender, token = ?token, "Inbound entry not associated to user");

        self.diagnostics.capture(
            Diagnostic::error("Inbound entry not associated to user")
                .with_identity(token.unwrap_or_default(), cleaned.sender.clone())
                .with("subject", &cleaned.subject)
                .with("body", &cleaned.body)
                .with("html", &cleaned.html)
                .with("raw_body", &cleaned.raw_body),
        );

        if !self.config.notify_admins_on_unrouted {
            return;
        }
        for admin in &self.config.admin_emails {
            let notice = Notification::NoUserFound {
                admin_email: admin.clone(),
                sender: cleaned.sender.clone(),
                subject: cleaned.subject.clone(),
            };
            if let Err(e) = self.notifier.notify(notice).await {
                warn!(admin = %admin, error = %e, "Unrouted-email notice failed");
            }
        }
    }
}
