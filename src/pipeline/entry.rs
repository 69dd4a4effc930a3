//! Merge-or-create decision for a resolved email, with its recovery ladder
//! and the side effects that follow every processed email.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::error::{EntryError, PipelineError, Result};
use crate::notify::{Notification, Notifier};
use crate::pipeline::encoding;
use crate::store::{Database, Entry, EntryImage, NewEntry, User};
use crate::tracking::Tracker;

const PROCESSING_ERROR: &str = "Error processing entry via email";

/// Everything the engine needs about one resolved email.
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub user: User,
    pub date: NaiveDate,
    /// Cleaned body chosen for the entry.
    pub body: String,
    /// Raw body, archived on the entry.
    pub raw_body: String,
    pub subject: String,
    pub inspiration_id: Option<i64>,
    pub image: Option<EntryImage>,
    /// Audit copy of the inbound email's metadata.
    pub original_email: Value,
    /// Addressed to the AI-reply routing variant.
    pub ai_reply: bool,
}

/// Terminal state of the decision.
#[derive(Debug, Clone)]
pub enum DecisionOutcome {
    Merged { entry: Entry },
    Created { entry: Entry },
    /// Nothing could be saved; the user was sent a failed-entry notice.
    /// `created` holds an entry that was inserted but failed its final save.
    NotSaved {
        reason: String,
        created: Option<Entry>,
    },
}

/// Applies a resolved email to the user's entry for its date.
pub struct EntryDecisionEngine {
    config: Arc<IngestConfig>,
    db: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
    tracker: Arc<dyn Tracker>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl EntryDecisionEngine {
    pub fn new(
        config: Arc<IngestConfig>,
        db: Arc<dyn Database>,
        notifier: Arc<dyn Notifier>,
        tracker: Arc<dyn Tracker>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            config,
            db,
            notifier,
            tracker,
            diagnostics,
        }
    }

    /// Merge into the existing entry for the date or create a new one,
    /// then run the per-email side effects.
    ///
    /// Only a failed encoding-repair retry is returned as an error.
    pub async fn apply(&self, ctx: &EntryContext) -> Result<DecisionOutcome> {
        let outcome = match self.db.find_entry(ctx.user.id, ctx.date).await {
            Ok(Some(entry)) => self.merge(ctx, entry).await,
            Ok(None) => self.create(ctx).await?,
            Err(e) => {
                self.capture(
                    ctx,
                    Diagnostic::error(PROCESSING_ERROR)
                        .with("reason", "Could not look up existing entry")
                        .with("error", e.to_string())
                        .with("subject", &ctx.subject)
                        .with("date", ctx.date),
                );
                self.fail(ctx, &e.to_string(), None).await
            }
        };

        self.count_received(ctx).await;

        if let DecisionOutcome::Created { entry }
        | DecisionOutcome::NotSaved {
            created: Some(entry),
            ..
        } = &outcome
        {
            self.respond_as_ai(ctx, entry).await;
        }

        Ok(outcome)
    }

    // ── Merge ───────────────────────────────────────────────────────

    async fn merge(&self, ctx: &EntryContext, mut entry: Entry) -> DecisionOutcome {
        debug!(entry_id = entry.id, date = %ctx.date, "Merging into existing entry");

        entry.original_email = Some(ctx.original_email.clone());
        entry.body = merge_bodies(&entry.body, &ctx.body);
        if ctx.user.is_free() {
            entry.body = entry.sanitized_body();
        }
        entry.original_email_body = Some(ctx.raw_body.clone());
        if ctx.inspiration_id.is_some() {
            entry.inspiration_id = ctx.inspiration_id;
        }
        if !entry.has_image() {
            entry.image = ctx.image.clone();
        }

        match self.db.update_entry(&entry).await {
            Ok(saved) => {
                info!(user_id = ctx.user.id, entry_id = saved.id, date = %ctx.date, "Entry merged");
                self.tracker.track("Merged", &ctx.user.user_key).await;
                self.respond_as_ai(ctx, &saved).await;
                DecisionOutcome::Merged { entry: saved }
            }
            Err(e) => {
                self.capture(
                    ctx,
                    Diagnostic::error(PROCESSING_ERROR)
                        .with("reason", "Could not save existing entry")
                        .with("subject", &ctx.subject)
                        .with("entry_id", entry.id)
                        .with("errors", e.to_string()),
                );
                self.fail(ctx, &e.to_sentence(), None).await
            }
        }
    }

    // ── Create ──────────────────────────────────────────────────────

    async fn create(&self, ctx: &EntryContext) -> Result<DecisionOutcome> {
        debug!(user_id = ctx.user.id, date = %ctx.date, "Creating entry");

        let params = NewEntry {
            date: ctx.date,
            body: ctx.body.clone(),
            original_email_body: Some(ctx.raw_body.clone()),
            inspiration_id: ctx.inspiration_id,
            image: ctx.image.clone(),
        };

        let (created, create_error) = match self.db.create_entry(ctx.user.id, &params).await {
            Ok(entry) => (Some(entry), None),
            Err(EntryError::ImageProcessing(reason)) => {
                let retry = self.db.create_entry(ctx.user.id, &params.without_image()).await;
                self.capture(
                    ctx,
                    Diagnostic::error("Error processing image via email")
                        .with("reason", &reason)
                        .with("image", image_label(params.image.as_ref()))
                        .with("subject", &ctx.subject)
                        .with("entry_id", retry.as_ref().ok().map(|e| e.id)),
                );
                match retry {
                    Ok(entry) => (Some(entry), None),
                    Err(e) => (None, Some(e)),
                }
            }
            Err(e @ EntryError::Validation(_)) => {
                self.capture(
                    ctx,
                    Diagnostic::error(PROCESSING_ERROR)
                        .with("reason", "Validation failed")
                        .with("error", e.to_string())
                        .with("subject", &ctx.subject),
                );
                (None, Some(e))
            }
            Err(e) => {
                self.capture(
                    ctx,
                    Diagnostic::error(PROCESSING_ERROR)
                        .with("error", e.to_string())
                        .with("subject", &ctx.subject)
                        .with("body", &ctx.body)
                        .with("raw_body", &ctx.raw_body),
                );
                warn!(user_id = ctx.user.id, error = %e, "Entry create failed, retrying as latin-1");

                let repaired = NewEntry {
                    body: encoding::latin1_to_utf8(ctx.body.as_bytes()),
                    original_email_body: Some(encoding::latin1_to_utf8(ctx.raw_body.as_bytes())),
                    ..params.clone()
                };
                let entry = self
                    .db
                    .create_entry(ctx.user.id, &repaired)
                    .await
                    .map_err(PipelineError::EncodingRepairFailed)?;
                (Some(entry), Some(e))
            }
        };

        let Some(mut entry) = created else {
            let error = create_error.map(|e| e.to_sentence()).unwrap_or_default();
            self.capture(
                ctx,
                Diagnostic::error(PROCESSING_ERROR)
                    .with("reason", "Could not save new entry")
                    .with("rescue_error", &error)
                    .with("body", &ctx.body)
                    .with("date", ctx.date),
            );
            return Ok(self.fail(ctx, &error, None).await);
        };

        entry.original_email = Some(ctx.original_email.clone());
        if ctx.user.is_free() {
            entry.body = entry.sanitized_body();
        }

        Ok(match self.db.update_entry(&entry).await {
            Ok(saved) => {
                info!(user_id = ctx.user.id, entry_id = saved.id, date = %ctx.date, "Entry created");
                self.tracker.track("New", &ctx.user.user_key).await;
                DecisionOutcome::Created { entry: saved }
            }
            Err(e) => {
                self.capture(
                    ctx,
                    Diagnostic::error(PROCESSING_ERROR)
                        .with("reason", "Could not save new entry")
                        .with("errors", e.to_string())
                        .with("rescue_error", create_error.map(|e| e.to_string()))
                        .with("body", &ctx.body)
                        .with("date", ctx.date),
                );
                self.fail(ctx, &e.to_sentence(), Some(entry)).await
            }
        })
    }

    // ── Side effects ────────────────────────────────────────────────

    /// Bump the received counter; the first email with a first entry earns
    /// the second welcome. Failures here are reported, never returned.
    async fn count_received(&self, ctx: &EntryContext) {
        let received = match self.db.increment_emails_received(ctx.user.id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(user_id = ctx.user.id, error = %e, "Failed to count received email");
                return;
            }
        };
        if received != 1 {
            return;
        }

        match self.db.count_entries(ctx.user.id).await {
            Ok(1) => {
                let welcome = Notification::SecondWelcome {
                    user: ctx.user.clone(),
                };
                if let Err(e) = self.notifier.notify(welcome).await {
                    self.capture(
                        ctx,
                        Diagnostic::error("Error sending email")
                            .with("email_type", "Second Welcome Email")
                            .with("error", e.to_string()),
                    );
                }
            }
            Ok(_) => {}
            Err(e) => warn!(user_id = ctx.user.id, error = %e, "Failed to count entries"),
        }
    }

    async fn respond_as_ai(&self, ctx: &EntryContext, entry: &Entry) {
        if !ctx.ai_reply || !self.config.is_admin(&ctx.user.email) {
            return;
        }
        let request = Notification::AiResponse {
            user: ctx.user.clone(),
            entry: entry.clone(),
        };
        if let Err(e) = self.notifier.notify(request).await {
            warn!(entry_id = entry.id, error = %e, "AI response request failed");
        }
    }

    /// Tell the user their entry could not be saved.
    async fn fail(&self, ctx: &EntryContext, error: &str, created: Option<Entry>) -> DecisionOutcome {
        warn!(user_id = ctx.user.id, date = %ctx.date, error, "Entry not saved");
        let notice = Notification::FailedEntry {
            user: ctx.user.clone(),
            error: error.to_string(),
            date: ctx.date,
            body: ctx.body.clone(),
        };
        if let Err(e) = self.notifier.notify(notice).await {
            warn!(user_id = ctx.user.id, error = %e, "Failed-entry notification failed");
        }
        DecisionOutcome::NotSaved {
            reason: error.to_string(),
            created,
        }
    }

    fn capture(&self, ctx: &EntryContext, diagnostic: Diagnostic) {
        self.diagnostics
            .capture(diagnostic.with_identity(ctx.user.id.to_string(), ctx.user.email.clone()));
    }
}

/// Append `addition` under a horizontal rule. An empty side contributes
/// nothing and no rule is added.
pub fn merge_bodies(existing: &str, addition: &str) -> String {
    match (existing.trim().is_empty(), addition.trim().is_empty()) {
        (false, false) => format!("{existing}<hr>{addition}"),
        (true, _) => addition.to_string(),
        (false, true) => existing.to_string(),
    }
}

fn image_label(image: Option<&EntryImage>) -> Option<String> {
    image.map(|image| match image {
        EntryImage::Stored { filename } | EntryImage::Upload { filename, .. } => filename.clone(),
        EntryImage::Remote { url } => url.clone(),
    })
}
