//! Stored entities: users, journal entries and writing prompts.

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TIMEZONE;
use crate::safety;

// ── User ────────────────────────────────────────────────────────────

/// Account level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    /// Derive the tier from a plan name ("Free", "PRO Monthly", ...).
    pub fn from_plan(plan: &str) -> Self {
        if plan.to_lowercase().contains("pro") {
            Self::Pro
        } else {
            Self::Free
        }
    }
}

/// A journal account. Referenced by the pipeline, owned by the store.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Per-user routing key, the local part of the user's inbound address.
    pub user_key: String,
    pub first_name: Option<String>,
    pub plan: String,
    /// IANA timezone name.
    pub send_timezone: String,
    pub emails_received: i64,
    /// Excludes entries from random-selection features. Never written here.
    pub past_filter: Option<String>,
}

impl User {
    pub fn tier(&self) -> Tier {
        Tier::from_plan(&self.plan)
    }

    pub fn is_pro(&self) -> bool {
        self.tier() == Tier::Pro
    }

    pub fn is_free(&self) -> bool {
        !self.is_pro()
    }

    /// The user's timezone, falling back to the service default.
    pub fn timezone(&self) -> Tz {
        self.send_timezone
            .trim()
            .parse::<Tz>()
            .or_else(|_| DEFAULT_TIMEZONE.parse::<Tz>())
            .unwrap_or(Tz::UTC)
    }
}

/// Fields for registering a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub user_key: String,
    pub first_name: Option<String>,
    pub plan: String,
    pub send_timezone: String,
}

impl NewUser {
    pub fn new(email: impl Into<String>, user_key: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            user_key: user_key.into(),
            first_name: None,
            plan: "Free".into(),
            send_timezone: DEFAULT_TIMEZONE.into(),
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.send_timezone = tz.into();
        self
    }
}

// ── Entry ───────────────────────────────────────────────────────────

/// Image attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryImage {
    /// Already persisted by the store.
    Stored { filename: String },
    /// New upload, processed by the store on save.
    Upload { filename: String, bytes: Vec<u8> },
    /// Remote image, fetched by the image service later.
    Remote { url: String },
}

/// One journal entry. At most one exists per (user, date).
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    /// Sanitized HTML fragment.
    pub body: String,
    /// Unsanitized email body, archived.
    pub original_email_body: Option<String>,
    pub inspiration_id: Option<i64>,
    pub image: Option<EntryImage>,
    /// Audit copy of the inbound email's metadata.
    pub original_email: Option<serde_json::Value>,
}

impl Entry {
    /// Body re-derived through the entry allow-list.
    pub fn sanitized_body(&self) -> String {
        safety::sanitize_html(&self.body)
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Fields for creating an entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub date: NaiveDate,
    pub body: String,
    pub original_email_body: Option<String>,
    pub inspiration_id: Option<i64>,
    pub image: Option<EntryImage>,
}

impl NewEntry {
    /// Same parameters without any image.
    pub fn without_image(&self) -> Self {
        Self {
            image: None,
            ..self.clone()
        }
    }
}

// ── Inspiration ─────────────────────────────────────────────────────

/// A canned writing prompt.
#[derive(Debug, Clone)]
pub struct Inspiration {
    pub id: i64,
    pub category: Option<String>,
    pub body: String,
}

/// Prompt categories never matched against replies.
const INELIGIBLE_CATEGORIES: &[&str] = &["import", "email", "tip"];

impl Inspiration {
    /// Whether this prompt can be linked from an emailed reply.
    pub fn is_eligible(&self) -> bool {
        let Some(category) = self.category.as_deref() else {
            return true;
        };
        !INELIGIBLE_CATEGORIES
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category.trim()))
    }
}
