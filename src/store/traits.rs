//! Unified `Database` trait: single async interface for all persistence
//! the ingestion core touches: users, entries and writing prompts.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{DatabaseError, EntryError};
use crate::store::model::{Entry, Inspiration, NewEntry, NewUser, User};

/// Backend-agnostic store for users, entries and inspirations.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Look up a user by routing key.
    async fn find_user_by_key(&self, user_key: &str) -> Result<Option<User>, DatabaseError>;

    /// Look up a user by login email (case-insensitive).
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError>;

    /// Register a user.
    async fn insert_user(&self, user: &NewUser) -> Result<User, DatabaseError>;

    /// Add one to the user's received-email counter. Returns the new count.
    async fn increment_emails_received(&self, user_id: i64) -> Result<i64, DatabaseError>;

    /// Number of entries the user owns.
    async fn count_entries(&self, user_id: i64) -> Result<i64, DatabaseError>;

    // ── Entries ─────────────────────────────────────────────────────

    /// The user's entry for `date`, if any.
    async fn find_entry(&self, user_id: i64, date: NaiveDate)
    -> Result<Option<Entry>, DatabaseError>;

    /// Validate and insert a new entry.
    async fn create_entry(&self, user_id: i64, entry: &NewEntry) -> Result<Entry, EntryError>;

    /// Validate and save an existing entry. Returns the stored state.
    async fn update_entry(&self, entry: &Entry) -> Result<Entry, EntryError>;

    // ── Inspirations ────────────────────────────────────────────────

    /// All writing prompts, in id order.
    async fn list_inspirations(&self) -> Result<Vec<Inspiration>, DatabaseError>;

    /// Add a writing prompt.
    async fn insert_inspiration(
        &self,
        category: Option<&str>,
        body: &str,
    ) -> Result<Inspiration, DatabaseError>;
}
