//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Entry writes run the same
//! validations the web app applies: a body must be present, uploaded images
//! must decode, and a user has at most one entry per date.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::{DatabaseError, EntryError};
use crate::store::migrations;
use crate::store::model::{Entry, EntryImage, Inspiration, NewEntry, NewUser, User};
use crate::store::traits::Database;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn get_user(&self, id: i64) -> Result<User, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                row_to_user(&row).map_err(|e| DatabaseError::Serialization(format!("row parse: {e}")))
            }
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn query_one_user(&self, sql: &str, value: &str) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params![value])
            .await
            .map_err(|e| DatabaseError::Query(format!("find_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Serialization(format!("row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_user: {e}"))),
        }
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_entry: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_entry(&row),
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "entry".into(),
                id: id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("get_entry: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

const USER_COLUMNS: &str =
    "id, email, user_key, first_name, plan, send_timezone, emails_received, past_filter";

const ENTRY_COLUMNS: &str = "id, user_id, date, body, original_email_body, inspiration_id, image, image_kind, original_email";

fn row_to_user(row: &libsql::Row) -> Result<User, libsql::Error> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        user_key: row.get(2)?,
        first_name: row.get(3).ok(),
        plan: row.get::<String>(4).unwrap_or_default(),
        send_timezone: row.get::<String>(5).unwrap_or_default(),
        emails_received: row.get::<i64>(6).unwrap_or(0),
        past_filter: row.get(7).ok(),
    })
}

fn row_to_entry(row: &libsql::Row) -> Result<Entry, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Serialization(format!("row parse: {e}"));

    let date_str: String = row.get(2).map_err(parse)?;
    let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
        .map_err(|e| DatabaseError::Serialization(format!("bad entry date {date_str}: {e}")))?;

    let image_ref: Option<String> = row.get(6).ok();
    let image_kind: Option<String> = row.get(7).ok();
    let image = match (image_kind.as_deref(), image_ref) {
        (Some("remote"), Some(url)) => Some(EntryImage::Remote { url }),
        (_, Some(filename)) => Some(EntryImage::Stored { filename }),
        _ => None,
    };

    let original_email = row
        .get::<String>(8)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok());

    Ok(Entry {
        id: row.get(0).map_err(parse)?,
        user_id: row.get(1).map_err(parse)?,
        date,
        body: row.get::<String>(3).unwrap_or_default(),
        original_email_body: row.get(4).ok(),
        inspiration_id: row.get(5).ok(),
        image,
        original_email,
    })
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(i: Option<i64>) -> libsql::Value {
    match i {
        Some(i) => libsql::Value::Integer(i),
        None => libsql::Value::Null,
    }
}

fn opt_json(v: Option<&serde_json::Value>) -> libsql::Value {
    match v.and_then(|v| serde_json::to_string(v).ok()) {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Presence validations on an entry body.
fn validate_body(body: &str) -> Result<(), EntryError> {
    if body.trim().is_empty() {
        return Err(EntryError::Validation(vec!["Body can't be blank".into()]));
    }
    Ok(())
}

/// Columns written for an entry's image: (reference, kind, new bytes).
struct ImageColumns {
    reference: libsql::Value,
    kind: libsql::Value,
    data: libsql::Value,
}

/// Check an image and produce the columns to store for it.
///
/// Uploads must decode as a supported image; anything else is an image
/// processing failure.
fn process_image(image: Option<&EntryImage>) -> Result<ImageColumns, EntryError> {
    let Some(image) = image else {
        return Ok(ImageColumns {
            reference: libsql::Value::Null,
            kind: libsql::Value::Null,
            data: libsql::Value::Null,
        });
    };

    match image {
        EntryImage::Stored { filename } => Ok(ImageColumns {
            reference: libsql::Value::Text(filename.clone()),
            kind: libsql::Value::Text("stored".into()),
            data: libsql::Value::Null,
        }),
        EntryImage::Remote { url } => Ok(ImageColumns {
            reference: libsql::Value::Text(url.clone()),
            kind: libsql::Value::Text("remote".into()),
            data: libsql::Value::Null,
        }),
        EntryImage::Upload { filename, bytes } => {
            let reader = image::ImageReader::new(Cursor::new(bytes.as_slice()))
                .with_guessed_format()
                .map_err(|e| EntryError::ImageProcessing(format!("{filename}: {e}")))?;
            if reader.format().is_none() {
                return Err(EntryError::ImageProcessing(format!(
                    "{filename}: unrecognised image format"
                )));
            }
            let (width, height) = reader
                .into_dimensions()
                .map_err(|e| EntryError::ImageProcessing(format!("{filename}: {e}")))?;
            debug!(filename = %filename, width, height, "Image upload accepted");

            Ok(ImageColumns {
                reference: libsql::Value::Text(filename.clone()),
                kind: libsql::Value::Text("stored".into()),
                data: libsql::Value::Blob(bytes.clone()),
            })
        }
    }
}

/// Map a failed entry write to its error kind.
fn entry_write_error(op: &str, e: libsql::Error) -> EntryError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        EntryError::Validation(vec!["Date has already been taken".into()])
    } else {
        EntryError::Database(DatabaseError::Query(format!("{op}: {message}")))
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn find_user_by_key(&self, user_key: &str) -> Result<Option<User>, DatabaseError> {
        self.query_one_user(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_key = ?1"),
            user_key,
        )
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        self.query_one_user(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower(?1)"),
            email.trim(),
        )
        .await
    }

    async fn insert_user(&self, user: &NewUser) -> Result<User, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO users (email, user_key, first_name, plan, send_timezone, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    user.email.as_str(),
                    user.user_key.as_str(),
                    opt_text(user.first_name.as_deref()),
                    user.plan.as_str(),
                    user.send_timezone.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("UNIQUE constraint failed") {
                    DatabaseError::Constraint(format!("insert_user: {message}"))
                } else {
                    DatabaseError::Query(format!("insert_user: {message}"))
                }
            })?;

        let id = self.conn().last_insert_rowid();
        debug!(id, "User inserted into DB");
        self.get_user(id).await
    }

    async fn increment_emails_received(&self, user_id: i64) -> Result<i64, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE users SET emails_received = emails_received + 1, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_emails_received: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: user_id.to_string(),
            });
        }
        Ok(self.get_user(user_id).await?.emails_received)
    }

    async fn count_entries(&self, user_id: i64) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM entries WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_entries: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_entries: {e}"))),
        }
    }

    // ── Entries ─────────────────────────────────────────────────────

    async fn find_entry(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<Entry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries WHERE user_id = ?1 AND date = ?2 ORDER BY id LIMIT 1"
                ),
                params![user_id, date.format(DATE_FORMAT).to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_entry: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_entry(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_entry: {e}"))),
        }
    }

    async fn create_entry(&self, user_id: i64, entry: &NewEntry) -> Result<Entry, EntryError> {
        validate_body(&entry.body)?;
        let image = process_image(entry.image.as_ref())?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO entries (user_id, date, body, original_email_body, inspiration_id,
                    image, image_kind, image_data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    user_id,
                    entry.date.format(DATE_FORMAT).to_string(),
                    entry.body.as_str(),
                    opt_text(entry.original_email_body.as_deref()),
                    opt_int(entry.inspiration_id),
                    image.reference,
                    image.kind,
                    image.data,
                    now,
                ],
            )
            .await
            .map_err(|e| entry_write_error("create_entry", e))?;

        let id = self.conn().last_insert_rowid();
        debug!(id, user_id, date = %entry.date, "Entry inserted into DB");
        Ok(self.get_entry(id).await?)
    }

    async fn update_entry(&self, entry: &Entry) -> Result<Entry, EntryError> {
        validate_body(&entry.body)?;
        let image = process_image(entry.image.as_ref())?;

        let updated = self
            .conn()
            .execute(
                "UPDATE entries SET body = ?1, original_email_body = ?2, inspiration_id = ?3,
                    image = ?4, image_kind = ?5, image_data = COALESCE(?6, image_data),
                    original_email = ?7, updated_at = ?8
                 WHERE id = ?9",
                params![
                    entry.body.as_str(),
                    opt_text(entry.original_email_body.as_deref()),
                    opt_int(entry.inspiration_id),
                    image.reference,
                    image.kind,
                    image.data,
                    opt_json(entry.original_email.as_ref()),
                    Utc::now().to_rfc3339(),
                    entry.id,
                ],
            )
            .await
            .map_err(|e| entry_write_error("update_entry", e))?;

        if updated == 0 {
            return Err(EntryError::Database(DatabaseError::NotFound {
                entity: "entry".into(),
                id: entry.id.to_string(),
            }));
        }

        debug!(id = entry.id, "Entry updated in DB");
        Ok(self.get_entry(entry.id).await?)
    }

    // ── Inspirations ────────────────────────────────────────────────

    async fn list_inspirations(&self) -> Result<Vec<Inspiration>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, category, body FROM inspirations ORDER BY id", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_inspirations: {e}")))?;

        let mut inspirations = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let id: i64 = row
                        .get(0)
                        .map_err(|e| DatabaseError::Serialization(format!("row parse: {e}")))?;
                    inspirations.push(Inspiration {
                        id,
                        category: row.get(1).ok(),
                        body: row.get::<String>(2).unwrap_or_default(),
                    });
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_inspirations: {e}"))),
            }
        }
        Ok(inspirations)
    }

    async fn insert_inspiration(
        &self,
        category: Option<&str>,
        body: &str,
    ) -> Result<Inspiration, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO inspirations (category, body) VALUES (?1, ?2)",
                params![opt_text(category), body],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_inspiration: {e}")))?;

        Ok(Inspiration {
            id: self.conn().last_insert_rowid(),
            category: category.map(String::from),
            body: body.to_string(),
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
