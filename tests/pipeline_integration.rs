//! End-to-end tests for inbound email processing.
//!
//! Each test builds an `EmailProcessor` over an in-memory libSQL store with
//! recording notifier, tracker, diagnostics and image-probe fakes, and a
//! clock pinned to 2024-06-03 12:00 in America/Denver.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use image::ImageFormat;

use dabble_inbound::config::IngestConfig;
use dabble_inbound::diagnostics::{Diagnostic, DiagnosticsSink};
use dabble_inbound::error::{DatabaseError, EntryError, Error, NotifyError, PipelineError};
use dabble_inbound::notify::{Notification, Notifier};
use dabble_inbound::pipeline::attachment::{ImageInfo, ImageProbe};
use dabble_inbound::pipeline::{
    Attachment, AttachmentData, Collaborators, EmailProcessor, InboundEmail, ProcessOutcome,
};
use dabble_inbound::safety;
use dabble_inbound::store::{
    Database, Entry, EntryImage, Inspiration, LibSqlBackend, NewEntry, NewUser, User,
};
use dabble_inbound::tracking::Tracker;

const PRODUCT_SUBJECT: &str = "Re: It's Saturday, June 1. How was your day?";

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|n| n.kind()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTracker {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingTracker {
    fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tracker for RecordingTracker {
    async fn track(&self, action: &str, label: &str) {
        self.events
            .lock()
            .unwrap()
            .push((action.to_string(), label.to_string()));
    }
}

#[derive(Default)]
struct RecordingDiagnostics {
    captured: Mutex<Vec<Diagnostic>>,
}

impl RecordingDiagnostics {
    fn messages(&self) -> Vec<String> {
        self.captured
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.message.clone())
            .collect()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn capture(&self, diagnostic: Diagnostic) {
        self.captured.lock().unwrap().push(diagnostic);
    }
}

#[derive(Default)]
struct FakeProbe {
    images: HashMap<String, ImageInfo>,
}

#[async_trait]
impl ImageProbe for FakeProbe {
    async fn probe(&self, url: &str) -> Option<ImageInfo> {
        self.images.get(url).copied()
    }
}

/// In-memory store with switchable storage failures.
struct FaultyDb {
    inner: LibSqlBackend,
    fail_find: AtomicBool,
    fail_update: AtomicBool,
    /// Number of upcoming `create_entry` calls that fail with a query error.
    create_errors: AtomicUsize,
}

impl FaultyDb {
    async fn new() -> Self {
        Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            fail_find: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            create_errors: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Database for FaultyDb {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn find_user_by_key(&self, user_key: &str) -> Result<Option<User>, DatabaseError> {
        self.inner.find_user_by_key(user_key).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        self.inner.find_user_by_email(email).await
    }

    async fn insert_user(&self, user: &NewUser) -> Result<User, DatabaseError> {
        self.inner.insert_user(user).await
    }

    async fn increment_emails_received(&self, user_id: i64) -> Result<i64, DatabaseError> {
        self.inner.increment_emails_received(user_id).await
    }

    async fn count_entries(&self, user_id: i64) -> Result<i64, DatabaseError> {
        self.inner.count_entries(user_id).await
    }

    async fn find_entry(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<Entry>, DatabaseError> {
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("connection reset".into()));
        }
        self.inner.find_entry(user_id, date).await
    }

    async fn create_entry(&self, user_id: i64, entry: &NewEntry) -> Result<Entry, EntryError> {
        let remaining = self.create_errors.load(Ordering::SeqCst);
        if remaining > 0 {
            self.create_errors.store(remaining - 1, Ordering::SeqCst);
            return Err(EntryError::Database(DatabaseError::Query(
                "invalid byte sequence".into(),
            )));
        }
        self.inner.create_entry(user_id, entry).await
    }

    async fn update_entry(&self, entry: &Entry) -> Result<Entry, EntryError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(EntryError::Database(DatabaseError::Query("disk full".into())));
        }
        self.inner.update_entry(entry).await
    }

    async fn list_inspirations(&self) -> Result<Vec<Inspiration>, DatabaseError> {
        self.inner.list_inspirations().await
    }

    async fn insert_inspiration(
        &self,
        category: Option<&str>,
        body: &str,
    ) -> Result<Inspiration, DatabaseError> {
        self.inner.insert_inspiration(category, body).await
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    db: Arc<FaultyDb>,
    notifier: Arc<RecordingNotifier>,
    tracker: Arc<RecordingTracker>,
    diagnostics: Arc<RecordingDiagnostics>,
    processor: EmailProcessor,
}

async fn harness_with(probe: FakeProbe) -> Harness {
    let db = Arc::new(FaultyDb::new().await);
    let notifier = Arc::new(RecordingNotifier::default());
    let tracker = Arc::new(RecordingTracker::default());
    let diagnostics = Arc::new(RecordingDiagnostics::default());

    let mut config = IngestConfig::for_domain("dabble.me");
    config.admin_emails = vec!["admin@example.com".into()];

    let collaborators = Collaborators {
        db: db.clone(),
        notifier: notifier.clone(),
        tracker: tracker.clone(),
        diagnostics: diagnostics.clone(),
        probe: Arc::new(probe),
    };
    let now: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 6, 3, 18, 0, 0).unwrap();
    let processor = EmailProcessor::new(config, collaborators).with_clock(Arc::new(move || now));

    Harness {
        db,
        notifier,
        tracker,
        diagnostics,
        processor,
    }
}

async fn harness() -> Harness {
    harness_with(FakeProbe::default()).await
}

impl Harness {
    async fn user(&self, email: &str, key: &str, plan: &str) -> User {
        self.db
            .insert_user(&NewUser::new(email, key).with_plan(plan))
            .await
            .unwrap()
    }

    async fn entry_on(&self, user: &User, date: NaiveDate) -> Option<Entry> {
        self.db.inner.find_entry(user.id, date).await.unwrap()
    }

    async fn seed_entry(&self, user: &User, entry: NewEntry) -> Entry {
        self.db.inner.create_entry(user.id, &entry).await.unwrap()
    }

    fn failed_entry_notices(&self) -> Vec<(NaiveDate, String)> {
        self.notifier
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|n| match n {
                Notification::FailedEntry { date, body, .. } => Some((*date, body.clone())),
                _ => None,
            })
            .collect()
    }
}

fn seeded(date: NaiveDate, body: &str) -> NewEntry {
    NewEntry {
        date,
        body: body.into(),
        original_email_body: None,
        inspiration_id: None,
        image: None,
    }
}

fn june(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
}

fn email(from: &str, to: &str, subject: &str, body: &str) -> InboundEmail {
    InboundEmail {
        from: from.parse().unwrap(),
        to: vec![to.parse().unwrap()],
        cc: Vec::new(),
        bcc: Vec::new(),
        subject: subject.into(),
        body: body.into(),
        html: None,
        raw_body: body.into(),
        attachments: Vec::new(),
        headers: serde_json::Value::Null,
        spam_report: None,
        charsets: Default::default(),
    }
}

/// A decodable 1x1 PNG padded past the attachment size threshold.
fn large_png() -> Vec<u8> {
    let mut out = Vec::new();
    image::RgbaImage::new(1, 1)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out.resize(out.len() + 25_000, 0);
    out
}

fn attachment(filename: &str, content_type: &str, bytes: Vec<u8>) -> Attachment {
    Attachment {
        content_type: content_type.into(),
        filename: filename.into(),
        size: None,
        data: AttachmentData::Bytes(bytes),
    }
}

// ── Routing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_recipient_is_reported_once_and_saves_nothing() {
    let h = harness().await;
    let bystander = h.user("bob@example.com", "u2bob", "Free").await;

    let outcome = h
        .processor
        .process(&email(
            "eve@example.com",
            "nobody@dabble.me",
            PRODUCT_SUBJECT,
            "Hello",
        ))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Unrouted);
    assert_eq!(h.diagnostics.messages(), vec!["Inbound entry not associated to user"]);
    let captured = h.diagnostics.captured.lock().unwrap();
    let identity = captured[0].identity.as_ref().unwrap();
    assert_eq!(identity.id, "nobody");
    assert_eq!(identity.email, "eve@example.com");
    drop(captured);

    assert_eq!(h.db.count_entries(bystander.id).await.unwrap(), 0);
    assert!(h.tracker.events().is_empty());
    assert!(h.notifier.kinds().is_empty());
}

#[tokio::test]
async fn sender_address_routes_when_token_is_unknown() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;

    let outcome = h
        .processor
        .process(&email(
            "Alice@Example.com",
            "typo@post.dabble.me",
            PRODUCT_SUBJECT,
            "Evening.",
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessOutcome::Created { .. }));
    assert!(h.entry_on(&user, june(1)).await.is_some());
}

// ── Create and merge ────────────────────────────────────────────────

#[tokio::test]
async fn creates_entry_on_subject_date() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;

    let outcome = h
        .processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "Evening.",
        ))
        .await
        .unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Created { entry_id: entry.id });
    assert_eq!(entry.body, "<p>Evening.</p>");
    assert_eq!(entry.original_email_body.as_deref(), Some("Evening."));
    assert_eq!(
        entry.original_email.as_ref().unwrap()["subject"],
        PRODUCT_SUBJECT
    );
    assert_eq!(
        h.tracker.events(),
        vec![("New".to_string(), "u1abc".to_string())]
    );
}

#[tokio::test]
async fn subject_without_date_uses_today_in_user_zone() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;

    h.processor
        .process(&email("alice@example.com", "u1abc@dabble.me", "hello", "Note."))
        .await
        .unwrap();

    assert!(h.entry_on(&user, june(3)).await.is_some());
}

#[tokio::test]
async fn merges_into_existing_entry() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;
    h.seed_entry(&user, seeded(june(1), "Morning.")).await;

    let outcome = h
        .processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "Evening.",
        ))
        .await
        .unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Merged { entry_id: entry.id });
    assert_eq!(entry.body, "Morning.<hr><p>Evening.</p>");
    assert_eq!(h.db.count_entries(user.id).await.unwrap(), 1);
    assert_eq!(
        h.tracker.events(),
        vec![("Merged".to_string(), "u1abc".to_string())]
    );
}

#[tokio::test]
async fn free_tier_body_is_sanitized() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;

    h.processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "Hi <b>there</b><script>alert(1)</script>",
        ))
        .await
        .unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(entry.body, safety::sanitize_html(&entry.body));
    assert!(!entry.body.contains("script"));
    assert!(entry.body.contains("<b>there</b>"));
}

#[tokio::test]
async fn pro_user_gets_html_body() {
    let h = harness().await;
    let user = h.user("pat@example.com", "u3pat", "PRO Monthly").await;

    let mut inbound = email(
        "pat@example.com",
        "u3pat@post.dabble.me",
        PRODUCT_SUBJECT,
        "Hello pro",
    );
    inbound.html = Some("<html><body><div>Hello <b>pro</b></div></body></html>".into());

    h.processor.process(&inbound).await.unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert!(entry.body.contains("<b>pro</b>"), "body: {}", entry.body);
    assert!(!entry.body.contains("<html>"));
}

#[tokio::test]
async fn quote_only_reply_is_not_saved() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;

    let outcome = h
        .processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "> previous prompt text\n> more",
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessOutcome::NotSaved { .. }));
    assert!(h.entry_on(&user, june(1)).await.is_none());
    assert!(h.notifier.kinds().contains(&"failed_entry"));
    assert!(h.tracker.events().is_empty());
}

#[tokio::test]
async fn reply_matching_a_prompt_links_it() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;
    let prompt = h
        .db
        .insert_inspiration(Some("question"), "What made you smile today?")
        .await
        .unwrap();

    let mut inbound = email(
        "alice@example.com",
        "u1abc@post.dabble.me",
        PRODUCT_SUBJECT,
        "My dog.",
    );
    inbound.raw_body = "My dog.\n\n> What made you smile today?".into();

    h.processor.process(&inbound).await.unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(entry.inspiration_id, Some(prompt.id));
}

// ── Images ──────────────────────────────────────────────────────────

#[tokio::test]
async fn first_qualifying_attachment_is_stored() {
    let h = harness().await;
    let user = h.user("pat@example.com", "u3pat", "PRO Monthly").await;

    let mut inbound = email(
        "pat@example.com",
        "u3pat@post.dabble.me",
        PRODUCT_SUBJECT,
        "Look!",
    );
    inbound.attachments = vec![
        attachment("signature.png", "image/png", vec![0; 5_000]),
        attachment("photo.png", "image/png", large_png()),
    ];

    h.processor.process(&inbound).await.unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(
        entry.image,
        Some(EntryImage::Stored {
            filename: "photo.png".into()
        })
    );
}

#[tokio::test]
async fn free_user_attachments_are_ignored() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;

    let mut inbound = email(
        "alice@example.com",
        "u1abc@post.dabble.me",
        PRODUCT_SUBJECT,
        "Look!",
    );
    inbound.attachments = vec![attachment("photo.png", "image/png", large_png())];

    h.processor.process(&inbound).await.unwrap();

    assert!(h.entry_on(&user, june(1)).await.unwrap().image.is_none());
}

#[tokio::test]
async fn denylisted_footer_image_is_skipped() {
    let h = harness().await;
    let user = h.user("pat@example.com", "u3pat", "PRO Monthly").await;

    let mut inbound = email(
        "pat@example.com",
        "u3pat@post.dabble.me",
        PRODUCT_SUBJECT,
        "Look!",
    );
    inbound.attachments = vec![attachment("tmiFinal.png", "image/png", large_png())];

    h.processor.process(&inbound).await.unwrap();

    assert!(h.entry_on(&user, june(1)).await.unwrap().image.is_none());
}

#[tokio::test]
async fn undecodable_image_is_dropped_and_entry_kept() {
    let h = harness().await;
    let user = h.user("pat@example.com", "u3pat", "PRO Monthly").await;

    let mut inbound = email(
        "pat@example.com",
        "u3pat@post.dabble.me",
        PRODUCT_SUBJECT,
        "Look!",
    );
    inbound.attachments = vec![attachment("IMG_0001.heic", "image/heic", vec![7; 25_000])];

    let outcome = h.processor.process(&inbound).await.unwrap();

    assert!(matches!(outcome, ProcessOutcome::Created { .. }));
    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert!(entry.image.is_none());
    assert_eq!(entry.body, "<p>Look!</p>");
    assert!(
        h.diagnostics
            .messages()
            .contains(&"Error processing image via email".to_string())
    );
}

#[tokio::test]
async fn html_image_url_is_used_when_no_attachment_qualifies() {
    let url = "https://img.example.com/sunset.png";
    let mut probe = FakeProbe::default();
    probe.images.insert(
        url.to_string(),
        ImageInfo {
            format: ImageFormat::Png,
            dimensions: Some((800, 600)),
        },
    );
    let h = harness_with(probe).await;
    let user = h.user("pat@example.com", "u3pat", "PRO Monthly").await;

    let mut inbound = email(
        "pat@example.com",
        "u3pat@post.dabble.me",
        PRODUCT_SUBJECT,
        "Sunset",
    );
    inbound.html = Some(format!(r#"<p>Sunset</p><img src="{url}">"#).into());

    h.processor.process(&inbound).await.unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(entry.image, Some(EntryImage::Remote { url: url.into() }));
}

// ── Side effects ────────────────────────────────────────────────────

#[tokio::test]
async fn second_welcome_follows_first_entry_only() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;

    h.processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "First.",
        ))
        .await
        .unwrap();
    h.processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            "It's Sunday, June 2.",
            "Second.",
        ))
        .await
        .unwrap();

    assert_eq!(h.notifier.kinds(), vec!["second_welcome"]);
    let refreshed = h.db.find_user_by_key(&user.user_key).await.unwrap().unwrap();
    assert_eq!(refreshed.emails_received, 2);
}

#[tokio::test]
async fn ai_reply_requested_for_admins_only() {
    let h = harness().await;
    h.user("admin@example.com", "u9adm", "PRO Monthly").await;
    h.user("alice@example.com", "u1abc", "Free").await;

    h.processor
        .process(&email(
            "admin@example.com",
            "u9adm@ai.dabble.me",
            PRODUCT_SUBJECT,
            "Thoughts.",
        ))
        .await
        .unwrap();
    h.processor
        .process(&email(
            "alice@example.com",
            "u1abc@ai.dabble.me",
            PRODUCT_SUBJECT,
            "Thoughts.",
        ))
        .await
        .unwrap();

    let ai_requests: Vec<String> = h
        .notifier
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|n| n.kind() == "ai_response")
        .map(|n| n.recipient().to_string())
        .collect();
    assert_eq!(ai_requests, vec!["admin@example.com"]);
}

// ── Storage failures ────────────────────────────────────────────────

#[tokio::test]
async fn entry_lookup_failure_notifies_user_and_keeps_counting() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;
    h.db.fail_find.store(true, Ordering::SeqCst);

    let outcome = h
        .processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "Evening.",
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessOutcome::NotSaved { .. }));
    assert_eq!(
        h.failed_entry_notices(),
        vec![(june(1), "<p>Evening.</p>".to_string())]
    );
    assert_eq!(h.diagnostics.messages(), vec!["Error processing entry via email"]);
    assert!(h.entry_on(&user, june(1)).await.is_none());
    let refreshed = h.db.find_user_by_key("u1abc").await.unwrap().unwrap();
    assert_eq!(refreshed.emails_received, 1);
}

#[tokio::test]
async fn failed_create_is_retried_as_latin1() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;
    h.db.create_errors.store(1, Ordering::SeqCst);

    let outcome = h
        .processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "Café.",
        ))
        .await
        .unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Created { entry_id: entry.id });
    assert!(entry.body.contains("CafÃ©."), "body: {}", entry.body);
    assert_eq!(entry.original_email_body.as_deref(), Some("CafÃ©."));
    assert_eq!(h.diagnostics.messages(), vec!["Error processing entry via email"]);
    assert!(h.failed_entry_notices().is_empty());
}

#[tokio::test]
async fn failed_latin1_retry_is_returned_as_error() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;
    h.db.create_errors.store(2, Ordering::SeqCst);

    let result = h
        .processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "Evening.",
        ))
        .await;

    assert!(matches!(
        result,
        Err(Error::Pipeline(PipelineError::EncodingRepairFailed(
            EntryError::Database(_)
        )))
    ));
    assert!(h.entry_on(&user, june(1)).await.is_none());
}

#[tokio::test]
async fn failed_merge_save_notifies_user_with_entry_context() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;
    let existing = h.seed_entry(&user, seeded(june(1), "Morning.")).await;
    h.db.fail_update.store(true, Ordering::SeqCst);

    let outcome = h
        .processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "Evening.",
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessOutcome::NotSaved { .. }));
    assert_eq!(
        h.failed_entry_notices(),
        vec![(june(1), "<p>Evening.</p>".to_string())]
    );
    let captured = h.diagnostics.captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].message, "Error processing entry via email");
    assert_eq!(captured[0].context["entry_id"], serde_json::json!(existing.id));
    drop(captured);

    assert_eq!(h.entry_on(&user, june(1)).await.unwrap().body, "Morning.");
    assert!(h.tracker.events().is_empty());
}

// ── Merge details ───────────────────────────────────────────────────

#[tokio::test]
async fn ai_reply_on_merge_is_requested_once() {
    let h = harness().await;
    let admin = h.user("admin@example.com", "u9adm", "PRO Monthly").await;
    h.seed_entry(&admin, seeded(june(1), "Morning.")).await;

    let outcome = h
        .processor
        .process(&email(
            "admin@example.com",
            "u9adm@ai.dabble.me",
            PRODUCT_SUBJECT,
            "Thoughts.",
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessOutcome::Merged { .. }));
    let ai_requests = h
        .notifier
        .kinds()
        .into_iter()
        .filter(|kind| *kind == "ai_response")
        .count();
    assert_eq!(ai_requests, 1);
}

#[tokio::test]
async fn merge_keeps_existing_image() {
    let h = harness().await;
    let user = h.user("pat@example.com", "u3pat", "PRO Monthly").await;
    let old = EntryImage::Remote {
        url: "https://img.example.com/old.png".into(),
    };
    h.seed_entry(
        &user,
        NewEntry {
            image: Some(old.clone()),
            ..seeded(june(1), "Morning.")
        },
    )
    .await;

    let mut inbound = email(
        "pat@example.com",
        "u3pat@post.dabble.me",
        PRODUCT_SUBJECT,
        "Look!",
    );
    inbound.attachments = vec![attachment("photo.png", "image/png", large_png())];

    h.processor.process(&inbound).await.unwrap();

    assert_eq!(h.entry_on(&user, june(1)).await.unwrap().image, Some(old));
}

#[tokio::test]
async fn merge_attaches_image_when_entry_has_none() {
    let h = harness().await;
    let user = h.user("pat@example.com", "u3pat", "PRO Monthly").await;
    h.seed_entry(&user, seeded(june(1), "Morning.")).await;

    let mut inbound = email(
        "pat@example.com",
        "u3pat@post.dabble.me",
        PRODUCT_SUBJECT,
        "Look!",
    );
    inbound.attachments = vec![attachment("photo.png", "image/png", large_png())];

    h.processor.process(&inbound).await.unwrap();

    assert_eq!(
        h.entry_on(&user, june(1)).await.unwrap().image,
        Some(EntryImage::Stored {
            filename: "photo.png".into()
        })
    );
}

#[tokio::test]
async fn merge_without_prompt_match_keeps_linked_prompt() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;
    let prompt = h
        .db
        .insert_inspiration(Some("question"), "What made you smile today?")
        .await
        .unwrap();
    h.seed_entry(
        &user,
        NewEntry {
            inspiration_id: Some(prompt.id),
            ..seeded(june(1), "Morning.")
        },
    )
    .await;

    h.processor
        .process(&email(
            "alice@example.com",
            "u1abc@post.dabble.me",
            PRODUCT_SUBJECT,
            "Evening.",
        ))
        .await
        .unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(entry.inspiration_id, Some(prompt.id));
    assert_eq!(entry.body, "Morning.<hr><p>Evening.</p>");
}

// ── RFC 822 ─────────────────────────────────────────────────────────

#[tokio::test]
async fn raw_message_is_processed_end_to_end() {
    let h = harness().await;
    let user = h.user("alice@example.com", "u1abc", "Free").await;

    let raw = "From: Alice <alice@example.com>\r\n\
To: u1abc@post.dabble.me\r\n\
Subject: Re: It's Saturday, June 1. How was your day?\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Long walk by the river.\r\n\
\r\n\
On Sat, Jun 1, 2024 at 8:00 PM Dabble Me <u1abc@post.dabble.me> wrote:\r\n\
> How was your day?\r\n";
    let inbound = InboundEmail::from_rfc822(raw.as_bytes()).unwrap();

    h.processor.process(&inbound).await.unwrap();

    let entry = h.entry_on(&user, june(1)).await.unwrap();
    assert_eq!(entry.body, "<p>Long walk by the river.</p>");
}
