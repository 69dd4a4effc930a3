//! Shared types for the inbound email pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ── Inbound email ───────────────────────────────────────────────────

/// An already-parsed inbound email, as handed over by the mail-ingestion
/// boundary. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    /// Sender address.
    pub from: Address,
    /// To recipients, in header order.
    #[serde(default)]
    pub to: Vec<Address>,
    /// CC recipients, in header order.
    #[serde(default)]
    pub cc: Vec<Address>,
    /// BCC recipients, in header order.
    #[serde(default)]
    pub bcc: Vec<Address>,
    /// Subject line (undecoded bytes).
    #[serde(default)]
    pub subject: MailText,
    /// Plain-text body with quoted history still attached.
    #[serde(default)]
    pub body: MailText,
    /// HTML variant of the body, if the message had one.
    #[serde(default)]
    pub html: Option<MailText>,
    /// Full raw body, archived verbatim on the entry.
    #[serde(default)]
    pub raw_body: MailText,
    /// Attachments, in message order.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Raw headers (passed through untouched).
    #[serde(default)]
    pub headers: serde_json::Value,
    /// Spam report from the relay (passed through untouched).
    #[serde(default)]
    pub spam_report: Option<String>,
    /// Declared charsets per part, e.g. `{"subject": "UTF-8", "text": "iso-8859-1"}`.
    #[serde(default)]
    pub charsets: BTreeMap<String, String>,
}

impl InboundEmail {
    /// Declared charset for a part (`subject`, `text`, `html`).
    pub fn charset(&self, part: &str) -> Option<&str> {
        self.charsets.get(part).map(String::as_str)
    }

    /// HTML variant, treating an empty body as absent.
    pub fn html_bytes(&self) -> Option<&[u8]> {
        self.html
            .as_ref()
            .map(MailText::as_bytes)
            .filter(|b| !b.is_empty())
    }
}

/// Text as received from the wire, before charset repair.
///
/// Serialized as a JSON string when the bytes are valid UTF-8, and as an
/// array of bytes otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MailTextRepr", into = "MailTextRepr")]
pub struct MailText(Vec<u8>);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MailTextRepr {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<MailTextRepr> for MailText {
    fn from(repr: MailTextRepr) -> Self {
        match repr {
            MailTextRepr::Text(s) => Self(s.into_bytes()),
            MailTextRepr::Bytes(b) => Self(b),
        }
    }
}

impl From<MailText> for MailTextRepr {
    fn from(text: MailText) -> Self {
        match String::from_utf8(text.0) {
            Ok(s) => Self::Text(s),
            Err(e) => Self::Bytes(e.into_bytes()),
        }
    }
}

impl MailText {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for MailText {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for MailText {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for MailText {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// ── Address ─────────────────────────────────────────────────────────

/// A mailbox address split for routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    /// Local part, left of `@`.
    pub token: String,
    /// Host/domain, right of `@`.
    pub host: String,
    /// Display name, if present.
    pub name: Option<String>,
}

impl Address {
    /// `token@host`.
    pub fn email(&self) -> String {
        format!("{}@{}", self.token, self.host)
    }
}

impl FromStr for Address {
    type Err = PipelineError;

    /// Parse `Name <token@host>` or a bare `token@host`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (name, addr) = match (raw.rfind('<'), raw.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = raw[..open].trim().trim_matches('"').trim();
                let name = (!name.is_empty()).then(|| name.to_string());
                (name, raw[open + 1..close].trim())
            }
            _ => (None, raw),
        };

        let (token, host) = addr
            .rsplit_once('@')
            .filter(|(t, h)| !t.is_empty() && !h.is_empty())
            .ok_or_else(|| PipelineError::InvalidEmail(format!("invalid address: {raw}")))?;

        Ok(Self {
            token: token.to_string(),
            host: host.to_string(),
            name,
        })
    }
}

impl TryFrom<String> for Address {
    type Error = PipelineError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}@{}>", self.token, self.host),
            None => write!(f, "{}@{}", self.token, self.host),
        }
    }
}

// ── Attachment ──────────────────────────────────────────────────────

/// An attachment carried by the inbound email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Declared MIME type, e.g. `image/jpeg`.
    pub content_type: String,
    /// Original filename from the message.
    #[serde(default)]
    pub filename: String,
    /// Size declared by the ingestion boundary, used when the handle
    /// cannot be measured.
    #[serde(default)]
    pub size: Option<u64>,
    /// Where the bytes live.
    pub data: AttachmentData,
}

/// Handle to an attachment's bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentData {
    /// Bytes held in memory.
    Bytes(Vec<u8>),
    /// Bytes spooled to a file by the ingestion boundary.
    Path(PathBuf),
}

impl Attachment {
    /// Actual byte size of the attachment; 0 when unknown.
    pub fn byte_size(&self) -> u64 {
        let measured = match &self.data {
            AttachmentData::Bytes(bytes) => Some(bytes.len() as u64),
            AttachmentData::Path(path) => std::fs::metadata(path).ok().map(|m| m.len()),
        };
        measured.or(self.size).unwrap_or(0)
    }

    /// Load the attachment's bytes.
    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.data {
            AttachmentData::Bytes(bytes) => Ok(bytes.clone()),
            AttachmentData::Path(path) => tokio::fs::read(path).await,
        }
    }
}

// ── Process outcome ─────────────────────────────────────────────────

/// Terminal state of one processed email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Appended to the entry that already existed for the date.
    Merged { entry_id: i64 },
    /// A new entry was created for the date.
    Created { entry_id: i64 },
    /// Storage failed; the user was sent a failed-entry notification.
    NotSaved { reason: String },
    /// No user could be resolved; only diagnostics were recorded.
    Unrouted,
}

impl ProcessOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Merged { .. } => "merged",
            Self::Created { .. } => "created",
            Self::NotSaved { .. } => "not_saved",
            Self::Unrouted => "unrouted",
        }
    }
}
