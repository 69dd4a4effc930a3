//! Image selection for an inbound email.
//!
//! At most one image is attached per email, and only for Pro users. File
//! attachments are scanned first; failing that, `<img>` URLs in the HTML
//! body are probed remotely.

use std::io::Cursor;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, ImageReader};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::pipeline::encoding;
use crate::pipeline::types::{Attachment, InboundEmail};
use crate::store::{EntryImage, User};

/// Attachments at or below this size are footer/signature images.
const MIN_SIGNATURE_BYTES: u64 = 8_000;

/// Attachments must exceed this size to be kept.
const MIN_ATTACHMENT_BYTES: u64 = 20_000;

/// Remote images smaller than this in both axes are skipped.
const MIN_REMOTE_DIMENSION: u32 = 100;

/// Upper bound on bytes read while probing a remote image header.
const PROBE_MAX_BYTES: usize = 256 * 1024;

const OCTET_STREAM: &str = "application/octet-stream";

static IMAGE_CONTENT_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^image/(?:png|jpe?g|gif|heic|heif)$").unwrap());

static HEIC_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^.+\.(?:heic|heif)$").unwrap());

/// Product footer marker; `<img>` tags after it belong to the prompt email.
static REPLY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)reply to this email with your ").unwrap());

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\s.*?src=(?:'|")([^'">]+)(?:'|")"#).unwrap()
});

// ── Remote probing ──────────────────────────────────────────────────

/// What a remote probe learned about an image URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    /// Pixel dimensions, when the header could be decoded.
    pub dimensions: Option<(u32, u32)>,
}

/// Looks up the type and size of a remote image.
///
/// Implementations must bound their I/O and return `None` on any failure.
#[async_trait]
pub trait ImageProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Option<ImageInfo>;
}

/// Probes images over HTTP, reading only the start of the body.
pub struct HttpImageProbe {
    client: reqwest::Client,
}

impl HttpImageProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build probe client, using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl ImageProbe for HttpImageProbe {
    async fn probe(&self, url: &str) -> Option<ImageInfo> {
        let mut response = match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(url, status = %resp.status(), "Image probe got non-success status");
                return None;
            }
            Err(e) => {
                debug!(url, error = %e, "Image probe request failed");
                return None;
            }
        };

        let mut head = Vec::new();
        while head.len() < PROBE_MAX_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => head.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    debug!(url, error = %e, "Image probe read failed");
                    break;
                }
            }
        }

        let format = image::guess_format(&head).ok()?;
        let dimensions = ImageReader::with_format(Cursor::new(head.as_slice()), format)
            .into_dimensions()
            .ok();
        Some(ImageInfo { format, dimensions })
    }
}

// ── Selection ───────────────────────────────────────────────────────

/// The image chosen for an entry.
#[derive(Debug, Clone)]
pub enum SelectedImage {
    /// A file attachment from the email.
    File(Attachment),
    /// An image URL found in the HTML body.
    Url(String),
}

impl SelectedImage {
    /// Convert into the form the store accepts. Unreadable attachments
    /// yield `None`.
    pub async fn into_entry_image(self) -> Option<EntryImage> {
        match self {
            Self::Url(url) => Some(EntryImage::Remote { url }),
            Self::File(attachment) => match attachment.read_bytes().await {
                Ok(bytes) => Some(EntryImage::Upload {
                    filename: attachment.filename,
                    bytes,
                }),
                Err(e) => {
                    warn!(filename = %attachment.filename, error = %e, "Attachment could not be read");
                    None
                }
            },
        }
    }
}

/// Chooses at most one image for an entry.
pub struct AttachmentSelector {
    denylist: Vec<String>,
    probe: Arc<dyn ImageProbe>,
}

impl AttachmentSelector {
    pub fn new(config: &IngestConfig, probe: Arc<dyn ImageProbe>) -> Self {
        Self {
            denylist: config.footer_image_denylist.clone(),
            probe,
        }
    }

    /// Pick the image for `email`. Only Pro users get one; a qualifying
    /// file attachment always beats an HTML image URL.
    pub async fn select(&self, user: &User, email: &InboundEmail) -> Option<SelectedImage> {
        if !user.is_pro() {
            return None;
        }

        if let Some(attachment) = email.attachments.iter().find(|a| self.qualifies_file(a)) {
            debug!(filename = %attachment.filename, "Selected file attachment");
            return Some(SelectedImage::File(attachment.clone()));
        }

        let html = encoding::to_utf8(email.html_bytes()?, email.charset("html"));
        for url in image_urls(&html) {
            let Some(info) = self.probe.probe(&url).await else {
                continue;
            };
            if qualifies_remote(&info) {
                debug!(url = %url, "Selected image URL");
                return Some(SelectedImage::Url(url));
            }
        }
        None
    }

    /// Whether a file attachment qualifies: an image (or generic binary)
    /// type, large enough not to be a footer image, and not denylisted.
    pub fn qualifies_file(&self, attachment: &Attachment) -> bool {
        let content_type = attachment.content_type.trim();
        let image_like = content_type.eq_ignore_ascii_case(OCTET_STREAM)
            || IMAGE_CONTENT_TYPE.is_match(content_type)
            || HEIC_FILENAME.is_match(&attachment.filename);

        let size = attachment.byte_size();
        let large_enough = (size == 0 || size > MIN_SIGNATURE_BYTES) && size > MIN_ATTACHMENT_BYTES;

        let denylisted = self.denylist.iter().any(|name| *name == attachment.filename);

        image_like && large_enough && !denylisted
    }
}

/// `<img>` sources in the part of the HTML above the product footer.
pub fn image_urls(html: &str) -> Vec<String> {
    let reply = REPLY_MARKER.split(html).next().unwrap_or_default();
    IMG_SRC
        .captures_iter(reply)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn qualifies_remote(info: &ImageInfo) -> bool {
    let supported = matches!(
        info.format,
        ImageFormat::Gif | ImageFormat::Jpeg | ImageFormat::Png
    );
    let tiny = info
        .dimensions
        .is_some_and(|(w, h)| w < MIN_REMOTE_DIMENSION && h < MIN_REMOTE_DIMENSION);
    supported && !tiny
}
