//! Charset repair for inbound text.
//!
//! Runs before any regex work: text in an undetected charset corrupts
//! every downstream match. Best-effort only, never fails.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use tracing::debug;

/// Labels seen on real mail that mean UTF-8 in practice.
const UTF8_MISLABELS: &[&str] = &["ibm424_ltr"];

/// Convert `bytes` to UTF-8 text.
///
/// `hint` is the charset the message declared for this part, if any.
/// When the detected charset cannot decode the bytes cleanly, the original
/// content is returned as-is (lossily, for bytes that are not UTF-8).
pub fn to_utf8(bytes: &[u8], hint: Option<&str>) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    let encoding = detect_encoding(bytes, hint);
    match encoding.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => text.into_owned(),
        None => {
            debug!(
                encoding = encoding.name(),
                "Charset conversion failed, keeping original content"
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Re-read `bytes` as ISO-8859-1, mapping every byte to the code point of
/// the same value. Never fails; used as the last-resort repair when an
/// entry cannot be stored.
pub fn latin1_to_utf8(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

/// Pick the most likely source charset.
fn detect_encoding(bytes: &[u8], hint: Option<&str>) -> &'static Encoding {
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }

    if let Some(encoding) = hint.and_then(resolve_label)
        && encoding != UTF_8
    {
        return encoding;
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Map a declared charset label to an encoding, honouring known mislabels.
fn resolve_label(label: &str) -> Option<&'static Encoding> {
    let label = label.trim();
    if UTF8_MISLABELS.iter().any(|m| m.eq_ignore_ascii_case(label)) {
        return Some(UTF_8);
    }
    Encoding::for_label(label.as_bytes())
}
