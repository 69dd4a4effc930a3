//! Build an [`InboundEmail`] from a raw RFC 822 message.
//!
//! Used by the command-line entry point; relays that post already-parsed
//! fields construct `InboundEmail` directly.

use std::collections::BTreeMap;

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::pipeline::types::{Address, Attachment, AttachmentData, InboundEmail, MailText};

impl InboundEmail {
    /// Parse raw message bytes.
    pub fn from_rfc822(raw: &[u8]) -> Result<Self, PipelineError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| PipelineError::InvalidEmail("unparseable message".into()))?;

        let from = extract_addresses(parsed.from())
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::InvalidEmail("missing From address".into()))?;

        let body = parsed
            .body_text(0)
            .map(|text| text.into_owned())
            .unwrap_or_default();
        let html = parsed.body_html(0).map(|html| MailText::from(html.into_owned()));

        let mut charsets = BTreeMap::new();
        charsets.insert("subject".to_string(), "UTF-8".to_string());
        if let Some(charset) = parsed.text_part(0).and_then(part_charset) {
            charsets.insert("text".to_string(), charset);
        }
        if let Some(charset) = parsed.html_part(0).and_then(part_charset) {
            charsets.insert("html".to_string(), charset);
        }

        let headers = headers_json(&parsed, raw);
        let spam_report = headers
            .as_object()
            .and_then(|map| {
                map.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("X-Spam-Report"))
            })
            .and_then(|(_, value)| value.as_str())
            .map(str::to_string);

        Ok(Self {
            from,
            to: extract_addresses(parsed.to()),
            cc: extract_addresses(parsed.cc()),
            bcc: extract_addresses(parsed.bcc()),
            subject: parsed.subject().unwrap_or_default().into(),
            raw_body: body.as_str().into(),
            body: body.into(),
            html,
            attachments: parsed.attachments().filter_map(to_attachment).collect(),
            headers,
            spam_report,
            charsets,
        })
    }
}

/// Addresses from an optional header, skipping entries without a mailbox.
fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<Address> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let addrs: Vec<&mail_parser::Addr> = match addr {
        mail_parser::Address::List(addrs) => addrs.iter().collect(),
        mail_parser::Address::Group(groups) => {
            groups.iter().flat_map(|g| g.addresses.iter()).collect()
        }
    };
    addrs
        .into_iter()
        .filter_map(|a| {
            let mut parsed: Address = a.address.as_deref()?.parse().ok()?;
            parsed.name = a.name.as_deref().map(str::to_string);
            Some(parsed)
        })
        .collect()
}

fn part_charset(part: &MessagePart) -> Option<String> {
    MimeHeaders::content_type(part)?
        .attribute("charset")
        .map(str::to_string)
}

fn to_attachment(part: &MessagePart) -> Option<Attachment> {
    let content_type = MimeHeaders::content_type(part)
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let contents = part.contents();
    if contents.is_empty() {
        return None;
    }

    Some(Attachment {
        content_type,
        filename: MimeHeaders::attachment_name(part)
            .unwrap_or_default()
            .to_string(),
        size: Some(contents.len() as u64),
        data: AttachmentData::Bytes(contents.to_vec()),
    })
}

/// Top-level headers as `{name: raw value}`; repeated names keep the last.
fn headers_json(parsed: &Message, raw: &[u8]) -> Value {
    let mut map = Map::new();
    for header in parsed.headers() {
        let start = header.offset_start as usize;
        let end = header.offset_end as usize;
        let value = raw
            .get(start..end)
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .unwrap_or_default();
        map.insert(header.name.as_str().to_string(), Value::String(value));
    }
    Value::Object(map)
}
