//! MIME body/attachment extraction.
//!
//! Walks a parsed [`mail_parser::Message`] depth-first and splits its leaf
//! parts into one body (HTML preferred over plain text) and an ordered list
//! of attachments. A part is never both.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::MimeError;

/// Type of the selected body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Html,
    #[default]
    Text,
}

impl BodyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::Html => "html",
            BodyKind::Text => "text",
        }
    }
}

/// A non-body part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    /// `type/subtype` as declared.
    pub content_type: String,
    /// Base64 (standard alphabet, padded) of the decoded part bytes.
    pub content_bytes: String,
    pub is_inline: bool,
    /// Content-ID without the surrounding `<>`.
    pub content_id: Option<String>,
}

impl Attachment {
    /// Raw bytes for upload.
    pub fn decoded(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.content_bytes)
    }
}

/// Result of extraction. Never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub body: String,
    pub kind: BodyKind,
    pub attachments: Vec<Attachment>,
}

/// Parse raw message bytes.
///
/// A blank payload is not an error and yields `Ok(None)`.
pub fn parse(raw: &[u8]) -> Result<Option<Message<'_>>, MimeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    MessageParser::default()
        .parse(raw)
        .map(Some)
        .ok_or(MimeError::Unparseable)
}

/// Extract body and attachments from a parsed message.
pub fn extract(message: &Message<'_>) -> ExtractedContent {
    let Some(root) = message.part(0) else {
        return ExtractedContent::default();
    };

    let PartType::Multipart(children) = &root.body else {
        return ExtractedContent {
            body: part_text(root),
            kind: if is_media(root, "html") {
                BodyKind::Html
            } else {
                BodyKind::Text
            },
            attachments: Vec::new(),
        };
    };

    let mut leaves = Vec::new();
    collect_leaves(message, children, &mut leaves);

    let mut html = None;
    let mut plain = None;
    let mut attachments = Vec::new();

    for part in leaves {
        if is_body_candidate(part) {
            if is_media(part, "html") {
                html.get_or_insert(part);
            } else {
                plain.get_or_insert(part);
            }
        } else {
            attachments.push(to_attachment(part));
        }
    }

    let (body, kind) = match (html, plain) {
        (Some(part), _) => (part_text(part), BodyKind::Html),
        (None, Some(part)) => (part_text(part), BodyKind::Text),
        (None, None) => (String::new(), BodyKind::Text),
    };

    debug!(
        kind = kind.as_str(),
        body_len = body.len(),
        attachments = attachments.len(),
        "Extracted MIME content"
    );

    ExtractedContent {
        body,
        kind,
        attachments,
    }
}

/// Depth-first, document order, `multipart/*` containers skipped.
fn collect_leaves<'a, 'x>(
    message: &'a Message<'x>,
    ids: &[u32],
    out: &mut Vec<&'a MessagePart<'x>>,
) {
    for id in ids {
        let Some(part) = message.part(*id) else {
            continue;
        };
        match &part.body {
            PartType::Multipart(children) => collect_leaves(message, children, out),
            _ => out.push(part),
        }
    }
}

/// `text/plain` or `text/html` with no disposition or an inline one.
fn is_body_candidate(part: &MessagePart<'_>) -> bool {
    let textual = is_media(part, "plain") || is_media(part, "html");
    let inline = part.content_disposition().is_none_or(|cd| cd.is_inline());
    textual && inline
}

/// Whether the part is `text/<subtype>`. A part without Content-Type is
/// `text/plain`.
fn is_media(part: &MessagePart<'_>, subtype: &str) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .is_some_and(|s| s.eq_ignore_ascii_case(subtype))
        }
        None => subtype == "plain",
    }
}

fn part_text(part: &MessagePart<'_>) -> String {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        _ => String::from_utf8_lossy(part.contents()).into_owned(),
    }
}

fn to_attachment(part: &MessagePart<'_>) -> Attachment {
    let name = part
        .attachment_name()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let content_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let content_id = part
        .content_id()
        .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>'))
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Attachment {
        name,
        content_type,
        content_bytes: STANDARD.encode(part.contents()),
        is_inline: part.content_disposition().is_some_and(|cd| cd.is_inline()),
        content_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_raw(raw: &str) -> ExtractedContent {
        let message = parse(raw.as_bytes()).unwrap().unwrap();
        extract(&message)
    }

    const MIXED: &str = "From: sender@x.com\r\n\
To: a@x.com\r\n\
Subject: Report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/related; boundary=\"rel\"\r\n\
\r\n\
--rel\r\n\
Content-Type: multipart/alternative; boundary=\"alt\"\r\n\
\r\n\
--alt\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Plain version\r\n\
--alt\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>HTML version <img src=\"cid:img1\"></p>\r\n\
--alt--\r\n\
--rel\r\n\
Content-Type: image/png\r\n\
Content-Disposition: inline\r\n\
Content-ID: <img1>\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--rel--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--outer--\r\n";

    #[test]
    fn html_body_preferred_over_plain() {
        let content = extract_raw(MIXED);
        assert_eq!(content.kind, BodyKind::Html);
        assert!(content.body.contains("HTML version"));
        assert!(!content.body.contains("Plain version"));
    }

    #[test]
    fn inline_image_and_pdf_become_attachments() {
        let content = extract_raw(MIXED);
        assert_eq!(content.attachments.len(), 2);

        let image = &content.attachments[0];
        assert_eq!(image.content_type, "image/png");
        assert!(image.is_inline);
        assert_eq!(image.content_id.as_deref(), Some("img1"));
        assert_eq!(image.decoded().unwrap(), b"\x89PNG\r\n\x1a\n");

        let pdf = &content.attachments[1];
        assert_eq!(pdf.name, "report.pdf");
        assert_eq!(pdf.content_type, "application/pdf");
        assert!(!pdf.is_inline);
        assert_eq!(pdf.content_id, None);
        assert_eq!(pdf.decoded().unwrap(), b"%PDF-1.4\n");
    }

    #[test]
    fn plain_only_message_is_text() {
        let content = extract_raw(
            "Subject: hi\r\nContent-Type: multipart/alternative; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nJust text\r\n--b--\r\n",
        );
        assert_eq!(content.kind, BodyKind::Text);
        assert_eq!(content.body.trim(), "Just text");
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn text_part_with_attachment_disposition_is_attached() {
        let content = extract_raw(
            "Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nBody\r\n\
--b\r\nContent-Type: text/plain\r\nContent-Disposition: attachment; filename=notes.txt\r\n\r\nNotes\r\n\
--b--\r\n",
        );
        assert_eq!(content.body.trim(), "Body");
        assert_eq!(content.attachments.len(), 1);
        assert_eq!(content.attachments[0].name, "notes.txt");
        assert_eq!(content.attachments[0].content_type, "text/plain");
    }

    #[test]
    fn second_plain_body_candidate_is_dropped() {
        let content = extract_raw(
            "Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nFirst\r\n\
--b\r\nContent-Type: text/plain\r\nContent-Disposition: inline\r\n\r\nSecond\r\n\
--b--\r\n",
        );
        assert_eq!(content.body.trim(), "First");
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn encoded_filenames_are_decoded() {
        let content = extract_raw(
            "Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nBody\r\n\
--b\r\nContent-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename*=UTF-8''r%C3%A9sum%C3%A9.bin\r\n\r\nx\r\n\
--b\r\nContent-Type: application/octet-stream; name=\"=?UTF-8?B?w7xiZXIudHh0?=\"\r\n\
Content-Disposition: attachment\r\n\r\ny\r\n\
--b--\r\n",
        );
        let names: Vec<_> = content.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["résumé.bin", "über.txt"]);
    }

    #[test]
    fn nameless_attachment_gets_uuid_name() {
        let content = extract_raw(
            "Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nBody\r\n\
--b\r\nContent-Type: application/octet-stream\r\nContent-Disposition: attachment\r\n\r\nzz\r\n\
--b--\r\n",
        );
        let name = &content.attachments[0].name;
        assert!(Uuid::parse_str(name).is_ok(), "{name} is not a uuid");
    }

    #[test]
    fn non_multipart_html_is_whole_body() {
        let content = extract_raw("Subject: x\r\nContent-Type: text/html\r\n\r\n<b>hi</b>\r\n");
        assert_eq!(content.kind, BodyKind::Html);
        assert!(content.body.contains("<b>hi</b>"));
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn non_multipart_without_content_type_is_text() {
        let content = extract_raw("Subject: x\r\n\r\nhello\r\n");
        assert_eq!(content.kind, BodyKind::Text);
        assert!(content.body.contains("hello"));
    }

    #[test]
    fn blank_payload_is_empty_content() {
        assert!(parse(b"").unwrap().is_none());
        assert!(parse(b" \r\n").unwrap().is_none());
        assert_eq!(ExtractedContent::default().kind, BodyKind::Text);
    }

    #[test]
    fn body_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BodyKind::Html).unwrap(), "\"html\"");
        assert_eq!(serde_json::to_string(&BodyKind::Text).unwrap(), "\"text\"");
    }
}
