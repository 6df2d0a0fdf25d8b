//! Graph REST payloads.

use serde::{Deserialize, Serialize};

use crate::mime::{Attachment, BodyKind};
use crate::pipeline::types::OutboundMessage;
use crate::recipients::RecipientEntry;

/// `POST /users/{mailbox}/messages` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: ItemBody,
    pub to_recipients: Vec<Recipient>,
    pub cc_recipients: Vec<Recipient>,
    pub bcc_recipients: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reply_to: Vec<Recipient>,
    /// Attachments registered after the draft exists, through upload
    /// sessions. Not part of the JSON body.
    #[serde(skip)]
    pub attachments: Vec<AttachmentItem>,
}

impl MessagePayload {
    pub fn from_outbound(message: &OutboundMessage) -> Self {
        let recipients = |entries: &[RecipientEntry]| entries.iter().map(Recipient::from).collect();
        Self {
            subject: message.subject.clone(),
            body: ItemBody {
                content_type: message.content.kind,
                content: message.content.body.clone(),
            },
            to_recipients: recipients(&message.recipients.to),
            cc_recipients: recipients(&message.recipients.cc),
            bcc_recipients: recipients(&message.recipients.bcc),
            reply_to: recipients(&message.recipients.reply_to),
            attachments: message
                .content
                .attachments
                .iter()
                .map(AttachmentItem::describe)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    pub content_type: BodyKind,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailAddress {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&RecipientEntry> for Recipient {
    fn from(entry: &RecipientEntry) -> Self {
        Self {
            email_address: EmailAddress {
                address: entry.address.clone(),
                name: entry.name.clone(),
            },
        }
    }
}

/// `createUploadSession` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSessionRequest<'a> {
    #[serde(rename = "AttachmentItem")]
    pub attachment_item: &'a AttachmentItem,
}

/// Attachment metadata registered with an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentItem {
    pub attachment_type: &'static str,
    pub name: String,
    /// Decoded size in bytes.
    pub size: u64,
    pub is_inline: bool,
    pub content_id: Option<String>,
}

impl AttachmentItem {
    pub fn describe(attachment: &Attachment) -> Self {
        Self {
            attachment_type: "file",
            name: attachment.name.clone(),
            size: decoded_len(&attachment.content_bytes),
            is_inline: attachment.is_inline,
            content_id: attachment.content_id.clone(),
        }
    }
}

/// Decoded length of padded standard base64 without decoding it.
fn decoded_len(encoded: &str) -> u64 {
    let len = encoded.len() as u64;
    let padding = encoded.bytes().rev().take_while(|b| *b == b'=').count() as u64;
    (len / 4 * 3).saturating_sub(padding)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionResponse {
    pub upload_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedMessage {
    pub id: String,
}

/// Identity provider token response. Errors come back with
/// `error`/`error_description` and no token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}
