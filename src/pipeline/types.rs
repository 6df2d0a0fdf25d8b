//! Shared types for the delivery pipeline.

use std::sync::{Arc, Mutex};

use crate::mime::ExtractedContent;
use crate::recipients::RecipientSet;

// ── Inbound message ─────────────────────────────────────────────────

/// One submission as handed over by the listener.
///
/// Owned by a single [`DeliveryPipeline::handle`](super::DeliveryPipeline::handle)
/// call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// DATA payload, dot-unstuffed.
    pub raw: Vec<u8>,
    /// `MAIL FROM` address. Also the mailbox the draft is created in.
    pub mail_from: String,
    /// `RCPT TO` addresses, in command order.
    pub rcpt_tos: Vec<String>,
}

// ── Outbound message ────────────────────────────────────────────────

/// What the draft is built from. `before_send` and `recipients` handlers
/// receive it behind a mutex and may rewrite it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: Option<String>,
    pub content: ExtractedContent,
    pub recipients: RecipientSet,
}

/// Handle given to event handlers.
pub type SharedMessage = Arc<Mutex<OutboundMessage>>;

// ── Delivery status ─────────────────────────────────────────────────

/// SMTP reply for a DATA transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub code: u16,
    pub text: String,
}

impl DeliveryStatus {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn delivered() -> Self {
        Self::new(250, "Message accepted for delivery")
    }

    pub fn skipped() -> Self {
        Self::new(250, "Message accepted (delivery skipped)")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 4xx: the client should retry later.
    pub fn is_transient(&self) -> bool {
        (400..500).contains(&self.code)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}
