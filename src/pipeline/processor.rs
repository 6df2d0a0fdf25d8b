//! Delivery processor: runs one inbound message through the mailbox API.
//!
//! States: PARSE → ACQUIRE_TOKEN → CREATE_DRAFT → UPLOAD_ATTACHMENTS →
//! VETO_CHECK → SEND_DRAFT → DELETE_DRAFT. Any failure ends the run with the
//! matching SMTP reply. Drafts and upload sessions already created are never
//! rolled back.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DeliveryError, GraphError};
use crate::events::{self, EventArgs, EventBus};
use crate::graph::types::MessagePayload;
use crate::graph::{AccessToken, DraftMessage, MailApi, upload};
use crate::mime;
use crate::pipeline::types::{DeliveryStatus, InboundMessage, OutboundMessage, SharedMessage};
use crate::recipients;

/// Longest upstream body echoed back in an SMTP reply.
const MAX_REPLY_DETAIL: usize = 200;

enum Outcome {
    Delivered,
    Skipped,
}

/// Composes extraction, recipient resolution and the mailbox API.
pub struct DeliveryPipeline {
    api: Arc<dyn MailApi>,
    bus: EventBus,
    save_to_sent: bool,
    debug_dump_dir: Option<PathBuf>,
}

impl DeliveryPipeline {
    pub fn new(api: Arc<dyn MailApi>, bus: EventBus) -> Self {
        Self {
            api,
            bus,
            save_to_sent: false,
            debug_dump_dir: None,
        }
    }

    /// Keep the sent message instead of deleting the draft.
    pub fn with_save_to_sent(mut self, save_to_sent: bool) -> Self {
        self.save_to_sent = save_to_sent;
        self
    }

    /// Write every raw payload to `<dir>/<uuid>.eml` before processing.
    pub fn with_debug_dump_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dump_dir = dir;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Deliver one message and return the SMTP reply for it.
    pub async fn handle(&self, inbound: InboundMessage) -> DeliveryStatus {
        info!(
            from = %inbound.mail_from,
            recipients = inbound.rcpt_tos.len(),
            size = inbound.raw.len(),
            "Processing inbound message"
        );

        match self.deliver(&inbound).await {
            Ok(Outcome::Delivered) => DeliveryStatus::delivered(),
            Ok(Outcome::Skipped) => {
                info!(from = %inbound.mail_from, "Message accepted without delivery");
                DeliveryStatus::skipped()
            }
            Err(e) => {
                let status = status_for(&e);
                error!(from = %inbound.mail_from, error = %e, reply = %status, "Delivery failed");
                status
            }
        }
    }

    async fn deliver(&self, inbound: &InboundMessage) -> Result<Outcome, DeliveryError> {
        self.dump(&inbound.raw).await;

        // PARSE
        let parsed = mime::parse(&inbound.raw)?;
        let outbound = OutboundMessage {
            subject: parsed
                .as_ref()
                .and_then(|m| m.subject())
                .map(str::to_string),
            content: parsed.as_ref().map(mime::extract).unwrap_or_default(),
            recipients: recipients::resolve(parsed.as_ref(), &inbound.rcpt_tos),
        };
        drop(parsed);
        let shared: SharedMessage = Arc::new(Mutex::new(outbound));
        self.notify(events::BEFORE_SEND, EventArgs::Message(Arc::clone(&shared)))
            .await;

        // ACQUIRE_TOKEN
        let token = self
            .api
            .acquire_token()
            .await
            .map_err(DeliveryError::Token)?;

        // CREATE_DRAFT
        self.notify(events::SENDER, EventArgs::Sender(inbound.mail_from.clone()))
            .await;
        self.notify(events::RECIPIENTS, EventArgs::Message(Arc::clone(&shared)))
            .await;

        let outbound = shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let payload = MessagePayload::from_outbound(&outbound);
        let draft = self
            .api
            .create_draft(&token, &inbound.mail_from, &payload)
            .await
            .map_err(DeliveryError::CreateDraft)?;

        // UPLOAD_ATTACHMENTS
        self.upload_attachments(&token, &draft, &outbound, &payload)
            .await?;

        // VETO_CHECK
        match self
            .bus
            .publish(events::SKIP_SEND, EventArgs::Draft(draft.clone()))
            .await
        {
            Ok(true) => return Ok(Outcome::Skipped),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "skip_send handler failed; delivering"),
        }

        // SEND_DRAFT
        self.api
            .send_draft(&token, &draft)
            .await
            .map_err(DeliveryError::Send)?;

        // DELETE_DRAFT
        if !self.save_to_sent {
            if let Err(e) = self.api.delete_draft(&token, &draft).await {
                warn!(id = %draft.id, error = %e, "Failed to delete sent draft");
            }
        }

        self.notify(events::AFTER_SEND, EventArgs::Draft(draft)).await;
        Ok(Outcome::Delivered)
    }

    async fn upload_attachments(
        &self,
        token: &AccessToken,
        draft: &DraftMessage,
        outbound: &OutboundMessage,
        payload: &MessagePayload,
    ) -> Result<(), DeliveryError> {
        for (attachment, item) in outbound.content.attachments.iter().zip(&payload.attachments) {
            let data = match attachment.decoded() {
                Ok(data) => data,
                Err(e) => {
                    error!(attachment = %item.name, error = %e, "Attachment bytes are not base64; skipped");
                    continue;
                }
            };

            let session = self
                .api
                .create_upload_session(token, draft, item)
                .await
                .map_err(|source| DeliveryError::UploadSession {
                    attachment: item.name.clone(),
                    source,
                })?;

            let report = upload::upload_attachment(self.api.as_ref(), &session, &item.name, &data).await;
            if report.failed > 0 {
                warn!(
                    attachment = %item.name,
                    failed = report.failed,
                    chunks = report.chunks,
                    "Attachment may be incomplete"
                );
            }
        }
        Ok(())
    }

    /// Publish and log handler failures; they never change the outcome.
    async fn notify(&self, event: &str, args: EventArgs) {
        if let Err(e) = self.bus.publish(event, args).await {
            warn!(event, error = %e, "Event handler failed");
        }
    }

    async fn dump(&self, raw: &[u8]) {
        let Some(dir) = &self.debug_dump_dir else {
            return;
        };
        let path = dir.join(format!("{}.eml", Uuid::new_v4()));
        let result = match tokio::fs::create_dir_all(dir).await {
            Ok(()) => tokio::fs::write(&path, raw).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(path = %path.display(), "Raw message dumped"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to dump raw message"),
        }
    }
}

/// Map a failed run to its SMTP reply.
pub fn status_for(err: &DeliveryError) -> DeliveryStatus {
    match err {
        DeliveryError::Parse(e) => {
            DeliveryStatus::new(550, format!("Error parsing email content: {e}"))
        }
        DeliveryError::Token(_) => DeliveryStatus::new(550, "Failed to acquire access token"),
        DeliveryError::CreateDraft(e)
        | DeliveryError::UploadSession { source: e, .. }
        | DeliveryError::Send(e) => graph_status(e),
    }
}

fn graph_status(err: &GraphError) -> DeliveryStatus {
    match err {
        GraphError::Status { status, .. } if err.is_transient() => DeliveryStatus::new(
            451,
            format!("4.3.0 Mailbox API temporarily unavailable ({status}), try again later"),
        ),
        GraphError::Transport { reason, .. } => DeliveryStatus::new(
            451,
            format!("4.4.1 Mailbox API unreachable: {}", one_line(reason)),
        ),
        GraphError::Status { status, body, .. } => DeliveryStatus::new(
            550,
            format!("Mailbox API error {status}: {}", one_line(body)),
        ),
        other => DeliveryStatus::new(550, format!("Mailbox API error: {}", one_line(&other.to_string()))),
    }
}

/// Collapse whitespace and cap the length so the text fits one reply line.
fn one_line(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(MAX_REPLY_DETAIL) {
        Some((cut, _)) => format!("{}...", &collapsed[..cut]),
        None => collapsed,
    }
}
