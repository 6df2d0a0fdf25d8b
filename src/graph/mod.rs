//! Microsoft Graph mailbox API.
//!
//! [`MailApi`] is the seam the pipeline drives; [`GraphClient`] is the
//! reqwest implementation. Tests substitute their own.

pub mod client;
#[cfg(test)]
pub(crate) mod mock;
pub mod types;
pub mod upload;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::GraphError;

pub use client::GraphClient;
pub use types::{AttachmentItem, MessagePayload};
pub use upload::{CHUNK_SIZE, ChunkRange};

/// Bearer token for one message. Never reused across messages.
#[derive(Debug, Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// A created, not yet sent, message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftMessage {
    /// Immutable Graph id.
    pub id: String,
    pub mailbox: String,
}

/// Pre-authenticated upload URL for one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_url: String,
}

/// Operations the delivery pipeline needs from the mailbox API.
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Client-credentials grant.
    async fn acquire_token(&self) -> Result<AccessToken, GraphError>;

    /// Create a draft in `mailbox`.
    async fn create_draft(
        &self,
        token: &AccessToken,
        mailbox: &str,
        payload: &MessagePayload,
    ) -> Result<DraftMessage, GraphError>;

    async fn create_upload_session(
        &self,
        token: &AccessToken,
        draft: &DraftMessage,
        item: &AttachmentItem,
    ) -> Result<UploadSession, GraphError>;

    /// PUT one byte range to an upload session.
    async fn upload_chunk(
        &self,
        session: &UploadSession,
        range: ChunkRange,
        bytes: Vec<u8>,
    ) -> Result<(), GraphError>;

    async fn send_draft(&self, token: &AccessToken, draft: &DraftMessage)
    -> Result<(), GraphError>;

    /// Permanently delete the message.
    async fn delete_draft(
        &self,
        token: &AccessToken,
        draft: &DraftMessage,
    ) -> Result<(), GraphError>;
}
