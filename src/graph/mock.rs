//! In-memory [`MailApi`] for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::{AttachmentItem, MessagePayload};
use super::{AccessToken, ChunkRange, DraftMessage, MailApi, UploadSession};
use crate::error::GraphError;

/// In-memory mailbox API. Operations listed in `failures` fail with the
/// given status; status 0 means a transport error.
#[derive(Default)]
pub(crate) struct MockMailApi {
    pub calls: Mutex<Vec<String>>,
    pub payloads: Mutex<Vec<MessagePayload>>,
    pub sessions: Mutex<Vec<AttachmentItem>>,
    pub chunks: Mutex<Vec<ChunkRange>>,
    pub failures: HashMap<&'static str, u16>,
    pub no_token: bool,
}

impl MockMailApi {
    pub fn failing(op: &'static str, status: u16) -> Self {
        Self {
            failures: HashMap::from([(op, status)]),
            ..Default::default()
        }
    }

    fn record(&self, op: &'static str) -> Result<(), GraphError> {
        self.calls.lock().unwrap().push(op.to_string());
        match self.failures.get(op) {
            Some(0) => Err(GraphError::Transport {
                operation: op,
                reason: "connection refused".into(),
            }),
            Some(&status) => Err(GraphError::Status {
                operation: op,
                status,
                body: "{\"error\":\n \"mock\"}".into(),
            }),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailApi for MockMailApi {
    async fn acquire_token(&self) -> Result<AccessToken, GraphError> {
        self.record("acquire_token")?;
        if self.no_token {
            return Err(GraphError::NoToken("invalid_client".into()));
        }
        Ok(AccessToken::new("token-1"))
    }

    async fn create_draft(
        &self,
        _token: &AccessToken,
        mailbox: &str,
        payload: &MessagePayload,
    ) -> Result<DraftMessage, GraphError> {
        self.record("create_draft")?;
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(DraftMessage {
            id: "draft-1".into(),
            mailbox: mailbox.into(),
        })
    }

    async fn create_upload_session(
        &self,
        _token: &AccessToken,
        _draft: &DraftMessage,
        item: &AttachmentItem,
    ) -> Result<UploadSession, GraphError> {
        self.record("create_upload_session")?;
        self.sessions.lock().unwrap().push(item.clone());
        Ok(UploadSession {
            upload_url: format!("https://upload.test/{}", item.name),
        })
    }

    async fn upload_chunk(
        &self,
        _session: &UploadSession,
        range: ChunkRange,
        _bytes: Vec<u8>,
    ) -> Result<(), GraphError> {
        self.record("upload_chunk")?;
        self.chunks.lock().unwrap().push(range);
        Ok(())
    }

    async fn send_draft(&self, _token: &AccessToken, _draft: &DraftMessage) -> Result<(), GraphError> {
        self.record("send_draft")
    }

    async fn delete_draft(&self, _token: &AccessToken, _draft: &DraftMessage) -> Result<(), GraphError> {
        self.record("delete_draft")
    }
}
