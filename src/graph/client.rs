//! reqwest implementation of [`MailApi`].

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use super::types::{CreatedMessage, TokenResponse, UploadSessionRequest, UploadSessionResponse};
use super::{AccessToken, AttachmentItem, ChunkRange, DraftMessage, MailApi, MessagePayload, UploadSession};
use crate::config::GraphConfig;
use crate::error::GraphError;

/// Graph client. Keeps no idle connections, so every call opens its own.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    config: GraphConfig,
    base: Url,
}

impl GraphClient {
    pub fn new(config: GraphConfig) -> Result<Self, GraphError> {
        let base = Url::parse(&config.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| GraphError::InvalidUrl(config.base_url.clone()))?;
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| transport("build client", e))?;
        Ok(Self { http, config, base })
    }

    /// Base URL plus path segments. Each segment is percent-encoded, so a
    /// mailbox like `ops#team@x.com` stays one segment.
    fn url(&self, segments: &[&str]) -> Result<Url, GraphError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| GraphError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `users/{mailbox}/messages/{id}` followed by `suffix`.
    fn message_url(&self, draft: &DraftMessage, suffix: &[&str]) -> Result<Url, GraphError> {
        let mut segments = vec!["users", draft.mailbox.as_str(), "messages", draft.id.as_str()];
        segments.extend_from_slice(suffix);
        self.url(&segments)
    }
}

fn transport(operation: &'static str, e: reqwest::Error) -> GraphError {
    GraphError::Transport {
        operation,
        reason: e.to_string(),
    }
}

/// Pass the response through when its status is one of `ok`, otherwise turn
/// it into [`GraphError::Status`] carrying the body.
async fn expect_status(
    operation: &'static str,
    resp: reqwest::Response,
    ok: &[u16],
) -> Result<reqwest::Response, GraphError> {
    let status = resp.status().as_u16();
    if ok.contains(&status) {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GraphError::Status {
        operation,
        status,
        body,
    })
}

async fn json_body<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    resp: reqwest::Response,
) -> Result<T, GraphError> {
    resp.json::<T>()
        .await
        .map_err(|e| GraphError::InvalidResponse {
            operation,
            reason: e.to_string(),
        })
}

#[async_trait]
impl MailApi for GraphClient {
    async fn acquire_token(&self) -> Result<AccessToken, GraphError> {
        const OP: &str = "acquire token";
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("scope", self.config.scope.as_str()),
        ];
        let resp = self
            .http
            .post(self.config.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| transport(OP, e))?;
        let resp = expect_status(OP, resp, &[200]).await?;
        let token: TokenResponse = json_body(OP, resp).await?;

        match token.access_token.filter(|t| !t.is_empty()) {
            Some(t) => {
                debug!("Access token acquired");
                Ok(AccessToken::new(t))
            }
            None => Err(GraphError::NoToken(
                token
                    .error_description
                    .or(token.error)
                    .unwrap_or_else(|| "response carried no access_token".into()),
            )),
        }
    }

    async fn create_draft(
        &self,
        token: &AccessToken,
        mailbox: &str,
        payload: &MessagePayload,
    ) -> Result<DraftMessage, GraphError> {
        const OP: &str = "create draft";
        let url = self.url(&["users", mailbox, "messages"])?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(token.expose())
            .header("Prefer", "IdType=\"ImmutableId\"")
            .json(payload)
            .send()
            .await
            .map_err(|e| transport(OP, e))?;
        let resp = expect_status(OP, resp, &[201]).await?;
        let created: CreatedMessage = json_body(OP, resp).await?;

        info!(id = %created.id, mailbox, "Draft message created");
        Ok(DraftMessage {
            id: created.id,
            mailbox: mailbox.to_string(),
        })
    }

    async fn create_upload_session(
        &self,
        token: &AccessToken,
        draft: &DraftMessage,
        item: &AttachmentItem,
    ) -> Result<UploadSession, GraphError> {
        const OP: &str = "create upload session";
        let url = self.message_url(draft, &["attachments", "createUploadSession"])?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(token.expose())
            .json(&UploadSessionRequest {
                attachment_item: item,
            })
            .send()
            .await
            .map_err(|e| transport(OP, e))?;
        let resp = expect_status(OP, resp, &[200, 201, 202]).await?;
        let session: UploadSessionResponse = json_body(OP, resp).await?;

        debug!(attachment = %item.name, size = item.size, "Upload session created");
        Ok(UploadSession {
            upload_url: session.upload_url,
        })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        range: ChunkRange,
        bytes: Vec<u8>,
    ) -> Result<(), GraphError> {
        const OP: &str = "upload chunk";
        // Upload URLs are pre-authenticated; no bearer token.
        let resp = self
            .http
            .put(&session.upload_url)
            .header(CONTENT_RANGE, range.content_range())
            .header(CONTENT_LENGTH, bytes.len())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport(OP, e))?;
        // 202 for intermediate chunks, 200/201 once complete.
        expect_status(OP, resp, &[200, 201, 202]).await?;
        Ok(())
    }

    async fn send_draft(
        &self,
        token: &AccessToken,
        draft: &DraftMessage,
    ) -> Result<(), GraphError> {
        const OP: &str = "send draft";
        let resp = self
            .http
            .post(self.message_url(draft, &["send"])?)
            .bearer_auth(token.expose())
            .header(CONTENT_LENGTH, 0)
            .body("")
            .send()
            .await
            .map_err(|e| transport(OP, e))?;
        expect_status(OP, resp, &[202]).await?;
        info!(id = %draft.id, mailbox = %draft.mailbox, "Draft message sent");
        Ok(())
    }

    async fn delete_draft(
        &self,
        token: &AccessToken,
        draft: &DraftMessage,
    ) -> Result<(), GraphError> {
        const OP: &str = "delete draft";
        let resp = self
            .http
            .delete(self.message_url(draft, &[])?)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| transport(OP, e))?;
        expect_status(OP, resp, &[204]).await?;
        debug!(id = %draft.id, "Draft message deleted");
        Ok(())
    }
}
