#![cfg(feature = "http-mailbox")]

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use sgn_crypto::hash::sha256;
use tracing::debug;

use crate::errors::CoreError;
use crate::transport::Transport;
use crate::types::Session;

/// Posts sealed responses to a per-session HTTP mailbox.
///
/// The mailbox id is `hex(sha256(session_id))`; the body is the base64 sealed
/// blob. The relay answers 202 when it accepted the message.
#[derive(Clone)]
pub struct HttpMailboxTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMailboxTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| CoreError::TransportSendFailed(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn mailbox_url(&self, session_id: &str) -> String {
        let mailbox = hex::encode(sha256(session_id.as_bytes()));
        format!("{}/v1/mailbox/{}", self.base_url, mailbox)
    }
}

#[async_trait]
impl Transport for HttpMailboxTransport {
    async fn send(
        &self,
        session: &Session,
        request_id: &str,
        sealed: &[u8],
    ) -> Result<(), CoreError> {
        let url = self.mailbox_url(&session.id);
        let body = base64::engine::general_purpose::STANDARD.encode(sealed);
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| CoreError::TransportSendFailed(e.to_string()))?;

        if resp.status() == StatusCode::ACCEPTED {
            debug!(session_id = %session.id, request_id, "response posted to mailbox");
            Ok(())
        } else {
            Err(CoreError::TransportSendFailed(format!(
                "status={} body={:?}",
                resp.status(),
                resp.text().await.ok()
            )))
        }
    }
}
