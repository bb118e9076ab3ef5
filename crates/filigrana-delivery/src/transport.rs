// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Mail transport boundary.
//
// The packager hands a fully described message to a `MailTransport`; the
// transport owns authentication, MIME assembly, and the wire size ceiling.
// The production implementation talks to the Gmail REST API with a
// refresh-token credential. The transport is constructed once at startup
// and injected — there is no process-global client.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use filigrana_core::config::GmailConfig;
use filigrana_core::error::{FiligranaError, Result};
use filigrana_core::types::OutgoingMessage;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::mime;

/// OAuth 2.0 token endpoint for refresh-token exchange.
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Gmail send endpoint (userId = the authenticated account).
const SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

/// Outbound HTTP deadline. Large attachments upload within this comfortably
/// given the 17 MiB group budget.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Sends one MIME message per call.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Gmail API transport with refresh-token credential lifecycle.
///
/// A fresh access token is obtained per send; the refresh endpoint is cheap
/// relative to the attachment upload and this keeps the transport free of
/// interior mutability.
pub struct GmailTransport {
    http: reqwest::Client,
    config: GmailConfig,
}

impl GmailTransport {
    pub fn new(config: GmailConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FiligranaError::Mail(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Exchange the configured refresh token for a short-lived access token.
    async fn fetch_access_token(&self) -> Result<String> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| FiligranaError::Mail(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FiligranaError::Mail(format!(
                "token refresh rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| FiligranaError::Mail(format!("malformed token response: {e}")))?;

        debug!("access token refreshed");
        Ok(token.access_token)
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    #[instrument(skip_all, fields(to = %message.to, attachments = message.attachments.len()))]
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let access_token = self.fetch_access_token().await?;

        let raw = mime::assemble(&self.config.sender, message)?;
        let encoded = URL_SAFE_NO_PAD.encode(raw.as_bytes());

        let response = self
            .http
            .post(SEND_URL)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "raw": encoded }))
            .send()
            .await
            .map_err(|e| FiligranaError::Mail(format!("send request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FiligranaError::Mail(format!(
                "Gmail rejected message ({status}): {body}"
            )));
        }

        info!(to = %message.to, subject = %message.subject, "message sent");
        Ok(())
    }
}
