//! SlackNotifier - Slack Web API への投稿
//!
//! - テキスト: `chat.postMessage`
//! - ファイル: `files.getUploadURLExternal` → upload → `files.completeUploadExternal`
//!
//! Slack は HTTP 200 で `{"ok": false, "error": "..."}` を返すので、
//! status ではなく `ok` を見て判定する。

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::ports::{FileUpload, NotificationChannel, NotifyError};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadTicket {
    upload_url: String,
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct Empty {}

pub struct SlackNotifier {
    http: reqwest::Client,
    api_base: String,
    token: SecretString,
}

impl SlackNotifier {
    pub fn with_api_base(token: SecretString, api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    async fn read<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, NotifyError> {
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Transport(format!(
                "{method}: http status {}",
                status.as_u16()
            )));
        }
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| NotifyError::Transport(format!("{method}: invalid response: {e}")))?;
        if !parsed.ok {
            let reason = parsed.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(NotifyError::Api(format!("{method}: {reason}")));
        }
        parsed
            .data
            .ok_or_else(|| NotifyError::Api(format!("{method}: missing response fields")))
    }

    async fn get_upload_url(
        &self,
        filename: &str,
        length: usize,
    ) -> Result<UploadTicket, NotifyError> {
        let method = "files.getUploadURLExternal";
        let length = length.to_string();
        let response = self
            .http
            .post(self.url(method))
            .bearer_auth(self.token.expose_secret())
            .query(&[("filename", filename), ("length", length.as_str())])
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("{method}: {e}")))?;
        Self::read(method, response).await
    }
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn upload_file(&self, upload: FileUpload<'_>) -> Result<(), NotifyError> {
        let ticket = self
            .get_upload_url(upload.filename, upload.bytes.len())
            .await?;

        let form = Form::new().part(
            "file",
            Part::bytes(upload.bytes.to_vec()).file_name(upload.filename.to_string()),
        );
        let response = self
            .http
            .post(&ticket.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("file upload: {e}")))?;
        if !response.status().is_success() {
            return Err(NotifyError::Transport(format!(
                "file upload: http status {}",
                response.status().as_u16()
            )));
        }

        let method = "files.completeUploadExternal";
        let response = self
            .http
            .post(self.url(method))
            .bearer_auth(self.token.expose_secret())
            .json(&json!({
                "files": [{ "id": ticket.file_id, "title": upload.title }],
                "channel_id": upload.conversation_id,
                "initial_comment": upload.caption,
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("{method}: {e}")))?;
        Self::read::<Empty>(method, response).await?;
        debug!(channel_id = upload.conversation_id, file_id = %ticket.file_id, "file uploaded");
        Ok(())
    }

    async fn post_message(&self, conversation_id: &str, text: &str) -> Result<(), NotifyError> {
        let method = "chat.postMessage";
        let response = self
            .http
            .post(self.url(method))
            .bearer_auth(self.token.expose_secret())
            .json(&json!({ "channel": conversation_id, "text": text }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("{method}: {e}")))?;
        Self::read::<Empty>(method, response).await?;
        Ok(())
    }
}
