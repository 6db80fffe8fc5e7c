//! HttpInferenceGateway - HTTP 越しの画像生成モデル
//!
//! `{"model_id": ..., "text_prompts": [{"text": prompt}]}` を POST し、
//! `image/png` の生バイト列を受け取る。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use crate::ports::{InferenceError, InferenceGateway};

const ERROR_BODY_LIMIT: usize = 512;

pub struct HttpInferenceGateway {
    http: reqwest::Client,
    endpoint: String,
    model_id: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpInferenceGateway {
    pub fn new(
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Upstream(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            model_id: model_id.into(),
            api_key,
            timeout,
        })
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push('…');
    out
}

#[async_trait]
impl InferenceGateway for HttpInferenceGateway {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, InferenceError> {
        let payload = json!({
            "model_id": self.model_id,
            "text_prompts": [{ "text": prompt }],
        });
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "image/png")
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout(self.timeout)
            } else {
                InferenceError::Upstream(format!("request to {} failed: {e}", self.endpoint))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::RateLimited(truncate(&body, ERROR_BODY_LIMIT)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Upstream(format!(
                "status {}: {}",
                status.as_u16(),
                truncate(&body, ERROR_BODY_LIMIT)
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout(self.timeout)
            } else {
                InferenceError::Upstream(format!("reading image body: {e}"))
            }
        })?;
        if bytes.is_empty() {
            return Err(InferenceError::EmptyBody);
        }
        debug!(model_id = %self.model_id, size = bytes.len(), "image generated");
        Ok(bytes.to_vec())
    }
}
