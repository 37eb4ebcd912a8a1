//! Sends each page to a remote model endpoint and decodes the image it
//! returns.
//!
//! Request body: the configured `request_template` object with the page
//! added as a base64 `image` field. The translated page is read back from
//! the response via the configured dot path and is expected to be base64
//! (a `data:image/...;base64,` prefix is tolerated).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tracing::debug;

use super::response_path;
use super::{PageTransform, TransformError};
use crate::config::RemoteModelConfig;
use crate::error::ConfigError;
use crate::sanitize::redact_url;
use crate::secrets::resolve_secret_optional;
use crate::worker::page::{OutputReference, PageTask};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest slice of an error body kept in a [`TransformError::Status`].
const ERROR_BODY_LIMIT: usize = 200;

pub struct RemoteModelTransform {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    extra_headers: HashMap<String, String>,
    request_template: Map<String, Value>,
    response_path: String,
}

impl RemoteModelTransform {
    pub fn from_config(config: &RemoteModelConfig) -> Result<Self, ConfigError> {
        let api_key = resolve_secret_optional(
            config.api_key.as_deref(),
            config.api_key_file.as_deref(),
            config.api_key_env.as_deref(),
        )
        .map_err(|e| ConfigError::Transform {
            kind: "remote".to_string(),
            reason: e.to_string(),
        })?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Transform {
                kind: "remote".to_string(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            extra_headers: config.extra_headers.clone(),
            request_template: config.request_template.clone(),
            response_path: config.response_path.clone(),
        })
    }

    fn request_body(&self, task: &PageTask) -> Value {
        let mut body = self.request_template.clone();
        body.insert("image".to_string(), Value::String(BASE64.encode(&task.input)));
        Value::Object(body)
    }
}

#[async_trait]
impl PageTransform for RemoteModelTransform {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn transform(&self, task: &PageTask) -> Result<OutputReference, TransformError> {
        debug!(
            endpoint = %redact_url(&self.endpoint),
            page = task.page_number,
            "sending page to model"
        );

        let mut request = self.client.post(&self.endpoint).json(&self.request_body(task));
        for (name, value) in &self.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransformError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransformError::ResponseShape(format!("body is not JSON: {}", e)))?;

        let encoded = response_path::lookup(&body, &self.response_path)
            .ok_or_else(|| {
                TransformError::ResponseShape(format!(
                    "no value at '{}' in model response",
                    self.response_path
                ))
            })?
            .as_str()
            .ok_or_else(|| {
                TransformError::ResponseShape(format!(
                    "value at '{}' is not a string",
                    self.response_path
                ))
            })?;

        let bytes = BASE64.decode(strip_data_uri(encoded))?;

        Ok(OutputReference::Inline {
            bytes,
            extension: task.extension(),
        })
    }
}

fn strip_data_uri(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    }
}
