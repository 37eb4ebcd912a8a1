//! Image hosting client and the upload-only page transform.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{PageTransform, TransformError};
use crate::config::HostingConfig;
use crate::error::ConfigError;
use crate::sanitize::redact_url;
use crate::secrets::resolve_secret_optional;
use crate::worker::page::{OutputReference, PageTask};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

static NON_SLUG_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// A page stored on the hosting endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize)]
struct HostingResponse {
    #[serde(default)]
    success: bool,
    data: Option<HostingData>,
}

#[derive(Deserialize)]
struct HostingData {
    url: Option<String>,
    display_url: Option<String>,
    #[serde(default)]
    width: Value,
    #[serde(default)]
    height: Value,
}

/// Client for an ImgBB-style upload API: multipart `key`, `name`, `image`.
pub struct HostingClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
}

impl HostingClient {
    /// Builds the client, or returns `Ok(None)` when no API key is configured.
    pub fn from_config(config: &HostingConfig) -> Result<Option<Self>, ConfigError> {
        let api_key = resolve_secret_optional(
            config.api_key.as_deref(),
            config.api_key_file.as_deref(),
            config.api_key_env.as_deref(),
        )
        .map_err(|e| ConfigError::Transform {
            kind: "upload".to_string(),
            reason: e.to_string(),
        })?;

        let Some(api_key) = api_key else {
            return Ok(None);
        };

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Transform {
                kind: "upload".to_string(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
        }))
    }

    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        display_name: &str,
    ) -> Result<HostedImage, TransformError> {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let image = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime.essence_str())?;

        let form = Form::new()
            .text("key", self.api_key.expose_secret().to_string())
            .text("name", display_name.to_string())
            .part("image", image);

        debug!(endpoint = %redact_url(&self.endpoint), name = display_name, "uploading page");

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransformError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: HostingResponse = response.json().await.map_err(|e| {
            TransformError::ResponseShape(format!("hosting response is not valid JSON: {}", e))
        })?;

        if !parsed.success {
            return Err(TransformError::Rejected(
                "hosting endpoint reported success=false".to_string(),
            ));
        }

        let data = parsed.data.ok_or_else(|| {
            TransformError::ResponseShape("hosting response has no data".to_string())
        })?;

        let url = data.display_url.or(data.url).ok_or_else(|| {
            TransformError::ResponseShape("hosting response has no url".to_string())
        })?;

        Ok(HostedImage {
            url,
            width: lenient_u32(&data.width),
            height: lenient_u32(&data.height),
        })
    }
}

/// Dimensions arrive as numbers or numeric strings depending on the host.
fn lenient_u32(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Lowercase ASCII slug: runs of anything else collapse to a single `-`.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    NON_SLUG_CHARS
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Upload-only transform: stores the original page bytes on the hosting
/// endpoint under `{slug}_ch{NNN}_p{NNN}`.
pub struct UploadOnlyTransform {
    client: Arc<HostingClient>,
    slug: String,
    chapter_number: u32,
}

impl UploadOnlyTransform {
    pub fn new(client: Arc<HostingClient>, title: &str, chapter_number: u32) -> Self {
        let slug = slugify(title);
        Self {
            client,
            slug: if slug.is_empty() {
                "chapter".to_string()
            } else {
                slug
            },
            chapter_number,
        }
    }

    pub fn display_name(&self, page_number: u32) -> String {
        format!(
            "{}_ch{:03}_p{:03}",
            self.slug, self.chapter_number, page_number
        )
    }
}

#[async_trait]
impl PageTransform for UploadOnlyTransform {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn transform(&self, task: &PageTask) -> Result<OutputReference, TransformError> {
        let hosted = self
            .client
            .upload(
                task.input.clone(),
                task.file_name(),
                &self.display_name(task.page_number),
            )
            .await?;

        Ok(OutputReference::Hosted {
            url: hosted.url,
            width: hosted.width,
            height: hosted.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> Arc<HostingClient> {
        let config = HostingConfig {
            endpoint: format!("{}/1/upload", server.uri()),
            api_key: Some("hosting-key".to_string()),
            api_key_file: None,
            api_key_env: None,
            timeout_secs: 5,
        };
        Arc::new(HostingClient::from_config(&config).unwrap().unwrap())
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("One Piece!"), "one-piece");
        assert_eq!(slugify("  Spy x Family  "), "spy-x-family");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn test_display_name_is_zero_padded() {
        let config = HostingConfig {
            api_key: Some("k".to_string()),
            ..HostingConfig::default()
        };
        let client = Arc::new(HostingClient::from_config(&config).unwrap().unwrap());
        let transform = UploadOnlyTransform::new(client, "Blue Lock", 7);
        assert_eq!(transform.display_name(12), "blue-lock_ch007_p012");
    }

    #[test]
    fn test_missing_key_means_no_client() {
        let config = HostingConfig {
            api_key_env: Some("CHAPTERFLOW_UNSET_HOSTING_KEY".to_string()),
            ..HostingConfig::default()
        };
        assert!(HostingClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_lenient_dimensions() {
        assert_eq!(lenient_u32(&json!(800)), 800);
        assert_eq!(lenient_u32(&json!("1200")), 1200);
        assert_eq!(lenient_u32(&json!(null)), 0);
    }

    #[tokio::test]
    async fn test_upload_prefers_display_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "url": "https://i.example.com/raw.png",
                    "display_url": "https://i.example.com/display.png",
                    "width": "800",
                    "height": 1200
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transform = UploadOnlyTransform::new(client_for(&server), "Test Manga", 1);
        let task = PageTask::new(3, "pages/003.png", b"png".to_vec());

        let output = transform.transform(&task).await.unwrap();
        assert_eq!(
            output,
            OutputReference::Hosted {
                url: "https://i.example.com/display.png".to_string(),
                width: 800,
                height: 1200,
            }
        );
    }

    #[tokio::test]
    async fn test_upload_unsuccessful_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .upload(b"x".to_vec(), "001.jpg", "t_ch001_p001")
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_upload_non_json_is_shape_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .upload(b"x".to_vec(), "001.jpg", "t_ch001_p001")
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::ResponseShape(_)));
    }

    #[tokio::test]
    async fn test_upload_server_error_is_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .upload(b"x".to_vec(), "001.jpg", "t_ch001_p001")
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Status { status: 400, .. }));
    }
}
