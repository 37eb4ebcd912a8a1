//! Per-page transforms.
//!
//! Every variant implements [`PageTransform`]. The worker pool calls
//! `transform` concurrently from many tasks, so implementations hold no
//! mutable state of their own.

pub mod hosting;
pub mod identity;
pub mod remote;
pub mod response_path;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, TransformConfig};
use crate::error::{ChapterflowError, ConfigError};
use crate::pipeline::job::JobKind;
use crate::worker::page::{OutputReference, PageTask};

pub use hosting::{HostedImage, HostingClient, UploadOnlyTransform};
pub use identity::IdentityTransform;
pub use remote::RemoteModelTransform;

/// Failure of a single page. Recorded on the page, never fatal to the job.
#[derive(Error, Debug)]
pub enum TransformError {
    /// Network failure or timeout talking to the endpoint.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response parsed but did not have the configured shape.
    #[error("unexpected response: {0}")]
    ResponseShape(String),

    #[error("result is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("transform panicked: {0}")]
    Panicked(String),
}

#[async_trait]
pub trait PageTransform: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transform(&self, task: &PageTask) -> Result<OutputReference, TransformError>;
}

/// Picks the transform a job runs with.
pub trait TransformProvider: Send + Sync {
    fn for_job(&self, kind: &JobKind) -> Result<Arc<dyn PageTransform>, ChapterflowError>;
}

/// Transforms built from the loaded configuration.
pub struct ConfiguredTransforms {
    translate: Arc<dyn PageTransform>,
    hosting: Option<Arc<HostingClient>>,
}

impl ConfiguredTransforms {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let translate: Arc<dyn PageTransform> = match &config.translation.transform {
            TransformConfig::Identity => Arc::new(IdentityTransform),
            TransformConfig::Remote(remote) => Arc::new(RemoteModelTransform::from_config(remote)?),
        };

        let hosting = HostingClient::from_config(&config.hosting)?.map(Arc::new);
        if hosting.is_none() {
            log::info!("No hosting API key configured; chapter uploads are disabled");
        }

        Ok(Self { translate, hosting })
    }
}

impl TransformProvider for ConfiguredTransforms {
    fn for_job(&self, kind: &JobKind) -> Result<Arc<dyn PageTransform>, ChapterflowError> {
        match kind {
            JobKind::Translate => Ok(Arc::clone(&self.translate)),
            JobKind::ChapterUpload {
                title,
                chapter_number,
                ..
            } => {
                let client = self.hosting.as_ref().ok_or_else(|| ConfigError::Transform {
                    kind: "upload".to_string(),
                    reason: "no hosting API key configured".to_string(),
                })?;
                Ok(Arc::new(UploadOnlyTransform::new(
                    Arc::clone(client),
                    title,
                    *chapter_number,
                )))
            }
        }
    }
}
