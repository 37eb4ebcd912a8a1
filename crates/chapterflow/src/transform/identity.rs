use async_trait::async_trait;

use super::{PageTransform, TransformError};
use crate::worker::page::{OutputReference, PageTask};

/// Copies every page through unchanged. Exercises extraction, fan-out and
/// packaging without any remote dependency.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

#[async_trait]
impl PageTransform for IdentityTransform {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn transform(&self, task: &PageTask) -> Result<OutputReference, TransformError> {
        Ok(OutputReference::Inline {
            bytes: task.input.clone(),
            extension: task.extension(),
        })
    }
}
