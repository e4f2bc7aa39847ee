use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use tracing::{debug, warn};

use crate::llm::media::InlineImage;
use crate::prompt::{assemble_prompt, HeadshotGenerationSettings, PromptTemplates};
use crate::utils::timing::log_llm_timing;

/// Failures from the image model. Permission and availability problems get
/// an explanation a user can act on; everything else keeps the upstream text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HeadshotGenerationError {
    #[error("The image model refused access. Check that the API key is valid and enabled for {model}. ({detail})")]
    PermissionDenied { model: String, detail: String },
    #[error("The image model {model} is currently unavailable. Try again later or configure a different model. ({detail})")]
    ModelUnavailable { model: String, detail: String },
    #[error("{0}")]
    Upstream(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Base64, as returned by the model.
    pub data: String,
}

impl GeneratedImage {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        general_purpose::STANDARD.decode(&self.data)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// What the model adapter hands back, whatever shape the raw response had.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub text: Option<String>,
    pub images: Vec<GeneratedImage>,
    pub block_reason: Option<String>,
}

#[async_trait]
pub trait HeadshotModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        image: &InlineImage,
    ) -> Result<ModelOutput, HeadshotGenerationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadshotResult {
    pub text: String,
    pub images: Vec<GeneratedImage>,
    /// Exact instruction text sent to the model.
    pub prompt: String,
    pub block_reason: Option<String>,
}

/// Assembles the prompt for `settings`, sends it with the photo and returns
/// what came back. One call, no retries; deadlines are the caller's job.
pub async fn generate_headshot(
    model: &dyn HeadshotModel,
    templates: &PromptTemplates,
    image: &InlineImage,
    settings: &HeadshotGenerationSettings,
) -> Result<HeadshotResult, HeadshotGenerationError> {
    let prompt = assemble_prompt(settings, templates);
    debug!(
        target: "llm.gemini",
        style = %settings.style,
        quantity = settings.quantity,
        image_mime = %image.mime_type,
        image_bytes = image.byte_len,
        prompt = %prompt,
        "Submitting headshot generation"
    );

    let metadata = json!({ "style": settings.style, "quantity": settings.quantity });
    let output = log_llm_timing(
        "gemini",
        model.model_name(),
        "generate_headshot",
        Some(metadata),
        || model.generate(&prompt, image),
    )
    .await?;

    let mut images = output.images;
    let requested = usize::try_from(settings.quantity).unwrap_or(usize::MAX);
    if images.len() > requested {
        debug!(
            "Model {} returned {} images for {} requested; keeping the first {}",
            model.model_name(),
            images.len(),
            requested,
            requested
        );
        images.truncate(requested);
    }

    if images.is_empty() {
        warn!(
            "Model {} returned no images (style={}, quantity={}, block_reason={:?})",
            model.model_name(),
            settings.style,
            settings.quantity,
            output.block_reason
        );
    }

    Ok(HeadshotResult {
        text: output.text.unwrap_or_default(),
        images,
        prompt,
        block_reason: output.block_reason,
    })
}
