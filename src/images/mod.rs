//! Image generation port: a uniform interface over pluggable backends with
//! one-shot fallback chaining.

mod huggingface;
mod mock;
mod openai;

use crate::types::{GeneratedImage, ImageMetadata, ImageStatus, PlayerId};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

pub use huggingface::HuggingFaceProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;

/// Result type for image generation operations
pub type ImageResult<T> = Result<T, ImageError>;

/// Errors that can occur during image generation
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Terminal verdict: the prompt itself is disallowed. Never retried on
    /// a fallback provider.
    #[error("Content policy violation: {0}")]
    ContentPolicy(String),

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Response parsing failed: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl ImageError {
    /// Everything except a content-policy verdict counts as transient and
    /// is eligible for the fallback provider.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ImageError::ContentPolicy(_))
    }
}

/// Request to generate a batch of candidate images for one prompt
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    /// How many candidates to produce; providers may return fewer.
    pub count: u32,
    /// The submitting player; stamped onto every returned image.
    pub owner: PlayerId,
    pub timeout: Duration,
}

/// Trait that all image backends must implement
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generate up to `request.count` completed images for the prompt.
    async fn generate(&self, request: &GenerateRequest) -> ImageResult<Vec<GeneratedImage>>;

    /// Get the name of this provider
    fn name(&self) -> &'static str;
}

/// Assemble a completed [`GeneratedImage`] the way every backend returns them.
pub(crate) fn complete_image(
    request: &GenerateRequest,
    provider: &'static str,
    model: &str,
    image_url: String,
    thumbnail_url: String,
    revised_prompt: Option<String>,
    provider_image_id: Option<String>,
    generation_time: u64,
) -> GeneratedImage {
    GeneratedImage {
        id: ulid::Ulid::new().to_string(),
        prompt_id: request.owner.clone(),
        player_id: request.owner.clone(),
        image_url,
        thumbnail_url,
        provider: provider.to_string(),
        provider_image_id,
        status: ImageStatus::Complete,
        generated_at: Utc::now(),
        metadata: ImageMetadata {
            model: model.to_string(),
            revised_prompt,
            generation_time,
        },
    }
}

/// Primary backend plus an optional one-shot fallback for transient errors.
pub struct ImageService {
    primary: Box<dyn ImageProvider>,
    fallback: Option<Box<dyn ImageProvider>>,
    timeout: Duration,
}

impl ImageService {
    pub fn new(
        primary: Box<dyn ImageProvider>,
        fallback: Option<Box<dyn ImageProvider>>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.primary.name()
    }

    pub fn fallback_name(&self) -> Option<&'static str> {
        self.fallback.as_deref().map(|p| p.name())
    }

    /// Generate candidates for one prompt. A content-policy verdict from
    /// either provider is final; any other failure on the primary is retried
    /// once on the fallback when one is configured.
    pub async fn generate(
        &self,
        prompt: &str,
        count: u32,
        owner: &PlayerId,
    ) -> ImageResult<Vec<GeneratedImage>> {
        let request = GenerateRequest {
            prompt: prompt.to_string(),
            count,
            owner: owner.clone(),
            timeout: self.timeout,
        };

        match self.primary.generate(&request).await {
            Ok(images) => Ok(images),
            Err(err) if err.is_transient() => {
                let Some(fallback) = &self.fallback else {
                    return Err(err);
                };
                tracing::warn!(
                    "Provider {} failed ({}), retrying on {}",
                    self.primary.name(),
                    err,
                    fallback.name()
                );
                fallback.generate(&request).await
            }
            Err(policy) => Err(policy),
        }
    }
}

/// Which backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    HuggingFace,
    OpenAi,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Some(ProviderKind::Mock),
            "huggingface" => Some(ProviderKind::HuggingFace),
            "openai" => Some(ProviderKind::OpenAi),
            _ => None,
        }
    }
}

/// Configuration for the image generation stack
#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub provider: ProviderKind,
    pub enable_fallback: bool,
    pub fallback_provider: Option<ProviderKind>,
    pub openai_api_key: Option<String>,
    pub huggingface_api_key: Option<String>,
    pub openai_model: String,
    pub huggingface_model: String,
    pub request_timeout: Duration,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Mock,
            enable_fallback: false,
            fallback_provider: None,
            openai_api_key: None,
            huggingface_api_key: None,
            openai_model: "dall-e-2".to_string(),
            huggingface_model: "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl ImageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider: std::env::var("IMAGE_PROVIDER")
                .ok()
                .and_then(|s| ProviderKind::parse(&s))
                .unwrap_or(ProviderKind::Mock),
            enable_fallback: std::env::var("ENABLE_FALLBACK")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
            fallback_provider: std::env::var("FALLBACK_PROVIDER")
                .ok()
                .and_then(|s| ProviderKind::parse(&s)),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            huggingface_api_key: std::env::var("HUGGINGFACE_API_KEY").ok(),
            openai_model: std::env::var("OPENAI_IMAGE_MODEL").unwrap_or(defaults.openai_model),
            huggingface_model: std::env::var("HUGGINGFACE_IMAGE_MODEL")
                .unwrap_or(defaults.huggingface_model),
            request_timeout: std::env::var("IMAGE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }

    fn build_provider(&self, kind: ProviderKind) -> ImageResult<Box<dyn ImageProvider>> {
        match kind {
            ProviderKind::Mock => Ok(Box::new(MockProvider::new())),
            ProviderKind::OpenAi => {
                let api_key = self.openai_api_key.clone().ok_or_else(|| {
                    ImageError::ConfigError("OPENAI_API_KEY is required for openai".to_string())
                })?;
                Ok(Box::new(OpenAiProvider::new(
                    api_key,
                    self.openai_model.clone(),
                )))
            }
            ProviderKind::HuggingFace => {
                let api_key = self.huggingface_api_key.clone().ok_or_else(|| {
                    ImageError::ConfigError(
                        "HUGGINGFACE_API_KEY is required for huggingface".to_string(),
                    )
                })?;
                Ok(Box::new(HuggingFaceProvider::new(
                    api_key,
                    self.huggingface_model.clone(),
                )))
            }
        }
    }

    /// Build the service with the configured primary and fallback providers
    pub fn build_service(&self) -> ImageResult<ImageService> {
        let primary = self.build_provider(self.provider)?;
        let fallback = match (self.enable_fallback, self.fallback_provider) {
            (true, Some(kind)) if kind != self.provider => Some(self.build_provider(kind)?),
            (true, Some(_)) => None,
            (true, None) => {
                return Err(ImageError::ConfigError(
                    "ENABLE_FALLBACK is set but FALLBACK_PROVIDER is not".to_string(),
                ))
            }
            (false, _) => None,
        };
        Ok(ImageService::new(primary, fallback, self.request_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Provider that always fails the same way, for fallback tests.
    struct FailingProvider(fn() -> ImageError);

    #[async_trait]
    impl ImageProvider for FailingProvider {
        async fn generate(&self, _request: &GenerateRequest) -> ImageResult<Vec<GeneratedImage>> {
            Err((self.0)())
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn transient_failure_falls_back() {
        let service = ImageService::new(
            Box::new(FailingProvider(|| ImageError::ApiError("boom".into()))),
            Some(Box::new(MockProvider::instant())),
            Duration::from_secs(5),
        );

        let images = service.generate("a blue cat", 4, &"p1".to_string()).await;
        assert_eq!(images.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn content_policy_is_final() {
        let service = ImageService::new(
            Box::new(FailingProvider(|| {
                ImageError::ContentPolicy("disallowed".into())
            })),
            Some(Box::new(MockProvider::instant())),
            Duration::from_secs(5),
        );

        let err = service
            .generate("something vile", 4, &"p1".to_string())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn no_fallback_re_raises_transient_error() {
        let service = ImageService::new(
            Box::new(FailingProvider(|| ImageError::RateLimit)),
            None,
            Duration::from_secs(5),
        );

        let err = service
            .generate("a blue cat", 4, &"p1".to_string())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!(ProviderKind::parse("Mock"), Some(ProviderKind::Mock));
        assert_eq!(ProviderKind::parse("OPENAI"), Some(ProviderKind::OpenAi));
        assert_eq!(
            ProviderKind::parse("huggingface"),
            Some(ProviderKind::HuggingFace)
        );
        assert_eq!(ProviderKind::parse("dalle"), None);
    }

    #[test]
    fn fallback_requires_a_provider() {
        let config = ImageConfig {
            enable_fallback: true,
            ..ImageConfig::default()
        };
        assert!(matches!(
            config.build_service(),
            Err(ImageError::ConfigError(_))
        ));
    }
}
