use super::*;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateImageRequestArgs, Image, ImageModel, ImageResponseFormat, ImageSize},
    Client,
};
use std::time::Instant;

/// OpenAI images backend
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        Self { client, model }
    }

    fn image_model(&self) -> ImageModel {
        match self.model.as_str() {
            "dall-e-3" => ImageModel::DallE3,
            "dall-e-2" => ImageModel::DallE2,
            other => ImageModel::Other(other.to_string()),
        }
    }

    fn map_error(err: OpenAIError) -> ImageError {
        match err {
            OpenAIError::ApiError(api) => {
                let message = api.message.clone();
                if api.code.as_deref() == Some("content_policy_violation")
                    || message.to_lowercase().contains("content policy")
                    || message.to_lowercase().contains("safety system")
                {
                    ImageError::ContentPolicy(message)
                } else if api.code.as_deref() == Some("rate_limit_exceeded") {
                    ImageError::RateLimit
                } else {
                    ImageError::ApiError(message)
                }
            }
            other => ImageError::ApiError(other.to_string()),
        }
    }
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    async fn generate(&self, request: &GenerateRequest) -> ImageResult<Vec<GeneratedImage>> {
        let start = Instant::now();

        let api_request = CreateImageRequestArgs::default()
            .prompt(request.prompt.as_str())
            .model(self.image_model())
            .n(request.count.min(10) as u8)
            .size(ImageSize::S512x512)
            .response_format(ImageResponseFormat::Url)
            .build()
            .map_err(|e| ImageError::ApiError(e.to_string()))?;

        let response = tokio::time::timeout(
            request.timeout,
            self.client.images().create(api_request),
        )
        .await
        .map_err(|_| ImageError::Timeout(request.timeout))?
        .map_err(Self::map_error)?;

        let elapsed = start.elapsed().as_millis() as u64;

        let images: Vec<GeneratedImage> = response
            .data
            .iter()
            .filter_map(|image| match image.as_ref() {
                Image::Url {
                    url,
                    revised_prompt,
                } => Some(complete_image(
                    request,
                    "openai",
                    &self.model,
                    url.clone(),
                    // The images API has no thumbnail variant.
                    url.clone(),
                    revised_prompt.clone(),
                    None,
                    elapsed,
                )),
                _ => None,
            })
            .collect();

        if images.is_empty() {
            return Err(ImageError::ParseError(
                "No image URLs in response".to_string(),
            ));
        }

        Ok(images)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
