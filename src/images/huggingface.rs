use super::*;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::time::Instant;

/// HuggingFace inference API backend. The API returns raw image bytes, so
/// results are surfaced as data URLs; uploading them somewhere durable is
/// the caller's concern.
pub struct HuggingFaceProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct HfErrorResponse {
    error: String,
}

impl HuggingFaceProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client");

        Self {
            api_key,
            model,
            client,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api-inference.huggingface.co/models/{}",
            self.model
        )
    }

    /// One inference call yields one image.
    async fn generate_one(&self, request: &GenerateRequest) -> ImageResult<GeneratedImage> {
        let start = Instant::now();

        let response = tokio::time::timeout(
            request.timeout,
            self.client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({ "inputs": request.prompt }))
                .send(),
        )
        .await
        .map_err(|_| ImageError::Timeout(request.timeout))?
        .map_err(|e| ImageError::ApiError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ImageError::RateLimit);
        }
        if !status.is_success() {
            let message = match response.json::<HfErrorResponse>().await {
                Ok(body) => body.error,
                Err(_) => format!("HuggingFace API returned status {}", status),
            };
            let lowered = message.to_lowercase();
            if lowered.contains("safety") || lowered.contains("nsfw") {
                return Err(ImageError::ContentPolicy(message));
            }
            return Err(ImageError::ApiError(message));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageError::ParseError(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageError::ParseError("Empty image payload".to_string()));
        }

        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(&bytes));
        let elapsed = start.elapsed().as_millis() as u64;

        Ok(complete_image(
            request,
            "huggingface",
            &self.model,
            data_url.clone(),
            data_url,
            None,
            None,
            elapsed,
        ))
    }
}

#[async_trait]
impl ImageProvider for HuggingFaceProvider {
    async fn generate(&self, request: &GenerateRequest) -> ImageResult<Vec<GeneratedImage>> {
        let calls = (0..request.count).map(|_| self.generate_one(request));
        futures::future::try_join_all(calls).await
    }

    fn name(&self) -> &'static str {
        "huggingface"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run with an actual API key
    async fn generates_real_images() {
        let api_key = std::env::var("HUGGINGFACE_API_KEY").expect("HUGGINGFACE_API_KEY not set");
        let provider = HuggingFaceProvider::new(
            api_key,
            "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
        );

        let request = GenerateRequest {
            prompt: "a watercolor painting of a lighthouse".to_string(),
            count: 1,
            owner: "p1".to_string(),
            timeout: Duration::from_secs(120),
        };

        let images = provider.generate(&request).await.unwrap();
        assert_eq!(images.len(), 1);
        assert!(images[0].image_url.starts_with("data:image/png;base64,"));
    }
}
