use super::*;
use sha2::{Digest, Sha256};
use std::time::Instant;

/// Prompts containing any of these are rejected the way a real backend's
/// safety system would reject them.
const POLICY_DENYLIST: &[&str] = &["nsfw", "gore", "explicit"];

/// Deterministic placeholder backend. URLs are seeded from a hash of the
/// prompt, so the same prompt always yields the same images, and the
/// simulated latency (0.5-1.5s, also hash-derived) mimics a real generator.
pub struct MockProvider {
    simulate_latency: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            simulate_latency: true,
        }
    }

    /// Mock without the simulated latency, for tests.
    pub fn instant() -> Self {
        Self {
            simulate_latency: false,
        }
    }

    fn seed(prompt: &str, index: u32) -> String {
        let hash = Sha256::digest(format!("{}:{}", prompt, index).as_bytes());
        hex::encode(&hash[..8])
    }

    fn latency(prompt: &str) -> Duration {
        let hash = Sha256::digest(prompt.as_bytes());
        // Spread deterministically across 500-1500ms.
        Duration::from_millis(500 + u64::from(hash[0]) * 1000 / 255)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    async fn generate(&self, request: &GenerateRequest) -> ImageResult<Vec<GeneratedImage>> {
        let start = Instant::now();
        let lowered = request.prompt.to_lowercase();
        if let Some(term) = POLICY_DENYLIST.iter().find(|t| lowered.contains(**t)) {
            return Err(ImageError::ContentPolicy(format!(
                "prompt contains disallowed term \"{}\"",
                term
            )));
        }

        if self.simulate_latency {
            tokio::time::sleep(Self::latency(&request.prompt)).await;
        }

        let elapsed = start.elapsed().as_millis() as u64;
        let images = (0..request.count)
            .map(|i| {
                let seed = Self::seed(&request.prompt, i);
                complete_image(
                    request,
                    "mock",
                    "placeholder",
                    format!("https://picsum.photos/seed/{}/512", seed),
                    format!("https://picsum.photos/seed/{}/128", seed),
                    None,
                    Some(seed),
                    elapsed,
                )
            })
            .collect();

        Ok(images)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
