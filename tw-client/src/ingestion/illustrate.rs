use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tw::basic_models::{CameraMode, ImageRef};

use super::stream::{EventSource, GenerationEvent, GenerationEvents};
use super::truncate_chars;
use crate::config::Config;

/// Longest description passed on to the image model.
pub const MAX_PROMPT_CHARS: usize = 3900;

/// The style instruction placed before the description for each mode.
pub fn prompt_prefix(mode: CameraMode) -> &'static str {
    match mode {
        CameraMode::Realistic => {
            "Create an image that matches this description as closely as possible: "
        }
        CameraMode::SuperAi => {
            "Create a hyper-realistic image with heightened detail, dramatic lighting and vivid color that still stays faithful to the scene. Based on this description: "
        }
        CameraMode::Cartoon => {
            "Create a bright picture-book cartoon illustration with bold outlines, saturated colors and playful shapes, based on this description: "
        }
        CameraMode::NinetiesDisposable => {
            "Create a photo that looks like it came from a 1990s disposable camera: soft focus, heavy film grain, light leaks, blown highlights, a warm cast and dark corners. Based on this description: "
        }
    }
}

/// Prefix the description with the mode's style and cap its length.
pub fn build_prompt(mode: CameraMode, description: &str) -> String {
    format!(
        "{}{}",
        prompt_prefix(mode),
        truncate_chars(description, MAX_PROMPT_CHARS)
    )
}

/// Streaming text-to-image generation.
///
/// Implementors open the event stream; consuming it (previews, completion,
/// cancellation and idle timeouts) is shared.
#[async_trait]
pub trait GenerateImage: Send + Sync {
    /// Send the finished prompt and hand back the event stream.
    async fn start(&self, prompt: &str) -> Result<Box<dyn EventSource>>;

    /// How long to wait for the next event before giving up.
    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(90)
    }

    /// Recreate an image from a description.
    ///
    /// Each preview is handed to `on_partial` as it arrives. Returns `Ok(None)`
    /// if cancelled, and an error for anything else that stops the stream
    /// short of a finished image.
    async fn generate(
        &self,
        description: &str,
        mode: CameraMode,
        cancel: &CancellationToken,
        on_partial: &mut (dyn FnMut(ImageRef) + Send),
    ) -> Result<Option<ImageRef>> {
        let prompt = build_prompt(mode, description);
        let idle = self.idle_timeout();
        tracing::info!("Generating {mode} image");
        tracing::debug!("Prompt: {}", prompt);

        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            started = tokio::time::timeout(idle, self.start(&prompt)) => {
                started.map_err(|_| anyhow!("Image generation did not start within {idle:?}"))??
            }
        };
        let mut partials = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Image stream abandoned after {partials} previews");
                    return Ok(None);
                }
                next = tokio::time::timeout(idle, events.next_event()) => {
                    next.map_err(|_| anyhow!("No image event for {idle:?}"))??
                }
            };
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match next {
                Some(GenerationEvent::Partial { index, image }) => {
                    partials += 1;
                    tracing::debug!("Preview {index} arrived");
                    on_partial(image);
                }
                Some(GenerationEvent::Completed { image }) => {
                    tracing::info!("Image complete after {partials} previews");
                    return Ok(Some(image));
                }
                None => bail!("Image stream ended without a finished image"),
            }
        }
    }
}

/// Streams images from an OpenAI-compatible `/images/generations` endpoint.
#[derive(Clone)]
pub struct StreamingIllustrator {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    idle_timeout: Duration,
}

impl StreamingIllustrator {
    pub fn new(config: &Config, http: reqwest::Client) -> Self {
        Self {
            http,
            api_base: config.openai.api_base.trim_end_matches('/').to_string(),
            api_key: config.openai.api_key.clone(),
            model: config.openai.image_model.clone(),
            idle_timeout: config.timeouts.stream_idle(),
        }
    }
}

#[async_trait]
impl GenerateImage for StreamingIllustrator {
    async fn start(&self, prompt: &str) -> Result<Box<dyn EventSource>> {
        let response = self
            .http
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "prompt": prompt,
                "model": self.model,
                "n": 1,
                "stream": true,
                "partial_images": 2,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Image provider error {}: {}", status, text);
        }
        Ok(Box::new(GenerationEvents::new(Box::pin(
            response.bytes_stream(),
        ))))
    }

    fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}
