use std::time::Duration;

use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::DescribeError;

/// Phrases that mean the model declined to describe the photo.
const REFUSAL_MARKERS: [&str; 2] = ["unable to assist", "policy"];

/// A vision model that turns a photo into a reconstruction-grade description.
///
/// Implementors only supply the raw round trip; cancellation, timeouts and
/// refusal screening are shared.
#[async_trait]
pub trait DescribeImage: Send + Sync {
    /// One request to the provider, returning whatever text came back.
    async fn request_description(&self, jpeg_base64: &str) -> Result<String>;

    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    /// Describe a photo, keeping the reason when there is no usable text.
    async fn try_describe(
        &self,
        jpeg_base64: &str,
        cancel: &CancellationToken,
    ) -> Result<String, DescribeError> {
        let limit = self.timeout();
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DescribeError::Cancelled),
            response = tokio::time::timeout(limit, self.request_description(jpeg_base64)) => {
                response.map_err(|_| DescribeError::TimedOut(limit))??
            }
        };
        if cancel.is_cancelled() {
            return Err(DescribeError::Cancelled);
        }
        screen_refusal(text)
    }

    /// Describe a photo. Any failure, including cancellation, gives an empty string.
    async fn describe(&self, jpeg_base64: &str, cancel: &CancellationToken) -> String {
        match self.try_describe(jpeg_base64, cancel).await {
            Ok(text) => text,
            Err(DescribeError::Cancelled) => {
                tracing::debug!("Description cancelled");
                String::new()
            }
            Err(err) => {
                tracing::warn!("Description failed: {err}");
                String::new()
            }
        }
    }
}

/// Reject empty answers and refusals so they never pass for a description.
pub fn screen_refusal(text: String) -> Result<String, DescribeError> {
    let lowered = text.to_lowercase();
    if REFUSAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Err(DescribeError::Refused(text));
    }
    if text.trim().is_empty() {
        return Err(DescribeError::Empty);
    }
    Ok(text)
}

/// Describes photos with an OpenAI-compatible chat model.
#[derive(Clone)]
pub struct OpenAiDescriber {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiDescriber {
    pub fn new(config: &Config) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai.api_key)
                .with_api_base(&config.openai.api_base),
        );
        Self {
            client,
            model: config.openai.describe_model.clone(),
            timeout: config.timeouts.describe(),
        }
    }
}

#[async_trait]
impl DescribeImage for OpenAiDescriber {
    async fn request_description(&self, jpeg_base64: &str) -> Result<String> {
        tracing::info!("Requesting description from {}", self.model);
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(4096u32)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(vec![
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(include_str!("../../prompts/describe.md").trim())
                        .build()?
                        .into(),
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(format!("data:image/jpeg;base64,{jpeg_base64}"))
                                .detail(ImageDetail::High)
                                .build()?,
                        )
                        .build()?
                        .into(),
                ])
                .build()?
                .into()])
            .build()?;
        let response = self.client.chat().create(request).await?;
        if let Some(usage) = &response.usage {
            tracing::debug!("Description used {} tokens", usage.total_tokens);
        }
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
