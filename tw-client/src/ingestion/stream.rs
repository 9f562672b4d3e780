//! Decoding the server-sent event stream of a streaming image generation.
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tw::basic_models::ImageRef;

/// One step of a streaming generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// A preview, better than the previous one.
    Partial { index: u32, image: ImageRef },
    /// The finished image. Nothing follows it.
    Completed { image: ImageRef },
}

/// Anything that yields generation events one at a time.
#[async_trait]
pub trait EventSource: Send {
    /// `Ok(None)` once the source is exhausted.
    async fn next_event(&mut self) -> Result<Option<GenerationEvent>>;
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    b64_json: Option<String>,
    partial_image_index: Option<u32>,
    error: Option<serde_json::Value>,
}

/// Turns a byte stream of `data: {...}` lines into [`GenerationEvent`]s.
///
/// Network chunks don't respect line boundaries, so bytes are buffered until a
/// full line is available.
pub struct GenerationEvents<S> {
    stream: S,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl<S, B, E> GenerationEvents<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            exhausted: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<GenerationEvent>> {
        loop {
            while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=newline).collect();
                if let Some(event) = parse_line(&line)? {
                    return Ok(Some(event));
                }
            }
            if self.exhausted {
                // A last line may arrive without its newline
                let rest = std::mem::take(&mut self.buffer);
                return parse_line(&rest);
            }
            match self.stream.next().await {
                Some(chunk) => self
                    .buffer
                    .extend_from_slice(chunk.map_err(Into::<anyhow::Error>::into)?.as_ref()),
                None => self.exhausted = true,
            }
        }
    }
}

#[async_trait]
impl<S, B, E> EventSource for GenerationEvents<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
    E: Into<anyhow::Error> + Send,
{
    async fn next_event(&mut self) -> Result<Option<GenerationEvent>> {
        GenerationEvents::next_event(self).await
    }
}

fn parse_line(line: &[u8]) -> Result<Option<GenerationEvent>> {
    let line = std::str::from_utf8(line)
        .context("Generation stream is not UTF-8")?
        .trim();
    // `event:`, `id:` and comment lines carry nothing the payload doesn't repeat
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let raw: RawEvent = serde_json::from_str(data).context("Malformed generation event")?;
    match raw.kind.as_str() {
        "image_generation.partial_image" => Ok(raw
            .b64_json
            .filter(|b64| !b64.is_empty())
            .map(|b64| GenerationEvent::Partial {
                index: raw.partial_image_index.unwrap_or_default(),
                image: ImageRef::png_base64(b64),
            })),
        "image_generation.completed" => {
            let b64 = raw
                .b64_json
                .filter(|b64| !b64.is_empty())
                .ok_or_else(|| anyhow!("Completed event carried no image"))?;
            Ok(Some(GenerationEvent::Completed {
                image: ImageRef::png_base64(b64),
            }))
        }
        "error" => bail!(
            "Provider error in stream: {}",
            raw.error.unwrap_or(serde_json::Value::Null)
        ),
        other => {
            tracing::debug!("Ignoring generation event {other}");
            Ok(None)
        }
    }
}
