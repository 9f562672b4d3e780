use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use image::ImageFormat;
use tw::basic_models::ImageRef;

pub mod describe;
pub mod illustrate;
pub mod local;
mod stream;

pub use describe::{DescribeImage, OpenAiDescriber};
pub use illustrate::{build_prompt, GenerateImage, StreamingIllustrator};
pub use local::{generate_local_description, LocalDescription, Orientation};
pub use stream::{EventSource, GenerationEvent, GenerationEvents};

/// A captured photo: JPEG bytes and where the original lives on disk.
#[derive(Clone, PartialEq, Eq)]
pub struct Photo {
    pub path: PathBuf,
    pub jpeg: Vec<u8>,
}

impl std::fmt::Debug for Photo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Photo")
            .field("path", &self.path)
            .field("jpeg", &self.jpeg.len())
            .finish()
    }
}

impl Photo {
    /// Base64 of the JPEG bytes, the form the vision endpoint wants inside a data URL.
    pub fn to_base64(&self) -> String {
        // For the purpose of data urls, you do NOT need to use the URL_SAFE variant
        base64::engine::general_purpose::STANDARD.encode(&self.jpeg)
    }

    pub fn image_ref(&self) -> ImageRef {
        ImageRef::Local(self.path.clone())
    }
}

/// Anything that can produce a photo on demand.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn take_photo(&self) -> Result<Photo>;
}

/// A camera whose shutter returns a still image already on disk.
///
/// Non-JPEG files are re-encoded so the rest of the pipeline only ever sees JPEG.
#[derive(Debug, Clone)]
pub struct StillCamera {
    path: PathBuf,
}

impl StillCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Camera for StillCamera {
    async fn take_photo(&self) -> Result<Photo> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Reading photo {}", self.path.display()))?;
        let jpeg = match image::guess_format(&bytes) {
            Ok(ImageFormat::Jpeg) => bytes,
            _ => tokio::task::spawn_blocking(move || reencode_as_jpeg(&bytes)).await??,
        };
        Ok(Photo {
            path: self.path.clone(),
            jpeg,
        })
    }
}

fn reencode_as_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("Decoding photo")?;
    if u64::from(img.height()) * u64::from(img.width()) > 2 << 20 {
        tracing::warn!(
            "Image is probably larger than it needs to be. ({h}x{w}) Consider resizing.",
            h = img.height(),
            w = img.width()
        );
    }
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img.into_rgb8()).write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

/// The longest prefix of `text` with at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
