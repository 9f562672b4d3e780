//! Placeholder narrative shown while the real description is on its way.
//!
//! Everything here is a function of the photo's pixel dimensions, so the same
//! photo always yields the same text.
use std::path::Path;

use anyhow::{ensure, Result};

use super::truncate_chars;

pub const INIT_LINE: &str = "BEGINNING VISUAL ANALYSIS SEQUENCE.";
pub const MAX_CHARS: usize = 3500;
const SQUARE_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDescription {
    /// Header line typed first.
    pub init: String,
    /// The narrative body.
    pub scanning: String,
    /// Header and body together, capped at `MAX_CHARS`.
    pub full: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
    Square,
}

impl Orientation {
    /// Near-square frames count as square. Zero-sized frames have no orientation.
    pub fn classify(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let aspect_ratio = width as f64 / height as f64;
        Some(if (aspect_ratio - 1.0).abs() < SQUARE_TOLERANCE {
            Orientation::Square
        } else if height > width {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        })
    }
}

/// Fill the scanning template for a frame of the given size.
pub fn describe_dimensions(width: u32, height: u32) -> Option<LocalDescription> {
    let orientation = Orientation::classify(width, height)?;
    let scanning = include_str!("../../prompts/local-scan.md")
        .trim()
        .replace("{width}", &width.to_string())
        .replace("{height}", &height.to_string())
        .replace("{orientation}", orientation.as_ref());
    let full = format!("{INIT_LINE} {scanning}");
    Some(LocalDescription {
        init: INIT_LINE.into(),
        scanning,
        full: truncate_chars(&full, MAX_CHARS).into(),
    })
}

/// Used whenever the photo can't be measured.
pub fn fallback() -> LocalDescription {
    let text = truncate_chars(include_str!("../../prompts/local-fallback.md").trim(), MAX_CHARS);
    LocalDescription {
        init: INIT_LINE.into(),
        scanning: text.into(),
        full: text.into(),
    }
}

/// Describe a photo from its header alone. Never fails; unreadable files get the fallback.
pub async fn generate_local_description(path: &Path) -> LocalDescription {
    let owned = path.to_path_buf();
    let measured = tokio::task::spawn_blocking(move || -> Result<(u32, u32)> {
        let (width, height) = image::image_dimensions(&owned)?;
        ensure!(width > 0 && height > 0, "Image has no pixels");
        Ok((width, height))
    })
    .await;
    match measured {
        Ok(Ok((width, height))) => {
            tracing::debug!("Local description for {width}x{height}");
            describe_dimensions(width, height).unwrap_or_else(fallback)
        }
        Ok(Err(err)) => {
            tracing::warn!("Local description falling back: {err:#}");
            fallback()
        }
        Err(err) => {
            tracing::warn!("Local description task failed: {err}");
            fallback()
        }
    }
}
