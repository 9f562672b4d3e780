use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Style applied when recreating a photo.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum CameraMode {
    #[default]
    Realistic,
    SuperAi,
    Cartoon,
    #[strum(serialize = "90s-disposable")]
    #[serde(rename = "90s-disposable")]
    NinetiesDisposable,
}

impl CameraMode {
    /// Modes in selector order.
    pub const ALL: [CameraMode; 4] = [
        CameraMode::Realistic,
        CameraMode::SuperAi,
        CameraMode::Cartoon,
        CameraMode::NinetiesDisposable,
    ];

    /// Parse a mode name, falling back to `Realistic` for anything unknown.
    pub fn parse_lossy(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    pub fn label(&self) -> &'static str {
        match self {
            CameraMode::Realistic => "Photorealistic",
            CameraMode::SuperAi => "Super AI",
            CameraMode::Cartoon => "Cartoon",
            CameraMode::NinetiesDisposable => "Disposable",
        }
    }
}

/// Where an image lives: on disk, behind a URL, or inline as base64.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Local(PathBuf),
    Remote(String),
    Data { mime: String, base64: String },
}

impl std::fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageRef::Local(path) => f.debug_tuple("Local").field(path).finish(),
            ImageRef::Remote(url) => f.debug_tuple("Remote").field(url).finish(),
            ImageRef::Data { mime, base64 } => f
                .debug_struct("Data")
                .field("mime", mime)
                .field("base64", &base64.len())
                .finish(),
        }
    }
}

impl ImageRef {
    /// Wrap a base64 PNG payload, as returned by image generation.
    pub fn png_base64(base64: impl Into<String>) -> Self {
        ImageRef::Data {
            mime: "image/png".into(),
            base64: base64.into(),
        }
    }

    /// Classify a URI string. Anything that is neither a data URI nor http(s) is a path.
    pub fn parse(uri: &str) -> Self {
        if let Some(rest) = uri.strip_prefix("data:") {
            let (header, payload) = rest.split_once(',').unwrap_or(("", rest));
            let mime = header.split(';').next().unwrap_or_default();
            ImageRef::Data {
                mime: if mime.is_empty() { "image/png" } else { mime }.into(),
                base64: payload.into(),
            }
        } else if uri.starts_with("http://") || uri.starts_with("https://") {
            ImageRef::Remote(uri.into())
        } else {
            ImageRef::Local(uri.strip_prefix("file://").unwrap_or(uri).into())
        }
    }

    /// File extension to use when this image has to be written out.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageRef::Data { mime, .. } => match mime.as_str() {
                "image/jpeg" | "image/jpg" => "jpg",
                "image/webp" => "webp",
                _ => "png",
            },
            ImageRef::Remote(_) => "jpg",
            ImageRef::Local(path) => match path.extension().and_then(|e| e.to_str()) {
                Some("jpg") | Some("jpeg") => "jpg",
                Some("webp") => "webp",
                _ => "png",
            },
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageRef::Local(path) => write!(f, "{}", path.display()),
            ImageRef::Remote(url) => f.write_str(url),
            ImageRef::Data { mime, base64 } => write!(f, "data:{mime};base64,{base64}"),
        }
    }
}

/// Whether the app may write to the media library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Undetermined,
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionState::Granted)
    }
}
