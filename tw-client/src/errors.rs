use std::time::Duration;

/// Why a photo description came back empty.
#[derive(thiserror::Error, Debug)]
pub enum DescribeError {
    #[error("Description cancelled")]
    Cancelled,
    #[error("Description refused by content policy: {0}")]
    Refused(String),
    #[error("No description in response")]
    Empty,
    #[error("Description timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Description provider error: {0:#}")]
    Provider(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum GalleryError {
    #[error("Media library permission not granted")]
    PermissionDenied,
    #[error("Invalid image payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("Failed to download {url}: HTTP {status}")]
    Download {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Download error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Media library error: {0:#}")]
    Library(#[from] anyhow::Error),
    #[error("Nothing to save")]
    NothingToSave,
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("A capture is already in progress")]
    Busy,
}
