//! Saving images into the photo library album.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use tw::basic_models::{ImageRef, PermissionState};

use crate::config::GalleryConfig;
use crate::errors::GalleryError;

/// The device photo library, reduced to what the app needs from it.
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn permission(&self) -> PermissionState;

    /// Ask for write access. Returns the state after asking.
    async fn request_permission(&self) -> PermissionState;

    /// Import a local file into `album`, creating the album on first use.
    /// Returns where the asset now lives.
    async fn import(&self, file: &Path, album: &str) -> Result<PathBuf>;
}

/// A media library made of album directories under one pictures root.
#[derive(Debug, Clone)]
pub struct AlbumDirectory {
    root: PathBuf,
}

impl AlbumDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl MediaLibrary for AlbumDirectory {
    async fn permission(&self) -> PermissionState {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => {
                PermissionState::Granted
            }
            Ok(_) => PermissionState::Denied,
            Err(_) => PermissionState::Undetermined,
        }
    }

    async fn request_permission(&self) -> PermissionState {
        match tokio::fs::create_dir_all(&self.root).await {
            Ok(()) => self.permission().await,
            Err(err) => {
                tracing::warn!("Cannot create {}: {err}", self.root.display());
                PermissionState::Denied
            }
        }
    }

    async fn import(&self, file: &Path, album: &str) -> Result<PathBuf> {
        let album_dir = self.root.join(album);
        tokio::fs::create_dir_all(&album_dir)
            .await
            .with_context(|| format!("Creating album {}", album_dir.display()))?;
        let name = file
            .file_name()
            .with_context(|| format!("{} is not a file", file.display()))?;
        let mut dest = album_dir.join(name);
        if tokio::fs::try_exists(&dest).await? {
            dest = album_dir.join(format!(
                "{}-{}",
                chrono::Utc::now().timestamp_millis(),
                name.to_string_lossy()
            ));
        }
        tokio::fs::copy(file, &dest)
            .await
            .with_context(|| format!("Copying {} into {}", file.display(), album))?;
        Ok(dest)
    }
}

/// Puts any kind of image reference into the album.
#[derive(Clone)]
pub struct Gallery {
    library: Arc<dyn MediaLibrary>,
    http: reqwest::Client,
    scratch_dir: PathBuf,
    album: String,
}

impl Gallery {
    pub fn new(
        config: &GalleryConfig,
        library: Arc<dyn MediaLibrary>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            library,
            http,
            scratch_dir: config.scratch_dir.clone(),
            album: config.album.clone(),
        }
    }

    pub async fn permission(&self) -> PermissionState {
        self.library.permission().await
    }

    /// Save an image, reporting any failure. Used when the user asks to save.
    pub async fn save(
        &self,
        image: &ImageRef,
        label: &str,
        permission: PermissionState,
    ) -> Result<PathBuf, GalleryError> {
        if !permission.is_granted() && !self.library.request_permission().await.is_granted() {
            return Err(GalleryError::PermissionDenied);
        }
        let file = self.to_local_file(image, label).await?;
        let asset = self.library.import(&file, &self.album).await?;
        tracing::info!("{label} image saved to {}", self.album);
        Ok(asset)
    }

    /// Save an image, logging instead of failing. Used for automatic saves.
    pub async fn save_best_effort(
        &self,
        image: &ImageRef,
        label: &str,
        permission: PermissionState,
    ) -> Option<PathBuf> {
        match self.save(image, label, permission).await {
            Ok(asset) => Some(asset),
            Err(err) => {
                tracing::warn!("Failed to save {label} image: {err}");
                None
            }
        }
    }

    /// Make sure the image is a file on disk, writing or downloading it if needed.
    async fn to_local_file(&self, image: &ImageRef, label: &str) -> Result<PathBuf, GalleryError> {
        match image {
            ImageRef::Local(path) => Ok(path.clone()),
            ImageRef::Data { base64, .. } => {
                let bytes = base64::engine::general_purpose::STANDARD.decode(base64)?;
                let path = self.scratch_path(label, image.extension()).await?;
                tokio::fs::write(&path, bytes).await?;
                tracing::debug!("Wrote data URI to {}", path.display());
                Ok(path)
            }
            ImageRef::Remote(url) => {
                let response = self.http.get(url).send().await?;
                let status = response.status();
                if status != reqwest::StatusCode::OK {
                    return Err(GalleryError::Download {
                        url: url.clone(),
                        status,
                    });
                }
                let bytes = response.bytes().await?;
                let path = self.scratch_path(label, image.extension()).await?;
                tokio::fs::write(&path, &bytes).await?;
                tracing::debug!("Downloaded {url} to {}", path.display());
                Ok(path)
            }
        }
    }

    async fn scratch_path(&self, label: &str, extension: &str) -> Result<PathBuf, GalleryError> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        Ok(self.scratch_dir.join(format!(
            "{label}-{}.{extension}",
            chrono::Utc::now().timestamp_millis()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{direct_http, serve_once, RecordingLibrary};

    fn gallery_in(scratch: &Path, library: Arc<dyn MediaLibrary>) -> Gallery {
        let config = GalleryConfig {
            album: "Thousand Words".into(),
            pictures_dir: scratch.join("unused"),
            scratch_dir: scratch.to_path_buf(),
            auto_save: true,
        };
        Gallery::new(&config, library, direct_http())
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn data_uris_are_written_once_then_imported() {
        let scratch = tempfile::tempdir().unwrap();
        let library = Arc::new(RecordingLibrary::granted());
        let gallery = gallery_in(scratch.path(), library.clone());

        let image = ImageRef::parse("data:image/png;base64,aGVsbG8=");
        gallery
            .save(&image, "recreated", PermissionState::Granted)
            .await
            .unwrap();

        assert_eq!(files_in(scratch.path()), 1);
        let imports = library.imports();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].1, "Thousand Words");
        assert_eq!(std::fs::read(&imports[0].0).unwrap(), b"hello");
        let name = imports[0].0.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("recreated-") && name.ends_with(".png"));
    }

    #[tokio::test]
    async fn local_files_are_imported_directly() {
        let scratch = tempfile::tempdir().unwrap();
        let photos = tempfile::tempdir().unwrap();
        let photo = photos.path().join("original.jpg");
        std::fs::write(&photo, b"jpeg").unwrap();
        let library = Arc::new(RecordingLibrary::granted());
        let gallery = gallery_in(scratch.path(), library.clone());

        gallery
            .save(&ImageRef::Local(photo.clone()), "original", PermissionState::Granted)
            .await
            .unwrap();

        assert_eq!(files_in(scratch.path()), 0);
        assert_eq!(library.imports(), vec![(photo, "Thousand Words".to_string())]);
    }

    #[tokio::test]
    async fn remote_images_are_downloaded_once_then_imported() {
        let scratch = tempfile::tempdir().unwrap();
        let library = Arc::new(RecordingLibrary::granted());
        let gallery = gallery_in(scratch.path(), library.clone());
        let (url, server) = serve_once("200 OK", "image/jpeg", b"jpeg bytes".to_vec()).await;

        let image = ImageRef::parse(&format!("{url}/generated/shot.jpg"));
        assert!(matches!(image, ImageRef::Remote(_)));
        gallery
            .save(&image, "recreated", PermissionState::Granted)
            .await
            .unwrap();

        assert!(server.await.unwrap().starts_with("GET /generated/shot.jpg "));
        assert_eq!(files_in(scratch.path()), 1);
        let imports = library.imports();
        assert_eq!(imports.len(), 1);
        assert_eq!(std::fs::read(&imports[0].0).unwrap(), b"jpeg bytes");
        let name = imports[0].0.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("recreated-") && name.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn failed_downloads_are_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let library = Arc::new(RecordingLibrary::granted());
        let gallery = gallery_in(scratch.path(), library.clone());
        let (url, _server) = serve_once("404 Not Found", "text/plain", "gone").await;

        let result = gallery
            .save(
                &ImageRef::Remote(format!("{url}/missing.jpg")),
                "recreated",
                PermissionState::Granted,
            )
            .await;
        match result {
            Err(GalleryError::Download { status, .. }) => {
                assert_eq!(status, reqwest::StatusCode::NOT_FOUND)
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(library.imports().is_empty());
        assert_eq!(files_in(scratch.path()), 0);
    }

    #[tokio::test]
    async fn asks_for_permission_once_and_respects_refusal() {
        let scratch = tempfile::tempdir().unwrap();
        let library = Arc::new(RecordingLibrary::refusing());
        let gallery = gallery_in(scratch.path(), library.clone());
        let image = ImageRef::png_base64("aGVsbG8=");

        let result = gallery.save(&image, "recreated", PermissionState::Undetermined).await;
        assert!(matches!(result, Err(GalleryError::PermissionDenied)));
        assert_eq!(library.permission_requests(), 1);
        assert!(library.imports().is_empty());
        assert_eq!(files_in(scratch.path()), 0);

        assert_eq!(
            gallery
                .save_best_effort(&image, "recreated", PermissionState::Denied)
                .await,
            None
        );
    }

    #[tokio::test]
    async fn bad_payloads_are_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let library = Arc::new(RecordingLibrary::granted());
        let gallery = gallery_in(scratch.path(), library.clone());
        let result = gallery
            .save(&ImageRef::png_base64("***"), "recreated", PermissionState::Granted)
            .await;
        assert!(matches!(result, Err(GalleryError::Decode(_))));
        assert!(library.imports().is_empty());
    }

    #[tokio::test]
    async fn album_directory_creates_album_on_first_import() {
        let pictures = tempfile::tempdir().unwrap();
        let root = pictures.path().join("Pictures");
        let library = AlbumDirectory::new(&root);
        assert_eq!(library.permission().await, PermissionState::Undetermined);
        assert_eq!(library.request_permission().await, PermissionState::Granted);

        let source = pictures.path().join("shot.png");
        std::fs::write(&source, b"png").unwrap();
        let first = library.import(&source, "Thousand Words").await.unwrap();
        let second = library.import(&source, "Thousand Words").await.unwrap();

        assert_eq!(first, root.join("Thousand Words").join("shot.png"));
        assert_ne!(first, second);
        assert_eq!(files_in(&root.join("Thousand Words")), 2);
    }
}
