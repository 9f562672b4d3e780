//! The capture → describe → recreate workflow.
//!
//! One [`CaptureController`] runs at most one session at a time and is the
//! only writer of [`SessionState`]. Views subscribe to the state channel.
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tw::basic_models::{CameraMode, ImageRef};

use crate::errors::{CaptureError, GalleryError};
use crate::gallery::Gallery;
use crate::ingestion::{
    generate_local_description, Camera, DescribeImage, GenerateImage, LocalDescription, Photo,
};

/// The text that drives generation: the local narrative until a remote
/// description arrives, then the remote one for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    local: LocalDescription,
    remote: Option<String>,
}

impl Description {
    pub fn new(local: LocalDescription) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn local(&self) -> &LocalDescription {
        &self.local
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub fn effective(&self) -> &str {
        self.remote.as_deref().unwrap_or(&self.local.full)
    }

    /// Take the remote text if it is non-empty and none was taken before.
    pub fn adopt_remote(&mut self, text: String) -> bool {
        if self.remote.is_some() || text.trim().is_empty() {
            return false;
        }
        self.remote = Some(text);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Phase {
    Idle,
    Captured,
    Describing,
    Generating,
    Complete,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Captured {
        photo: Photo,
    },
    Describing {
        photo: Photo,
        description: Description,
    },
    Generating {
        photo: Photo,
        description: Description,
        partial: Option<ImageRef>,
    },
    Complete {
        photo: Photo,
        description: Description,
        image: ImageRef,
    },
    Cancelled,
    Failed {
        message: String,
    },
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        match self {
            SessionState::Idle => Phase::Idle,
            SessionState::Captured { .. } => Phase::Captured,
            SessionState::Describing { .. } => Phase::Describing,
            SessionState::Generating { .. } => Phase::Generating,
            SessionState::Complete { .. } => Phase::Complete,
            SessionState::Cancelled => Phase::Cancelled,
            SessionState::Failed { .. } => Phase::Failed,
        }
    }

    pub fn description(&self) -> Option<&Description> {
        match self {
            SessionState::Describing { description, .. }
            | SessionState::Generating { description, .. }
            | SessionState::Complete { description, .. } => Some(description),
            _ => None,
        }
    }
}

/// A message for the user, shown once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    fn new(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// How a capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Complete(ImageRef),
    Cancelled,
    Failed,
}

/// Everything the controller talks to. Built once at startup.
#[derive(Clone)]
pub struct Services {
    pub camera: Arc<dyn Camera>,
    pub describer: Arc<dyn DescribeImage>,
    pub illustrator: Arc<dyn GenerateImage>,
    pub gallery: Gallery,
    /// Save the original and the recreation after each successful session.
    pub auto_save: bool,
}

struct ActiveSession {
    id: u64,
    token: CancellationToken,
    /// Result is on screen and only the automatic save is still running.
    saving: bool,
}

impl ActiveSession {
    fn is_live(&self, id: u64) -> bool {
        self.id == id && !self.saving && !self.token.is_cancelled()
    }
}

pub struct CaptureController {
    services: Services,
    state: watch::Sender<SessionState>,
    active: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
    alerts: mpsc::UnboundedSender<Alert>,
}

impl CaptureController {
    /// Returns the controller and the receiving end of its alerts.
    pub fn new(services: Services) -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (alerts, alert_rx) = mpsc::unbounded_channel();
        let controller = Self {
            services,
            state: watch::Sender::new(SessionState::Idle),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            alerts,
        };
        (controller, alert_rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Run one full session. Only allowed from `Idle`.
    pub async fn capture(&self, mode: CameraMode) -> Result<SessionOutcome, CaptureError> {
        let (id, token) = self.begin()?;
        tracing::info!("Session {id} started in {mode} mode");
        let outcome = match self.run(id, &token, mode).await {
            Ok(Some(image)) => SessionOutcome::Complete(image),
            Ok(None) => SessionOutcome::Cancelled,
            Err(err) => {
                if self.fail(id, &err) {
                    SessionOutcome::Failed
                } else {
                    // The user had already walked away
                    SessionOutcome::Cancelled
                }
            }
        };
        tracing::info!("Session {id} ended: {outcome:?}");
        Ok(outcome)
    }

    /// Abort the running session, if any. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        let mut active = self.lock_active();
        if active.as_ref().map_or(true, |session| session.saving) {
            return false;
        }
        let Some(session) = active.take() else {
            return false;
        };
        session.token.cancel();
        self.state.send_replace(SessionState::Cancelled);
        self.state.send_replace(SessionState::Idle);
        tracing::info!("Session {} cancelled", session.id);
        true
    }

    /// Leave whatever is on screen and return to `Idle`, cancelling in-flight
    /// work, automatic saves included.
    pub fn back(&self) {
        let mut active = self.lock_active();
        if let Some(session) = active.take() {
            session.token.cancel();
            tracing::info!("Session {} abandoned", session.id);
        }
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Idle) {
                return false;
            }
            *state = SessionState::Idle;
            true
        });
    }

    /// Save the recreated image now on screen. Failures are reported, not swallowed.
    pub async fn save_current(&self) -> Result<PathBuf, GalleryError> {
        let image = match &*self.state.borrow() {
            SessionState::Complete { image, .. } => image.clone(),
            _ => return Err(GalleryError::NothingToSave),
        };
        let gallery = &self.services.gallery;
        let result = gallery
            .save(&image, "recreated", gallery.permission().await)
            .await;
        let _ = self.alerts.send(match &result {
            Ok(_) => Alert::new("Success", "Image saved to the album"),
            Err(GalleryError::PermissionDenied) => {
                Alert::new("Permission Required", "Please grant permission to save images")
            }
            Err(_) => Alert::new("Error", "Failed to save image. Please try again."),
        });
        result
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Result<(u64, CancellationToken), CaptureError> {
        let mut active = self.lock_active();
        if active.is_some() || !matches!(*self.state.borrow(), SessionState::Idle) {
            return Err(CaptureError::Busy);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *active = Some(ActiveSession {
            id,
            token: token.clone(),
            saving: false,
        });
        Ok((id, token))
    }

    /// Apply `change` to the state if session `id` is still live. The check and
    /// the write happen under the same lock as `cancel`.
    fn update(&self, id: u64, change: impl FnOnce(&mut SessionState) -> bool) -> bool {
        let active = self.lock_active();
        match active.as_ref() {
            Some(session) if session.is_live(id) => {
                self.state.send_if_modified(change);
                true
            }
            _ => false,
        }
    }

    fn publish(&self, id: u64, state: SessionState) -> bool {
        self.update(id, |current| {
            *current = state;
            true
        })
    }

    /// Publish a terminal state and retire the session's token. With
    /// `keep_for_saving` the token stays registered so `back()` can still
    /// stop the automatic save.
    fn end(&self, id: u64, states: &[SessionState], keep_for_saving: bool) -> bool {
        let mut active = self.lock_active();
        match active.as_mut() {
            Some(session) if session.is_live(id) => {
                if keep_for_saving {
                    session.saving = true;
                } else {
                    active.take();
                }
                for state in states {
                    self.state.send_replace(state.clone());
                }
                true
            }
            _ => false,
        }
    }

    fn fail(&self, id: u64, err: &anyhow::Error) -> bool {
        let message = format!("{err:#}");
        if !self.end(
            id,
            &[
                SessionState::Failed {
                    message: message.clone(),
                },
                SessionState::Idle,
            ],
            false,
        ) {
            return false;
        }
        tracing::error!("Session {id} failed: {message}");
        let _ = self.alerts.send(Alert::new(
            "Error",
            "Failed to process image. Please try again.",
        ));
        true
    }

    async fn run(
        &self,
        id: u64,
        token: &CancellationToken,
        mode: CameraMode,
    ) -> Result<Option<ImageRef>> {
        let Services {
            camera,
            describer,
            illustrator,
            ..
        } = &self.services;

        let photo = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(None),
            photo = camera.take_photo() => photo.context("Taking photo")?,
        };
        if !self.publish(id, SessionState::Captured { photo: photo.clone() }) {
            return Ok(None);
        }

        // The remote request goes out before the local narrative is awaited
        let mut remote = {
            let describer = describer.clone();
            let jpeg_base64 = photo.to_base64();
            let token = token.clone();
            tokio::spawn(async move { describer.describe(&jpeg_base64, &token).await })
        };
        let mut description = Description::new(generate_local_description(&photo.path).await);
        if !self.publish(
            id,
            SessionState::Describing {
                photo: photo.clone(),
                description: description.clone(),
            },
        ) {
            remote.abort();
            return Ok(None);
        }

        let remote_text = tokio::select! {
            biased;
            _ = token.cancelled() => {
                remote.abort();
                return Ok(None);
            }
            text = &mut remote => text.unwrap_or_else(|err| {
                tracing::warn!("Description task failed: {err}");
                String::new()
            }),
        };
        if description.adopt_remote(remote_text) {
            tracing::info!("Using remote description");
        } else {
            tracing::info!("Keeping local description");
        }
        if !self.publish(
            id,
            SessionState::Generating {
                photo: photo.clone(),
                description: description.clone(),
                partial: None,
            },
        ) {
            return Ok(None);
        }

        let mut on_partial = |image: ImageRef| {
            self.update(id, |state| match state {
                SessionState::Generating { partial, .. } => {
                    *partial = Some(image);
                    true
                }
                _ => false,
            });
        };
        let Some(image) = illustrator
            .generate(description.effective(), mode, token, &mut on_partial)
            .await?
        else {
            return Ok(None);
        };

        let complete = SessionState::Complete {
            photo: photo.clone(),
            description,
            image: image.clone(),
        };
        let auto_save = self.services.auto_save;
        if !self.end(id, &[complete], auto_save) {
            return Ok(None);
        }
        if auto_save {
            self.auto_save(token, &photo, &image).await;
            self.finish_saving(id);
        }
        Ok(Some(image))
    }

    /// Save the original and the recreation unless the user leaves first.
    async fn auto_save(&self, token: &CancellationToken, photo: &Photo, image: &ImageRef) {
        let gallery = &self.services.gallery;
        let permission = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            permission = gallery.permission() => permission,
        };
        for (image, label) in [(photo.image_ref(), "original"), (image.clone(), "recreated")] {
            if token.is_cancelled() {
                tracing::debug!("Automatic save abandoned before {label} image");
                return;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("Automatic save of {label} image abandoned");
                    return;
                }
                _ = gallery.save_best_effort(&image, label, permission) => {}
            }
        }
    }

    fn finish_saving(&self, id: u64) {
        let mut active = self.lock_active();
        if active
            .as_ref()
            .is_some_and(|session| session.id == id && session.saving)
        {
            active.take();
        }
    }
}
