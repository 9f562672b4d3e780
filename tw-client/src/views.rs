//! What each phase puts on screen. Everything here is derived from [`SessionState`].
use tw::basic_models::{CameraMode, ImageRef};

use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// Live camera with the shutter button.
    Capture { enabled: bool },
    /// Scanning overlay typing out the current description.
    Scanning { text: String },
    /// Blurred preview of a partial image under the description.
    Developing { preview: ImageRef, text: String },
    /// The finished recreation, captioned with the description it came from.
    Polaroid { image: ImageRef, caption: String },
}

impl Screen {
    pub fn from_state(state: &SessionState) -> Self {
        match state {
            SessionState::Idle => Screen::Capture { enabled: true },
            SessionState::Cancelled | SessionState::Failed { .. } => {
                Screen::Capture { enabled: false }
            }
            SessionState::Captured { .. } => Screen::Scanning {
                text: String::new(),
            },
            SessionState::Describing { description, .. }
            | SessionState::Generating {
                description,
                partial: None,
                ..
            } => Screen::Scanning {
                text: description.effective().to_string(),
            },
            SessionState::Generating {
                description,
                partial: Some(preview),
                ..
            } => Screen::Developing {
                preview: preview.clone(),
                text: description.effective().to_string(),
            },
            SessionState::Complete {
                image, description, ..
            } => Screen::Polaroid {
                image: image.clone(),
                caption: description.effective().to_string(),
            },
        }
    }
}

/// Reveals text one character per tick.
#[derive(Debug, Clone, Default)]
pub struct TypingText {
    text: String,
    revealed: usize,
}

impl TypingText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            revealed: 0,
        }
    }

    /// Swap in new text. Typing carries on if what is already shown is still a prefix.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.starts_with(self.visible()) {
            self.revealed = 0;
        }
        self.text = text;
    }

    /// Reveal one more character. Returns false once everything is shown.
    pub fn tick(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        self.revealed += 1;
        true
    }

    pub fn visible(&self) -> &str {
        crate::ingestion::truncate_chars(&self.text, self.revealed)
    }

    pub fn is_complete(&self) -> bool {
        self.revealed >= self.text.chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeItem {
    pub mode: CameraMode,
    pub label: &'static str,
    pub selected: bool,
}

/// The mode picker's entries. Landscape lists them bottom-up.
pub fn mode_selector(selected: CameraMode, landscape: bool) -> Vec<ModeItem> {
    let mut items: Vec<ModeItem> = CameraMode::ALL
        .iter()
        .map(|&mode| ModeItem {
            mode,
            label: mode.label(),
            selected: mode == selected,
        })
        .collect();
    if landscape {
        items.reverse();
    }
    items
}
