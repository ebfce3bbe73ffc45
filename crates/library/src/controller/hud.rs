//! Heads-up display state.
//!
//! Importer and watcher events are folded into one [`HudState`] by pure
//! mapping functions; [`Hud`] applies the result and owns the hide timer.

use crate::import::ImportEvent;
use crate::watch::WatchEvent;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// What the UI shows over the library.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HudState {
    #[default]
    Hidden,
    Title(String),
    /// Progress is in `[0, 1]`.
    TitleAndProgress(String, f32),
}

/// How an event changes the HUD.
#[derive(Debug, Clone, PartialEq)]
pub enum HudUpdate {
    /// Show until something else replaces it.
    Show(HudState),
    /// Show, then hide after the delay unless replaced first.
    ShowThenHide(HudState),
    /// Keep showing the current state, then hide after the delay.
    HideLater,
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string())
}

/// HUD change for an importer event, if any.
///
/// A finished batch hides the HUD after the usual delay instead of leaving
/// "Import Successful" on screen until the next event comes along.
pub fn from_import_event(event: &ImportEvent) -> Option<HudUpdate> {
    match event {
        ImportEvent::Started(path) => {
            Some(HudUpdate::Show(HudState::Title(format!("Checking Import: {}", file_name(path)))))
        },
        ImportEvent::Finished { .. } => Some(HudUpdate::Show(HudState::Title("Import Successful".to_string()))),
        ImportEvent::Completed { .. } => Some(HudUpdate::HideLater),
        ImportEvent::Initialized | ImportEvent::FinishedArtwork(_) => None,
    }
}

pub fn from_watch_event(event: &WatchEvent) -> Option<HudUpdate> {
    let extracting = |path: &Path| format!("Extracting Archive\n{}", file_name(path));
    match event {
        WatchEvent::Started { path } => Some(HudUpdate::Show(HudState::TitleAndProgress(extracting(path), 0.0))),
        WatchEvent::Updated { path, progress } => {
            Some(HudUpdate::Show(HudState::TitleAndProgress(extracting(path), progress.clamp(0.0, 1.0))))
        },
        WatchEvent::Completed { extracted, .. } => {
            let title = if extracted.is_some() { "Extraction Complete!" } else { "Extraction Failed." };
            Some(HudUpdate::ShowThenHide(HudState::TitleAndProgress(title.to_string(), 1.0)))
        },
        WatchEvent::AllExtracted(_) => None,
    }
}

/// Publishes the HUD state and tracks when it should disappear.
///
/// Any update cancels a pending hide; only the latest one decides when the
/// HUD goes away.
pub struct Hud {
    state: watch::Sender<HudState>,
    hide_delay: Duration,
    hide_at: Option<Instant>,
}

impl Hud {
    pub fn new(hide_delay: Duration) -> Self {
        let (state, _) = watch::channel(HudState::Hidden);
        Self { state, hide_delay, hide_at: None }
    }

    pub fn subscribe(&self) -> watch::Receiver<HudState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> HudState {
        self.state.borrow().clone()
    }

    pub fn apply(&mut self, update: HudUpdate) {
        self.hide_at = None;
        match update {
            HudUpdate::Show(state) => self.show(state),
            HudUpdate::ShowThenHide(state) => {
                self.show(state);
                self.hide_at = Some(Instant::now() + self.hide_delay);
            },
            HudUpdate::HideLater => {
                if *self.state.borrow() != HudState::Hidden {
                    self.hide_at = Some(Instant::now() + self.hide_delay);
                }
            },
        }
    }

    fn show(&self, state: HudState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    pub fn is_hiding(&self) -> bool {
        self.hide_at.is_some()
    }

    /// Resolves when the pending hide is due; never, if there is none.
    pub async fn hide_due(&self) {
        match self.hide_at {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    pub fn hide(&mut self) {
        self.hide_at = None;
        self.show(HudState::Hidden);
    }
}
