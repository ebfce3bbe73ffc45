//! Emulator core hand-off.
//!
//! The pipeline does not run games. It hands a [`LaunchRequest`] to whatever
//! implements [`CoreHelper`] for the frontend in use.

use async_trait::async_trait;
use romport_cache::Game;
use romport_catalog::SystemId;
use std::path::{Path, PathBuf};

/// Which file to load and which system's core should load it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Relative to the library root.
    pub path: PathBuf,
    pub system: SystemId,
}

impl LaunchRequest {
    pub fn from_game(game: &Game) -> Self {
        Self { path: game.path.clone(), system: game.system.clone() }
    }
}

impl From<&Game> for LaunchRequest {
    fn from(game: &Game) -> Self {
        Self::from_game(game)
    }
}

/// Control surface of a running emulator core.
///
/// Every operation can fail; the error type is up to the implementation.
#[async_trait]
pub trait CoreHelper: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load_file(&self, request: &LaunchRequest) -> Result<(), Self::Error>;
    async fn start(&self) -> Result<(), Self::Error>;
    async fn stop(&self) -> Result<(), Self::Error>;
    async fn reset(&self) -> Result<(), Self::Error>;
    async fn pause(&self, paused: bool) -> Result<(), Self::Error>;
    async fn save_state(&self, path: &Path) -> Result<(), Self::Error>;
    async fn load_state(&self, path: &Path) -> Result<(), Self::Error>;
    async fn set_cheat(&self, index: u32, code: &str, enabled: bool) -> Result<(), Self::Error>;
    /// Swap the disc of a multi-disc game; `disc` counts from zero.
    async fn set_disc(&self, disc: u32) -> Result<(), Self::Error>;
    /// Write the current frame as an image to `path`.
    async fn capture_output_image(&self, path: &Path) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use derive_more::{Display, Error};
    use std::sync::Mutex;

    #[derive(Debug, Display, Error)]
    #[display("no game loaded")]
    struct NotLoaded;

    /// Records calls instead of emulating anything.
    #[derive(Default)]
    struct RecordingCore {
        calls: Mutex<Vec<String>>,
        loaded: Mutex<Option<LaunchRequest>>,
    }

    impl RecordingCore {
        fn record(&self, call: impl Into<String>) -> Result<(), NotLoaded> {
            if self.loaded.lock().unwrap().is_none() {
                return Err(NotLoaded);
            }
            self.calls.lock().unwrap().push(call.into());
            Ok(())
        }
    }

    #[async_trait]
    impl CoreHelper for RecordingCore {
        type Error = NotLoaded;

        async fn load_file(&self, request: &LaunchRequest) -> Result<(), NotLoaded> {
            *self.loaded.lock().unwrap() = Some(request.clone());
            Ok(())
        }
        async fn start(&self) -> Result<(), NotLoaded> {
            self.record("start")
        }
        async fn stop(&self) -> Result<(), NotLoaded> {
            self.record("stop")
        }
        async fn reset(&self) -> Result<(), NotLoaded> {
            self.record("reset")
        }
        async fn pause(&self, paused: bool) -> Result<(), NotLoaded> {
            self.record(format!("pause {paused}"))
        }
        async fn save_state(&self, path: &Path) -> Result<(), NotLoaded> {
            self.record(format!("save {}", path.display()))
        }
        async fn load_state(&self, path: &Path) -> Result<(), NotLoaded> {
            self.record(format!("load {}", path.display()))
        }
        async fn set_cheat(&self, index: u32, code: &str, enabled: bool) -> Result<(), NotLoaded> {
            self.record(format!("cheat {index} {code} {enabled}"))
        }
        async fn set_disc(&self, disc: u32) -> Result<(), NotLoaded> {
            self.record(format!("disc {disc}"))
        }
        async fn capture_output_image(&self, path: &Path) -> Result<(), NotLoaded> {
            self.record(format!("capture {}", path.display()))
        }
    }

    #[test]
    fn test_launch_request_from_game() {
        let game = Game::new("cdd3c8c37322978ca8669b34bc89c804", SystemId::from("snes"), "ROMs/snes/smw.sfc");
        let request = LaunchRequest::from(&game);
        assert_eq!(request.path, Path::new("ROMs/snes/smw.sfc"));
        assert_eq!(request.system, SystemId::from("snes"));
    }

    #[tokio::test]
    async fn test_core_requires_loaded_game() {
        let core = RecordingCore::default();
        assert!(core.start().await.is_err());
        let request = LaunchRequest { path: "ROMs/psx/ff7.cue".into(), system: SystemId::from("psx") };
        core.load_file(&request).await.unwrap();
        core.start().await.unwrap();
        core.set_disc(1).await.unwrap();
        core.save_state(Path::new("States/ff7.state")).await.unwrap();
        assert_eq!(*core.calls.lock().unwrap(), ["start", "disc 1", "save States/ff7.state"]);
    }
}
