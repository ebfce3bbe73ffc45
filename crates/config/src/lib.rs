//! Layered configuration for romport.
//!
//! Sources, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. `config.toml`, `config.yaml` and `config.json` in the platform config
//!    directory
//! 3. An explicit file passed on the command line
//! 4. `ROMPORT_` environment variables, with `__` separating nested keys
//!    (`ROMPORT_LIBRARY__ROOT=/srv/roms`)

mod defaults;
pub mod error;

use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use romport_catalog::{BiosEntry, System, SystemCatalog, SystemId};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

pub const ENV_PREFIX: &str = "ROMPORT_";
const CONFIG_STEM: &str = "config";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "romport")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub systems: Vec<System>,
    pub bios: Vec<BiosEntry>,
    pub hud: HudConfig,
    pub watcher: WatcherConfig,
    pub importer: ImporterConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            library: LibraryConfig::default(),
            systems: defaults::systems(),
            bios: defaults::bios(),
            hud: HudConfig::default(),
            watcher: WatcherConfig::default(),
            importer: ImporterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Absolute path of the library root.
    pub root: PathBuf,
    pub layout: Layout,
}
impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: project_dirs().map(|dirs| dirs.data_dir().join("library")).unwrap_or_default(),
            layout: Layout::default(),
        }
    }
}

/// Folder layout below the library root. Every entry is relative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub imports: PathBuf,
    pub roms: PathBuf,
    pub bios: PathBuf,
    pub conflicts: PathBuf,
    pub artwork: PathBuf,
    /// Game database file.
    pub database: PathBuf,
}
impl Default for Layout {
    fn default() -> Self {
        Self {
            imports: PathBuf::from("Imports"),
            roms: PathBuf::from("ROMs"),
            bios: PathBuf::from("BIOS"),
            conflicts: PathBuf::from("Conflicts"),
            artwork: PathBuf::from("Artwork"),
            database: PathBuf::from("games.sqlite"),
        }
    }
}
impl Layout {
    pub fn roms_dir(&self, system: &System) -> PathBuf {
        system.roms_dir(&self.roms)
    }

    pub fn bios_dir(&self, system: &System) -> PathBuf {
        system.bios_dir(&self.bios)
    }

    /// Folders the library creates on startup.
    pub fn folders(&self) -> [(&'static str, &Path); 5] {
        [
            ("imports", self.imports.as_path()),
            ("roms", self.roms.as_path()),
            ("bios", self.bios.as_path()),
            ("conflicts", self.conflicts.as_path()),
            ("artwork", self.artwork.as_path()),
        ]
    }

    fn validate(&self) -> Result<()> {
        let entries = self.folders().into_iter().chain([("database", self.database.as_path())]);
        for (name, path) in entries {
            let escapes = path.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if path.as_os_str().is_empty() || escapes {
                exn::bail!(ErrorKind::InvalidLayout { name, path: path.to_path_buf() });
            }
        }
        let folders = self.folders();
        for (i, &(a_name, a)) in folders.iter().enumerate() {
            for &(b_name, b) in folders.iter().skip(i + 1) {
                if a.starts_with(b) || b.starts_with(a) {
                    exn::bail!(ErrorKind::OverlappingLayout(a_name, b_name));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HudConfig {
    /// How long a finished extraction stays on screen.
    pub hide_delay_ms: u64,
}
impl Default for HudConfig {
    fn default() -> Self {
        Self { hide_delay_ms: 500 }
    }
}
impl HudConfig {
    pub fn hide_delay(&self) -> Duration {
        Duration::from_millis(self.hide_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// An archive is extracted once it has seen no filesystem events for
    /// this long, so half-copied files are left alone.
    pub stabilization_ms: u64,
    /// How often pending archives are checked for stability.
    pub tick_ms: u64,
}
impl Default for WatcherConfig {
    fn default() -> Self {
        Self { stabilization_ms: 500, tick_ms: 100 }
    }
}
impl WatcherConfig {
    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// When several systems match, ask the metadata lookup which one the
    /// digest belongs to before declaring a conflict.
    pub disambiguate_by_hash: bool,
    /// Download artwork for games whose metadata carries an artwork URL.
    pub download_artwork: bool,
}
impl Default for ImporterConfig {
    fn default() -> Self {
        Self { disambiguate_by_hash: false, download_artwork: true }
    }
}

impl Config {
    /// The full provider stack, without extraction or validation.
    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dirs) = project_dirs() {
            let dir = dirs.config_dir();
            figment = figment
                .merge(Toml::file(dir.join(CONFIG_STEM).with_extension("toml")))
                .merge(Yaml::file(dir.join(CONFIG_STEM).with_extension("yaml")))
                .merge(Json::file(dir.join(CONFIG_STEM).with_extension("json")));
        }
        if let Some(path) = explicit {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates configuration from every source.
    ///
    /// An explicit file that does not exist is an error; missing files in the
    /// platform config directory are not.
    #[instrument(skip(explicit), fields(explicit = ?explicit))]
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit
            && !path.is_file()
        {
            exn::bail!(ErrorKind::Load(format!("config file not found: {}", path.display())));
        }
        Self::from_figment(Self::figment(explicit))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        config.validate()?;
        tracing::debug!(root = %config.library.root.display(), systems = config.systems.len(), "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.library.root.is_absolute() {
            exn::bail!(ErrorKind::RelativeRoot(self.library.root.clone()));
        }
        self.library.layout.validate()?;
        for system in &self.systems {
            for extension in &system.extensions {
                let extension = extension.trim().trim_start_matches('.').to_lowercase();
                if romport_compress::is_archive(format!("file.{extension}")) {
                    exn::bail!(ErrorKind::ArchiveExtension { system: system.id.clone(), extension });
                }
            }
        }
        // Duplicate ids, empty extension sets and orphaned BIOS entries.
        self.catalog()?;
        Ok(())
    }

    pub fn catalog(&self) -> Result<SystemCatalog> {
        SystemCatalog::new(self.systems.clone(), self.bios.clone()).or_raise(|| ErrorKind::InvalidSystems)
    }

    pub fn system(&self, id: &SystemId) -> Option<&System> {
        self.systems.iter().find(|system| &system.id == id)
    }

    /// Absolute path of the game database.
    pub fn database_path(&self) -> PathBuf {
        self.library.root.join(&self.library.layout.database)
    }
}
