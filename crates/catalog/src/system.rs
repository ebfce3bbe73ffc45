use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bios::{BiosEntry, BiosRegistry};
use crate::error::{ErrorKind, Result};

/// Stable identifier of an emulated system, e.g. `snes` or `segacd`.
///
/// Identifiers double as folder names below the ROM and BIOS roots, so they
/// are normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SystemId(String);
impl SystemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for SystemId {
    fn from(value: String) -> Self {
        Self(value.trim().to_lowercase())
    }
}
impl From<&str> for SystemId {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}
impl From<SystemId> for String {
    fn from(value: SystemId) -> Self {
        value.0
    }
}
impl AsRef<str> for SystemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
impl Display for SystemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Reference data for one emulated system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub id: SystemId,
    /// Display name, e.g. "Super Nintendo".
    pub name: String,
    /// Recognized file extensions, lowercase and without the leading dot.
    pub extensions: BTreeSet<String>,
    /// Icon reference handed to the UI untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}
impl System {
    pub fn new(id: impl Into<SystemId>, name: impl Into<String>, extensions: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            extensions: extensions.iter().map(|ext| normalize_extension(ext)).collect(),
            icon: None,
        }
    }

    pub fn recognizes(&self, extension: &str) -> bool {
        self.extensions.contains(&normalize_extension(extension))
    }

    /// This system's folder below the ROMs root.
    pub fn roms_dir(&self, roms_root: impl AsRef<Path>) -> PathBuf {
        roms_root.as_ref().join(self.id.as_str())
    }

    /// This system's folder below the BIOS root.
    pub fn bios_dir(&self, bios_root: impl AsRef<Path>) -> PathBuf {
        bios_root.as_ref().join(self.id.as_str())
    }
}

pub(crate) fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Immutable set of known systems plus the BIOS registry that refers to them.
///
/// Construct once from configuration and share as [`SharedCatalog`].
#[derive(Debug, Clone, Default)]
pub struct SystemCatalog {
    systems: Vec<System>,
    bios: BiosRegistry,
}

pub type SharedCatalog = Arc<SystemCatalog>;

impl SystemCatalog {
    /// Builds a catalog, rejecting duplicate identifiers, systems without
    /// extensions and BIOS entries for systems that do not exist.
    pub fn new(systems: impl IntoIterator<Item = System>, bios: impl IntoIterator<Item = BiosEntry>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut list = Vec::new();
        for mut system in systems {
            // Deserialized definitions skip System::new.
            system.extensions = system.extensions.iter().map(|ext| normalize_extension(ext)).filter(|ext| !ext.is_empty()).collect();
            if system.extensions.is_empty() {
                exn::bail!(ErrorKind::NoExtensions(system.id));
            }
            if !seen.insert(system.id.clone()) {
                exn::bail!(ErrorKind::DuplicateSystem(system.id));
            }
            list.push(system);
        }
        let bios: Vec<BiosEntry> = bios.into_iter().collect();
        if let Some(orphan) = bios.iter().find(|entry| !seen.contains(&entry.system)) {
            exn::bail!(ErrorKind::OrphanBios {
                file_name: orphan.file_name.clone(),
                system: orphan.system.clone(),
            });
        }
        tracing::debug!(systems = list.len(), bios = bios.len(), "loaded system catalog");
        Ok(Self { systems: list, bios: BiosRegistry::new(bios) })
    }

    pub fn get(&self, id: &SystemId) -> Option<&System> {
        self.systems.iter().find(|system| &system.id == id)
    }

    /// Like [`get()`](Self::get) but raises [`ErrorKind::UnknownSystem`].
    pub fn require(&self, id: &SystemId) -> Result<&System> {
        self.get(id).ok_or_else(|| exn::Exn::from(ErrorKind::UnknownSystem(id.clone())))
    }

    /// Systems in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &System> {
        self.systems.iter()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn bios(&self) -> &BiosRegistry {
        &self.bios
    }

    /// Every system whose extension set contains `extension` (case-insensitive).
    pub fn systems_for_extension(&self, extension: &str) -> Vec<&System> {
        let extension = normalize_extension(extension);
        self.systems.iter().filter(|system| system.extensions.contains(&extension)).collect()
    }

    /// Candidate system identifiers for a file, derived from its extension.
    pub fn candidates_for(&self, path: impl AsRef<Path>) -> Vec<SystemId> {
        match path.as_ref().extension() {
            Some(ext) => self.systems_for_extension(&ext.to_string_lossy()).into_iter().map(|s| s.id.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Whether any system recognizes the file's extension.
    pub fn recognizes(&self, path: impl AsRef<Path>) -> bool {
        !self.candidates_for(path).is_empty()
    }
}
