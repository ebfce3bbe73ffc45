use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::SystemId;

/// A known BIOS image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiosEntry {
    /// Expected file name, compared case-insensitively.
    pub file_name: String,
    /// Expected lowercase hex MD5. Entries without one match on name alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    pub system: SystemId,
}
impl BiosEntry {
    pub fn new(file_name: impl Into<String>, md5: Option<&str>, system: impl Into<SystemId>) -> Self {
        Self {
            file_name: file_name.into(),
            md5: md5.map(str::to_lowercase),
            system: system.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BiosRegistry {
    entries: Vec<BiosEntry>,
}
impl BiosRegistry {
    pub fn new(entries: impl IntoIterator<Item = BiosEntry>) -> Self {
        Self { entries: entries.into_iter().collect() }
    }

    /// Finds the BIOS entry for a file.
    ///
    /// A digest match wins regardless of name (users rename BIOS dumps all the
    /// time). Otherwise the name must match, and if the entry carries a digest
    /// the file's digest must agree with it.
    pub fn find(&self, path: impl AsRef<Path>, md5: Option<&str>) -> Option<&BiosEntry> {
        let md5 = md5.map(str::to_lowercase);
        if let Some(md5) = md5.as_deref()
            && let Some(entry) = self.entries.iter().find(|entry| entry.md5.as_deref() == Some(md5))
        {
            return Some(entry);
        }
        let name = path.as_ref().file_name()?.to_string_lossy().to_lowercase();
        self.entries.iter().find(|entry| {
            entry.file_name.to_lowercase() == name
                && match (&entry.md5, &md5) {
                    (Some(expected), Some(actual)) => expected == actual,
                    _ => true,
                }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &BiosEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCPH1001: &str = "924e392ed05558ffdb115408c263dccf";

    fn registry() -> BiosRegistry {
        BiosRegistry::new([
            BiosEntry::new("scph1001.bin", Some(SCPH1001), "psx"),
            BiosEntry::new("bios_CD_U.bin", None, "segacd"),
        ])
    }

    #[test]
    fn test_find_by_name_and_digest() {
        let registry = registry();
        let entry = registry.find("Imports/SCPH1001.BIN", Some(SCPH1001)).unwrap();
        assert_eq!(entry.system.as_str(), "psx");
    }

    #[test]
    fn test_find_by_digest_alone() {
        let registry = registry();
        let entry = registry.find("Imports/playstation.bin", Some(&SCPH1001.to_uppercase())).unwrap();
        assert_eq!(entry.system.as_str(), "psx");
    }

    #[test]
    fn test_name_with_wrong_digest_is_not_bios() {
        assert!(registry().find("Imports/scph1001.bin", Some("00000000000000000000000000000000")).is_none());
    }

    #[test]
    fn test_name_only_entry() {
        let registry = registry();
        let entry = registry.find("Imports/bios_cd_u.bin", Some("ffff")).unwrap();
        assert_eq!(entry.system.as_str(), "segacd");
        assert!(registry.find("Imports/game.bin", None).is_none());
    }
}
